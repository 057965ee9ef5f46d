//! Component instances.
//!
//! An instance is created empty by an instantiation and populated as the
//! definitions resolve in source order. It owns the authoritative table of
//! lowered resource handles and enforces the boundary discipline: single
//! active entry, no exit with outstanding borrows, no re-entry while a
//! lowering is in flight.

use log::trace;

use crate::component::ComponentVal;
use crate::context::Context;
use crate::definitions::Sort;
use crate::engine::CoreModuleVal;
use crate::prelude::*;
use crate::resources::Handle;
use crate::types::{FuncType, InstanceType, ResourceType, Type};
use crate::values::Value;

/// The declared shape of one instance export
#[derive(Debug, Clone)]
pub struct ExportSpec {
    /// Sort of the exported definition
    pub sort: Sort,
    /// Exported type
    pub ty: Type,
}

/// A callable component-level function
#[derive(Clone)]
pub struct ComponentFunc {
    ty: Rc<FuncType>,
    body: Rc<dyn Fn(Vec<Value>) -> Result<Vec<Value>>>,
}

impl ComponentFunc {
    /// Wrap a callable with its component function type
    pub fn new(
        ty: Rc<FuncType>,
        body: impl Fn(Vec<Value>) -> Result<Vec<Value>> + 'static,
    ) -> Self {
        Self { ty, body: Rc::new(body) }
    }

    /// The function's type
    pub fn func_type(&self) -> &Rc<FuncType> {
        &self.ty
    }

    /// Invoke with component values; arity is checked against the type
    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        if args.len() != self.ty.params.len() {
            return Err(Error::function_call_failed(format!(
                "component call expects {} arguments, got {}",
                self.ty.params.len(),
                args.len()
            )));
        }
        (self.body)(args)
    }
}

impl Debug for ComponentFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentFunc({} params)", self.ty.params.len())
    }
}

/// A component-level extern value: what crosses `instantiate` in both
/// directions
#[derive(Debug, Clone)]
pub enum ComponentExtern {
    /// A component function
    Func(ComponentFunc),
    /// A type
    Type(Type),
    /// An instance
    Instance(Rc<Instance>),
    /// A component
    Component(ComponentVal),
    /// A core module
    CoreModule(CoreModuleVal),
}

impl ComponentExtern {
    /// Short kind name for messages
    pub fn kind(&self) -> &'static str {
        match self {
            ComponentExtern::Func(_) => "func",
            ComponentExtern::Type(_) => "type",
            ComponentExtern::Instance(_) => "instance",
            ComponentExtern::Component(_) => "component",
            ComponentExtern::CoreModule(_) => "core module",
        }
    }

    /// The type of the carried value
    pub fn extern_type(&self) -> Result<Type> {
        match self {
            ComponentExtern::Func(f) => Ok(Type::Func(f.func_type().clone())),
            ComponentExtern::Type(t) => Ok(t.clone()),
            ComponentExtern::Instance(i) => Ok(Type::Instance(i.instance_type()?)),
            ComponentExtern::Component(c) => Ok(Type::Component(c.component.component_type()?)),
            ComponentExtern::CoreModule(m) => Ok(Type::CoreModule(m.ty.clone())),
        }
    }
}

/// A live component instance
pub struct Instance {
    id: u64,
    exports: RefCell<BTreeMap<String, ComponentExtern>>,
    export_specs: RefCell<BTreeMap<String, ExportSpec>>,
    active: Cell<bool>,
    may_leave: Cell<bool>,
    borrow_count: Cell<u32>,
    lowered_handles: RefCell<Table<Handle>>,
}

impl Instance {
    /// Create an empty instance
    pub fn new(cx: &Context) -> Rc<Self> {
        Rc::new(Self {
            id: cx.next_instance_id(),
            exports: RefCell::new(BTreeMap::new()),
            export_specs: RefCell::new(BTreeMap::new()),
            active: Cell::new(false),
            may_leave: Cell::new(true),
            borrow_count: Cell::new(0),
            lowered_handles: RefCell::new(Table::new()),
        })
    }

    /// The instance id, unique per context
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Look up an export value by name
    pub fn export(&self, name: &str) -> Option<ComponentExtern> {
        self.exports.borrow().get(name).cloned()
    }

    /// Look up an export's declared shape by name
    pub fn export_spec(&self, name: &str) -> Option<ExportSpec> {
        self.export_specs.borrow().get(name).cloned()
    }

    /// Export names in sorted order
    pub fn export_names(&self) -> Vec<String> {
        self.exports.borrow().keys().cloned().collect()
    }

    /// Add an export; later additions under the same name are rejected
    pub fn add_export(
        &self,
        name: &str,
        value: ComponentExtern,
        spec: ExportSpec,
    ) -> Result<()> {
        let mut exports = self.exports.borrow_mut();
        if exports.contains_key(name) {
            return Err(Error::duplicate_name(format!(
                "instance already exports `{name}`"
            )));
        }
        exports.insert(name.to_string(), value);
        self.export_specs
            .borrow_mut()
            .insert(name.to_string(), spec);
        Ok(())
    }

    /// The instance type derived from the declared export shapes
    pub fn instance_type(&self) -> Result<Rc<InstanceType>> {
        let exports = self
            .export_specs
            .borrow()
            .iter()
            .map(|(name, spec)| (name.clone(), spec.ty.clone()))
            .collect();
        InstanceType::new(exports)
    }

    /// Whether a lifted call is currently executing inside this instance
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Enter the instance for a lifted call; re-entry is an error
    pub fn enter(&self) -> Result<()> {
        if self.active.get() {
            return Err(Error::instance_active(format!(
                "instance {} is already active",
                self.id
            )));
        }
        trace!("entering instance {}", self.id);
        self.active.set(true);
        Ok(())
    }

    /// Exit the instance; rejected while borrows are outstanding
    pub fn exit(&self) -> Result<()> {
        if self.borrow_count.get() > 0 {
            return Err(Error::handle_misuse(format!(
                "instance {} exits with {} borrows outstanding",
                self.id,
                self.borrow_count.get()
            )));
        }
        trace!("exiting instance {}", self.id);
        self.active.set(false);
        Ok(())
    }

    /// Current borrow counter
    pub fn borrow_count(&self) -> u32 {
        self.borrow_count.get()
    }

    /// Adjust the borrow counter from handle lend/release
    pub fn adjust_borrow_count(&self, delta: i32) {
        let current = self.borrow_count.get();
        let next = if delta >= 0 {
            current.saturating_add(delta as u32)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        self.borrow_count.set(next);
    }

    /// Error out when the instance must not be left (mid-lowering)
    pub fn check_leave(&self) -> Result<()> {
        if !self.may_leave.get() {
            return Err(Error::cannot_leave(format!(
                "instance {} cannot be left while a lowering is in flight",
                self.id
            )));
        }
        Ok(())
    }

    /// Run `f` with leaving forbidden, restoring the previous state after
    pub fn with_leave_forbidden<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let previous = self.may_leave.get();
        self.may_leave.set(false);
        let out = f();
        self.may_leave.set(previous);
        out
    }

    /// Insert a lowered handle, returning its table index
    pub fn lower_handle(&self, handle: Handle) -> Result<u32> {
        self.lowered_handles.borrow_mut().add(handle)
    }

    /// Read a lowered handle without removing it, asserting its type
    pub fn read_handle(&self, idx: u32, expected: &Rc<ResourceType>) -> Result<Handle> {
        let table = self.lowered_handles.borrow();
        let handle = table.get(idx)?;
        if !ResourceType::same_identity(handle.ty(), expected) {
            return Err(Error::handle_misuse(format!(
                "handle {idx} has a different resource type"
            )));
        }
        Ok(handle.clone())
    }

    /// Remove a lowered handle, asserting its type
    pub fn take_handle(&self, idx: u32, expected: &Rc<ResourceType>) -> Result<Handle> {
        let mut table = self.lowered_handles.borrow_mut();
        {
            let handle = table.get(idx)?;
            if !ResourceType::same_identity(handle.ty(), expected) {
                return Err(Error::handle_misuse(format!(
                    "handle {idx} has a different resource type"
                )));
            }
        }
        table.remove(idx)
    }

    /// Whether a lowered handle is present at `idx`
    pub fn has_handle(&self, idx: u32) -> bool {
        self.lowered_handles.borrow().contains(idx)
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .field("borrow_count", &self.borrow_count.get())
            .field("exports", &self.export_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CoreEngine;
    use crate::types::RepKind;

    struct NoEngine;
    impl CoreEngine for NoEngine {
        fn compile(&self, _: &[u8]) -> Result<Rc<dyn crate::engine::CompiledModule>> {
            Err(Error::runtime_error("no engine"))
        }
        fn instantiate(
            &self,
            _: &Rc<dyn crate::engine::CompiledModule>,
            _: &str,
            _: &mut dyn crate::engine::ImportResolver,
        ) -> Result<Rc<dyn crate::engine::ModuleInstanceHandle>> {
            Err(Error::runtime_error("no engine"))
        }
    }

    fn test_cx() -> Context {
        Context::new(Rc::new(NoEngine))
    }

    #[test]
    fn enter_exit_discipline() {
        let cx = test_cx();
        let inst = Instance::new(&cx);
        inst.enter().unwrap();
        assert!(inst.enter().is_err());
        inst.exit().unwrap();
        inst.enter().unwrap();
        inst.exit().unwrap();
    }

    #[test]
    fn exit_rejected_with_borrows() {
        let cx = test_cx();
        let inst = Instance::new(&cx);
        inst.enter().unwrap();
        inst.adjust_borrow_count(1);
        assert!(inst.exit().is_err());
        inst.adjust_borrow_count(-1);
        inst.exit().unwrap();
    }

    #[test]
    fn leave_guard_restores() {
        let cx = test_cx();
        let inst = Instance::new(&cx);
        inst.check_leave().unwrap();
        let result: Result<()> = inst.with_leave_forbidden(|| {
            assert!(inst.check_leave().is_err());
            Ok(())
        });
        result.unwrap();
        inst.check_leave().unwrap();
    }

    #[test]
    fn handle_table_type_discipline() {
        let cx = test_cx();
        let inst = Instance::new(&cx);
        let r1 = ResourceType::fresh(RepKind::U32);
        let r2 = ResourceType::fresh(RepKind::U32);
        let own = crate::resources::OwnedHandle::new(
            r1.clone(),
            crate::resources::HandleRep::U32(5),
        )
        .unwrap();
        let idx = inst.lower_handle(Handle::Own(own)).unwrap();
        assert!(inst.read_handle(idx, &r2).is_err());
        let handle = inst.take_handle(idx, &r1).unwrap();
        assert!(!handle.is_borrowed());
        assert!(inst.take_handle(idx, &r1).is_err());
    }
}
