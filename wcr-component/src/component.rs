//! Top-level components.
//!
//! A component is a definition scope plus its declared imports and exports.
//! Instantiation creates an instance scope, eagerly resolves every
//! definition in declared order (so side effects happen in source order),
//! then materialises the exports into the new instance.

use log::debug;

use crate::context::Context;
use crate::definitions::{
    static_extern_type, DefinitionScope, InstanceScope, SortIdx, TypeEvalCx,
};
use crate::instance::{ComponentExtern, ExportSpec, Instance};
use crate::prelude::*;
use crate::type_check::TypeChecker;
use crate::types::{ComponentType, Type};

/// One declared export of a component
#[derive(Debug, Clone)]
pub struct ComponentExport {
    /// Export name
    pub name: String,
    /// The exported definition
    pub sort_idx: SortIdx,
    /// Ascribed type, when the export declaration carried one
    pub ascribed: Option<Type>,
}

/// A built component, ready to instantiate
pub struct Component {
    id: u64,
    scope: Rc<DefinitionScope>,
    imports: Vec<(String, SortIdx)>,
    exports: Vec<ComponentExport>,
    type_memo: RefCell<Option<Rc<ComponentType>>>,
}

/// A component value: the component plus the instance scope it closed over
/// at its definition site
#[derive(Clone)]
pub struct ComponentVal {
    /// The component definition
    pub component: Rc<Component>,
    /// The defining environment; `None` for top-level built components
    pub env: Option<Rc<InstanceScope>>,
}

impl Debug for ComponentVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVal")
            .field("component", &self.component.id)
            .field("closed_over", &self.env.is_some())
            .finish()
    }
}

impl Component {
    /// Assemble a component; used by the builder
    pub(crate) fn new(
        cx: &Context,
        scope: Rc<DefinitionScope>,
        imports: Vec<(String, SortIdx)>,
        exports: Vec<ComponentExport>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: cx.next_instance_id(),
            scope,
            imports,
            exports,
            type_memo: RefCell::new(None),
        })
    }

    /// The component's id, unique per context
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The component's definition scope
    pub fn scope(&self) -> &Rc<DefinitionScope> {
        &self.scope
    }

    /// The declared imports as `(name, type)` pairs
    pub fn imports(&self) -> Result<Vec<(String, Type)>> {
        let mut tcx = TypeEvalCx::new_static();
        self.imports
            .iter()
            .map(|(name, si)| {
                Ok((
                    name.clone(),
                    static_extern_type(&mut tcx, &self.scope, *si)?,
                ))
            })
            .collect()
    }

    /// The declared exports as `(name, type)` pairs
    pub fn exports(&self) -> Result<Vec<(String, Type)>> {
        let mut tcx = TypeEvalCx::new_static();
        self.exports
            .iter()
            .map(|export| {
                let ty = match &export.ascribed {
                    Some(ty) => ty.clone(),
                    None => static_extern_type(&mut tcx, &self.scope, export.sort_idx)?,
                };
                Ok((export.name.clone(), ty))
            })
            .collect()
    }

    /// The component's own type: declared imports and exports
    pub fn component_type(&self) -> Result<Rc<ComponentType>> {
        if let Some(ty) = self.type_memo.borrow().as_ref() {
            return Ok(ty.clone());
        }
        let ty = ComponentType::new(self.imports()?, self.exports()?)?;
        *self.type_memo.borrow_mut() = Some(ty.clone());
        Ok(ty)
    }

    /// Instantiate with host-supplied arguments
    pub fn instantiate(
        self: &Rc<Self>,
        cx: &Context,
        args: BTreeMap<String, ComponentExtern>,
    ) -> Result<Rc<Instance>> {
        self.instantiate_with_env(cx, None, args)
    }

    /// Instantiate within a defining environment (nested components close
    /// over the scope they were declared in)
    pub(crate) fn instantiate_with_env(
        self: &Rc<Self>,
        cx: &Context,
        env: Option<Rc<InstanceScope>>,
        args: BTreeMap<String, ComponentExtern>,
    ) -> Result<Rc<Instance>> {
        cx.check_cancelled()?;
        debug!("instantiating component {}", self.id);
        let instance = Instance::new(cx);
        let scope = InstanceScope::new(self.scope.clone(), env, instance.clone(), args);
        for si in self.scope.order() {
            scope.resolve_for_effects(cx, si)?;
        }
        for export in &self.exports {
            let value = scope.resolve_extern(cx, export.sort_idx)?;
            let ty = match &export.ascribed {
                Some(ascribed) => {
                    TypeChecker::new().check(ascribed, &value.extern_type()?)?;
                    ascribed.clone()
                }
                None => value.extern_type()?,
            };
            instance.add_export(
                &export.name,
                value,
                ExportSpec { sort: export.sort_idx.sort, ty },
            )?;
        }
        debug!(
            "component {} instantiated as instance {}",
            self.id,
            instance.id()
        );
        Ok(instance)
    }
}

impl Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}
