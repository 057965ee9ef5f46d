//! Definition scopes and instance scopes.
//!
//! A `DefinitionScope` is the lexical container built once per component:
//! per-sort ordered definition lists plus the interleaved declaration order.
//! An `InstanceScope` is its per-instantiation sibling: the same lists seen
//! through per-slot value memos, the instance under construction, and the
//! supplied instantiation arguments.

use log::debug;

use super::defs::{
    ComponentDef, CoreFuncDef, CoreGlobalDef, CoreInstanceDef, CoreMemoryDef, CoreModuleDef,
    CoreTableDef, CoreType, CoreTypeDef, FuncDef, InstanceDef, TypeDef,
};
use super::{Sort, SortIdx};
use crate::component::ComponentVal;
use crate::context::Context;
use crate::engine::{CoreExtern, CoreFunc, CoreInstanceVal, CoreModuleVal};
use crate::instance::{ComponentExtern, Instance};
use crate::prelude::*;
use crate::types::Type;

/// Lexical scope of sort-indexed definitions
#[derive(Default)]
pub struct DefinitionScope {
    parent: Option<Rc<DefinitionScope>>,
    core_funcs: RefCell<Vec<Rc<CoreFuncDef>>>,
    core_tables: RefCell<Vec<Rc<CoreTableDef>>>,
    core_memories: RefCell<Vec<Rc<CoreMemoryDef>>>,
    core_globals: RefCell<Vec<Rc<CoreGlobalDef>>>,
    core_types: RefCell<Vec<Rc<CoreTypeDef>>>,
    core_modules: RefCell<Vec<Rc<CoreModuleDef>>>,
    core_instances: RefCell<Vec<Rc<CoreInstanceDef>>>,
    funcs: RefCell<Vec<Rc<FuncDef>>>,
    types: RefCell<Vec<Rc<TypeDef>>>,
    components: RefCell<Vec<Rc<ComponentDef>>>,
    instances: RefCell<Vec<Rc<InstanceDef>>>,
    /// Declaration order across all sorts, for eager resolution
    order: RefCell<Vec<SortIdx>>,
}

macro_rules! scope_sort {
    ($list:ident, $push:ident, $get:ident, $def:ty, $sort:expr) => {
        /// Append a definition, returning its dense index
        pub fn $push(&self, def: $def) -> u32 {
            let mut list = self.$list.borrow_mut();
            let idx = list.len() as u32;
            list.push(Rc::new(def));
            self.order.borrow_mut().push(SortIdx::new($sort, idx));
            idx
        }

        /// Definition at `idx`, or an index error
        pub fn $get(&self, idx: u32) -> Result<Rc<$def>> {
            self.$list
                .borrow()
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| {
                    Error::index_out_of_range(format!(
                        "{} index {idx} out of range",
                        $sort
                    ))
                })
        }
    };
}

impl DefinitionScope {
    /// Create a scope with an optional lexical parent
    pub fn new(parent: Option<Rc<DefinitionScope>>) -> Rc<Self> {
        Rc::new(Self { parent, ..Self::default() })
    }

    /// The lexical parent, if any
    pub fn parent(&self) -> Option<&Rc<DefinitionScope>> {
        self.parent.as_ref()
    }

    /// Number of enclosing scopes
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        let mut scope = self.parent.clone();
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent.clone();
        }
        depth
    }

    /// Walk `count` parents; zero is the current scope
    pub fn walk_outer(self: &Rc<Self>, count: u32) -> Result<Rc<DefinitionScope>> {
        let mut scope = self.clone();
        for _ in 0..count {
            scope = scope.parent.clone().ok_or_else(|| {
                Error::scope_depth_exceeded(format!(
                    "outer count {count} exceeds the scope chain"
                ))
            })?;
        }
        Ok(scope)
    }

    scope_sort!(core_funcs, push_core_func, core_func, CoreFuncDef, Sort::CoreFunc);
    scope_sort!(core_tables, push_core_table, core_table, CoreTableDef, Sort::CoreTable);
    scope_sort!(core_memories, push_core_memory, core_memory, CoreMemoryDef, Sort::CoreMemory);
    scope_sort!(core_globals, push_core_global, core_global, CoreGlobalDef, Sort::CoreGlobal);
    scope_sort!(core_types, push_core_type, core_type, CoreTypeDef, Sort::CoreType);
    scope_sort!(core_modules, push_core_module, core_module, CoreModuleDef, Sort::CoreModule);
    scope_sort!(
        core_instances,
        push_core_instance,
        core_instance,
        CoreInstanceDef,
        Sort::CoreInstance
    );
    scope_sort!(funcs, push_func, func, FuncDef, Sort::Func);
    scope_sort!(types, push_type, type_def, TypeDef, Sort::Type);
    scope_sort!(components, push_component, component, ComponentDef, Sort::Component);
    scope_sort!(instances, push_instance, instance, InstanceDef, Sort::Instance);

    /// Number of definitions of `sort`
    pub fn count(&self, sort: Sort) -> u32 {
        (match sort {
            Sort::CoreFunc => self.core_funcs.borrow().len(),
            Sort::CoreTable => self.core_tables.borrow().len(),
            Sort::CoreMemory => self.core_memories.borrow().len(),
            Sort::CoreGlobal => self.core_globals.borrow().len(),
            Sort::CoreType => self.core_types.borrow().len(),
            Sort::CoreModule => self.core_modules.borrow().len(),
            Sort::CoreInstance => self.core_instances.borrow().len(),
            Sort::Func => self.funcs.borrow().len(),
            Sort::Type => self.types.borrow().len(),
            Sort::Component => self.components.borrow().len(),
            Sort::Instance => self.instances.borrow().len(),
        }) as u32
    }

    /// Whether `(sort, idx)` is in range
    pub fn check_index(&self, si: SortIdx) -> Result<()> {
        if si.idx < self.count(si.sort) {
            Ok(())
        } else {
            Err(Error::index_out_of_range(format!(
                "{} out of range (have {})",
                si,
                self.count(si.sort)
            )))
        }
    }

    /// The interleaved declaration order
    pub fn order(&self) -> Vec<SortIdx> {
        self.order.borrow().clone()
    }
}

impl Debug for DefinitionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionScope")
            .field("depth", &self.depth())
            .field("definitions", &self.order.borrow().len())
            .finish()
    }
}

/// Per-instantiation scope: definition lists seen through value memos
pub struct InstanceScope {
    defs: Rc<DefinitionScope>,
    parent: Option<Rc<InstanceScope>>,
    current: Rc<Instance>,
    args: RefCell<BTreeMap<String, ComponentExtern>>,
    memo_core_funcs: RefCell<Vec<Option<CoreFunc>>>,
    memo_core_tables: RefCell<Vec<Option<CoreExtern>>>,
    memo_core_memories: RefCell<Vec<Option<CoreExtern>>>,
    memo_core_globals: RefCell<Vec<Option<CoreExtern>>>,
    memo_core_types: RefCell<Vec<Option<CoreType>>>,
    memo_core_modules: RefCell<Vec<Option<CoreModuleVal>>>,
    memo_core_instances: RefCell<Vec<Option<CoreInstanceVal>>>,
    memo_funcs: RefCell<Vec<Option<crate::instance::ComponentFunc>>>,
    memo_types: RefCell<Vec<Option<Type>>>,
    memo_components: RefCell<Vec<Option<ComponentVal>>>,
    memo_instances: RefCell<Vec<Option<Rc<Instance>>>>,
}

macro_rules! memo_resolver {
    ($fn_name:ident, $memo:ident, $get:ident, $value:ty) => {
        /// Resolve `(sort, idx)`, memoising the produced value
        pub fn $fn_name(self: &Rc<Self>, cx: &Context, idx: u32) -> Result<$value> {
            if let Some(Some(value)) = self.$memo.borrow().get(idx as usize) {
                return Ok(value.clone());
            }
            let def = self.defs.$get(idx)?;
            let value = def.resolve(cx, self)?;
            let mut memo = self.$memo.borrow_mut();
            if let Some(slot) = memo.get_mut(idx as usize) {
                *slot = Some(value.clone());
            }
            Ok(value)
        }
    };
}

impl InstanceScope {
    /// Create the scope for one instantiation
    pub fn new(
        defs: Rc<DefinitionScope>,
        parent: Option<Rc<InstanceScope>>,
        current: Rc<Instance>,
        args: BTreeMap<String, ComponentExtern>,
    ) -> Rc<Self> {
        fn slots<T>(defs: &DefinitionScope, sort: Sort) -> Vec<Option<T>> {
            (0..defs.count(sort)).map(|_| None).collect()
        }
        Rc::new(Self {
            memo_core_funcs: RefCell::new(slots(&defs, Sort::CoreFunc)),
            memo_core_tables: RefCell::new(slots(&defs, Sort::CoreTable)),
            memo_core_memories: RefCell::new(slots(&defs, Sort::CoreMemory)),
            memo_core_globals: RefCell::new(slots(&defs, Sort::CoreGlobal)),
            memo_core_types: RefCell::new(slots(&defs, Sort::CoreType)),
            memo_core_modules: RefCell::new(slots(&defs, Sort::CoreModule)),
            memo_core_instances: RefCell::new(slots(&defs, Sort::CoreInstance)),
            memo_funcs: RefCell::new(slots(&defs, Sort::Func)),
            memo_types: RefCell::new(slots(&defs, Sort::Type)),
            memo_components: RefCell::new(slots(&defs, Sort::Component)),
            memo_instances: RefCell::new(slots(&defs, Sort::Instance)),
            defs,
            parent,
            current,
            args: RefCell::new(args),
        })
    }

    /// The definition scope this instantiates
    pub fn defs(&self) -> &Rc<DefinitionScope> {
        &self.defs
    }

    /// The enclosing instance scope, if any
    pub fn parent(&self) -> Option<&Rc<InstanceScope>> {
        self.parent.as_ref()
    }

    /// Walk `count` parents; zero is the current scope
    pub fn walk_outer(self: &Rc<Self>, count: u32) -> Result<Rc<InstanceScope>> {
        let mut scope = self.clone();
        for _ in 0..count {
            scope = scope.parent.clone().ok_or_else(|| {
                Error::scope_depth_exceeded(format!(
                    "outer count {count} exceeds the scope chain"
                ))
            })?;
        }
        Ok(scope)
    }

    /// The component instance under construction
    pub fn current(&self) -> &Rc<Instance> {
        &self.current
    }

    /// Look up an instantiation argument, falling back to version-qualified
    /// matching when the verbatim name is absent
    pub fn argument(&self, name: &str) -> Option<ComponentExtern> {
        let args = self.args.borrow();
        if let Some(value) = args.get(name) {
            return Some(value.clone());
        }
        let wanted = parse_versioned(name)?;
        for (key, value) in args.iter() {
            let Some(candidate) = parse_versioned(key) else {
                continue;
            };
            if version_prefix_matches(wanted, candidate) {
                debug!("argument `{name}` satisfied by version-qualified `{key}`");
                return Some(value.clone());
            }
        }
        None
    }

    memo_resolver!(resolve_core_func, memo_core_funcs, core_func, CoreFunc);
    memo_resolver!(resolve_core_table, memo_core_tables, core_table, CoreExtern);
    memo_resolver!(resolve_core_memory, memo_core_memories, core_memory, CoreExtern);
    memo_resolver!(resolve_core_global, memo_core_globals, core_global, CoreExtern);
    memo_resolver!(resolve_core_type, memo_core_types, core_type, CoreType);
    memo_resolver!(resolve_core_module, memo_core_modules, core_module, CoreModuleVal);
    memo_resolver!(
        resolve_core_instance,
        memo_core_instances,
        core_instance,
        CoreInstanceVal
    );
    memo_resolver!(resolve_func, memo_funcs, func, crate::instance::ComponentFunc);
    memo_resolver!(resolve_component, memo_components, component, ComponentVal);
    memo_resolver!(resolve_instance, memo_instances, instance, Rc<Instance>);

    /// Resolve a type definition, memoising the produced type
    pub fn resolve_type(self: &Rc<Self>, cx: &Context, idx: u32) -> Result<Type> {
        let mut tcx = super::type_eval::TypeEvalCx::new_runtime(cx);
        self.resolve_type_rec(&mut tcx, idx)
    }

    /// Type resolution sharing the caller's recursion-depth counter
    pub(crate) fn resolve_type_rec(
        self: &Rc<Self>,
        tcx: &mut super::type_eval::TypeEvalCx<'_>,
        idx: u32,
    ) -> Result<Type> {
        if let Some(Some(ty)) = self.memo_types.borrow().get(idx as usize) {
            return Ok(ty.clone());
        }
        let def = self.defs.type_def(idx)?;
        tcx.descend()?;
        let outcome = def.resolve_runtime(tcx, self);
        tcx.ascend();
        let ty = outcome?;
        if let Some(slot) = self.memo_types.borrow_mut().get_mut(idx as usize) {
            *slot = Some(ty.clone());
        }
        Ok(ty)
    }

    /// Resolve a component-sort reference into an extern value
    pub fn resolve_extern(self: &Rc<Self>, cx: &Context, si: SortIdx) -> Result<ComponentExtern> {
        match si.sort {
            Sort::Func => Ok(ComponentExtern::Func(self.resolve_func(cx, si.idx)?)),
            Sort::Type => Ok(ComponentExtern::Type(self.resolve_type(cx, si.idx)?)),
            Sort::Component => {
                Ok(ComponentExtern::Component(self.resolve_component(cx, si.idx)?))
            }
            Sort::Instance => Ok(ComponentExtern::Instance(self.resolve_instance(cx, si.idx)?)),
            Sort::CoreModule => {
                Ok(ComponentExtern::CoreModule(self.resolve_core_module(cx, si.idx)?))
            }
            other => Err(Error::validation_error(format!(
                "{other} is not a component-level sort"
            ))),
        }
    }

    /// Resolve a definition purely for its side effects, in declared order
    pub fn resolve_for_effects(self: &Rc<Self>, cx: &Context, si: SortIdx) -> Result<()> {
        match si.sort {
            Sort::CoreFunc => self.resolve_core_func(cx, si.idx).map(|_| ()),
            Sort::CoreTable => self.resolve_core_table(cx, si.idx).map(|_| ()),
            Sort::CoreMemory => self.resolve_core_memory(cx, si.idx).map(|_| ()),
            Sort::CoreGlobal => self.resolve_core_global(cx, si.idx).map(|_| ()),
            Sort::CoreType => self.resolve_core_type(cx, si.idx).map(|_| ()),
            Sort::CoreModule => self.resolve_core_module(cx, si.idx).map(|_| ()),
            Sort::CoreInstance => self.resolve_core_instance(cx, si.idx).map(|_| ()),
            Sort::Func => self.resolve_func(cx, si.idx).map(|_| ()),
            Sort::Type => self.resolve_type(cx, si.idx).map(|_| ()),
            Sort::Component => self.resolve_component(cx, si.idx).map(|_| ()),
            Sort::Instance => self.resolve_instance(cx, si.idx).map(|_| ()),
        }
    }
}

impl Debug for InstanceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceScope")
            .field("instance", &self.current.id())
            .field("args", &self.args.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

type ParsedVersion = (u64, u64, u64);

fn parse_versioned(name: &str) -> Option<(&str, ParsedVersion)> {
    let (base, version) = name.rsplit_once('@')?;
    let version = version
        .split_once('-')
        .map_or(version, |(numeric, _pre)| numeric);
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((base, (major, minor, patch)))
}

fn version_prefix_matches(
    wanted: (&str, ParsedVersion),
    candidate: (&str, ParsedVersion),
) -> bool {
    let (base, (major, minor, patch)) = wanted;
    let (cand_base, (cand_major, cand_minor, cand_patch)) = candidate;
    if base != cand_base {
        return false;
    }
    if major > 0 {
        cand_major == major
    } else if minor > 0 {
        cand_major == 0 && cand_minor == minor
    } else {
        cand_major == 0 && cand_minor == 0 && cand_patch == patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_walk_bounded_by_chain() {
        let root = DefinitionScope::new(None);
        let child = DefinitionScope::new(Some(root.clone()));
        let grandchild = DefinitionScope::new(Some(child.clone()));
        assert_eq!(grandchild.depth(), 2);
        assert!(Rc::ptr_eq(&grandchild.walk_outer(0).unwrap(), &grandchild));
        assert!(Rc::ptr_eq(&grandchild.walk_outer(2).unwrap(), &root));
        let err = grandchild.walk_outer(3).unwrap_err();
        assert_eq!(err.code, codes::SCOPE_DEPTH_EXCEEDED);
    }

    #[test]
    fn indices_are_dense_and_ordered() {
        let scope = DefinitionScope::new(None);
        let a = scope.push_type(TypeDef::declared(crate::ast::TypeExpr::Defined(
            crate::ast::DefValTypeExpr::Prim(crate::ast::PrimValType::U32),
        )));
        let b = scope.push_type(TypeDef::declared(crate::ast::TypeExpr::Defined(
            crate::ast::DefValTypeExpr::Prim(crate::ast::PrimValType::String),
        )));
        assert_eq!((a, b), (0, 1));
        assert_eq!(scope.count(Sort::Type), 2);
        assert_eq!(
            scope.order(),
            vec![SortIdx::new(Sort::Type, 0), SortIdx::new(Sort::Type, 1)]
        );
        assert!(scope.type_def(2).is_err());
    }

    #[test]
    fn version_qualified_matching() {
        let wanted = parse_versioned("wasi:clocks/wall-clock@0.2.0").unwrap();
        let supplied = parse_versioned("wasi:clocks/wall-clock@0.2.3").unwrap();
        assert!(version_prefix_matches(wanted, supplied));

        let other_minor = parse_versioned("wasi:clocks/wall-clock@0.3.0").unwrap();
        assert!(!version_prefix_matches(wanted, other_minor));

        let wanted_major = parse_versioned("iface@1.2.3").unwrap();
        let cand = parse_versioned("iface@1.9.0").unwrap();
        assert!(version_prefix_matches(wanted_major, cand));
        let cand2 = parse_versioned("iface@2.2.3").unwrap();
        assert!(!version_prefix_matches(wanted_major, cand2));

        let wanted_patch = parse_versioned("iface@0.0.7").unwrap();
        assert!(version_prefix_matches(
            wanted_patch,
            parse_versioned("iface@0.0.7-rc1").unwrap()
        ));
        assert!(!version_prefix_matches(
            wanted_patch,
            parse_versioned("iface@0.0.8").unwrap()
        ));
    }
}
