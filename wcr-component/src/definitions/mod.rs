//! Sort-indexed definitions and lexical scopes.
//!
//! Every component declaration becomes one definition in the sort's ordered
//! list of its scope. A definition exposes pure type construction (consulted
//! during build and validation) and deferred value construction (consulted
//! during instantiation, memoised per instance scope).

mod defs;
mod scope;
mod type_eval;

pub use defs::{
    ComponentDef, CoreFuncDef, CoreGlobalDef, CoreInstanceDef, CoreMemoryDef, CoreModuleDef,
    CoreTableDef, CoreType, CoreTypeDef, CoreTypeDefKind, FuncDef, InstanceDef, TypeDef,
    TypeDefKind,
};
pub(crate) use defs::static_extern_type;
pub use scope::{DefinitionScope, InstanceScope};
pub use type_eval::{
    eval_extern_desc, eval_type_expr, outer_type, LocalTypeScope, TypeEnv, TypeEvalCx,
    MAX_TYPE_RECURSION_DEPTH,
};

use crate::prelude::*;

/// The kinds of things an index can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    /// A core function
    CoreFunc,
    /// A core table
    CoreTable,
    /// A core memory
    CoreMemory,
    /// A core global
    CoreGlobal,
    /// A core type
    CoreType,
    /// A core module
    CoreModule,
    /// A core instance
    CoreInstance,
    /// A component function
    Func,
    /// A component-level type
    Type,
    /// A component
    Component,
    /// A component instance
    Instance,
}

impl Sort {
    /// Whether this is a core sort
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            Sort::CoreFunc
                | Sort::CoreTable
                | Sort::CoreMemory
                | Sort::CoreGlobal
                | Sort::CoreType
                | Sort::CoreModule
                | Sort::CoreInstance
        )
    }
}

impl Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sort::CoreFunc => "core func",
            Sort::CoreTable => "core table",
            Sort::CoreMemory => "core memory",
            Sort::CoreGlobal => "core global",
            Sort::CoreType => "core type",
            Sort::CoreModule => "core module",
            Sort::CoreInstance => "core instance",
            Sort::Func => "func",
            Sort::Type => "type",
            Sort::Component => "component",
            Sort::Instance => "instance",
        };
        f.write_str(name)
    }
}

/// A sort-indexed reference into a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortIdx {
    /// The referent's sort
    pub sort: Sort,
    /// Dense index within the sort's list
    pub idx: u32,
}

impl SortIdx {
    /// Create a sort-indexed reference
    pub const fn new(sort: Sort, idx: u32) -> Self {
        Self { sort, idx }
    }
}

impl Display for SortIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sort, self.idx)
    }
}
