//! Core WebAssembly type model.
//!
//! Signatures and extern types exposed by compiled core modules through the
//! engine interface, and consumed by the component-level type system for
//! module/instance compatibility checks.

use crate::prelude::*;

/// Core value types, including the reference types the engine may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreValType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// 128-bit vector
    V128,
    /// Function reference
    FuncRef,
    /// External reference
    ExternRef,
}

impl fmt::Display for CoreValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreValType::I32 => "i32",
            CoreValType::I64 => "i64",
            CoreValType::F32 => "f32",
            CoreValType::F64 => "f64",
            CoreValType::V128 => "v128",
            CoreValType::FuncRef => "funcref",
            CoreValType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

/// A core function signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreFuncType {
    /// Parameter types
    pub params: Vec<CoreValType>,
    /// Result types
    pub results: Vec<CoreValType>,
}

impl CoreFuncType {
    /// Create a signature from parameter and result slices
    pub fn new(params: &[CoreValType], results: &[CoreValType]) -> Self {
        Self { params: params.to_vec(), results: results.to_vec() }
    }
}

impl fmt::Display for CoreFuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{r}")?;
        }
        f.write_str(")")
    }
}

/// Memory or table limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// Minimum size
    pub min: u32,
    /// Maximum size, unbounded when absent
    pub max: Option<u32>,
}

impl Limits {
    /// Whether `self` (expected) admits `actual`: actual.min >= min and
    /// actual.max within the expected bound
    pub fn admits(&self, actual: &Limits) -> bool {
        if actual.min < self.min {
            return false;
        }
        match (self.max, actual.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(actual)) => actual <= expected,
        }
    }
}

/// A core linear memory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreMemoryType {
    /// Page limits
    pub limits: Limits,
    /// Shared between threads
    pub shared: bool,
}

/// A core table type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTableType {
    /// Element reference type
    pub element: CoreValType,
    /// Entry limits
    pub limits: Limits,
}

/// A core global type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreGlobalType {
    /// Value type
    pub value_type: CoreValType,
    /// Mutability
    pub mutable: bool,
}

/// The type of a core module import or export
#[derive(Debug, Clone, PartialEq)]
pub enum CoreExternType {
    /// Function signature
    Func(CoreFuncType),
    /// Linear memory
    Memory(CoreMemoryType),
    /// Table
    Table(CoreTableType),
    /// Global
    Global(CoreGlobalType),
}

impl CoreExternType {
    /// Short name of the extern kind, for messages
    pub fn kind(&self) -> &'static str {
        match self {
            CoreExternType::Func(_) => "func",
            CoreExternType::Memory(_) => "memory",
            CoreExternType::Table(_) => "table",
            CoreExternType::Global(_) => "global",
        }
    }
}

/// The type of a core module: two-level named imports plus named exports
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleType {
    /// Imports as `((module, name), type)` in declaration order
    pub imports: Vec<((String, String), CoreExternType)>,
    /// Exports as `(name, type)` in declaration order
    pub exports: Vec<(String, CoreExternType)>,
}

impl ModuleType {
    /// Look up an import by its two-level name
    pub fn import(&self, module: &str, name: &str) -> Option<&CoreExternType> {
        self.imports
            .iter()
            .find(|((m, n), _)| m == module && n == name)
            .map(|(_, ty)| ty)
    }

    /// Look up an export by name
    pub fn export(&self, name: &str) -> Option<&CoreExternType> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }
}

/// The type of a core instance: named exports only
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoreInstanceType {
    /// Exports as `(name, type)` in declaration order
    pub exports: Vec<(String, CoreExternType)>,
}

impl CoreInstanceType {
    /// Look up an export by name
    pub fn export(&self, name: &str) -> Option<&CoreExternType> {
        self.exports.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_admission() {
        let expected = Limits { min: 1, max: Some(4) };
        assert!(expected.admits(&Limits { min: 2, max: Some(3) }));
        assert!(!expected.admits(&Limits { min: 0, max: Some(3) }));
        assert!(!expected.admits(&Limits { min: 2, max: None }));
        let open = Limits { min: 0, max: None };
        assert!(open.admits(&Limits { min: 9, max: None }));
    }

    #[test]
    fn module_type_lookup() {
        let ty = ModuleType {
            imports: vec![(
                ("env".to_string(), "f".to_string()),
                CoreExternType::Func(CoreFuncType::new(&[CoreValType::I32], &[])),
            )],
            exports: vec![(
                "mem".to_string(),
                CoreExternType::Memory(CoreMemoryType::default()),
            )],
        };
        assert!(ty.import("env", "f").is_some());
        assert!(ty.import("env", "g").is_none());
        assert_eq!(ty.export("mem").map(CoreExternType::kind), Some("memory"));
    }

    #[test]
    fn func_type_display() {
        let ty = CoreFuncType::new(
            &[CoreValType::I32, CoreValType::I64],
            &[CoreValType::F32],
        );
        assert_eq!(format!("{ty}"), "(i32, i64) -> (f32)");
    }
}
