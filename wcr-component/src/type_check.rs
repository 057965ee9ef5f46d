//! Structural type compatibility.
//!
//! Directional checks of the form `expected ≲ actual`, threading nominal
//! resource identities through the structure. A single [`TypeChecker`] is
//! used per check pass so that bound-marker resources (placeholders created
//! during static type construction) bind consistently to the first concrete
//! identity they meet.

use crate::prelude::*;
use crate::types::{ResourceType, Type, ValType};

/// A single compatibility check pass
pub struct TypeChecker {
    /// Bound-marker substitutions accumulated during this pass
    bindings: Vec<(Rc<ResourceType>, Rc<ResourceType>)>,
    /// Human-readable path to the subterm under comparison
    path: Vec<String>,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeChecker {
    /// Create a checker with no bindings
    pub fn new() -> Self {
        Self { bindings: Vec::new(), path: Vec::new() }
    }

    fn mismatch(&self, detail: impl Display) -> Error {
        if self.path.is_empty() {
            Error::type_mismatch(format!("{detail}"))
        } else {
            Error::type_mismatch(format!("at {}: {detail}", self.path.join(".")))
        }
    }

    fn at<R>(
        &mut self,
        segment: String,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.path.push(segment);
        let out = f(self);
        self.path.pop();
        out
    }

    fn resolve_binding(&self, resource: &Rc<ResourceType>) -> Rc<ResourceType> {
        for (marker, identity) in &self.bindings {
            if Rc::ptr_eq(marker, resource) {
                return identity.clone();
            }
        }
        resource.clone()
    }

    fn check_resource(
        &mut self,
        expected: &Rc<ResourceType>,
        actual: &Rc<ResourceType>,
    ) -> Result<()> {
        let expected = self.resolve_binding(expected);
        let actual = self.resolve_binding(actual);
        if Rc::ptr_eq(&expected, &actual) {
            return Ok(());
        }
        if expected.is_bound() {
            self.bindings.push((expected, actual));
            return Ok(());
        }
        if actual.is_bound() {
            self.bindings.push((actual, expected));
            return Ok(());
        }
        Err(self.mismatch("resource types have different identities"))
    }

    /// Check `expected ≲ actual` for value types
    pub fn check_val(&mut self, expected: &ValType, actual: &ValType) -> Result<()> {
        use ValType as V;
        match (expected, actual) {
            (V::Bool, V::Bool)
            | (V::S8, V::S8)
            | (V::U8, V::U8)
            | (V::S16, V::S16)
            | (V::U16, V::U16)
            | (V::S32, V::S32)
            | (V::U32, V::U32)
            | (V::S64, V::S64)
            | (V::U64, V::U64)
            | (V::F32, V::F32)
            | (V::F64, V::F64)
            | (V::Char, V::Char)
            | (V::String, V::String)
            | (V::ByteArray, V::ByteArray) => Ok(()),

            // byte-array and list<u8> are interchangeable
            (V::ByteArray, V::List(elem)) | (V::List(elem), V::ByteArray)
                if matches!(**elem, V::U8) =>
            {
                Ok(())
            }

            (V::List(e), V::List(a)) => {
                self.at("list element".to_string(), |c| c.check_val(e, a))
            }

            (V::Record(e), V::Record(a)) => {
                if e.fields.len() != a.fields.len() {
                    return Err(self.mismatch(format!(
                        "record has {} fields, expected {}",
                        a.fields.len(),
                        e.fields.len()
                    )));
                }
                for ((en, et), (an, at)) in e.fields.iter().zip(a.fields.iter()) {
                    if en != an {
                        return Err(self.mismatch(format!(
                            "record field `{an}` where `{en}` was expected"
                        )));
                    }
                    self.at(format!("field `{en}`"), |c| c.check_val(et, at))?;
                }
                Ok(())
            }

            (V::Tuple(e), V::Tuple(a)) => {
                if e.types.len() != a.types.len() {
                    return Err(self.mismatch(format!(
                        "tuple has {} elements, expected {}",
                        a.types.len(),
                        e.types.len()
                    )));
                }
                for (i, (et, at)) in e.types.iter().zip(a.types.iter()).enumerate() {
                    self.at(format!("tuple element {i}"), |c| c.check_val(et, at))?;
                }
                Ok(())
            }

            (V::Variant(e), V::Variant(a)) => {
                if e.cases.len() != a.cases.len() {
                    return Err(self.mismatch(format!(
                        "variant has {} cases, expected {}",
                        a.cases.len(),
                        e.cases.len()
                    )));
                }
                for ((en, et), (an, at)) in e.cases.iter().zip(a.cases.iter()) {
                    if en != an {
                        return Err(self.mismatch(format!(
                            "variant case `{an}` where `{en}` was expected"
                        )));
                    }
                    match (et, at) {
                        (None, None) => {}
                        (Some(et), Some(at)) => {
                            self.at(format!("case `{en}`"), |c| c.check_val(et, at))?;
                        }
                        (Some(_), None) => {
                            return Err(self
                                .mismatch(format!("variant case `{en}` lost its payload")));
                        }
                        (None, Some(_)) => {
                            return Err(self
                                .mismatch(format!("variant case `{en}` gained a payload")));
                        }
                    }
                }
                Ok(())
            }

            (V::Enum(e), V::Enum(a)) => {
                if e.cases != a.cases {
                    return Err(self.mismatch("enum case names differ"));
                }
                Ok(())
            }

            (V::Option(e), V::Option(a)) => {
                self.at("option payload".to_string(), |c| c.check_val(e, a))
            }

            (V::Result(e), V::Result(a)) => {
                match (&e.ok, &a.ok) {
                    (None, None) => {}
                    (Some(et), Some(at)) => {
                        self.at("ok payload".to_string(), |c| c.check_val(et, at))?;
                    }
                    _ => return Err(self.mismatch("result ok payloads differ in presence")),
                }
                match (&e.err, &a.err) {
                    (None, None) => Ok(()),
                    (Some(et), Some(at)) => {
                        self.at("error payload".to_string(), |c| c.check_val(et, at))
                    }
                    _ => Err(self.mismatch("result error payloads differ in presence")),
                }
            }

            (V::Flags(e), V::Flags(a)) => {
                if e.labels != a.labels {
                    return Err(self.mismatch("flags labels differ"));
                }
                Ok(())
            }

            (V::Own(e), V::Own(a)) | (V::Borrow(e), V::Borrow(a)) => {
                self.check_resource(e, a)
            }

            (expected, actual) => Err(self.mismatch(format!(
                "expected {}, got {}",
                expected.type_name(),
                actual.type_name()
            ))),
        }
    }

    /// Check `expected ≲ actual` for any type
    pub fn check(&mut self, expected: &Type, actual: &Type) -> Result<()> {
        match (expected, actual) {
            (Type::Val(e), Type::Val(a)) => self.check_val(e, a),

            (Type::Resource(e), Type::Resource(a)) => self.check_resource(e, a),

            (Type::Func(e), Type::Func(a)) => {
                if e.params.len() != a.params.len() {
                    return Err(self.mismatch(format!(
                        "function has {} parameters, expected {}",
                        a.params.len(),
                        e.params.len()
                    )));
                }
                if e.results.len() != a.results.len() {
                    return Err(self.mismatch(format!(
                        "function has {} results, expected {}",
                        a.results.len(),
                        e.results.len()
                    )));
                }
                let skip_names = e.skip_param_name_check || a.skip_param_name_check;
                for ((en, et), (an, at)) in e.params.iter().zip(a.params.iter()) {
                    if !skip_names && en != an {
                        return Err(self.mismatch(format!(
                            "parameter `{an}` where `{en}` was expected"
                        )));
                    }
                    self.at(format!("parameter `{en}`"), |c| c.check_val(et, at))?;
                }
                for (i, (et, at)) in e.results.iter().zip(a.results.iter()).enumerate() {
                    self.at(format!("result {i}"), |c| c.check_val(et, at))?;
                }
                Ok(())
            }

            (Type::CoreFunc(e), Type::CoreFunc(a)) => {
                if e != a {
                    return Err(self.mismatch(format!(
                        "core function signature {a} where {e} was expected"
                    )));
                }
                Ok(())
            }

            (Type::CoreMemory(e), Type::CoreMemory(a)) => {
                if e.shared != a.shared || !e.limits.admits(&a.limits) {
                    return Err(self.mismatch("core memory limits incompatible"));
                }
                Ok(())
            }

            (Type::CoreTable(e), Type::CoreTable(a)) => {
                if e.element != a.element || !e.limits.admits(&a.limits) {
                    return Err(self.mismatch("core table type incompatible"));
                }
                Ok(())
            }

            (Type::CoreGlobal(e), Type::CoreGlobal(a)) => {
                if e != a {
                    return Err(self.mismatch("core global type incompatible"));
                }
                Ok(())
            }

            (Type::CoreModule(e), Type::CoreModule(a)) => {
                // Contravariant on imports, covariant on exports
                for ((module, name), expected_import) in &e.imports {
                    let actual_import = a.import(module, name).ok_or_else(|| {
                        self.mismatch(format!(
                            "core module lacks import `{module}`.`{name}`"
                        ))
                    })?;
                    self.at(format!("import `{module}`.`{name}`"), |c| {
                        core_extern_check(c, actual_import, expected_import)
                    })?;
                }
                for (name, expected_export) in &e.exports {
                    let actual_export = a.export(name).ok_or_else(|| {
                        self.mismatch(format!("core module lacks export `{name}`"))
                    })?;
                    self.at(format!("export `{name}`"), |c| {
                        core_extern_check(c, expected_export, actual_export)
                    })?;
                }
                Ok(())
            }

            (Type::CoreInstance(e), Type::CoreInstance(a)) => {
                for (name, expected_export) in &e.exports {
                    let actual_export = a.export(name).ok_or_else(|| {
                        self.mismatch(format!("core instance lacks export `{name}`"))
                    })?;
                    self.at(format!("export `{name}`"), |c| {
                        core_extern_check(c, expected_export, actual_export)
                    })?;
                }
                Ok(())
            }

            (Type::Component(e), Type::Component(a)) => {
                // Compatibility is inverted at the import boundary
                for (name, expected_import) in &e.imports {
                    let actual_import = a.import(name).ok_or_else(|| {
                        self.mismatch(format!("component lacks import `{name}`"))
                    })?;
                    self.at(format!("import `{name}`"), |c| {
                        c.check(actual_import, expected_import)
                    })?;
                }
                for (name, expected_export) in &e.exports {
                    let actual_export = a.export(name).ok_or_else(|| {
                        self.mismatch(format!("component lacks export `{name}`"))
                    })?;
                    self.at(format!("export `{name}`"), |c| {
                        c.check(expected_export, actual_export)
                    })?;
                }
                Ok(())
            }

            (Type::Instance(e), Type::Instance(a)) => {
                for (name, expected_export) in &e.exports {
                    match a.export(name) {
                        Some(actual_export) => {
                            self.at(format!("export `{name}`"), |c| {
                                c.check(expected_export, actual_export)
                            })?;
                        }
                        // A statically-known type export is synthesised as-is
                        // by the caller
                        None if expected_export.statically_known() => {}
                        None => {
                            return Err(self.mismatch(format!(
                                "instance lacks export `{name}`"
                            )));
                        }
                    }
                }
                Ok(())
            }

            (expected, actual) => Err(self.mismatch(format!(
                "expected {}, got {}",
                expected.type_name(),
                actual.type_name()
            ))),
        }
    }
}

fn core_extern_check(
    checker: &mut TypeChecker,
    expected: &CoreExternType,
    actual: &CoreExternType,
) -> Result<()> {
    match (expected, actual) {
        (CoreExternType::Func(e), CoreExternType::Func(a)) => {
            if e != a {
                return Err(checker.mismatch(format!(
                    "core function signature {a} where {e} was expected"
                )));
            }
            Ok(())
        }
        (CoreExternType::Memory(e), CoreExternType::Memory(a)) => {
            if e.shared != a.shared || !e.limits.admits(&a.limits) {
                return Err(checker.mismatch("core memory limits incompatible"));
            }
            Ok(())
        }
        (CoreExternType::Table(e), CoreExternType::Table(a)) => {
            if e.element != a.element || !e.limits.admits(&a.limits) {
                return Err(checker.mismatch("core table type incompatible"));
            }
            Ok(())
        }
        (CoreExternType::Global(e), CoreExternType::Global(a)) => {
            if e != a {
                return Err(checker.mismatch("core global type incompatible"));
            }
            Ok(())
        }
        (expected, actual) => Err(checker.mismatch(format!(
            "expected core {}, got core {}",
            expected.kind(),
            actual.kind()
        ))),
    }
}

/// Check `expected ≲ actual` with a fresh checker
pub fn check_compatible(expected: &Type, actual: &Type) -> Result<()> {
    TypeChecker::new().check(expected, actual)
}

/// Check a single core extern pair with a fresh checker
pub fn core_extern_compatible(expected: &CoreExternType, actual: &CoreExternType) -> Result<()> {
    core_extern_check(&mut TypeChecker::new(), expected, actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        FuncType, RecordType, RepKind, ResourceType, TupleType, VariantType,
    };

    #[test]
    fn primitives_are_identity_checked() {
        assert!(check_compatible(&Type::Val(ValType::U32), &Type::Val(ValType::U32)).is_ok());
        assert!(check_compatible(&Type::Val(ValType::U32), &Type::Val(ValType::S32)).is_err());
    }

    #[test]
    fn byte_array_matches_list_of_u8() {
        let list_u8 = ValType::List(Rc::new(ValType::U8));
        assert!(check_compatible(
            &Type::Val(ValType::ByteArray),
            &Type::Val(list_u8.clone())
        )
        .is_ok());
        assert!(check_compatible(&Type::Val(list_u8), &Type::Val(ValType::ByteArray)).is_ok());
        let list_u16 = ValType::List(Rc::new(ValType::U16));
        assert!(check_compatible(&Type::Val(ValType::ByteArray), &Type::Val(list_u16)).is_err());
    }

    #[test]
    fn record_field_names_and_order_matter() {
        let a = RecordType::new(vec![
            ("x".to_string(), ValType::U32),
            ("y".to_string(), ValType::U32),
        ])
        .unwrap();
        let same = RecordType::new(vec![
            ("x".to_string(), ValType::U32),
            ("y".to_string(), ValType::U32),
        ])
        .unwrap();
        let reordered = RecordType::new(vec![
            ("y".to_string(), ValType::U32),
            ("x".to_string(), ValType::U32),
        ])
        .unwrap();
        assert!(check_compatible(
            &Type::Val(ValType::Record(a.clone())),
            &Type::Val(ValType::Record(same))
        )
        .is_ok());
        assert!(check_compatible(
            &Type::Val(ValType::Record(a)),
            &Type::Val(ValType::Record(reordered))
        )
        .is_err());
    }

    #[test]
    fn variant_payload_presence_matters() {
        let with = VariantType::new(vec![
            ("a".to_string(), None),
            ("b".to_string(), Some(ValType::U32)),
        ])
        .unwrap();
        let without = VariantType::new(vec![
            ("a".to_string(), None),
            ("b".to_string(), None),
        ])
        .unwrap();
        assert!(check_compatible(
            &Type::Val(ValType::Variant(with)),
            &Type::Val(ValType::Variant(without))
        )
        .is_err());
    }

    #[test]
    fn own_requires_same_resource_identity() {
        let r1 = ResourceType::fresh(RepKind::U32);
        let r2 = ResourceType::fresh(RepKind::U32);
        assert!(check_compatible(
            &Type::Val(ValType::Own(r1.clone())),
            &Type::Val(ValType::Own(r1.clone()))
        )
        .is_ok());
        assert!(check_compatible(
            &Type::Val(ValType::Own(r1)),
            &Type::Val(ValType::Own(r2))
        )
        .is_err());
    }

    #[test]
    fn bound_marker_binds_to_first_identity() {
        let marker = ResourceType::bound_marker();
        let concrete = ResourceType::fresh(RepKind::U32);
        let other = ResourceType::fresh(RepKind::U32);

        // Same marker appearing twice must bind to one identity consistently
        let expected = Type::Val(ValType::Tuple(
            TupleType::new(vec![
                ValType::Own(marker.clone()),
                ValType::Borrow(marker.clone()),
            ])
            .unwrap(),
        ));
        let actual_consistent = Type::Val(ValType::Tuple(
            TupleType::new(vec![
                ValType::Own(concrete.clone()),
                ValType::Borrow(concrete.clone()),
            ])
            .unwrap(),
        ));
        let actual_mixed = Type::Val(ValType::Tuple(
            TupleType::new(vec![ValType::Own(concrete), ValType::Borrow(other)]).unwrap(),
        ));
        assert!(check_compatible(&expected, &actual_consistent).is_ok());
        assert!(check_compatible(&expected, &actual_mixed).is_err());
    }

    #[test]
    fn function_param_names_checked_unless_host() {
        let f1 = FuncType::new(vec![("a".to_string(), ValType::U32)], vec![]).unwrap();
        let f2 = FuncType::new(vec![("b".to_string(), ValType::U32)], vec![]).unwrap();
        let host = FuncType::new_host(vec![("x".to_string(), ValType::U32)], vec![]).unwrap();
        assert!(check_compatible(&Type::Func(f1.clone()), &Type::Func(f2)).is_err());
        assert!(check_compatible(&Type::Func(f1), &Type::Func(host)).is_ok());
    }

    #[test]
    fn mismatch_carries_failing_path() {
        let e = RecordType::new(vec![("x".to_string(), ValType::U32)]).unwrap();
        let a = RecordType::new(vec![("x".to_string(), ValType::String)]).unwrap();
        let err = check_compatible(
            &Type::Val(ValType::Record(e)),
            &Type::Val(ValType::Record(a)),
        )
        .unwrap_err();
        assert!(err.message.contains("field `x`"));
    }
}
