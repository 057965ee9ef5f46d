//! Component-model values.
//!
//! The in-memory representation of values crossing the component boundary.
//! Composite values are positional; their field and case names live on the
//! type. Handles carry the live own/borrow objects so that ownership
//! discipline survives a round trip through the value layer.

use crate::prelude::*;
use crate::resources::{BorrowedHandle, OwnedHandle};
use crate::types::{ResourceType, ValType};

/// A component-model value
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    S8(i8),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Signed 16-bit integer
    S16(i16),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Signed 32-bit integer
    S32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    S64(i64),
    /// Unsigned 64-bit integer
    U64(u64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Unicode scalar value
    Char(char),
    /// String
    String(String),
    /// Byte array (`list<u8>` fast path)
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Record, fields in declaration order
    Record(Vec<Value>),
    /// Tuple
    Tuple(Vec<Value>),
    /// Variant case by discriminant
    Variant {
        /// Zero-based case index
        discriminant: u32,
        /// Case payload, when the case has one
        payload: Option<Box<Value>>,
    },
    /// Enum case by discriminant
    Enum(u32),
    /// Optional value
    Option(Option<Box<Value>>),
    /// Result value
    Result(core::result::Result<Option<Box<Value>>, Option<Box<Value>>>),
    /// Flags bitset
    Flags(u32),
    /// Owned resource handle
    Own(Rc<OwnedHandle>),
    /// Borrowed resource handle
    Borrow(Rc<BorrowedHandle>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value as V;
        match (self, other) {
            (V::Bool(a), V::Bool(b)) => a == b,
            (V::S8(a), V::S8(b)) => a == b,
            (V::U8(a), V::U8(b)) => a == b,
            (V::S16(a), V::S16(b)) => a == b,
            (V::U16(a), V::U16(b)) => a == b,
            (V::S32(a), V::S32(b)) => a == b,
            (V::U32(a), V::U32(b)) => a == b,
            (V::S64(a), V::S64(b)) => a == b,
            (V::U64(a), V::U64(b)) => a == b,
            (V::F32(a), V::F32(b)) => a == b,
            (V::F64(a), V::F64(b)) => a == b,
            (V::Char(a), V::Char(b)) => a == b,
            (V::String(a), V::String(b)) => a == b,
            (V::Bytes(a), V::Bytes(b)) => a == b,
            (V::List(a), V::List(b)) | (V::Record(a), V::Record(b)) | (V::Tuple(a), V::Tuple(b)) => {
                a == b
            }
            (
                V::Variant { discriminant: da, payload: pa },
                V::Variant { discriminant: db, payload: pb },
            ) => da == db && pa == pb,
            (V::Enum(a), V::Enum(b)) => a == b,
            (V::Option(a), V::Option(b)) => a == b,
            (V::Result(a), V::Result(b)) => a == b,
            (V::Flags(a), V::Flags(b)) => a == b,
            (V::Own(a), V::Own(b)) => Rc::ptr_eq(a, b),
            (V::Borrow(a), V::Borrow(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Short name of the value kind
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::S8(_) => "s8",
            Value::U8(_) => "u8",
            Value::S16(_) => "s16",
            Value::U16(_) => "u16",
            Value::S32(_) => "s32",
            Value::U32(_) => "u32",
            Value::S64(_) => "s64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "byte-array",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Tuple(_) => "tuple",
            Value::Variant { .. } => "variant",
            Value::Enum(_) => "enum",
            Value::Option(_) => "option",
            Value::Result(_) => "result",
            Value::Flags(_) => "flags",
            Value::Own(_) => "own",
            Value::Borrow(_) => "borrow",
        }
    }

    /// The resource type of a handle value, if this is one
    pub fn handle_type(&self) -> Option<&Rc<ResourceType>> {
        match self {
            Value::Own(h) => Some(h.ty()),
            Value::Borrow(h) => Some(h.ty()),
            _ => None,
        }
    }

    /// Best-effort reconstruction of the value's type.
    ///
    /// Named composites (records, variants, enums, flags) cannot recover
    /// their labels from the value alone and yield `None`; so do empty lists
    /// and empty options.
    pub fn type_of(&self) -> Option<ValType> {
        use crate::types::TupleType;
        match self {
            Value::Bool(_) => Some(ValType::Bool),
            Value::S8(_) => Some(ValType::S8),
            Value::U8(_) => Some(ValType::U8),
            Value::S16(_) => Some(ValType::S16),
            Value::U16(_) => Some(ValType::U16),
            Value::S32(_) => Some(ValType::S32),
            Value::U32(_) => Some(ValType::U32),
            Value::S64(_) => Some(ValType::S64),
            Value::U64(_) => Some(ValType::U64),
            Value::F32(_) => Some(ValType::F32),
            Value::F64(_) => Some(ValType::F64),
            Value::Char(_) => Some(ValType::Char),
            Value::String(_) => Some(ValType::String),
            Value::Bytes(_) => Some(ValType::ByteArray),
            Value::List(items) => items
                .first()
                .and_then(Value::type_of)
                .map(|t| ValType::List(Rc::new(t))),
            Value::Tuple(items) => {
                let types: Option<Vec<ValType>> =
                    items.iter().map(Value::type_of).collect();
                TupleType::new(types?).ok().map(ValType::Tuple)
            }
            Value::Option(Some(inner)) => {
                inner.type_of().map(|t| ValType::Option(Rc::new(t)))
            }
            Value::Own(h) => Some(ValType::Own(h.ty().clone())),
            Value::Borrow(h) => Some(ValType::Borrow(h.ty().clone())),
            _ => None,
        }
    }
}

impl ValType {
    /// Whether `value` is a well-formed inhabitant of this type
    pub fn supports(&self, value: &Value) -> bool {
        use ValType as T;
        use Value as V;
        match (self, value) {
            (T::Bool, V::Bool(_))
            | (T::S8, V::S8(_))
            | (T::U8, V::U8(_))
            | (T::S16, V::S16(_))
            | (T::U16, V::U16(_))
            | (T::S32, V::S32(_))
            | (T::U32, V::U32(_))
            | (T::S64, V::S64(_))
            | (T::U64, V::U64(_))
            | (T::F32, V::F32(_))
            | (T::F64, V::F64(_))
            | (T::Char, V::Char(_))
            | (T::String, V::String(_))
            | (T::ByteArray, V::Bytes(_)) => true,
            (T::List(elem), V::List(items)) => items.iter().all(|v| elem.supports(v)),
            (T::List(elem), V::Bytes(_)) => matches!(**elem, T::U8),
            (T::ByteArray, V::List(items)) => {
                items.iter().all(|v| matches!(v, V::U8(_)))
            }
            (T::Record(r), V::Record(fields)) => {
                r.fields.len() == fields.len()
                    && r.fields
                        .iter()
                        .zip(fields.iter())
                        .all(|((_, t), v)| t.supports(v))
            }
            (T::Tuple(t), V::Tuple(items)) => {
                t.types.len() == items.len()
                    && t.types.iter().zip(items.iter()).all(|(t, v)| t.supports(v))
            }
            (T::Variant(vt), V::Variant { discriminant, payload }) => {
                match vt.cases.get(*discriminant as usize) {
                    Some((_, Some(payload_ty))) => payload
                        .as_ref()
                        .is_some_and(|p| payload_ty.supports(p)),
                    Some((_, None)) => payload.is_none(),
                    None => false,
                }
            }
            (T::Enum(et), V::Enum(discriminant)) => {
                (*discriminant as usize) < et.cases.len()
            }
            (T::Option(inner), V::Option(opt)) => match opt {
                Some(v) => inner.supports(v),
                None => true,
            },
            (T::Result(rt), V::Result(res)) => match res {
                Ok(payload) => match (&rt.ok, payload) {
                    (Some(t), Some(v)) => t.supports(v),
                    (None, None) => true,
                    _ => false,
                },
                Err(payload) => match (&rt.err, payload) {
                    (Some(t), Some(v)) => t.supports(v),
                    (None, None) => true,
                    _ => false,
                },
            },
            (T::Flags(ft), V::Flags(bits)) => {
                let mask = if ft.labels.len() == 32 {
                    u32::MAX
                } else {
                    (1u32 << ft.labels.len()) - 1
                };
                bits & !mask == 0
            }
            (T::Own(res), V::Own(h)) => ResourceType::same_identity(res, h.ty()),
            (T::Borrow(res), V::Borrow(h)) => ResourceType::same_identity(res, h.ty()),
            // A borrow parameter accepts an own handle; the adapter lends it
            (T::Borrow(res), V::Own(h)) => ResourceType::same_identity(res, h.ty()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlagsType, RecordType, RepKind, VariantType};

    #[test]
    fn supports_checks_structure() {
        let ty = ValType::Record(
            RecordType::new(vec![
                ("a".to_string(), ValType::U32),
                ("b".to_string(), ValType::String),
            ])
            .unwrap(),
        );
        let good = Value::Record(vec![Value::U32(1), Value::String("x".to_string())]);
        let bad = Value::Record(vec![Value::U32(1), Value::U32(2)]);
        assert!(ty.supports(&good));
        assert!(!ty.supports(&bad));
    }

    #[test]
    fn variant_discriminant_must_match_payload() {
        let ty = ValType::Variant(
            VariantType::new(vec![
                ("none".to_string(), None),
                ("some".to_string(), Some(ValType::U32)),
            ])
            .unwrap(),
        );
        assert!(ty.supports(&Value::Variant { discriminant: 0, payload: None }));
        assert!(ty.supports(&Value::Variant {
            discriminant: 1,
            payload: Some(Box::new(Value::U32(3))),
        }));
        assert!(!ty.supports(&Value::Variant { discriminant: 1, payload: None }));
        assert!(!ty.supports(&Value::Variant { discriminant: 2, payload: None }));
    }

    #[test]
    fn flags_mask_enforced() {
        let ty = ValType::Flags(
            FlagsType::new(vec!["a".to_string(), "b".to_string()]).unwrap(),
        );
        assert!(ty.supports(&Value::Flags(0b11)));
        assert!(!ty.supports(&Value::Flags(0b100)));
    }

    #[test]
    fn handle_values_compare_by_identity() {
        let ty = ResourceType::fresh(RepKind::U32);
        let h = crate::resources::OwnedHandle::new(
            ty,
            crate::resources::HandleRep::U32(1),
        )
        .unwrap();
        let a = Value::Own(h.clone());
        let b = Value::Own(h);
        assert_eq!(a, b);
    }
}
