//! Core WebAssembly values.
//!
//! The flat words crossing the component/core boundary. Only the four
//! numeric types participate in the Canonical ABI; `V128` is carried for
//! completeness of the engine interface.

use crate::prelude::*;
use crate::types::CoreValType;

/// A core WebAssembly value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreValue {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// 128-bit vector
    V128(u128),
}

impl CoreValue {
    /// The core value type of this value
    pub fn core_type(&self) -> CoreValType {
        match self {
            CoreValue::I32(_) => CoreValType::I32,
            CoreValue::I64(_) => CoreValType::I64,
            CoreValue::F32(_) => CoreValType::F32,
            CoreValue::F64(_) => CoreValType::F64,
            CoreValue::V128(_) => CoreValType::V128,
        }
    }

    /// The contained i32, or a type mismatch error
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            CoreValue::I32(v) => Ok(*v),
            other => Err(Error::type_mismatch(format!(
                "expected core i32, got {:?}",
                other.core_type()
            ))),
        }
    }

    /// The contained i32 reinterpreted as unsigned
    pub fn as_u32(&self) -> Result<u32> {
        Ok(self.as_i32()? as u32)
    }

    /// The contained i64, or a type mismatch error
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            CoreValue::I64(v) => Ok(*v),
            other => Err(Error::type_mismatch(format!(
                "expected core i64, got {:?}",
                other.core_type()
            ))),
        }
    }

    /// The contained f32, or a type mismatch error
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            CoreValue::F32(v) => Ok(*v),
            other => Err(Error::type_mismatch(format!(
                "expected core f32, got {:?}",
                other.core_type()
            ))),
        }
    }

    /// The contained f64, or a type mismatch error
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            CoreValue::F64(v) => Ok(*v),
            other => Err(Error::type_mismatch(format!(
                "expected core f64, got {:?}",
                other.core_type()
            ))),
        }
    }

    /// A zero value of the given type
    pub fn zero(ty: CoreValType) -> Result<Self> {
        match ty {
            CoreValType::I32 => Ok(CoreValue::I32(0)),
            CoreValType::I64 => Ok(CoreValue::I64(0)),
            CoreValType::F32 => Ok(CoreValue::F32(0.0)),
            CoreValType::F64 => Ok(CoreValue::F64(0.0)),
            CoreValType::V128 => Ok(CoreValue::V128(0)),
            other => Err(Error::type_mismatch(format!(
                "no flat zero value for {other:?}"
            ))),
        }
    }
}

impl From<i32> for CoreValue {
    fn from(v: i32) -> Self {
        CoreValue::I32(v)
    }
}

impl From<u32> for CoreValue {
    fn from(v: u32) -> Self {
        CoreValue::I32(v as i32)
    }
}

impl From<i64> for CoreValue {
    fn from(v: i64) -> Self {
        CoreValue::I64(v)
    }
}

impl From<f32> for CoreValue {
    fn from(v: f32) -> Self {
        CoreValue::F32(v)
    }
}

impl From<f64> for CoreValue {
    fn from(v: f64) -> Self {
        CoreValue::F64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_enforce_types() {
        assert_eq!(CoreValue::I32(7).as_i32().unwrap(), 7);
        assert_eq!(CoreValue::I32(-1).as_u32().unwrap(), u32::MAX);
        assert!(CoreValue::I64(7).as_i32().is_err());
        assert!(CoreValue::F32(1.0).as_f64().is_err());
    }

    #[test]
    fn zero_values_match_types() {
        assert_eq!(
            CoreValue::zero(CoreValType::I64).unwrap().core_type(),
            CoreValType::I64
        );
        assert!(CoreValue::zero(CoreValType::FuncRef).is_err());
    }
}
