//! Canonical ABI option sets.
//!
//! The `memory`, `realloc`, `post-return` and string-encoding options of a
//! canon adapter, plus the validation rules tying them to the adapted
//! function's type: memory is required exactly when some contained type
//! reaches linear memory, realloc exactly when payload allocation can occur,
//! and post-return only on the lift direction.

use crate::ast::CanonOpt;
use crate::canonical_abi::string_encoding::StringEncoding;
use crate::engine::{CoreFunc, CoreMemory};
use crate::prelude::*;
use crate::types::ValType;

/// Value returned by realloc to signal allocation failure
pub const REALLOC_SENTINEL: u32 = 0xFFFF_FFFF;

/// Which way a canon adapter crosses the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterDirection {
    /// core function → component function
    Lift,
    /// component function → core function
    Lower,
}

/// A resolved canonical option set
#[derive(Clone, Default)]
pub struct CanonOpts {
    /// Selected string encoding
    pub encoding: StringEncoding,
    /// Linear memory used for indirect values
    pub memory: Option<Rc<dyn CoreMemory>>,
    /// Allocation function `(old_ptr, old_size, align, new_size) -> ptr`
    pub realloc: Option<CoreFunc>,
    /// Cleanup function called with the original core results (lift only)
    pub post_return: Option<CoreFunc>,
}

impl Debug for CanonOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonOpts")
            .field("encoding", &self.encoding)
            .field("memory", &self.memory.is_some())
            .field("realloc", &self.realloc.is_some())
            .field("post_return", &self.post_return.is_some())
            .finish()
    }
}

impl CanonOpts {
    /// The memory option, or the required-option error
    pub fn memory(&self) -> Result<&Rc<dyn CoreMemory>> {
        self.memory
            .as_ref()
            .ok_or_else(|| Error::abi_option_required("adapter needs the `memory` option"))
    }

    /// The realloc option, or the required-option error
    pub fn realloc(&self) -> Result<&CoreFunc> {
        self.realloc
            .as_ref()
            .ok_or_else(|| Error::abi_option_required("adapter needs the `realloc` option"))
    }
}

/// The required realloc signature `(i32, i32, i32, i32) -> i32`
pub fn realloc_signature() -> CoreFuncType {
    CoreFuncType::new(
        &[
            CoreValType::I32,
            CoreValType::I32,
            CoreValType::I32,
            CoreValType::I32,
        ],
        &[CoreValType::I32],
    )
}

/// Validate a realloc function's signature
pub fn check_realloc_signature(ty: &CoreFuncType) -> Result<()> {
    if *ty != realloc_signature() {
        return Err(Error::validation_error(format!(
            "realloc must have signature (i32, i32, i32, i32) -> (i32), got {ty}"
        )));
    }
    Ok(())
}

/// Validate a post-return function's signature: parameters equal the flat
/// result shape, no results
pub fn check_post_return_signature(
    ty: &CoreFuncType,
    result_flats: &[CoreValType],
) -> Result<()> {
    if ty.params != result_flats || !ty.results.is_empty() {
        return Err(Error::validation_error(format!(
            "post-return must take the flat results ({result_flats:?}) and return nothing, got {ty}"
        )));
    }
    Ok(())
}

/// Validate the raw option list: each option at most once, at most one
/// encoding, post-return forbidden when lowering
pub fn validate_opt_decls(opts: &[CanonOpt], direction: AdapterDirection) -> Result<()> {
    let mut encodings = 0;
    let mut memories = 0;
    let mut reallocs = 0;
    let mut post_returns = 0;
    for opt in opts {
        match opt {
            CanonOpt::StringUtf8 | CanonOpt::StringUtf16 | CanonOpt::StringLatin1Utf16 => {
                encodings += 1;
            }
            CanonOpt::Memory(_) => memories += 1,
            CanonOpt::Realloc(_) => reallocs += 1,
            CanonOpt::PostReturn(_) => post_returns += 1,
        }
    }
    if encodings > 1 {
        return Err(Error::abi_option_conflict(
            "more than one string encoding option",
        ));
    }
    if memories > 1 || reallocs > 1 || post_returns > 1 {
        return Err(Error::abi_option_conflict(
            "a canonical option may appear at most once",
        ));
    }
    if post_returns > 0 && direction == AdapterDirection::Lower {
        return Err(Error::abi_option_unexpected(
            "post-return is forbidden when lowering",
        ));
    }
    Ok(())
}

/// The encoding selected by an option list, defaulting to UTF-8
pub fn selected_encoding(opts: &[CanonOpt]) -> StringEncoding {
    for opt in opts {
        match opt {
            CanonOpt::StringUtf8 => return StringEncoding::Utf8,
            CanonOpt::StringUtf16 => return StringEncoding::Utf16Le,
            CanonOpt::StringLatin1Utf16 => return StringEncoding::Latin1Utf16,
            _ => {}
        }
    }
    StringEncoding::Utf8
}

/// Whether values of `ty` reach linear memory when lifted or lowered
pub fn needs_memory(ty: &ValType) -> bool {
    match ty {
        ValType::String | ValType::ByteArray | ValType::List(_) => true,
        ValType::Record(r) => r.fields.iter().any(|(_, t)| needs_memory(t)),
        ValType::Tuple(t) => t.types.iter().any(needs_memory),
        ValType::Variant(v) => v
            .cases
            .iter()
            .any(|(_, t)| t.as_ref().is_some_and(needs_memory)),
        ValType::Option(inner) => needs_memory(inner),
        ValType::Result(r) => {
            r.ok.as_ref().is_some_and(needs_memory) || r.err.as_ref().is_some_and(needs_memory)
        }
        _ => false,
    }
}

/// Whether producing values of `ty` requires allocating payload memory
pub fn needs_realloc(ty: &ValType) -> bool {
    // Allocation happens exactly for the types whose payloads live in
    // linear memory
    needs_memory(ty)
}
