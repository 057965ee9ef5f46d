//! Core error types for WCR.

use alloc::string::String;
use core::fmt;

use crate::codes;

/// Error categories for WCR operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Core engine errors
    Core = 1,
    /// Component model errors
    Component = 2,
    /// Resource and handle errors
    Resource = 3,
    /// Memory and Canonical ABI errors
    Memory = 4,
    /// Validation errors
    Validation = 5,
    /// Type errors
    Type = 6,
    /// Runtime errors
    Runtime = 7,
    /// Capacity errors
    Capacity = 8,
}

/// WCR error type.
///
/// Categorised errors with stable codes and a message. This is the single
/// error type crossing every layer of the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Error category
    pub category: ErrorCategory,
    /// Error code
    pub code: u16,
    /// Error message
    pub message: String,
}

impl Error {
    /// Create a new error
    pub fn new<S: Into<String>>(category: ErrorCategory, code: u16, message: S) -> Self {
        Self { category, code, message: message.into() }
    }

    /// Structural type compatibility failure; `message` carries the failing path
    pub fn type_mismatch<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Type, codes::TYPE_MISMATCH, message)
    }

    /// Duplicate import/export/field/case/flag name
    pub fn duplicate_name<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Validation, codes::DUPLICATE_NAME, message)
    }

    /// Instantiation argument unresolved and not synthesisable
    pub fn missing_argument<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Component, codes::MISSING_ARGUMENT, message)
    }

    /// Sort or outer index invalid for the scope
    pub fn index_out_of_range<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Component, codes::INDEX_OUT_OF_RANGE, message)
    }

    /// Outer alias count exceeds the scope chain
    pub fn scope_depth_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Component, codes::SCOPE_DEPTH_EXCEEDED, message)
    }

    /// Type weight budget exceeded
    pub fn type_size_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Type, codes::TYPE_SIZE_EXCEEDED, message)
    }

    /// Type depth budget exceeded
    pub fn type_depth_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Type, codes::TYPE_DEPTH_EXCEEDED, message)
    }

    /// Type resolution recursion limit exceeded
    pub fn recursion_depth_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Type, codes::RECURSION_DEPTH_EXCEEDED, message)
    }

    /// Unknown or malformed definition node
    pub fn unknown_definition<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Component, codes::UNKNOWN_DEFINITION, message)
    }

    /// General validation failure
    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Validation, codes::VALIDATION_ERROR, message)
    }

    /// Alias would expose resources of a nested component
    pub fn alias_resource_escape<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Component, codes::ALIAS_RESOURCE_ESCAPE, message)
    }

    /// Handle misuse: drop-with-lends, use-after-drop, wrong entry type
    pub fn handle_misuse<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Resource, codes::HANDLE_MISUSE, message)
    }

    /// resource.new/rep on a non-local resource type
    pub fn resource_not_local<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Resource, codes::RESOURCE_NOT_LOCAL, message)
    }

    /// Handle table slot cap exceeded
    pub fn table_capacity_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Capacity, codes::TABLE_CAPACITY_EXCEEDED, message)
    }

    /// Instance entered while already active
    pub fn instance_active<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Resource, codes::INSTANCE_ACTIVE, message)
    }

    /// Boundary crossed while leaving is forbidden
    pub fn cannot_leave<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Resource, codes::CANNOT_LEAVE, message)
    }

    /// Resource destructor failed; the lifecycle cannot be left partial
    pub fn destructor_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Resource, codes::DESTRUCTOR_FAILED, message)
    }

    /// Memory access beyond linear memory bounds
    pub fn memory_out_of_bounds<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::MEMORY_OUT_OF_BOUNDS, message)
    }

    /// Indirect pointer not aligned for the target type
    pub fn alignment_violation<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::ALIGNMENT_VIOLATION, message)
    }

    /// Char scalar value out of range
    pub fn invalid_char<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::INVALID_CHAR, message)
    }

    /// Required Canonical ABI option absent
    pub fn abi_option_required<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::ABI_OPTION_REQUIRED, message)
    }

    /// Canonical ABI option supplied more than once
    pub fn abi_option_conflict<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::ABI_OPTION_CONFLICT, message)
    }

    /// Canonical ABI option forbidden for the direction
    pub fn abi_option_unexpected<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::ABI_OPTION_UNEXPECTED, message)
    }

    /// realloc failed or returned an unusable pointer
    pub fn realloc_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::REALLOC_FAILED, message)
    }

    /// String bytes invalid for the selected encoding
    pub fn invalid_encoding<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Memory, codes::INVALID_ENCODING, message)
    }

    /// General runtime execution failure
    pub fn runtime_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Runtime, codes::EXECUTION_ERROR, message)
    }

    /// A core function call failed
    pub fn function_call_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Runtime, codes::FUNCTION_CALL_FAILED, message)
    }

    /// The current call chain was cancelled
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCategory::Runtime, codes::OPERATION_CANCELLED, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}:{}] {}", self.category, self.code, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_constructors_carry_codes() {
        let err = Error::type_mismatch("expected record");
        assert_eq!(err.category, ErrorCategory::Type);
        assert_eq!(err.code, codes::TYPE_MISMATCH);
        assert_eq!(err.message, "expected record");

        let err = Error::handle_misuse("use after drop");
        assert_eq!(err.category, ErrorCategory::Resource);
        assert_eq!(err.code, codes::HANDLE_MISUSE);
    }

    #[test]
    fn display_includes_category_and_code() {
        let err = Error::invalid_char("0xd800");
        let text = alloc::format!("{err}");
        assert!(text.contains("4003"));
        assert!(text.contains("0xd800"));
    }
}
