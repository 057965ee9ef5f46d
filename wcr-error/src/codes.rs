//! Stable error codes for WCR.
//!
//! Codes are grouped in ranges by subsystem so a bare code in a log line is
//! enough to locate the failing layer.

// Core engine errors (1000-1099)

/// General execution failure inside the core engine
pub const EXECUTION_ERROR: u16 = 1000;
/// A core function call failed
pub const FUNCTION_CALL_FAILED: u16 = 1001;
/// The current call chain was cancelled
pub const OPERATION_CANCELLED: u16 = 1002;
/// A core module failed to compile
pub const COMPILE_ERROR: u16 = 1003;
/// A core module failed to instantiate
pub const INSTANTIATION_ERROR: u16 = 1004;

// Component and type errors (2000-2099)

/// Structural type compatibility check failed
pub const TYPE_MISMATCH: u16 = 2000;
/// Duplicate import/export/field/case/flag name
pub const DUPLICATE_NAME: u16 = 2001;
/// Instantiation argument unresolved and not synthesisable
pub const MISSING_ARGUMENT: u16 = 2002;
/// Sort index out of range for the scope
pub const INDEX_OUT_OF_RANGE: u16 = 2003;
/// Outer alias count exceeds the scope chain depth
pub const SCOPE_DEPTH_EXCEEDED: u16 = 2004;
/// Type weight exceeds the maximum type size budget
pub const TYPE_SIZE_EXCEEDED: u16 = 2005;
/// Type nesting exceeds the maximum type depth budget
pub const TYPE_DEPTH_EXCEEDED: u16 = 2006;
/// Type resolution recursed past the depth limit
pub const RECURSION_DEPTH_EXCEEDED: u16 = 2007;
/// Unknown or malformed definition node
pub const UNKNOWN_DEFINITION: u16 = 2008;
/// General validation failure
pub const VALIDATION_ERROR: u16 = 2009;
/// Alias would expose resources of a nested component
pub const ALIAS_RESOURCE_ESCAPE: u16 = 2010;

// Resource and handle errors (3000-3099)

/// Handle dropped with lends, used after drop, or wrong table entry type
pub const HANDLE_MISUSE: u16 = 3000;
/// resource.new/rep on a resource type of another component
pub const RESOURCE_NOT_LOCAL: u16 = 3001;
/// Handle table exceeded its absolute slot cap
pub const TABLE_CAPACITY_EXCEEDED: u16 = 3002;
/// Instance entered while already active
pub const INSTANCE_ACTIVE: u16 = 3003;
/// Boundary crossed while leaving is forbidden
pub const CANNOT_LEAVE: u16 = 3004;
/// Resource destructor failed
pub const DESTRUCTOR_FAILED: u16 = 3005;

// Memory and Canonical ABI errors (4000-4099)

/// Memory access beyond the linear memory bounds
pub const MEMORY_OUT_OF_BOUNDS: u16 = 4000;
/// Memory access with wrong alignment reported by the engine
pub const UNALIGNED_MEMORY_ACCESS: u16 = 4001;
/// Indirect pointer not aligned for the target type
pub const ALIGNMENT_VIOLATION: u16 = 4002;
/// Char scalar value out of range or in the surrogate block
pub const INVALID_CHAR: u16 = 4003;
/// memory/realloc/post-return option absent where required
pub const ABI_OPTION_REQUIRED: u16 = 4004;
/// Canonical ABI option supplied more than once
pub const ABI_OPTION_CONFLICT: u16 = 4005;
/// Canonical ABI option forbidden for the adapter direction
pub const ABI_OPTION_UNEXPECTED: u16 = 4006;
/// realloc returned the failure sentinel or an unusable pointer
pub const REALLOC_FAILED: u16 = 4007;
/// String payload exceeds the safety limit
pub const STRING_TOO_LONG: u16 = 4008;
/// List payload exceeds the safety limit
pub const LIST_TOO_LONG: u16 = 4009;
/// String bytes are not valid for the selected encoding
pub const INVALID_ENCODING: u16 = 4010;
