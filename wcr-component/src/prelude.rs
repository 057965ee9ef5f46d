//! Prelude module for wcr-component.
//!
//! Unified imports for std and no_std environments. Modules import
//! collections and shared WCR types from here so they compile unchanged in
//! both configurations.

#[cfg(not(feature = "std"))]
pub use alloc::collections::{BTreeMap as HashMap, BTreeMap, BTreeSet as HashSet};
pub use alloc::{
    boxed::Box,
    format,
    rc::{Rc, Weak},
    string::{String, ToString},
    vec,
    vec::Vec,
};
pub use core::{
    any::Any,
    cell::{Cell, RefCell},
    cmp::{Eq, Ord, PartialEq, PartialOrd},
    convert::{TryFrom, TryInto},
    fmt,
    fmt::{Debug, Display},
    iter, mem, slice, str,
};
#[cfg(feature = "std")]
pub use std::collections::{BTreeMap, HashMap, HashSet};

pub use wcr_error::{codes, Error, ErrorCategory, Result};
pub use wcr_foundation::{
    table::{Table, MAX_TABLE_SLOTS},
    types::{
        CoreExternType, CoreFuncType, CoreGlobalType, CoreInstanceType, CoreMemoryType,
        CoreTableType, CoreValType, Limits, ModuleType,
    },
    values::CoreValue,
};
