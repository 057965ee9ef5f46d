//! Prelude module for wcr-foundation.
//!
//! Unified imports for std and no_std environments, following the WCR
//! convention of routing collection types through the prelude so modules
//! compile unchanged in both configurations.

#[cfg(not(feature = "std"))]
pub use alloc::collections::{BTreeMap as HashMap, BTreeSet as HashSet};
pub use alloc::{
    boxed::Box,
    format,
    rc::Rc,
    string::{String, ToString},
    vec,
    vec::Vec,
};
pub use core::{
    cell::{Cell, RefCell},
    cmp::{Eq, Ord, PartialEq, PartialOrd},
    convert::{TryFrom, TryInto},
    fmt,
    fmt::{Debug, Display},
    iter, mem, slice, str,
};
#[cfg(feature = "std")]
pub use std::collections::{HashMap, HashSet};

pub use wcr_error::{codes, Error, ErrorCategory, Result};
