//! Prelude module for wcr-error.
//!
//! Re-exports the types needed by the other WCR crates so call sites can
//! `use wcr_error::prelude::*` in both std and no_std environments.

pub use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec,
    vec::Vec,
};
pub use core::{
    fmt,
    fmt::{Debug, Display},
    result,
};

pub use crate::{codes, Error, ErrorCategory, Result};
