// WCR - wcr-error
// Module: WCR Error Handling
//
// Copyright (c) 2025 The WCR Project Developers
// Licensed under the MIT license.
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! Error handling for the WCR component runtime.
//!
//! Errors carry a category, a stable `u16` code and a message. Codes are
//! grouped into numbered ranges per category:
//!
//! - 1000-1099: core engine errors (execution, cancellation)
//! - 2000-2099: component and type errors (mismatches, budgets, scopes)
//! - 3000-3099: resource and handle errors (ownership, re-entrancy)
//! - 4000-4099: memory and Canonical ABI errors (bounds, alignment, options)
//!
//! Helper constructors exist for every error kind the runtime surfaces, so
//! call sites read as `Error::type_mismatch("expected record")` rather than
//! assembling category/code pairs by hand.

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

/// Error codes for WCR
pub mod codes;
/// Error and error handling types
pub mod errors;
/// Prelude for consistent imports
pub mod prelude;

pub use errors::{Error, ErrorCategory};

/// Result alias used throughout the WCR crates
pub type Result<T> = core::result::Result<T, Error>;
