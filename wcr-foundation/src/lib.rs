// WCR - wcr-foundation
// Module: WCR Foundation Types
//
// Copyright (c) 2025 The WCR Project Developers
// Licensed under the MIT license.
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! Foundation library for the WCR component runtime.
//!
//! Provides the pieces shared between the component layer and the embedded
//! core engine interface: the generational slot table used for resource
//! handles, and the core WebAssembly value and type model (flat values,
//! function signatures, memory/table/global types).

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

/// Prelude module for consistent imports
pub mod prelude;
/// Generational slot table
pub mod table;
/// Core WebAssembly type model
pub mod types;
/// Core WebAssembly values
pub mod values;

pub use table::{Table, MAX_TABLE_SLOTS};
pub use types::{
    CoreExternType, CoreFuncType, CoreGlobalType, CoreInstanceType, CoreMemoryType, CoreTableType,
    CoreValType, Limits, ModuleType,
};
pub use values::CoreValue;
