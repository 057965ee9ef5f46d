// WCR - wcr-component
// Module: WebAssembly Component Model Runtime Core
//
// Copyright (c) 2025 The WCR Project Developers
// Licensed under the MIT license.
// SPDX-License-Identifier: MIT

#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! Component Model runtime core for WCR.
//!
//! Loads a parsed WebAssembly component (a tree of core modules wrapped in
//! component-level definitions, imports, exports, instantiations, aliases,
//! type declarations, and canonical adapters) and produces running component
//! instances linked against a host-provided core WebAssembly engine.
//!
//! The three central subsystems:
//!
//! - [`definitions`]: lexically nested scopes of ordered, sort-indexed
//!   definitions with memoised type and value construction
//! - [`types`] and [`type_check`]: the structural type system with nominal
//!   resource identities and finite size/depth budgets
//! - [`canonical_abi`] and [`canon`]: the lift/lower bridge between
//!   component values and the flat core-wasm ABI
//!
//! The embedded core engine is abstract: hosts implement the traits in
//! [`engine`]. Host-side instances are assembled with
//! [`host::InstanceBuilder`].

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

/// Input tree produced by a component parser
pub mod ast;
/// The component builder
pub mod builder;
/// Canon adapters: lift, lower, and the resource builtins
pub mod canon;
/// The Canonical ABI: layout, encodings, options, lift/lower
pub mod canonical_abi;
/// Top-level components
pub mod component;
/// Call context
pub mod context;
/// Sort-indexed definitions and scopes
pub mod definitions;
/// Interface to the embedded core engine
pub mod engine;
/// Host-synthesised instances
pub mod host;
/// Component instances
pub mod instance;
/// Prelude for consistent imports
pub mod prelude;
/// Resource handles and ownership discipline
pub mod resources;
/// Structural type compatibility
pub mod type_check;
/// The component-model type system
pub mod types;
/// Component-model values
pub mod values;

pub use builder::build;
pub use component::{Component, ComponentExport, ComponentVal};
pub use context::Context;
pub use engine::{
    CompiledModule, CoreEngine, CoreExtern, CoreFunc, CoreGlobal, CoreInstanceVal, CoreMemory,
    CoreModuleVal, CoreTable, ImportResolver, ModuleInstanceHandle,
};
pub use host::InstanceBuilder;
pub use instance::{ComponentExtern, ComponentFunc, ExportSpec, Instance};
pub use types::{FuncType, RepKind, ResourceType, Type, ValType};
pub use values::Value;

pub use wcr_error::{Error, ErrorCategory, Result};
pub use wcr_foundation as foundation;
