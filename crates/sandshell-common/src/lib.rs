//! # sandshell-common
//!
//! Shared error definitions and constants used across the sandshell
//! workspace.
//!
//! This crate is the leaf of the dependency graph — it depends on no other
//! internal crate and provides the foundational primitives that the core
//! library and the CLI build upon.

pub mod constants;
pub mod error;
