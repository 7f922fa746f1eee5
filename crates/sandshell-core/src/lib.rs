//! # sandshell-core
//!
//! Low-level Linux primitives behind the `sbsh` command set.
//!
//! This crate provides safe abstractions over:
//! - **Fd operations**: memfd, `O_TMPFILE`, seek, fexecve, flink, chown/chmod.
//! - **Fd passing**: `SCM_RIGHTS` transfer over unix sockets.
//! - **Mounts**: binds, remounts, and transactional mount composition.
//! - **Namespaces**: creation, entry, and the child launcher.
//! - **Capabilities** and **seccomp**: live capability sets and owned
//!   filter sessions.
//!
//! Unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation at each call site.

#![allow(unsafe_code)]

pub mod caps;
pub mod fdops;
pub mod mount;
pub mod namespace;
pub mod parse;
pub mod process;
pub mod seccomp;
pub mod socket;
