//! Rivet kernel ABI types
//!
//! Canonical definitions for the limits, process identity, process states,
//! open-file flags, syscall numbers and errno values shared by every kernel crate. Nothing
//! here depends on the running kernel, so the crate stays `no_std`.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod errno;
pub mod fs;
pub mod param;
pub mod proc;
pub mod syscall;

pub use fs::OpenFlags;
pub use param::*;
pub use proc::{Pid, ProcState};
