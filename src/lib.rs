//! Workspace facade crate.
//!
//! Re-exports [`core_service`] so host applications can depend on
//! `notesync-workspace` and toggle the documented features (`desktop-shims`)
//! without wiring each crate individually.

pub use core_service::*;
