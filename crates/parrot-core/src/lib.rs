//! # parrot-core
//!
//! Core types and primitives for the parrot bot. This crate defines the
//! shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod types;

pub use error::{ParrotError, Result};
pub use types::*;
