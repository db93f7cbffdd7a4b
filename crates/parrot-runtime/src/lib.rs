//! # parrot-runtime
//!
//! The session orchestrator: one [`Bot`] per live chat connection, a
//! process-wide [`InstanceRegistry`] for coordinated shutdown, the
//! fixed message pipeline (commands → answerer → learner → reaction),
//! and per-guild store lifecycle with periodic autosave.

pub mod answerer;
pub mod bot;
pub mod commands;
pub mod learner;
pub mod reaction;
pub mod registry;

pub use bot::Bot;
pub use registry::{InstanceRegistry, global_registry};
