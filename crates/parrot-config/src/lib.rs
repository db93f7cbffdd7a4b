//! # parrot-config
//!
//! Configuration for the parrot bot (`parrot.toml`): process-wide bot
//! settings, baseline behavior flags, and per-guild/per-channel behavior
//! overrides with channel > guild > default resolution.

pub mod loader;
pub mod schema;

pub use schema::{
    Behavior, BehaviorConfig, BehaviorOverride, BotConfig, ConfigWarning, LoggingConfig,
    ParrotConfig, WarningSeverity,
};
