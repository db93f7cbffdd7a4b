//! Command-line interface for the parrot bot.

mod commands;

pub use commands::Cli;
