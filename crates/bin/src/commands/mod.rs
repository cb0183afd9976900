//! Subcommand implementations.

pub mod sessions;
