//! CLI commands

pub mod release;
pub mod repo;
