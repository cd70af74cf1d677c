//! Command line interface for luna-send

mod commands;

pub use commands::{parse_category, Cli, Commands};
