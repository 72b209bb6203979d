//! The `snip` operator tool: argument parsing, configuration, logging and
//! the commands that drive a store and its deletion pipeline.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use cli::{Cli, Command};
pub use commands::Session;
pub use config::AppConfig;
