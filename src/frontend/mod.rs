//! Frontend components
//!
//! Configuration (`binutils.toml`, function manifests, type layouts) and the
//! command-line interface built on top of it.

pub mod cli;
pub mod config;

pub use cli::main as cli_main;
pub use config::{Config, Pipe};
