//! Command line interface module
//!
//! Argument parsing and the runner that drives one push from the terminal.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::{Runner, exit_code};
