//! Command line interface of the `indexlib` binary.

pub mod args;
pub mod commands;
pub mod output;

pub use args::{Command, IndexlibArgs, InspectArgs, MergeArgs, OutputFormat};
pub use commands::execute_command;
