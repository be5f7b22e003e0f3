//! Command line interface for the `wia` binary
//!
//! Argument parsing lives here so the binary stays a thin dispatcher.

pub mod args;

pub use args::{Args, AudienceArg, Commands, ServiceCommand, parse_field};
