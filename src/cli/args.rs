//! Command line argument parsing
//!
//! Subcommands:
//! - `check`: Validate the credentials against the service
//! - `show-config`: Print the effective configuration with secrets masked
//! - `status`: Print rate limiter, circuit breaker and error statistics
//! - `get`: Read one or more work items
//! - `create`: Create a work item
//! - `update`: Change fields of a work item
//! - `delete`: Delete a work item
//! - `query`: Run a WIQL query

use crate::recovery::messages::Audience;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "wia")]
#[command(author = "Workitem Agent Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage work items through a rate limited, circuit breaking REST client")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// File used to persist circuit breaker state between runs
    #[arg(long = "state-file", global = true)]
    pub state_file: Option<PathBuf>,

    /// Who error messages are written for
    #[arg(long = "audience", value_enum, default_value_t = AudienceArg::EndUser, global = true)]
    pub audience: AudienceArg,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudienceArg {
    EndUser,
    Admin,
    Developer,
}

impl From<AudienceArg> for Audience {
    fn from(arg: AudienceArg) -> Self {
        match arg {
            AudienceArg::EndUser => Audience::EndUser,
            AudienceArg::Admin => Audience::Admin,
            AudienceArg::Developer => Audience::Developer,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the effective configuration with secrets masked
    ShowConfig,
    #[command(flatten)]
    Service(ServiceCommand),
}

/// Commands that talk to the service through a configured agent.
#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// Validate the configured credentials
    Check,
    /// Show the state of every resilience component
    Status,
    /// Read work items by id
    Get {
        /// Work item ids
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Create a work item
    Create {
        /// Work item type, e.g. "Task" or "User Story"
        #[arg(short = 't', long = "type")]
        work_item_type: String,
        /// Title of the new work item
        #[arg(long)]
        title: String,
        /// Additional field as NAME=VALUE
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
        /// Project overriding the configured one
        #[arg(short = 'p', long)]
        project: Option<String>,
    },
    /// Update fields of a work item
    Update {
        id: i64,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Field to replace as NAME=VALUE
        #[arg(short = 'f', long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    /// Delete a work item
    Delete { id: i64 },
    /// Run a WIQL query and print the matching work items
    Query { wiql: String },
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Parses `NAME=VALUE`. The value is read as JSON when it parses, so numbers
/// and booleans keep their type; anything else is taken as a string.
pub fn parse_field(input: &str) -> Result<(String, Value), String> {
    let (name, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", input))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in '{}'", input));
    }
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    };
    Ok((name.to_string(), value))
}
