//! # Workitem Agent
//!
//! A resilient client for work item tracking REST services. Every request
//! passes through a sliding-window rate limiter and a circuit breaker, is
//! retried with exponential backoff when the failure is transient, and ends
//! up as a classified [`AgentError`] that can be logged and turned into a
//! message for end users or developers.
//!
//! ## Architecture Overview
//!
//! - **[`config`]**: Layered configuration from defaults, a TOML file and the environment
//! - **[`auth`]**: Credential storage and Basic authentication against the service
//! - **[`client`]**: Transport, rate limiting, circuit breaking and request metrics
//! - **[`recovery`]**: Error taxonomy, retry, fallback, logging and user messages
//! - **[`work_items`]**: Validated create, read, update, delete and query operations
//! - **[`integration`]**: Assembles all of the above from one configuration
//!
//! ## Features
//!
//! ### Resilience
//! - **Sliding Window Rate Limiting**: Never more than the configured number of requests per window
//! - **Circuit Breaking**: Fails fast while a dependency is down, with a single half-open trial
//! - **Retry With Backoff**: Exponential backoff with jitter, honoring `Retry-After`
//!
//! ### Error Handling
//! - **Closed Taxonomy**: Every failure has a code, category, severity and recoverability
//! - **Sanitized Logging**: Credentials never reach logs or messages
//! - **Audience-Specific Messages**: Plain guidance for users, details for developers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use workitem_agent::{ConfigurationManager, UpdateWorkItemRequest, WorkItemAgent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let agent = WorkItemAgent::new(ConfigurationManager::new().load()?)?;
//!
//!     let item = agent.work_items().get_work_item(123).await?;
//!     println!("{:?} is {:?}", item.title(), item.state());
//!
//!     agent
//!         .work_items()
//!         .update_work_item(UpdateWorkItemRequest::new(123).set_state("Active"))
//!         .await?;
//!     Ok(())
//! }
//! ```

/// Layered client configuration.
///
/// Loads settings from defaults, an optional TOML file and environment
/// variables, validates them and produces masked views for display.
pub mod config;

/// Credential management and authentication checks.
pub mod auth;

/// Request pipeline towards the remote service.
///
/// Provides the pluggable transport, the rate limiter, the circuit breaker
/// and per-request performance metrics behind [`ApiClient`].
pub mod client;

/// Error taxonomy and recovery strategies.
///
/// Classifies failures, retries them with backoff, falls back to
/// alternatives, keeps a bounded error log and renders user messages.
pub mod recovery;

/// Work item domain operations.
pub mod work_items;

/// High-level assembly of every component.
pub mod integration;

/// Environment variable names and service constants.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export configuration types
pub use config::{AuthConfig, ClientConfig, ConfigError, ConfigurationManager};

// Re-export client types
pub use auth::{AuthService, AuthValidation};
pub use client::{ApiClient, CircuitBreaker, CircuitState, RateLimiter, Transport};

// Re-export recovery types
pub use recovery::{AgentError, Audience, ErrorCategory, ErrorHandler, ErrorKind, ErrorSeverity, UserMessage};

// Re-export work item types
pub use work_items::{
    CreateWorkItemRequest, PatchOperation, UpdateWorkItemRequest, WorkItem, WorkItemService,
};

// Re-export integration types
pub use integration::{AgentStatus, WorkItemAgent};
