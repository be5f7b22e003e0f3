//! Environment variable names and service constants.
//!
//! Centralizes every name the client reads from the process environment and
//! the fixed values of the remote work item API.

/// Default configuration file looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "workitem-agent.toml";

/// Environment variables read by [`ConfigurationManager`](crate::config::ConfigurationManager)
pub mod vars {
    /// Explicit path of a TOML configuration file
    pub const CONFIG_PATH: &str = "WORKITEM_AGENT_CONFIG";

    /// Organization name (first path segment of every request)
    pub const ORGANIZATION: &str = "AZURE_DEVOPS_ORG";

    /// Personal access token used for Basic authentication
    pub const PERSONAL_ACCESS_TOKEN: &str = "AZURE_DEVOPS_PAT";

    /// Default project for create operations
    pub const PROJECT: &str = "AZURE_DEVOPS_PROJECT";

    /// Service root, e.g. `https://dev.azure.com`
    pub const BASE_URL: &str = "AZURE_DEVOPS_BASE_URL";

    /// Per-request timeout in milliseconds
    pub const TIMEOUT_MS: &str = "AZURE_DEVOPS_TIMEOUT_MS";

    /// Total attempts for a retryable request
    pub const RETRY_ATTEMPTS: &str = "AZURE_DEVOPS_RETRY_ATTEMPTS";

    /// Requests admitted per rate-limit window
    pub const RATE_LIMIT_REQUESTS: &str = "AZURE_DEVOPS_RATE_LIMIT_REQUESTS";

    /// Rate-limit window length in milliseconds
    pub const RATE_LIMIT_WINDOW_MS: &str = "AZURE_DEVOPS_RATE_LIMIT_WINDOW_MS";
}

/// Remote API constants
pub mod api {
    pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

    pub const API_VERSION: &str = "7.1";

    pub const JSON_CONTENT_TYPE: &str = "application/json";

    pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

    /// Rate-limit headers reported by the service
    pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
    pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
    pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
    pub const HEADER_RETRY_AFTER: &str = "retry-after";

    /// Longest `x-ratelimit-reset` horizon accepted, in seconds
    pub const MAX_RATE_LIMIT_RESET_SECS: u64 = 3600;

    /// Largest id list accepted by the batch read endpoint
    pub const MAX_BATCH_SIZE: usize = 200;
}

/// Field reference names
pub mod fields {
    pub const TITLE: &str = "System.Title";
    pub const STATE: &str = "System.State";
    pub const DESCRIPTION: &str = "System.Description";
    pub const ASSIGNED_TO: &str = "System.AssignedTo";
}

/// Name of the circuit breaker guarding the work item API
pub const WORK_ITEM_DEPENDENCY: &str = "work-item-tracking";
