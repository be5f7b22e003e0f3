//! # Client Assembly
//!
//! Wires every component of the crate together from one [`ClientConfig`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   WorkItemAgent                      │
//! │  ┌──────────────┐   ┌──────────────┐                 │
//! │  │ WorkItem     │──▶│  ApiClient   │──▶ Transport    │
//! │  │ Service      │   │  RateLimiter │                 │
//! │  └──────┬───────┘   │  Breaker ◀───┼── ErrorHandler  │
//! │         │           └──────────────┘    (registry)   │
//! │         └──────────▶ ErrorLogger                     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The configuration is constructed once and every component receives the
//! pieces it needs through its constructor. Circuit breaker state can be
//! exported before shutdown and restored at the next start.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use workitem_agent::{ConfigurationManager, CreateWorkItemRequest, WorkItemAgent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigurationManager::new().load()?;
//!     let agent = WorkItemAgent::new(config)?;
//!
//!     agent.auth().validate_authentication().await?;
//!     let item = agent
//!         .work_items()
//!         .create_work_item(CreateWorkItemRequest::new("Task").with_title("Write release notes"))
//!         .await?;
//!     println!("created #{:?}", item.id);
//!     Ok(())
//! }
//! ```

use crate::auth::AuthService;
use crate::client::circuit_breaker::CircuitBreakerSnapshot;
use crate::client::rate_limiter::{RateLimiter, RateLimiterStatus};
use crate::client::transport::{ReqwestTransport, Transport};
use crate::client::types::HealthStatus;
use crate::client::ApiClient;
use crate::config::{ClientConfig, ConfigurationManager};
use crate::env;
use crate::recovery::error_recovery::{ErrorHandler, RecoverySnapshot};
use crate::recovery::logger::{ErrorLogger, ErrorStatistics};
use crate::recovery::messages::{Audience, UserMessage, UserMessageGenerator};
use crate::recovery::types::{AgentError, ErrorContext, ErrorKind};
use crate::work_items::WorkItemService;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Fully assembled client for the work item tracking service.
pub struct WorkItemAgent {
    config: Arc<ClientConfig>,
    auth: Arc<AuthService>,
    client: Arc<ApiClient>,
    errors: Arc<ErrorHandler>,
    work_items: WorkItemService,
}

/// Point-in-time view of every resilience component.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub auth_configured: bool,
    pub health: HealthStatus,
    pub rate_limiter: RateLimiterStatus,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub errors: ErrorStatistics,
}

impl WorkItemAgent {
    /// Builds the agent on top of a `reqwest` transport.
    pub fn new(config: ClientConfig) -> Result<Self, AgentError> {
        let transport = ReqwestTransport::new().map_err(|e| {
            AgentError::new(ErrorKind::Network(e.to_string()), ErrorContext::new("create_transport"))
        })?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, AgentError> {
        let validation = ConfigurationManager::validate_settings(&config);
        if !validation.valid {
            return Err(AgentError::new(
                ErrorKind::InvalidConfiguration {
                    errors: validation.errors,
                },
                ErrorContext::new("create_agent"),
            ));
        }

        let config = Arc::new(config);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let auth = Arc::new(AuthService::new(
            config.clone(),
            transport.clone(),
            rate_limiter.clone(),
        ));
        auth.configure(config.auth.clone())?;

        let errors = Arc::new(ErrorHandler::with_logger(
            config.circuit_breaker.clone(),
            Arc::new(ErrorLogger::new()),
        ));
        let client = Arc::new(ApiClient::new(
            config.clone(),
            auth.clone(),
            transport,
            rate_limiter,
            errors.circuit_breaker(env::WORK_ITEM_DEPENDENCY),
        ));
        let work_items = WorkItemService::new(client.clone(), errors.clone());

        info!(
            organization = %config.auth.organization,
            base_url = %config.base_url,
            "Work item agent initialized"
        );

        Ok(Self {
            config,
            auth,
            client,
            errors,
            work_items,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn work_items(&self) -> &WorkItemService {
        &self.work_items
    }

    pub fn user_message(&self, error: &AgentError, audience: Audience) -> UserMessage {
        UserMessageGenerator::generate_user_message(error, audience)
    }

    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            auth_configured: self.auth.is_configured(),
            health: self.client.health_status().await,
            rate_limiter: self.client.rate_limiter().status().await,
            circuit_breakers: self.errors.export_state().circuit_breakers,
            errors: self.errors.error_statistics(),
        }
    }

    pub fn export_state(&self) -> RecoverySnapshot {
        self.errors.export_state()
    }

    pub fn restore_state(&self, snapshot: &RecoverySnapshot) {
        self.errors.import_state(snapshot);
    }

    /// Restores breaker state saved by [`save_state`](Self::save_state). A
    /// missing file is not an error; an unreadable one is skipped with a warning.
    pub fn load_state(&self, path: &Path) -> anyhow::Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<RecoverySnapshot>(&content) {
            Ok(snapshot) => {
                self.restore_state(&snapshot);
                Ok(true)
            }
            Err(e) => {
                warn!("Ignoring unreadable recovery state {:?}: {}", path, e);
                Ok(false)
            }
        }
    }

    pub fn save_state(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.export_state())?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
