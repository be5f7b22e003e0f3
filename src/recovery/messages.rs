use crate::recovery::logger::sanitize_message;
use crate::recovery::types::{AgentError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Admin,
    Developer,
    EndUser,
}

/// Human-readable explanation of a failure paired with what to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub summary: String,
    pub suggestion: String,
    /// Technical detail, only present for admin and developer audiences.
    pub detail: Option<String>,
}

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.summary, self.suggestion)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

pub struct UserMessageGenerator;

impl UserMessageGenerator {
    pub fn generate_user_message(error: &AgentError, audience: Audience) -> UserMessage {
        let (summary, suggestion) = Self::template(&error.kind, audience);
        let detail = match audience {
            Audience::EndUser => None,
            Audience::Admin => Some(Self::admin_detail(error)),
            Audience::Developer => Some(format!(
                "{}; {}",
                Self::admin_detail(error),
                sanitize_message(&error.kind.to_string())
            )),
        };

        UserMessage {
            summary,
            suggestion,
            detail,
        }
    }

    fn admin_detail(error: &AgentError) -> String {
        let mut detail = format!("code {} in {}", error.code(), error.context.operation);
        if let Some(status) = error.context.status_code {
            detail.push_str(&format!(", HTTP status {}", status));
        }
        if let Some(id) = error.context.work_item_id {
            detail.push_str(&format!(", work item #{}", id));
        }
        if let Some(retries) = error.context.retry_count {
            detail.push_str(&format!(", {} retries", retries));
        }
        detail
    }

    fn template(kind: &ErrorKind, audience: Audience) -> (String, String) {
        let technical = audience != Audience::EndUser;
        match kind {
            ErrorKind::InvalidConfiguration { errors } => (
                "The connection settings are incomplete or invalid.".to_string(),
                if technical {
                    format!(
                        "Correct the configuration and re-authenticate: {}.",
                        errors.join("; ")
                    )
                } else {
                    "Ask your administrator to check the connection settings.".to_string()
                },
            ),
            ErrorKind::NotConfigured => (
                "You are not signed in to the work tracking service.".to_string(),
                "Configure an organization and personal access token, then re-authenticate."
                    .to_string(),
            ),
            ErrorKind::Unauthorized { status } => (
                "Your credentials were not accepted.".to_string(),
                if technical {
                    format!(
                        "Re-authenticate with a valid personal access token (service answered {}); check its scopes and expiry.",
                        status
                    )
                } else {
                    "Please sign in again or contact your administrator for access.".to_string()
                },
            ),
            ErrorKind::Network(_) | ErrorKind::Unreachable(_) | ErrorKind::Timeout { .. } => (
                "The work tracking service could not be reached.".to_string(),
                "Check your network connection and try again in a few moments.".to_string(),
            ),
            ErrorKind::Validation { field, message } => (
                format!("Some information is missing or invalid: {}.", message),
                format!("Correct the '{}' field and submit again.", field),
            ),
            ErrorKind::RateLimited { retry_after } => {
                let wait = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT).as_secs().max(1);
                (
                    "Too many requests were sent to the work tracking service.".to_string(),
                    format!("Wait {} seconds before trying again.", wait),
                )
            }
            ErrorKind::CircuitOpen { retry_at, .. } => (
                "The work tracking service is temporarily unavailable.".to_string(),
                match retry_at {
                    Some(at) if technical => {
                        format!("Requests are paused until {}; try again after that.", at.to_rfc3339())
                    }
                    _ => "Wait a minute and try again.".to_string(),
                },
            ),
            ErrorKind::NotFound { resource } => (
                if technical {
                    format!("Work item {} does not exist or was deleted.", resource)
                } else {
                    "The requested work item does not exist or was deleted.".to_string()
                },
                "Check the work item number and try again.".to_string(),
            ),
            ErrorKind::Conflict { .. } => (
                "The work item was changed by someone else.".to_string(),
                "Reload the work item and apply your changes again.".to_string(),
            ),
            ErrorKind::Client { status, .. } => (
                "The work tracking service rejected the request.".to_string(),
                if technical {
                    format!("Inspect the request payload (status {}).", status)
                } else {
                    "Review your input or contact your administrator.".to_string()
                },
            ),
            ErrorKind::Server { status, .. } => (
                "The work tracking service ran into a problem.".to_string(),
                if technical {
                    format!("Retry later; the service answered {}.", status)
                } else {
                    "Try again later. If the problem persists, contact your administrator."
                        .to_string()
                },
            ),
            ErrorKind::Security(_) | ErrorKind::Integrity(_) | ErrorKind::Unexpected(_) => (
                "Something went wrong while talking to the work tracking service.".to_string(),
                "Contact your administrator and mention the time of the failure.".to_string(),
            ),
        }
    }
}
