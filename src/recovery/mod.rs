pub mod types;
pub mod logger;
pub mod messages;
pub mod error_recovery;

#[cfg(test)]
pub mod tests;

pub use types::*;
pub use logger::{ErrorLogger, ErrorStatistics, LoggedError, sanitize_message};
pub use messages::{Audience, UserMessage, UserMessageGenerator};
pub use error_recovery::{ErrorHandler, RecoverySnapshot, retry_with};
