pub mod types;
pub mod validation;
pub mod service;

#[cfg(test)]
pub mod tests;

pub use types::*;
pub use validation::{ALLOWED_STATES, ALLOWED_WORK_ITEM_TYPES};
pub use service::WorkItemService;
