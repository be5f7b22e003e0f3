//! Request checks that run before anything reaches the network.

use crate::env::{self, fields};
use crate::recovery::types::AgentError;
use crate::work_items::types::{CreateWorkItemRequest, PatchOp, UpdateWorkItemRequest};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

pub const ALLOWED_WORK_ITEM_TYPES: &[&str] = &[
    "Epic",
    "Feature",
    "User Story",
    "Product Backlog Item",
    "Task",
    "Bug",
    "Issue",
    "Test Case",
];

pub const ALLOWED_STATES: &[&str] = &[
    "New",
    "Active",
    "Resolved",
    "Closed",
    "Removed",
    "To Do",
    "In Progress",
    "Done",
];

pub const MAX_TITLE_LENGTH: usize = 255;

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)+$").expect("valid field name pattern")
});

static RELATION_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/relations/(-|\d+)$").expect("valid relation path pattern"));

/// Canonical spelling of `work_item_type`, matched case-insensitively.
pub fn canonical_work_item_type(operation: &str, work_item_type: &str) -> Result<&'static str, AgentError> {
    let trimmed = work_item_type.trim();
    ALLOWED_WORK_ITEM_TYPES
        .iter()
        .find(|allowed| allowed.eq_ignore_ascii_case(trimmed))
        .copied()
        .ok_or_else(|| {
            AgentError::validation(
                operation,
                "workItemType",
                format!(
                    "'{}' is not a supported work item type ({})",
                    trimmed,
                    ALLOWED_WORK_ITEM_TYPES.join(", ")
                ),
            )
        })
}

pub fn validate_field_name(operation: &str, name: &str) -> Result<(), AgentError> {
    if FIELD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AgentError::validation(
            operation,
            name,
            "field names must be namespaced reference names such as System.Title",
        ))
    }
}

fn validate_title(operation: &str, value: Option<&Value>) -> Result<(), AgentError> {
    let title = match value {
        Some(Value::String(title)) => title.trim(),
        Some(_) => {
            return Err(AgentError::validation(operation, fields::TITLE, "title must be text"));
        }
        None => return Err(AgentError::validation(operation, fields::TITLE, "title is required")),
    };
    if title.is_empty() {
        return Err(AgentError::validation(operation, fields::TITLE, "title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AgentError::validation(
            operation,
            fields::TITLE,
            format!("title must be at most {} characters", MAX_TITLE_LENGTH),
        ));
    }
    Ok(())
}

fn validate_state(operation: &str, value: Option<&Value>) -> Result<(), AgentError> {
    match value.and_then(Value::as_str) {
        Some(state) if ALLOWED_STATES.contains(&state) => Ok(()),
        Some(state) => Err(AgentError::validation(
            operation,
            fields::STATE,
            format!("'{}' is not an allowed state ({})", state, ALLOWED_STATES.join(", ")),
        )),
        None => Err(AgentError::validation(operation, fields::STATE, "state must be text")),
    }
}

pub fn validate_id(operation: &str, id: i64) -> Result<(), AgentError> {
    if id > 0 {
        Ok(())
    } else {
        Err(AgentError::validation(
            operation,
            "id",
            format!("work item id must be positive, got {}", id),
        ))
    }
}

/// Positive ids, duplicates removed with first occurrence kept, at most
/// [`MAX_BATCH_SIZE`](env::api::MAX_BATCH_SIZE) entries.
pub fn validate_ids(operation: &str, ids: &[i64]) -> Result<Vec<i64>, AgentError> {
    if ids.is_empty() {
        return Err(AgentError::validation(operation, "ids", "at least one id is required"));
    }

    let mut seen = HashSet::with_capacity(ids.len().min(env::api::MAX_BATCH_SIZE + 1));
    let mut unique = Vec::new();
    for &id in ids {
        validate_id(operation, id)?;
        if seen.insert(id) {
            unique.push(id);
            if unique.len() > env::api::MAX_BATCH_SIZE {
                return Err(AgentError::validation(
                    operation,
                    "ids",
                    format!(
                        "at most {} distinct ids can be read at once",
                        env::api::MAX_BATCH_SIZE
                    ),
                ));
            }
        }
    }
    Ok(unique)
}

/// Returns the canonical work item type on success.
pub fn validate_create(request: &CreateWorkItemRequest) -> Result<&'static str, AgentError> {
    const OPERATION: &str = "create_work_item";

    let work_item_type = canonical_work_item_type(OPERATION, &request.work_item_type)?;
    validate_title(OPERATION, request.fields.get(fields::TITLE))?;

    for (name, value) in &request.fields {
        validate_field_name(OPERATION, name)?;
        if name == fields::STATE {
            validate_state(OPERATION, Some(value))?;
        }
    }

    for relation in &request.relations {
        if relation.rel.trim().is_empty() || relation.url.trim().is_empty() {
            return Err(AgentError::validation(
                OPERATION,
                "relations",
                "relations need both a type and a target url",
            ));
        }
    }

    if let Some(project) = &request.project
        && project.trim().is_empty()
    {
        return Err(AgentError::validation(OPERATION, "project", "project must not be blank"));
    }

    Ok(work_item_type)
}

pub fn validate_update(request: &UpdateWorkItemRequest) -> Result<(), AgentError> {
    const OPERATION: &str = "update_work_item";

    validate_id(OPERATION, request.id)?;
    if request.operations.is_empty() {
        return Err(AgentError::validation(
            OPERATION,
            "operations",
            "an update needs at least one operation",
        ));
    }

    for operation in &request.operations {
        match (operation.op, &operation.value) {
            (PatchOp::Add | PatchOp::Replace, None) => {
                return Err(AgentError::validation(
                    OPERATION,
                    operation.path.clone(),
                    format!("'{}' requires a value", operation.op),
                ));
            }
            (PatchOp::Remove, Some(_)) => {
                return Err(AgentError::validation(
                    OPERATION,
                    operation.path.clone(),
                    "'remove' must not carry a value",
                ));
            }
            _ => {}
        }

        if let Some(name) = operation.field_name() {
            validate_field_name(OPERATION, name)?;
            if operation.op == PatchOp::Remove {
                if name == fields::TITLE {
                    return Err(AgentError::validation(
                        OPERATION,
                        fields::TITLE,
                        "title cannot be removed",
                    ));
                }
                continue;
            }
            if name == fields::STATE {
                validate_state(OPERATION, operation.value.as_ref())?;
            } else if name == fields::TITLE {
                validate_title(OPERATION, operation.value.as_ref())?;
            }
        } else if !RELATION_PATH.is_match(&operation.path) {
            return Err(AgentError::validation(
                OPERATION,
                operation.path.clone(),
                "paths must start with /fields/ or /relations/",
            ));
        }
    }

    Ok(())
}

pub fn validate_wiql(query: &str) -> Result<(), AgentError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AgentError::validation("query_work_items", "query", "query must not be empty"));
    }
    if !trimmed.to_ascii_lowercase().starts_with("select") {
        return Err(AgentError::validation(
            "query_work_items",
            "query",
            "WIQL queries must start with SELECT",
        ));
    }
    Ok(())
}
