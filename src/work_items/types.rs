use crate::env::fields;
use crate::recovery::types::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A work item as returned by the service. Never built client-side as authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Option<i64>,
    #[serde(default)]
    pub rev: Option<i64>,
    /// Namespaced field reference names, in the order the service returned them.
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub relations: Vec<WorkItemRelation>,
    #[serde(default)]
    pub url: Option<String>,
}

impl WorkItem {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn title(&self) -> Option<&str> {
        self.field(fields::TITLE).and_then(Value::as_str)
    }

    pub fn state(&self) -> Option<&str> {
        self.field(fields::STATE).and_then(Value::as_str)
    }

    pub fn work_item_type(&self) -> Option<&str> {
        self.field("System.WorkItemType").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRelation {
    pub rel: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl WorkItemRelation {
    pub fn new(rel: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            url: url.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateWorkItemRequest {
    pub work_item_type: String,
    pub fields: Map<String, Value>,
    pub relations: Vec<WorkItemRelation>,
    /// Overrides the configured project.
    pub project: Option<String>,
}

impl CreateWorkItemRequest {
    pub fn new(work_item_type: impl Into<String>) -> Self {
        Self {
            work_item_type: work_item_type.into(),
            ..Default::default()
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.with_field(fields::TITLE, title.into())
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_relation(mut self, relation: WorkItemRelation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchOp {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(PatchOp::Add),
            "replace" => Ok(PatchOp::Replace),
            "remove" => Ok(PatchOp::Remove),
            other => Err(AgentError::validation(
                "parse_patch_operation",
                "op",
                format!("unsupported operation '{}', expected add, replace or remove", other),
            )),
        }
    }
}

/// One JSON patch entry: `{ "op", "path", "value"? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    /// `replace /fields/<name>`.
    pub fn set_field(name: &str, value: impl Into<Value>) -> Self {
        Self::replace(format!("/fields/{}", name), value)
    }

    /// The field reference name when the path targets a field.
    pub fn field_name(&self) -> Option<&str> {
        self.path.strip_prefix("/fields/")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateWorkItemRequest {
    pub id: i64,
    pub operations: Vec<PatchOperation>,
}

impl UpdateWorkItemRequest {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: PatchOperation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn set_state(self, state: impl Into<String>) -> Self {
        self.with_operation(PatchOperation::set_field(fields::STATE, state.into()))
    }

    pub fn set_title(self, title: impl Into<String>) -> Self {
        self.with_operation(PatchOperation::set_field(fields::TITLE, title.into()))
    }

    pub fn set_field(self, name: &str, value: impl Into<Value>) -> Self {
        self.with_operation(PatchOperation::set_field(name, value))
    }
}

/// Result of a WIQL query: ids in query order plus the items that could be read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub ids: Vec<i64>,
    pub work_items: Vec<WorkItem>,
}
