use crate::client::interface::{ApiClient, ApiRequest};
use crate::client::metrics::PerformanceMonitor;
use crate::env::api;
use crate::recovery::error_recovery::ErrorHandler;
use crate::recovery::types::{AgentError, ErrorContext, ErrorKind};
use crate::work_items::types::{
    CreateWorkItemRequest, PatchOperation, QueryResult, UpdateWorkItemRequest, WorkItem,
};
use crate::work_items::validation;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Create, read, update, delete and query work items.
///
/// Every request is validated locally first; an invalid request fails with
/// `VALIDATION_ERROR` without touching the transport.
#[derive(Debug)]
pub struct WorkItemService {
    client: Arc<ApiClient>,
    errors: Arc<ErrorHandler>,
    metrics: PerformanceMonitor,
}

#[derive(serde::Deserialize)]
struct BatchResponse {
    #[serde(default)]
    value: Vec<Option<WorkItem>>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WiqlReference>,
}

#[derive(serde::Deserialize)]
struct WiqlReference {
    id: i64,
}

impl WorkItemService {
    pub fn new(client: Arc<ApiClient>, errors: Arc<ErrorHandler>) -> Self {
        Self {
            client,
            errors,
            metrics: PerformanceMonitor::new("work_item_service"),
        }
    }

    pub fn metrics(&self) -> &PerformanceMonitor {
        &self.metrics
    }

    pub async fn create_work_item(&self, request: CreateWorkItemRequest) -> Result<WorkItem, AgentError> {
        let started = Instant::now();
        let result = self.create_inner(&request).await;
        let id = result.as_ref().ok().and_then(|item| item.id);
        let result = self.finish("create_work_item", started, None, result).await;
        if let Some(id) = id {
            info!("Created {} #{}", request.work_item_type, id);
        }
        result
    }

    async fn create_inner(&self, request: &CreateWorkItemRequest) -> Result<WorkItem, AgentError> {
        const OPERATION: &str = "create_work_item";

        let work_item_type = validation::validate_create(request)?;
        let project = match &request.project {
            Some(project) => project.trim().to_string(),
            None => self.client.auth().project().ok_or_else(|| {
                AgentError::validation(
                    OPERATION,
                    "project",
                    "a project is required to create work items",
                )
            })?,
        };

        let mut operations: Vec<PatchOperation> = request
            .fields
            .iter()
            .map(|(name, value)| PatchOperation::add(format!("/fields/{}", name), value.clone()))
            .collect();
        operations.extend(request.relations.iter().map(|relation| {
            PatchOperation::add(
                "/relations/-",
                json!({
                    "rel": relation.rel,
                    "url": relation.url,
                    "attributes": relation.attributes,
                }),
            )
        }));

        let type_segment = format!("${}", work_item_type);
        let url = self
            .client
            .build_url(Some(project.as_str()), &["wit", "workitems", type_segment.as_str()], &[])?;
        let body = serde_json::to_value(&operations).map_err(|e| {
            AgentError::new(ErrorKind::Integrity(e.to_string()), ErrorContext::new(OPERATION))
        })?;

        let response = self
            .client
            .request(
                ApiRequest::post(url, body, OPERATION).with_content_type(api::JSON_PATCH_CONTENT_TYPE),
            )
            .await?;
        decode(OPERATION, response.body)
    }

    pub async fn get_work_item(&self, id: i64) -> Result<WorkItem, AgentError> {
        const OPERATION: &str = "get_work_item";
        let started = Instant::now();

        let result = async {
            validation::validate_id(OPERATION, id)?;
            let id_segment = id.to_string();
            let url = self.client.build_url(
                None,
                &["wit", "workitems", id_segment.as_str()],
                &[("$expand", "relations")],
            )?;
            let response = self.client.get(url, OPERATION).await?;
            decode::<WorkItem>(OPERATION, response.body)
        }
        .await;

        self.finish(OPERATION, started, Some(id), result).await
    }

    /// Batch read of up to [`MAX_BATCH_SIZE`](api::MAX_BATCH_SIZE) ids in request order.
    pub async fn get_work_items(&self, ids: &[i64]) -> Result<Vec<WorkItem>, AgentError> {
        const OPERATION: &str = "get_work_items";
        let started = Instant::now();

        let result = async {
            let ids = validation::validate_ids(OPERATION, ids)?;
            self.fetch_batch(OPERATION, &ids, false).await
        }
        .await;

        self.finish(OPERATION, started, None, result).await
    }

    async fn fetch_batch(&self, operation: &str, ids: &[i64], omit_missing: bool) -> Result<Vec<WorkItem>, AgentError> {
        let id_list = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut query = vec![("ids", id_list.as_str()), ("$expand", "relations")];
        if omit_missing {
            query.push(("errorPolicy", "omit"));
        }

        let url = self.client.build_url(None, &["wit", "workitems"], &query)?;
        let response = self.client.get(url, operation).await?;
        let batch: BatchResponse = decode(operation, response.body)?;
        Ok(batch.value.into_iter().flatten().collect())
    }

    pub async fn update_work_item(&self, request: UpdateWorkItemRequest) -> Result<WorkItem, AgentError> {
        const OPERATION: &str = "update_work_item";
        let started = Instant::now();

        let result = async {
            validation::validate_update(&request)?;
            let id_segment = request.id.to_string();
            let url = self
                .client
                .build_url(None, &["wit", "workitems", id_segment.as_str()], &[])?;
            let body = serde_json::to_value(&request.operations).map_err(|e| {
                AgentError::new(ErrorKind::Integrity(e.to_string()), ErrorContext::new(OPERATION))
            })?;
            let response = self.client.patch(url, body, OPERATION).await?;
            decode::<WorkItem>(OPERATION, response.body)
        }
        .await;

        let result = self.finish(OPERATION, started, Some(request.id), result).await;
        if result.is_ok() {
            debug!(
                "Updated work item #{} with {} operation(s)",
                request.id,
                request.operations.len()
            );
        }
        result
    }

    pub async fn delete_work_item(&self, id: i64) -> Result<(), AgentError> {
        const OPERATION: &str = "delete_work_item";
        let started = Instant::now();

        let result = async {
            validation::validate_id(OPERATION, id)?;
            let id_segment = id.to_string();
            let url = self
                .client
                .build_url(None, &["wit", "workitems", id_segment.as_str()], &[])?;
            self.client.delete(url, OPERATION).await.map(|_| ())
        }
        .await;

        let result = self.finish(OPERATION, started, Some(id), result).await;
        if result.is_ok() {
            info!("Deleted work item #{}", id);
        }
        result
    }

    /// Runs a WIQL query and reads every matching work item.
    pub async fn query_work_items(&self, wiql: &str) -> Result<QueryResult, AgentError> {
        const OPERATION: &str = "query_work_items";
        let started = Instant::now();

        let result = async {
            validation::validate_wiql(wiql)?;
            let project = self.client.auth().project();
            let url = self
                .client
                .build_url(project.as_deref(), &["wit", "wiql"], &[])?;
            let response = self
                .client
                .request(ApiRequest::post(url, json!({ "query": wiql }), OPERATION).with_idempotent(true))
                .await?;
            let references: WiqlResponse = decode(OPERATION, response.body)?;
            let ids: Vec<i64> = references.work_items.into_iter().map(|r| r.id).collect();

            let mut work_items = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(api::MAX_BATCH_SIZE) {
                work_items.extend(self.fetch_batch(OPERATION, chunk, true).await?);
            }
            debug!("Query matched {} work item(s)", ids.len());
            Ok::<_, AgentError>(QueryResult { ids, work_items })
        }
        .await;

        self.finish(OPERATION, started, None, result).await
    }

    /// Records the metric for one service call and routes failures through the error handler.
    async fn finish<T>(
        &self,
        operation: &str,
        started: Instant,
        work_item_id: Option<i64>,
        result: Result<T, AgentError>,
    ) -> Result<T, AgentError> {
        let mut metadata = HashMap::new();
        if let Some(id) = work_item_id {
            metadata.insert("work_item_id".to_string(), id.to_string());
        }
        if let Err(error) = &result {
            metadata.insert("error_code".to_string(), error.code().to_string());
        }
        self.metrics
            .record(operation, started.elapsed(), result.is_ok(), metadata)
            .await;

        result.map_err(|error| {
            let error = match work_item_id {
                Some(id) => attach_work_item(error, id),
                None => error,
            };
            self.errors.handle_error(error)
        })
    }
}

fn attach_work_item(mut error: AgentError, id: i64) -> AgentError {
    if let ErrorKind::NotFound { resource } = &mut error.kind {
        *resource = format!("#{}", id);
    }
    if error.context.work_item_id.is_none() {
        error.context.work_item_id = Some(id);
    }
    error
}

fn decode<T: DeserializeOwned>(operation: &str, body: Value) -> Result<T, AgentError> {
    serde_json::from_value(body).map_err(|e| {
        AgentError::new(
            ErrorKind::Integrity(format!("unexpected response shape: {}", e)),
            ErrorContext::new(operation),
        )
    })
}
