use super::*;
use crate::auth::AuthService;
use crate::client::transport::testing::ScriptedTransport;
use crate::client::{ApiClient, CircuitBreaker, HttpMethod, RateLimiter};
use crate::config::{AuthConfig, ClientConfig};
use crate::env;
use crate::recovery::types::{ErrorCategory, RetryConfig};
use crate::recovery::ErrorHandler;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "pat0123456789abcdefghijklmnop";

struct Harness {
    transport: Arc<ScriptedTransport>,
    errors: Arc<ErrorHandler>,
    service: WorkItemService,
}

fn harness_with_project(project: Option<&str>) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let config = Arc::new(ClientConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            exponential_base: 2.0,
            jitter: 0.0,
        },
        ..Default::default()
    });

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let auth = Arc::new(AuthService::new(
        config.clone(),
        transport.clone(),
        rate_limiter.clone(),
    ));
    auth.configure(AuthConfig::new("contoso", TOKEN, project.map(str::to_string)))
        .unwrap();

    let errors = Arc::new(ErrorHandler::new(config.circuit_breaker.clone()));
    let client = Arc::new(ApiClient::new(
        config.clone(),
        auth,
        transport.clone(),
        rate_limiter,
        errors.circuit_breaker(env::WORK_ITEM_DEPENDENCY),
    ));

    Harness {
        transport,
        errors: errors.clone(),
        service: WorkItemService::new(client, errors),
    }
}

fn harness() -> Harness {
    harness_with_project(Some("Fabrikam"))
}

fn work_item_json(id: i64, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "rev": 1,
        "fields": {
            "System.WorkItemType": "User Story",
            "System.Title": title,
            "System.State": "New"
        },
        "relations": [
            { "rel": "System.LinkTypes.Hierarchy-Reverse", "url": "https://dev.azure.com/contoso/_apis/wit/workItems/1", "attributes": { "isLocked": false } }
        ],
        "url": format!("https://dev.azure.com/contoso/_apis/wit/workItems/{}", id)
    })
}

#[tokio::test]
async fn test_create_work_item_returns_created_item() {
    let h = harness();
    h.transport.push_json(200, work_item_json(123, "X"));

    let request = CreateWorkItemRequest::new("User Story").with_title("X");
    let item = h.service.create_work_item(request).await.unwrap();

    assert_eq!(item.id, Some(123));
    assert_eq!(item.title(), Some("X"));
    assert_eq!(item.relations.len(), 1);

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.method, HttpMethod::Post);
    assert!(sent.url.contains("/contoso/Fabrikam/_apis/wit/workitems/$User%20Story"));
    assert!(
        sent.headers
            .iter()
            .any(|(name, value)| name == "Content-Type" && value == env::api::JSON_PATCH_CONTENT_TYPE)
    );
    assert_eq!(
        sent.body,
        Some(json!([{ "op": "add", "path": "/fields/System.Title", "value": "X" }]))
    );
}

#[tokio::test]
async fn test_create_preserves_field_order_and_relations() {
    let h = harness();
    h.transport.push_json(200, work_item_json(5, "Ordered"));

    let request = CreateWorkItemRequest::new("bug")
        .with_title("Ordered")
        .with_field("Microsoft.VSTS.Common.Priority", 2)
        .with_field("System.Description", "steps")
        .with_relation(
            WorkItemRelation::new("System.LinkTypes.Hierarchy-Reverse", "https://dev.azure.com/contoso/_apis/wit/workItems/1")
                .with_attribute("comment", "parent"),
        );
    h.service.create_work_item(request).await.unwrap();

    let requests = h.transport.requests();
    let body = requests[0].body.clone().unwrap();
    let paths: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["path"].as_str().unwrap())
        .collect();
    assert_eq!(
        paths,
        vec![
            "/fields/System.Title",
            "/fields/Microsoft.VSTS.Common.Priority",
            "/fields/System.Description",
            "/relations/-"
        ]
    );
    assert!(requests[0].url.contains("workitems/$Bug"));
    assert_eq!(body[3]["value"]["attributes"]["comment"], "parent");
}

#[tokio::test]
async fn test_create_without_title_never_reaches_transport() {
    let h = harness();

    let error = h
        .service
        .create_work_item(CreateWorkItemRequest::new("User Story"))
        .await
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Validation);
    assert!(error.is_recoverable());
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(h.errors.error_statistics().total_errors, 1);
}

#[tokio::test]
async fn test_create_with_unknown_type_never_reaches_transport() {
    let h = harness();
    let error = h
        .service
        .create_work_item(CreateWorkItemRequest::new("Spaceship").with_title("X"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), "VALIDATION_ERROR");
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn test_create_requires_project() {
    let h = harness_with_project(None);
    let error = h
        .service
        .create_work_item(CreateWorkItemRequest::new("Task").with_title("X"))
        .await
        .unwrap_err();
    assert_eq!(error.code(), "VALIDATION_ERROR");
    assert_eq!(h.transport.call_count(), 0);

    h.transport.push_json(200, work_item_json(9, "X"));
    let item = h
        .service
        .create_work_item(CreateWorkItemRequest::new("Task").with_title("X").in_project("Other"))
        .await
        .unwrap();
    assert_eq!(item.id, Some(9));
    assert!(h.transport.requests()[0].url.contains("/contoso/Other/_apis/"));
}

#[tokio::test]
async fn test_update_with_invalid_state_never_reaches_transport() {
    let h = harness();
    let error = h
        .service
        .update_work_item(UpdateWorkItemRequest::new(42).set_state("Exploded"))
        .await
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Validation);
    assert_eq!(error.context.work_item_id, Some(42));
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn test_update_sends_json_patch() {
    let h = harness();
    h.transport.push_json(200, work_item_json(42, "Renamed"));

    let request = UpdateWorkItemRequest::new(42)
        .set_title("Renamed")
        .set_state("Active")
        .with_operation(PatchOperation::remove("/fields/System.Description"));
    let item = h.service.update_work_item(request).await.unwrap();
    assert_eq!(item.title(), Some("Renamed"));

    let requests = h.transport.requests();
    let sent = &requests[0];
    assert_eq!(sent.method, HttpMethod::Patch);
    assert!(sent.url.contains("/contoso/_apis/wit/workitems/42?api-version="));
    assert_eq!(
        sent.body,
        Some(json!([
            { "op": "replace", "path": "/fields/System.Title", "value": "Renamed" },
            { "op": "replace", "path": "/fields/System.State", "value": "Active" },
            { "op": "remove", "path": "/fields/System.Description" }
        ]))
    );
}

#[tokio::test]
async fn test_update_conflict_is_recoverable() {
    let h = harness();
    h.transport
        .push_json(409, json!({ "message": "The revision is out of date" }));

    let error = h
        .service
        .update_work_item(UpdateWorkItemRequest::new(42).set_state("Done"))
        .await
        .unwrap_err();

    assert_eq!(error.code(), "WORK_ITEM_CONFLICT");
    assert!(error.is_recoverable());
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_get_missing_work_item() {
    let h = harness();
    h.transport
        .push_json(404, json!({ "message": "TF401232: Work item 77 does not exist" }));

    let error = h.service.get_work_item(77).await.unwrap_err();

    assert_eq!(error.code(), "WORK_ITEM_NOT_FOUND");
    assert!(!error.is_recoverable());
    assert_eq!(error.context.work_item_id, Some(77));
    assert_eq!(error.to_string(), "Not found: #77");
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_get_work_item_expands_relations() {
    let h = harness();
    h.transport.push_json(200, work_item_json(7, "Seven"));

    let item = h.service.get_work_item(7).await.unwrap();
    assert_eq!(item.state(), Some("New"));
    assert_eq!(item.work_item_type(), Some("User Story"));

    let requests = h.transport.requests();
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert!(requests[0].url.contains("expand=relations"));
}

#[tokio::test]
async fn test_get_work_items_batch() {
    let h = harness();
    h.transport.push_json(
        200,
        json!({ "count": 2, "value": [work_item_json(3, "Three"), work_item_json(1, "One")] }),
    );

    let items = h.service.get_work_items(&[3, 1, 3]).await.unwrap();
    assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![Some(3), Some(1)]);

    let requests = h.transport.requests();
    assert!(requests[0].url.contains("ids=3%2C1"));
}

#[tokio::test]
async fn test_get_work_items_rejects_oversized_batch() {
    let h = harness();
    let ids: Vec<i64> = (1..=201).collect();
    let error = h.service.get_work_items(&ids).await.unwrap_err();
    assert_eq!(error.code(), "VALIDATION_ERROR");
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn test_delete_work_item() {
    let h = harness();
    h.transport.push_json(200, json!({ "id": 8, "code": 200 }));

    h.service.delete_work_item(8).await.unwrap();
    let requests = h.transport.requests();
    assert_eq!(requests[0].method, HttpMethod::Delete);
    assert!(requests[0].url.contains("/workitems/8?"));

    let error = h.service.delete_work_item(-1).await.unwrap_err();
    assert_eq!(error.code(), "VALIDATION_ERROR");
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_server_error_is_retried_and_recoverable() {
    let h = harness();
    h.transport
        .push_json(500, json!({ "message": "internal" }))
        .push_json(500, json!({ "message": "internal" }))
        .push_json(500, json!({ "message": "internal" }));

    let error = h.service.get_work_item(5).await.unwrap_err();
    assert_eq!(error.code(), "API_SERVER_ERROR");
    assert!(error.is_recoverable());
    assert_eq!(error.context.retry_count, Some(2));
    assert_eq!(h.transport.call_count(), 3);
}

#[tokio::test]
async fn test_query_work_items() {
    let h = harness();
    h.transport
        .push_json(200, json!({ "queryType": "flat", "workItems": [{ "id": 1, "url": "u1" }, { "id": 2, "url": "u2" }] }))
        .push_json(200, json!({ "count": 2, "value": [work_item_json(1, "One"), null] }));

    let result = h
        .service
        .query_work_items("SELECT [System.Id] FROM WorkItems WHERE [System.State] = 'New'")
        .await
        .unwrap();

    assert_eq!(result.ids, vec![1, 2]);
    assert_eq!(result.work_items.len(), 1);

    let requests = h.transport.requests();
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert!(requests[0].url.contains("/contoso/Fabrikam/_apis/wit/wiql"));
    assert!(requests[1].url.contains("errorPolicy=omit"));
}

#[tokio::test]
async fn test_query_without_matches_skips_batch_read() {
    let h = harness();
    h.transport.push_json(200, json!({ "workItems": [] }));

    let result = h
        .service
        .query_work_items("SELECT [System.Id] FROM WorkItems")
        .await
        .unwrap();
    assert!(result.ids.is_empty());
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_service_records_metrics() {
    let h = harness();
    h.transport.push_json(200, work_item_json(1, "One"));

    h.service.get_work_item(1).await.unwrap();
    h.service.get_work_item(0).await.unwrap_err();

    let summary = h.service.metrics().summary().await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.by_operation["get_work_item"].count, 2);
}
