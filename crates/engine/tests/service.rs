use async_trait::async_trait;
use compiler::{RequestContext, UserContext};
use engine::{
    EngineConfig, SelectorRequest, SelectorService, SelectorSource,
    cache::MemoryQueryCache,
    error::DbError,
    executor::QueryExecutor,
    store::MemorySelectorStore,
};
use model::{core::value::Value, records::row::Row};
use serde_json::json;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_test::traced_test;

/// Records every statement and answers with canned rows.
#[derive(Default)]
struct RecordingExecutor {
    rows: Vec<Row>,
    fail: bool,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingExecutor {
    fn returning(rows: Vec<Row>) -> Self {
        RecordingExecutor {
            rows,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        RecordingExecutor {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        if self.fail {
            return Err(DbError::Conversion {
                column: "main.id".into(),
                message: "connection reset".into(),
            });
        }
        Ok(self.rows.clone())
    }
}

const PRODUCTS: &str = r#"{
    "main": {
        "entity": "product",
        "fields": [{ "key": "title" }],
        "scopes": [{ "conditions": [
            { "field": { "key": "color" }, "operator": "equals", "values": ["{color}"] }
        ]}],
        "connections": [{ "include": 11, "alias": "variants", "optional": true }]
    }
}"#;

const VARIANTS: &str = r#"{
    "main": { "entity": "variant", "fields": [{ "key": "sku" }] },
    "sort": [{ "field": { "key": "sku" }, "direction": "desc" }]
}"#;

fn product_row(id: u64, title: &str, variant: Option<(u64, &str)>) -> Row {
    let (variant_id, sku) = match variant {
        Some((id, sku)) => (Value::Uint(id), Value::from(sku)),
        None => (Value::Null, Value::Null),
    };
    Row::new(vec![
        ("main.id".into(), Value::Uint(id)),
        ("main.title".into(), Value::from(title)),
        ("variant_any_down_1.id".into(), variant_id),
        ("variant_any_down_1.sku".into(), sku),
    ])
}

fn store() -> Arc<MemorySelectorStore> {
    Arc::new(
        MemorySelectorStore::new()
            .with_selector(10, PRODUCTS)
            .with_selector(11, VARIANTS),
    )
}

fn logged_in() -> RequestContext {
    RequestContext::new()
        .with_query("color", "red")
        .with_user(UserContext::new(42))
}

#[tokio::test]
async fn test_stored_selector_runs_end_to_end() {
    let executor = Arc::new(RecordingExecutor::returning(vec![
        product_row(1, "Chair", Some((5, "CH-RED"))),
        product_row(1, "Chair", Some((6, "CH-BLUE"))),
        product_row(2, "Lamp", None),
    ]));
    let service = SelectorService::new(executor.clone(), store(), EngineConfig::default());

    let request = SelectorRequest::new(SelectorSource::Stored(10)).with_context(logged_in());
    let response = service.run(&request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.error, None);
    assert_eq!(
        response.body,
        json!([
            {
                "id": 1,
                "title": "Chair",
                "variants": [{ "id": 5, "sku": "CH-RED" }, { "id": 6, "sku": "CH-BLUE" }]
            },
            { "id": 2, "title": "Lamp", "variants": [] }
        ])
    );

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    let (sql, params) = &calls[0];
    assert!(sql.contains("LEFT JOIN `wiser_item` AS `variant_any_down_1`"));
    assert!(params.contains(&Value::from("red")));
    // secure selectors are scoped to the configured environment (live)
    assert!(sql.contains("(`main`.`published_environment` & ?)"));
    assert!(params.contains(&Value::Int(8)));
    // sorting of an included selector does not apply
    assert!(sql.ends_with("ORDER BY `main`.`id` ASC"));
}

#[tokio::test]
async fn test_secure_selector_requires_user() {
    let executor = Arc::new(RecordingExecutor::default());
    let service = SelectorService::new(executor.clone(), store(), EngineConfig::default());

    let anonymous = SelectorRequest::new(SelectorSource::Stored(10));
    let response = service.run(&anonymous).await;
    assert_eq!(response.status, 403);
    assert!(executor.calls().is_empty());

    let insecure = SelectorRequest::new(SelectorSource::Json(
        r#"{ "main": { "entity": "news" }, "insecure": true }"#.to_string(),
    ));
    let response = service.run(&insecure).await;
    assert_eq!(response.status, 200);
    let (sql, _) = &executor.calls()[0];
    assert!(!sql.contains("published_environment"));
}

#[tokio::test]
async fn test_error_statuses() {
    let service = SelectorService::new(
        Arc::new(RecordingExecutor::default()),
        store(),
        EngineConfig::default(),
    );
    let run = async |source: SelectorSource| {
        let request = SelectorRequest::new(source).with_context(logged_in());
        service.run(&request).await
    };

    let missing = run(SelectorSource::Stored(99)).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.error.as_deref(), Some("Data selector 99 does not exist"));

    let malformed = run(SelectorSource::Json("{ \"main\": ".into())).await;
    assert_eq!(malformed.status, 400);

    let invalid = run(SelectorSource::Json(r#"{ "main": { "entity": "" } }"#.into())).await;
    assert_eq!(invalid.status, 400);
    assert_eq!(invalid.body, serde_json::Value::Null);

    let missing_include = run(SelectorSource::Json(
        r#"{ "main": { "entity": "p", "connections": [{ "include": 404 }] } }"#.into(),
    ))
    .await;
    assert_eq!(missing_include.status, 404);
}

#[tokio::test]
async fn test_circular_include_is_rejected() {
    let store = Arc::new(
        MemorySelectorStore::new()
            .with_selector(1, r#"{ "main": { "entity": "a", "connections": [{ "include": 2 }] } }"#)
            .with_selector(2, r#"{ "main": { "entity": "b", "connections": [{ "include": 1 }] } }"#),
    );
    let executor = Arc::new(RecordingExecutor::default());
    let service = SelectorService::new(executor.clone(), store, EngineConfig::default());

    let request = SelectorRequest::new(SelectorSource::Stored(1)).with_context(logged_in());
    let response = service.run(&request).await;

    assert_eq!(response.status, 400);
    assert_eq!(
        response.error.as_deref(),
        Some("Circular selector include: 1 -> 2 -> 1")
    );
    assert!(executor.calls().is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_database_failure_hides_sql() {
    let service = SelectorService::new(
        Arc::new(RecordingExecutor::failing()),
        store(),
        EngineConfig::default(),
    );
    let request = SelectorRequest::new(SelectorSource::Stored(10)).with_context(logged_in());
    let response = service.run(&request).await;

    assert_eq!(response.status, 500);
    let message = response.error.unwrap();
    assert!(!message.contains("SELECT"));
    assert!(!message.contains("connection reset"));
    assert!(logs_contain("SQL: SELECT"));
}

#[tokio::test]
async fn test_values_are_substituted_once() {
    let executor = Arc::new(RecordingExecutor::default());
    let service = SelectorService::new(executor.clone(), store(), EngineConfig::default());
    let context = RequestContext::new()
        .with_query("color", "{secret}")
        .with_query("secret", "leaked")
        .with_user(UserContext::new(1));

    service
        .run(&SelectorRequest::new(SelectorSource::Stored(10)).with_context(context.clone()))
        .await;

    let selector = compiler::parse::parse_selector(PRODUCTS).unwrap();
    service
        .run(&SelectorRequest::new(SelectorSource::Parsed(selector)).with_context(context))
        .await;

    for (_, params) in executor.calls() {
        assert!(params.contains(&Value::from("{secret}")));
        assert!(!params.contains(&Value::from("leaked")));
    }
}

#[tokio::test]
async fn test_unknown_variables_follow_policy() {
    let executor = Arc::new(RecordingExecutor::default());
    let service = SelectorService::new(executor.clone(), store(), EngineConfig::default());
    let anonymous_user = RequestContext::new().with_user(UserContext::new(1));

    let keep = SelectorRequest::new(SelectorSource::Stored(10)).with_context(anonymous_user.clone());
    service.run(&keep).await;
    let remove = keep.clone().remove_unknown_variables(true);
    service.run(&remove).await;

    let calls = executor.calls();
    assert!(calls[0].1.contains(&Value::from("{color}")));
    assert!(calls[1].1.contains(&Value::from("")));
    assert!(!calls[1].1.contains(&Value::from("{color}")));
}

#[tokio::test]
async fn test_filter_items_request_uses_left_joins_only() {
    let executor = Arc::new(RecordingExecutor::default());
    let service = SelectorService::new(executor.clone(), store(), EngineConfig::default());
    let request = SelectorRequest::new(SelectorSource::Json(
        r#"{ "main": { "entity": "product", "connections": [{ "entity": "variant", "connections": [{ "entity": "stock" }] }] } }"#
            .into(),
    ))
    .with_context(logged_in())
    .for_filter_items(true);

    let response = service.run(&request).await;
    assert_eq!(response.status, 200);
    let (sql, _) = &executor.calls()[0];
    assert!(sql.contains("LEFT JOIN"));
    assert!(!sql.contains("INNER JOIN"));
}

#[tokio::test]
async fn test_compiled_queries_are_cached() {
    let cache = Arc::new(MemoryQueryCache::new(Duration::from_secs(60)));
    let service = SelectorService::new(
        Arc::new(RecordingExecutor::default()),
        store(),
        EngineConfig::default(),
    )
    .with_cache(cache.clone());

    let request = SelectorRequest::new(SelectorSource::Stored(10)).with_context(logged_in());
    let first = service.compile(&request).await.unwrap();
    let second = service.compile(&request).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    let other = request.clone().for_filter_items(true);
    let third = service.compile(&other).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(cache.len(), 2);
}
