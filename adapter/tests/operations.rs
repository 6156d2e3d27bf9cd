mod common;

use adapter::adapter::BigQueryAdapter;
use adapter::adapter_error;
use adapter::context::{CallContext, TenantMeta, create_cancellation};
use adapter::engine::memory::MemoryEngine;
use adapter::error::{AdapterResult, ErrorKind};
use adapter::filter::RawFilter;
use adapter::router::{ConfigRouter, TenantRouter};
use serde_json::{Map, Value, json};
use telemetry::tracing::init_test_tracing;

use crate::common::{
    DENIED_KEY, PRIMARY_KEY, TENANT_REGION, USERS_TABLE, adapter_config, keys, memory_adapter,
    routing_config, row, seed_users, users_context,
};

fn filter(raw: Value) -> RawFilter {
    serde_json::from_value(raw).unwrap()
}

fn query(raw: Value) -> Map<String, Value> {
    raw.as_object().unwrap().clone()
}

#[tokio::test]
async fn sort_shapes_describing_the_same_order_return_the_same_rows() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let from_text = adapter
        .find(&ctx, filter(json!({"sort": "-age name"})))
        .await
        .unwrap();
    let from_list = adapter
        .find(&ctx, filter(json!({"sort": ["-age", "name"]})))
        .await
        .unwrap();
    let from_map = adapter
        .find(&ctx, filter(json!({"sort": {"age": -1, "name": 1}})))
        .await
        .unwrap();

    assert_eq!(keys(&from_text), ["d", "a", "c", "b"]);
    assert_eq!(from_text, from_list);
    assert_eq!(from_text, from_map);

    let submissions = engine.submissions().await;
    assert!(submissions.iter().all(|s| s.sql == submissions[0].sql));
}

#[tokio::test]
async fn generic_id_is_queried_as_the_primary_key() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .find(&users_context(), filter(json!({"query": {"id": "c"}})))
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["c"]);
    let submissions = engine.submissions().await;
    assert_eq!(
        submissions[0].sql,
        format!("select * from `{USERS_TABLE}` where `{PRIMARY_KEY}` = 'c'")
    );
}

#[tokio::test]
async fn denylisted_keys_never_reach_the_where_clause() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .find(
            &users_context(),
            filter(json!({"query": {DENIED_KEY: "s4", "age": 7}})),
        )
        .await
        .unwrap();
    let removed = adapter
        .remove_many(&users_context(), query(json!({DENIED_KEY: "s1", "age": 3})))
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["a", "c"]);
    assert_eq!(keys(&removed), ["b"]);
    for submission in engine.submissions().await {
        assert!(!submission.sql.contains(DENIED_KEY));
    }
}

#[tokio::test]
async fn denylisted_keys_are_never_searched() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .find(
            &users_context(),
            filter(json!({"search": "s3", "searchFields": [DENIED_KEY]})),
        )
        .await
        .unwrap();
    let sorted = adapter
        .find(
            &users_context(),
            filter(json!({
                "search": "abc",
                "searchFields": [DENIED_KEY, "name"],
                "sort": format!("-{DENIED_KEY}")
            })),
        )
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["a", "b", "c", "d"]);
    assert_eq!(keys(&sorted), ["a", "b"]);
    for submission in engine.submissions().await {
        assert!(!submission.sql.contains(DENIED_KEY));
    }
}

#[tokio::test]
async fn bulk_writes_filtered_only_by_denylisted_keys_are_rejected() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let removed = adapter
        .remove_many(&users_context(), query(json!({DENIED_KEY: "s1"})))
        .await
        .unwrap_err();
    let updated = adapter
        .update_many(
            &users_context(),
            query(json!({DENIED_KEY: "s1"})),
            query(json!({"name": "renamed"})),
        )
        .await
        .unwrap_err();

    assert_eq!(removed.kind(), ErrorKind::InvalidData);
    assert_eq!(updated.kind(), ErrorKind::InvalidData);
    assert!(engine.submissions().await.is_empty());
    let rows = engine.rows(USERS_TABLE).await;
    assert_eq!(keys(&rows), ["a", "b", "c", "d"]);
    assert!(rows.iter().all(|row| row.get("name") != Some(&json!("renamed"))));
}

#[tokio::test]
async fn quotes_and_backslashes_survive_insert_and_find() {
    init_test_tracing();
    let (adapter, _engine) = memory_adapter();
    let ctx = users_context();

    adapter
        .insert_many(
            &ctx,
            vec![
                query(json!({"pk": "k1", "name": "it's"})),
                query(json!({"pk": "k2", "name": r"C:\temp"})),
            ],
        )
        .await
        .unwrap();

    let by_query = adapter
        .find(&ctx, filter(json!({"query": {"name": "it's"}})))
        .await
        .unwrap();
    let by_search = adapter
        .find(&ctx, filter(json!({"search": "it's", "searchFields": ["name"]})))
        .await
        .unwrap();
    let by_backslash = adapter
        .find(&ctx, filter(json!({"query": {"name": r"C:\temp"}})))
        .await
        .unwrap();

    assert_eq!(by_query, vec![row(json!({"pk": "k1", "name": "it's"}))]);
    assert_eq!(by_search, by_query);
    assert_eq!(by_backslash, vec![row(json!({"pk": "k2", "name": r"C:\temp"}))]);
}

#[tokio::test]
async fn remove_by_id_returns_the_row_find_by_id_saw() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let found = adapter.find_by_id(&ctx, json!("b")).await.unwrap();
    let removed = adapter.remove_by_id(&ctx, json!("b")).await.unwrap();

    assert_eq!(removed.len(), 1);
    assert_eq!(Some(removed[0].clone()), found);
    assert_eq!(adapter.find_by_id(&ctx, json!("b")).await.unwrap(), None);
    assert_eq!(keys(&engine.rows(USERS_TABLE).await), ["a", "c", "d"]);
}

#[tokio::test]
async fn remove_reads_the_pre_image_in_its_own_job_before_deleting() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    adapter
        .remove_by_id(&users_context(), json!("a"))
        .await
        .unwrap();

    let submissions = engine.submissions().await;
    let statements: Vec<&str> = submissions.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(
        statements,
        [
            format!("select * from `{USERS_TABLE}` where `pk` = 'a'"),
            format!("delete from `{USERS_TABLE}` where `pk` = 'a'"),
        ]
    );
}

#[tokio::test]
async fn insert_many_returns_every_inserted_row() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let inserted = adapter
        .insert_many(
            &users_context(),
            vec![
                query(json!({"pk": "k1", "name": "first"})),
                query(json!({"pk": "k2", "name": "second", "age": 40})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(inserted.len(), 2);
    assert_eq!(keys(&inserted), ["k1", "k2"]);
    assert_eq!(inserted[0].get("age"), Some(&Value::Null));
    assert_eq!(engine.submissions().await.len(), 1);
    assert_eq!(engine.rows(USERS_TABLE).await.len(), 6);
}

#[tokio::test]
async fn insert_returns_the_stored_row() {
    init_test_tracing();
    let (adapter, _engine) = memory_adapter();

    let inserted = adapter
        .insert(&users_context(), query(json!({"pk": "k1", "name": "first"})))
        .await
        .unwrap();

    assert_eq!(inserted, Some(row(json!({"pk": "k1", "name": "first"}))));
}

#[tokio::test]
async fn insert_without_primary_key_submits_nothing() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();

    let err = adapter
        .insert(&users_context(), query(json!({"name": "first"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(engine.submissions().await.is_empty());
}

#[tokio::test]
async fn insert_many_without_entities_returns_no_rows() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();

    let inserted = adapter.insert_many(&users_context(), Vec::new()).await.unwrap();

    assert!(inserted.is_empty());
    assert!(engine.submissions().await.is_empty());
}

#[tokio::test]
async fn count_ignores_limit_offset_and_sort() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let unpaged = adapter
        .count(&ctx, filter(json!({"query": {"age": 7}})))
        .await
        .unwrap();
    let paged = adapter
        .count(
            &ctx,
            filter(json!({"query": {"age": 7}, "limit": 1, "offset": 1, "sort": "-name"})),
        )
        .await
        .unwrap();
    let everything = adapter.count(&ctx, RawFilter::default()).await.unwrap();

    assert_eq!(unpaged, 2);
    assert_eq!(paged, unpaged);
    assert_eq!(everything, 4);
}

#[tokio::test]
async fn count_of_a_missing_table_is_zero() {
    init_test_tracing();
    let (adapter, _engine) = memory_adapter();

    let count = adapter
        .count(&users_context(), RawFilter::default())
        .await
        .unwrap();

    assert_eq!(count, 0);
}

#[tokio::test]
async fn find_is_idempotent() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();
    let raw = json!({"query": {"age": 7}, "sort": "name", "limit": 5});

    let first = adapter.find(&ctx, filter(raw.clone())).await.unwrap();
    let second = adapter.find(&ctx, filter(raw)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.rows(USERS_TABLE).await.len(), 4);
}

#[tokio::test]
async fn unusable_limits_and_offsets_are_not_emitted() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    for raw in [
        json!({"limit": 0}),
        json!({"limit": -1}),
        json!({"offset": 0}),
        json!({"limit": "many", "offset": -3}),
    ] {
        let rows = adapter.find(&ctx, filter(raw)).await.unwrap();
        assert_eq!(rows.len(), 4);
    }

    for submission in engine.submissions().await {
        assert_eq!(submission.sql, format!("select * from `{USERS_TABLE}` where true"));
    }
}

#[tokio::test]
async fn limit_and_offset_page_through_sorted_rows() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let page = adapter
        .find(&ctx, filter(json!({"sort": "pk", "limit": 2, "offset": 1})))
        .await
        .unwrap();
    let tail = adapter
        .find(&ctx, filter(json!({"sort": "pk", "offset": "3"})))
        .await
        .unwrap();

    assert_eq!(keys(&page), ["b", "c"]);
    assert_eq!(keys(&tail), ["d"]);
}

#[tokio::test]
async fn search_is_combined_with_the_structured_query() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .find(
            &users_context(),
            filter(json!({
                "query": {"age": 7},
                "search": "abc",
                "searchFields": ["name", "tag"]
            })),
        )
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["a", "c"]);
    assert_eq!(
        engine.submissions().await[0].sql,
        format!(
            "select * from `{USERS_TABLE}` where (`age` = 7) and (`name` like '%abc%' or `tag` like '%abc%')"
        )
    );
}

#[tokio::test]
async fn empty_search_term_applies_only_the_query() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .find(
            &users_context(),
            filter(json!({"query": {"age": 3}, "search": "", "searchFields": ["name"]})),
        )
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["b"]);
}

#[tokio::test]
async fn find_one_returns_the_first_row_or_nothing() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let first = adapter
        .find_one(&ctx, filter(json!({"sort": "-age"})))
        .await
        .unwrap();
    let missing = adapter
        .find_one(&ctx, filter(json!({"query": {"age": 100}})))
        .await
        .unwrap();

    assert_eq!(first.map(|row| row["pk"].clone()), Some(json!("d")));
    assert_eq!(missing, None);
    assert!(engine.submissions().await[0].sql.ends_with("limit 1"));
}

#[tokio::test]
async fn find_by_ids_matches_any_listed_key() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    let ctx = users_context();

    let rows = adapter
        .find_by_ids(&ctx, vec![json!("a"), json!("d"), json!("zz")])
        .await
        .unwrap();
    let none = adapter.find_by_ids(&ctx, Vec::new()).await.unwrap();

    assert_eq!(keys(&rows), ["a", "d"]);
    assert!(none.is_empty());
}

#[tokio::test]
async fn update_by_id_updates_then_reads_in_one_job() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .update_by_id(&users_context(), json!("a"), query(json!({"tag": "v"})))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["tag"], json!("v"));
    assert_eq!(rows[0]["name"], json!("xabcx"));

    let submissions = engine.submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].sql,
        format!(
            "update `{USERS_TABLE}` set `tag` = 'v' where `pk` = 'a'; select * from `{USERS_TABLE}` where `pk` = 'a'"
        )
    );
}

#[tokio::test]
async fn update_many_returns_every_matching_row_after_the_update() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;

    let rows = adapter
        .update_many(
            &users_context(),
            query(json!({"age": 7})),
            query(json!({"name": "renamed", "age": 8})),
        )
        .await
        .unwrap();

    // The read uses the original condition, so rows whose `age` changed no longer match.
    assert!(rows.is_empty());

    let updated = adapter
        .find(&users_context(), filter(json!({"query": {"name": "renamed"}})))
        .await
        .unwrap();
    assert_eq!(keys(&updated), ["a", "c"]);
}

#[tokio::test]
async fn jobs_run_in_the_tenant_region() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();

    adapter.find(&users_context(), RawFilter::default()).await.unwrap();

    let submissions = engine.submissions().await;
    assert_eq!(submissions[0].location.as_deref(), Some(TENANT_REGION));
}

#[tokio::test]
async fn calls_without_tenant_fail_before_any_job() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    let ctx = CallContext::new();

    let find = adapter.find(&ctx, RawFilter::default()).await.unwrap_err();
    let count = adapter.count(&ctx, RawFilter::default()).await.unwrap_err();
    let remove = adapter.remove_by_id(&ctx, json!("a")).await.unwrap_err();

    assert_eq!(find.kind(), ErrorKind::MissingContext);
    assert_eq!(count.kind(), ErrorKind::MissingContext);
    assert_eq!(remove.kind(), ErrorKind::MissingContext);
    assert!(engine.submissions().await.is_empty());
}

#[tokio::test]
async fn tenant_without_table_fails_with_invalid_table_name() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    let ctx = CallContext::new().attach_tenant(TenantMeta::new("org-1", "acme"));

    let err = adapter.find(&ctx, RawFilter::default()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidTableName);
    assert!(engine.submissions().await.is_empty());
}

#[tokio::test]
async fn engine_errors_are_returned_without_retry() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    engine
        .fail_next(adapter_error!(
            ErrorKind::EngineUnavailable,
            "BigQuery unavailable",
            "503"
        ))
        .await;

    let err = adapter
        .find(&users_context(), RawFilter::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    assert!(err.is_retryable());
    assert_eq!(engine.submissions().await.len(), 1);
}

#[tokio::test]
async fn failed_jobs_report_their_job_id() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    engine
        .fail_next(adapter_error!(
            ErrorKind::EngineExecutionFailed,
            "BigQuery job failed"
        ))
        .await;

    let err = adapter
        .find(&users_context(), RawFilter::default())
        .await
        .unwrap_err();

    let submissions = engine.submissions().await;
    assert_eq!(err.job_id(), Some(submissions[0].job_id.as_str()));
}

#[tokio::test]
async fn failed_pre_image_read_leaves_rows_in_place() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    seed_users(&engine).await;
    engine
        .fail_next(adapter_error!(
            ErrorKind::EngineExecutionFailed,
            "BigQuery job failed"
        ))
        .await;

    let err = adapter
        .remove_by_id(&users_context(), json!("a"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EngineExecutionFailed);
    assert_eq!(engine.submissions().await.len(), 1);
    assert_eq!(engine.rows(USERS_TABLE).await.len(), 4);
}

#[tokio::test]
async fn canceled_calls_fail_with_engine_canceled() {
    init_test_tracing();
    let (adapter, engine) = memory_adapter();
    let (cancel_tx, cancel_rx) = create_cancellation();
    let ctx = users_context().with_cancellation(cancel_rx);
    cancel_tx.send(()).unwrap();

    let err = adapter.find(&ctx, RawFilter::default()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EngineCanceled);
    assert!(engine.submissions().await.is_empty());
}

#[tokio::test]
async fn init_rejects_invalid_configuration() {
    init_test_tracing();
    let mut config = adapter_config();
    config.routing.dataset_id = String::new();
    let router = ConfigRouter::new(config.project_id.clone(), config.routing.clone());

    let err = BigQueryAdapter::init(&config, router, MemoryEngine::new()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

/// Router that tags every submission with the region it runs in.
struct TaggingRouter {
    inner: ConfigRouter,
}

impl TenantRouter for TaggingRouter {
    async fn region(&self, ctx: &CallContext) -> AdapterResult<Option<String>> {
        self.inner.region(ctx).await
    }

    async fn id_key(&self, ctx: &CallContext) -> AdapterResult<String> {
        self.inner.id_key(ctx).await
    }

    fn table_name(&self, tenant: &TenantMeta) -> AdapterResult<String> {
        self.inner.table_name(tenant)
    }

    fn wrap_query(&self, sql: String, region: Option<&str>) -> String {
        format!("/* region: {} */ {sql}", region.unwrap_or("default"))
    }
}

#[tokio::test]
async fn wrapped_query_is_what_gets_executed() {
    init_test_tracing();
    let config = adapter_config();
    let engine = MemoryEngine::new();
    seed_users(&engine).await;
    let router = TaggingRouter {
        inner: ConfigRouter::new(config.project_id.clone(), routing_config()),
    };
    let adapter = BigQueryAdapter::init(&config, router, engine.clone()).unwrap();

    let rows = adapter
        .find(&users_context(), filter(json!({"query": {"pk": "a"}})))
        .await
        .unwrap();

    assert_eq!(keys(&rows), ["a"]);
    assert_eq!(
        engine.submissions().await[0].sql,
        format!("/* region: EU */ select * from `{USERS_TABLE}` where `pk` = 'a'")
    );
}

#[tokio::test]
async fn shutdown_succeeds_with_no_jobs_running() {
    init_test_tracing();
    let (adapter, _engine) = memory_adapter();

    adapter.shutdown().await.unwrap();
}
