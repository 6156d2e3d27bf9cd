#![allow(dead_code)]

pub mod bigquery;

use std::collections::HashMap;

use adapter::adapter::BigQueryAdapter;
use adapter::context::{CallContext, TenantMeta};
use adapter::engine::memory::MemoryEngine;
use adapter::router::ConfigRouter;
use adapter::types::Row;
use config::shared::{AdapterConfig, CredentialsConfig, JobConfig, RoutingConfig};
use serde_json::{Value, json};

pub const PROJECT_ID: &str = "warehouse";
pub const DATASET_ID: &str = "tenants";
pub const TENANT: &str = "acme";
pub const TENANT_REGION: &str = "EU";
pub const PRIMARY_KEY: &str = "pk";
pub const DENIED_KEY: &str = "secret";

/// Table the [`TENANT`] `users` table routes to.
pub const USERS_TABLE: &str = "warehouse.tenants.acme_users";

pub type TestAdapter = BigQueryAdapter<MemoryEngine, ConfigRouter>;

pub fn routing_config() -> RoutingConfig {
    RoutingConfig {
        dataset_id: DATASET_ID.to_owned(),
        table_template: RoutingConfig::DEFAULT_TABLE_TEMPLATE.to_owned(),
        default_table: None,
        default_region: None,
        tenant_regions: HashMap::from([(TENANT.to_owned(), TENANT_REGION.to_owned())]),
        id_key: PRIMARY_KEY.to_owned(),
    }
}

pub fn adapter_config() -> AdapterConfig {
    AdapterConfig {
        project_id: PROJECT_ID.to_owned(),
        credentials: CredentialsConfig::ApplicationDefault {},
        routing: routing_config(),
        query_denylist: vec![DENIED_KEY.to_owned()],
        show_logs: true,
        jobs: JobConfig::default(),
    }
}

/// Creates an adapter over a fresh [`MemoryEngine`], returning the engine for inspection.
pub fn memory_adapter() -> (TestAdapter, MemoryEngine) {
    let config = adapter_config();
    let engine = MemoryEngine::new();
    let router = ConfigRouter::new(config.project_id.clone(), config.routing.clone());

    let adapter = BigQueryAdapter::init(&config, router, engine.clone()).unwrap();

    (adapter, engine)
}

/// Creates a context for [`TENANT`] acting on its `users` table.
pub fn users_context() -> CallContext {
    CallContext::new().attach_tenant(TenantMeta::new("org-1", TENANT).with_table("users"))
}

pub fn row(value: Value) -> Row {
    value.as_object().unwrap().clone()
}

/// Seeds the users table with rows `a` to `d`.
pub async fn seed_users(engine: &MemoryEngine) {
    engine
        .insert_rows(
            USERS_TABLE,
            vec![
                row(json!({"pk": "a", "age": 7, "name": "xabcx", "tag": "one", "secret": "s1"})),
                row(json!({"pk": "b", "age": 3, "name": "abc", "tag": "two", "secret": "s2"})),
                row(json!({"pk": "c", "age": 7, "name": "zzz", "tag": "abc", "secret": "s3"})),
                row(json!({"pk": "d", "age": 9, "name": "yyy", "tag": "four", "secret": "s4"})),
            ],
        )
        .await;
}

/// Returns the `pk` of every row, in order.
pub fn keys(rows: &[Row]) -> Vec<&str> {
    rows.iter()
        .map(|row| row.get(PRIMARY_KEY).and_then(Value::as_str).unwrap())
        .collect()
}
