//! Tenant routing hooks.
//!
//! A [`TenantRouter`] decides, per call, which table a tenant's data lives in, where the job
//! runs and which column is the primary key. [`ConfigRouter`] implements the common case of
//! static rules loaded from [`RoutingConfig`].

use std::future::Future;

use config::shared::RoutingConfig;

use crate::bail;
use crate::context::{CallContext, TenantMeta};
use crate::error::{AdapterResult, ErrorKind};

/// Caller supplied routing functions consulted on every adapter call.
pub trait TenantRouter: Send + Sync {
    /// Returns the execution region for the call. `None` lets BigQuery choose.
    fn region(&self, ctx: &CallContext)
    -> impl Future<Output = AdapterResult<Option<String>>> + Send;

    /// Returns the primary key column for the call.
    fn id_key(&self, ctx: &CallContext) -> impl Future<Output = AdapterResult<String>> + Send;

    /// Returns the fully-qualified table name for a tenant.
    fn table_name(&self, tenant: &TenantMeta) -> AdapterResult<String>;

    /// Rewrites the final text of every submission. The returned text is what gets logged and
    /// executed.
    fn wrap_query(&self, sql: String, _region: Option<&str>) -> String {
        sql
    }
}

/// Router driven by static [`RoutingConfig`] rules.
#[derive(Debug, Clone)]
pub struct ConfigRouter {
    project_id: String,
    routing: RoutingConfig,
}

impl ConfigRouter {
    pub fn new(project_id: impl Into<String>, routing: RoutingConfig) -> Self {
        Self {
            project_id: project_id.into(),
            routing,
        }
    }
}

impl TenantRouter for ConfigRouter {
    async fn region(&self, ctx: &CallContext) -> AdapterResult<Option<String>> {
        let tenant = ctx.require_tenant()?;

        Ok(self.routing.region_for(&tenant.tenant_key).map(str::to_owned))
    }

    async fn id_key(&self, _ctx: &CallContext) -> AdapterResult<String> {
        Ok(self.routing.id_key.clone())
    }

    fn table_name(&self, tenant: &TenantMeta) -> AdapterResult<String> {
        let template = &self.routing.table_template;

        let table = match tenant.table.as_deref().or(self.routing.default_table.as_deref()) {
            Some(table) => table,
            None if template.contains("{table}") => bail!(
                ErrorKind::InvalidTableName,
                "No table to route to",
                format!(
                    "tenant `{}` gave no table and no default table is configured",
                    tenant.tenant_key
                )
            ),
            None => "",
        };

        Ok(template
            .replace("{project}", &self.project_id)
            .replace("{dataset}", &self.routing.dataset_id)
            .replace("{organization}", &tenant.organization_id)
            .replace("{tenant}", &tenant.tenant_key)
            .replace("{table}", table))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn router(default_table: Option<&str>) -> ConfigRouter {
        ConfigRouter::new(
            "warehouse",
            RoutingConfig {
                dataset_id: "tenants".to_owned(),
                table_template: RoutingConfig::DEFAULT_TABLE_TEMPLATE.to_owned(),
                default_table: default_table.map(str::to_owned),
                default_region: Some("US".to_owned()),
                tenant_regions: HashMap::from([("acme".to_owned(), "EU".to_owned())]),
                id_key: "pk".to_owned(),
            },
        )
    }

    #[test]
    fn test_table_override_wins_over_default_table() {
        let router = router(Some("events"));

        let with_override = router
            .table_name(&TenantMeta::new("org", "acme").with_table("users"))
            .unwrap();
        let with_default = router.table_name(&TenantMeta::new("org", "acme")).unwrap();

        assert_eq!(with_override, "warehouse.tenants.acme_users");
        assert_eq!(with_default, "warehouse.tenants.acme_events");
    }

    #[test]
    fn test_missing_table_without_default_is_rejected() {
        let err = router(None)
            .table_name(&TenantMeta::new("org", "acme"))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidTableName);
    }

    #[tokio::test]
    async fn test_region_uses_tenant_override() {
        let router = router(None);
        let acme = CallContext::new().attach_tenant(TenantMeta::new("org", "acme"));
        let globex = CallContext::new().attach_tenant(TenantMeta::new("org", "globex"));

        assert_eq!(router.region(&acme).await.unwrap().as_deref(), Some("EU"));
        assert_eq!(router.region(&globex).await.unwrap().as_deref(), Some("US"));
        assert_eq!(router.id_key(&acme).await.unwrap(), "pk");
    }

    #[test]
    fn test_wrap_query_defaults_to_identity() {
        let sql = "select 1".to_owned();

        assert_eq!(router(None).wrap_query(sql.clone(), Some("EU")), sql);
    }
}
