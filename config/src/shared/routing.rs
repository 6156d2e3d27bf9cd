use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Placeholders accepted in [`RoutingConfig::table_template`].
pub const TABLE_TEMPLATE_PLACEHOLDERS: &[&str] =
    &["project", "dataset", "organization", "tenant", "table"];

fn default_table_template() -> String {
    RoutingConfig::DEFAULT_TABLE_TEMPLATE.to_owned()
}

fn default_id_key() -> String {
    RoutingConfig::DEFAULT_ID_KEY.to_owned()
}

/// Static tenant routing rules.
///
/// A tenant's table is the template with its placeholders replaced, and its region is either a
/// per-tenant override or the default region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    /// BigQuery dataset holding the tenant tables.
    pub dataset_id: String,
    /// Template for fully-qualified table names.
    #[serde(default = "default_table_template")]
    pub table_template: String,
    /// Logical table used when a call carries no table override.
    #[serde(default)]
    pub default_table: Option<String>,
    /// Region used for tenants without an override. `None` lets BigQuery pick.
    #[serde(default)]
    pub default_region: Option<String>,
    /// Region overrides keyed by tenant key.
    #[serde(default)]
    pub tenant_regions: HashMap<String, String>,
    /// Primary key column name.
    #[serde(default = "default_id_key")]
    pub id_key: String,
}

impl RoutingConfig {
    pub const DEFAULT_TABLE_TEMPLATE: &'static str = "{project}.{dataset}.{tenant}_{table}";

    pub const DEFAULT_ID_KEY: &'static str = "id";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dataset_id.trim().is_empty() {
            return Err(ValidationError::DatasetIdEmpty);
        }

        if self.id_key.trim().is_empty() {
            return Err(ValidationError::IdKeyEmpty);
        }

        for placeholder in template_placeholders(&self.table_template) {
            if !TABLE_TEMPLATE_PLACEHOLDERS.contains(&placeholder) {
                return Err(ValidationError::UnknownPlaceholder {
                    template: self.table_template.clone(),
                    placeholder: placeholder.to_owned(),
                });
            }
        }

        if !self.table_template.contains("{table}") && !self.table_template.contains("{tenant}") {
            return Err(ValidationError::TableTemplate(self.table_template.clone()));
        }

        Ok(())
    }

    /// Returns the region for `tenant_key`, falling back to the default region.
    pub fn region_for(&self, tenant_key: &str) -> Option<&str> {
        self.tenant_regions
            .get(tenant_key)
            .or(self.default_region.as_ref())
            .map(String::as_str)
    }
}

/// Yields the names between `{` and `}` in a template.
fn template_placeholders(template: &str) -> impl Iterator<Item = &str> {
    template
        .split('{')
        .skip(1)
        .filter_map(|segment| segment.split_once('}').map(|(name, _)| name))
}
