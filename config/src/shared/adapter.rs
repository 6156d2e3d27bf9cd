use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    CredentialsConfig, CredentialsConfigWithoutSecrets, RoutingConfig, ValidationError,
};

/// Job polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// How long a single results request waits server-side before returning incomplete.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u32,
}

impl JobConfig {
    pub const DEFAULT_POLL_TIMEOUT_MS: u32 = 10_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_timeout_ms == 0 {
            return Err(ValidationError::PollTimeoutZero);
        }

        Ok(())
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: Self::DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

fn default_poll_timeout_ms() -> u32 {
    JobConfig::DEFAULT_POLL_TIMEOUT_MS
}

/// Configuration of a BigQuery adapter instance.
///
/// This intentionally does not implement [`Serialize`] because [`CredentialsConfig`] can hold a
/// service account key. Use [`AdapterConfigWithoutSecrets`] to print or persist it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Google Cloud project the jobs are billed to and run in.
    pub project_id: String,
    pub credentials: CredentialsConfig,
    pub routing: RoutingConfig,
    /// Filter keys stripped from every where-clause before SQL is built.
    #[serde(default)]
    pub query_denylist: Vec<String>,
    /// Logs SQL text at `info` instead of `debug`.
    #[serde(default)]
    pub show_logs: bool,
    #[serde(default)]
    pub jobs: JobConfig,
}

impl AdapterConfig {
    /// Validates every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project_id.trim().is_empty() {
            return Err(ValidationError::ProjectIdEmpty);
        }

        if self.query_denylist.iter().any(|key| key.trim().is_empty()) {
            return Err(ValidationError::EmptyDenylistKey);
        }

        self.routing.validate()?;
        self.jobs.validate()
    }
}

impl Config for AdapterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["query_denylist"];
}

/// Same as [`AdapterConfig`] but without secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfigWithoutSecrets {
    pub project_id: String,
    pub credentials: CredentialsConfigWithoutSecrets,
    pub routing: RoutingConfig,
    pub query_denylist: Vec<String>,
    pub show_logs: bool,
    pub jobs: JobConfig,
}

impl From<AdapterConfig> for AdapterConfigWithoutSecrets {
    fn from(value: AdapterConfig) -> Self {
        AdapterConfigWithoutSecrets {
            project_id: value.project_id,
            credentials: value.credentials.into(),
            routing: value.routing,
            query_denylist: value.query_denylist,
            show_logs: value.show_logs,
            jobs: value.jobs,
        }
    }
}
