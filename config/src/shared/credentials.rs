use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// How the adapter authenticates against BigQuery.
///
/// This intentionally does not implement [`Serialize`] so that the service account key cannot
/// leak through serialized configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsConfig {
    /// Inline service account key JSON.
    ServiceAccountKey { key: SecretString },
    /// Path to a service account key file.
    ServiceAccountKeyPath { path: PathBuf },
    /// Application default credentials from the environment.
    ApplicationDefault {},
}

/// Same as [`CredentialsConfig`] with the key removed, safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsConfigWithoutSecrets {
    ServiceAccountKey {},
    ServiceAccountKeyPath { path: PathBuf },
    ApplicationDefault {},
}

impl From<CredentialsConfig> for CredentialsConfigWithoutSecrets {
    fn from(value: CredentialsConfig) -> Self {
        match value {
            CredentialsConfig::ServiceAccountKey { key: _ } => {
                CredentialsConfigWithoutSecrets::ServiceAccountKey {}
            }
            CredentialsConfig::ServiceAccountKeyPath { path } => {
                CredentialsConfigWithoutSecrets::ServiceAccountKeyPath { path }
            }
            CredentialsConfig::ApplicationDefault {} => {
                CredentialsConfigWithoutSecrets::ApplicationDefault {}
            }
        }
    }
}
