use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The BigQuery project identifier is empty.
    #[error("`project_id` cannot be empty")]
    ProjectIdEmpty,
    /// The routing dataset identifier is empty.
    #[error("`routing.dataset_id` cannot be empty")]
    DatasetIdEmpty,
    /// The primary key column name is empty.
    #[error("`routing.id_key` cannot be empty")]
    IdKeyEmpty,
    /// The table template does not reference the `{table}` or `{tenant}` placeholder.
    #[error("Invalid table template `{0}`: it must contain `{{table}}` or `{{tenant}}`")]
    TableTemplate(String),
    /// The table template references a placeholder that is not supported.
    #[error("Invalid table template `{template}`: unknown placeholder `{{{placeholder}}}`")]
    UnknownPlaceholder { template: String, placeholder: String },
    /// The job poll timeout is zero.
    #[error("`jobs.poll_timeout_ms` cannot be zero")]
    PollTimeoutZero,
    /// A denylisted filter key is empty.
    #[error("`query_denylist` cannot contain empty keys")]
    EmptyDenylistKey,
}
