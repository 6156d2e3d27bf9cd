//! Error types and result definitions for adapter operations.
//!
//! Every failure raised while resolving a tenant, building SQL or running a BigQuery job is an
//! [`AdapterError`]. Errors carry an [`ErrorKind`] so callers can tell configuration mistakes,
//! missing tenant context, retryable submission failures and terminal job failures apart without
//! parsing messages.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type used by all adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Payload stored inside an [`AdapterError`].
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    job_id: Option<String>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for adapter operations.
///
/// Cloning is cheap: the source error and the backtrace are reference counted.
#[derive(Debug, Clone)]
pub struct AdapterError {
    payload: ErrorPayload,
}

/// Categories of failures the adapter can report.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Setup
    ConfigError,
    AuthenticationError,

    // Per call
    MissingContext,
    InvalidTableName,
    InvalidData,

    // Engine
    EngineSubmissionRejected,
    EngineUnavailable,
    EngineExecutionFailed,
    EngineCanceled,

    // Serialization
    SerializationError,
    DeserializationError,

    IoError,
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for failures where resubmitting the same job may succeed.
    ///
    /// Only transient submission failures (network errors, rate limits, backend unavailability)
    /// qualify. Jobs that ran and failed, rejected SQL and permission problems are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::EngineUnavailable)
    }

    /// Returns `true` when BigQuery refused to create the job.
    pub fn is_submission_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::EngineSubmissionRejected | ErrorKind::EngineUnavailable
        )
    }
}

impl AdapterError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail attached to this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the BigQuery job the failure belongs to, when a job had been created.
    pub fn job_id(&self) -> Option<&str> {
        self.payload.job_id.as_deref()
    }

    /// Returns `true` if the failed operation may be resubmitted as is.
    pub fn is_retryable(&self) -> bool {
        self.payload.kind.is_retryable()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Records the job the failure belongs to.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.payload.job_id = Some(job_id.into());
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        AdapterError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                job_id: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            },
        }
    }
}

impl PartialEq for AdapterError {
    fn eq(&self, other: &AdapterError) -> bool {
        self.payload.kind == other.payload.kind
            && self.payload.description == other.payload.description
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            payload.location.file(),
            payload.location.line(),
            payload.location.column()
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        let rendered_backtrace = format!("{}", payload.backtrace);
        if !rendered_backtrace.trim().is_empty() {
            write!(f, "\n  Backtrace:")?;
            for line in rendered_backtrace.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for AdapterError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> AdapterError {
        AdapterError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for AdapterError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> AdapterError {
        AdapterError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for AdapterError {
    #[track_caller]
    fn from(err: std::io::Error) -> AdapterError {
        let detail = err.to_string();
        AdapterError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps JSON failures to serialization or deserialization errors based on their category.
impl From<serde_json::Error> for AdapterError {
    #[track_caller]
    fn from(err: serde_json::Error) -> AdapterError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        AdapterError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Configuration validation failures surface as [`ErrorKind::ConfigError`].
impl From<config::shared::ValidationError> for AdapterError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> AdapterError {
        let detail = err.to_string();
        AdapterError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid adapter configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
