use std::path::Path;
use std::sync::Once;

use config::shared::{AdapterConfig, CredentialsConfig, JobConfig};
use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::field_type::FieldType;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_row::TableRow;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use secrecy::ExposeSecret;
use serde_json::{Number, Value};
use tracing::{debug, info, warn};

use crate::context::CancelRx;
use crate::engine::base::{QueryEngine, QueryOutput, already_canceled, cancellation_requested};
use crate::error::{AdapterError, AdapterResult, ErrorKind};
use crate::types::Row;
use crate::{adapter_error, bail};

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Installs the process wide rustls crypto provider used by the BigQuery HTTP client.
fn install_crypto_provider() {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        // Another provider may already be installed by the embedding binary.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Which side of a job a BigQuery error happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Submission,
    Polling,
}

/// Converts BigQuery client errors to adapter errors.
///
/// Credential problems are [`ErrorKind::AuthenticationError`]. While submitting, transport
/// failures, rate limiting and server errors are retryable [`ErrorKind::EngineUnavailable`] and
/// every other rejection is [`ErrorKind::EngineSubmissionRejected`]. Once the job exists any
/// failure is [`ErrorKind::EngineExecutionFailed`].
fn bq_error_to_adapter_error(err: BQError, phase: JobPhase) -> AdapterError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_)
        | BQError::InvalidServiceAccountAuthenticator(_)
        | BQError::InvalidInstalledFlowAuthenticator(_)
        | BQError::InvalidApplicationDefaultCredentialsAuthenticator(_)
        | BQError::InvalidAuthorizedUserAuthenticator(_)
        | BQError::AuthError(_)
        | BQError::YupAuthError(_)
        | BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication failed",
        ),
        BQError::ResponseError { error } if error.error.code == 401 => (
            ErrorKind::AuthenticationError,
            "BigQuery rejected the credentials",
        ),
        _ if phase == JobPhase::Polling => (
            ErrorKind::EngineExecutionFailed,
            "BigQuery job failed",
        ),
        BQError::RequestError(_) | BQError::TonicTransportError(_) => {
            (ErrorKind::EngineUnavailable, "BigQuery request failed")
        }
        BQError::ResponseError { error } if is_transient_status(error.error.code) => (
            ErrorKind::EngineUnavailable,
            "BigQuery is temporarily unavailable",
        ),
        BQError::ResponseError { .. } => (
            ErrorKind::EngineSubmissionRejected,
            "BigQuery rejected the job",
        ),
        _ => (
            ErrorKind::EngineSubmissionRejected,
            "BigQuery job submission failed",
        ),
    };

    adapter_error!(kind, description, err.to_string())
}

fn is_transient_status(code: i64) -> bool {
    code == 429 || (500..=599).contains(&code)
}

fn job_errors_to_adapter_error(job_id: Option<&str>, errors: &[ErrorProto]) -> AdapterError {
    let messages = errors
        .iter()
        .map(|error| {
            format!(
                "{}: {}",
                error.reason.as_deref().unwrap_or("unknown"),
                error.message.as_deref().unwrap_or("no message")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let error = adapter_error!(
        ErrorKind::EngineExecutionFailed,
        "BigQuery job failed",
        format!("job {}\n{messages}", job_id.unwrap_or("<unknown>"))
    );

    match job_id {
        Some(job_id) => error.with_job_id(job_id),
        None => error,
    }
}

/// Column type information needed to turn REST cells into JSON values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnShape {
    name: String,
    kind: ColumnKind,
    repeated: bool,
    fields: Vec<ColumnShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Record,
    Text,
}

impl From<&TableFieldSchema> for ColumnShape {
    fn from(field: &TableFieldSchema) -> Self {
        let kind = match &field.r#type {
            FieldType::Integer | FieldType::Int64 => ColumnKind::Integer,
            FieldType::Float | FieldType::Float64 => ColumnKind::Float,
            FieldType::Boolean | FieldType::Bool => ColumnKind::Boolean,
            FieldType::Record | FieldType::Struct => ColumnKind::Record,
            _ => ColumnKind::Text,
        };

        ColumnShape {
            name: field.name.clone(),
            kind,
            repeated: field
                .mode
                .as_deref()
                .is_some_and(|mode| mode.eq_ignore_ascii_case("REPEATED")),
            fields: field
                .fields
                .as_ref()
                .map(|fields| fields.iter().map(ColumnShape::from).collect())
                .unwrap_or_default(),
        }
    }
}

fn column_shapes(schema: Option<&TableSchema>) -> Vec<ColumnShape> {
    schema
        .and_then(|schema| schema.fields.as_ref())
        .map(|fields| fields.iter().map(ColumnShape::from).collect())
        .unwrap_or_default()
}

fn convert_rows(shapes: &[ColumnShape], rows: Vec<TableRow>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let cells = row.columns.unwrap_or_default();
            shapes
                .iter()
                .zip(cells)
                .map(|(shape, cell)| {
                    let value = convert_cell(shape, cell.value.unwrap_or(Value::Null));
                    (shape.name.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// Converts a REST cell, where scalars arrive as strings, into a typed JSON value.
fn convert_cell(shape: &ColumnShape, value: Value) -> Value {
    if shape.repeated {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| convert_scalar(shape, unwrap_cell(item)))
                    .collect(),
            ),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
    }

    convert_scalar(shape, value)
}

fn convert_scalar(shape: &ColumnShape, value: Value) -> Value {
    match (shape.kind, value) {
        (_, Value::Null) => Value::Null,
        (ColumnKind::Integer, Value::String(text)) => match text.parse::<i64>() {
            Ok(int) => Value::from(int),
            Err(_) => Value::String(text),
        },
        (ColumnKind::Float, Value::String(text)) => {
            match text.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(number) => Value::Number(number),
                None => Value::String(text),
            }
        }
        (ColumnKind::Boolean, Value::String(text)) => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        (ColumnKind::Record, Value::Object(mut record)) => {
            let cells = match record.remove("f") {
                Some(Value::Array(cells)) => cells,
                _ => Vec::new(),
            };
            let nested: Row = shape
                .fields
                .iter()
                .zip(cells)
                .map(|(field, cell)| (field.name.clone(), convert_cell(field, unwrap_cell(cell))))
                .collect();
            Value::Object(nested)
        }
        (_, other) => other,
    }
}

/// Unwraps the `{"v": value}` envelope used for repeated and nested cells.
fn unwrap_cell(cell: Value) -> Value {
    match cell {
        Value::Object(mut envelope) => envelope.remove("v").unwrap_or(Value::Null),
        other => other,
    }
}

/// Result rows gathered while a job is polled.
struct ResultPage {
    complete: bool,
    schema: Option<TableSchema>,
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

/// [`QueryEngine`] backed by BigQuery jobs through the REST API.
#[derive(Clone)]
pub struct BigQueryEngine {
    project_id: String,
    client: Client,
    poll_timeout_ms: i32,
}

impl BigQueryEngine {
    /// Creates an engine from the adapter configuration's credentials.
    pub async fn from_config(config: &AdapterConfig) -> AdapterResult<BigQueryEngine> {
        match &config.credentials {
            CredentialsConfig::ServiceAccountKey { key } => {
                Self::new_with_key(config.project_id.clone(), key.expose_secret(), &config.jobs)
                    .await
            }
            CredentialsConfig::ServiceAccountKeyPath { path } => {
                Self::new_with_key_path(config.project_id.clone(), path, &config.jobs).await
            }
            CredentialsConfig::ApplicationDefault {} => {
                Self::new_with_adc(config.project_id.clone(), &config.jobs).await
            }
        }
    }

    /// Creates an engine from a service account key JSON string.
    pub async fn new_with_key(
        project_id: String,
        sa_key: &str,
        jobs: &JobConfig,
    ) -> AdapterResult<BigQueryEngine> {
        install_crypto_provider();

        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;

        Ok(Self::with_client(project_id, client, jobs))
    }

    /// Creates an engine from a service account key file.
    pub async fn new_with_key_path(
        project_id: String,
        sa_key_path: &Path,
        jobs: &JobConfig,
    ) -> AdapterResult<BigQueryEngine> {
        install_crypto_provider();

        let sa_key_path = sa_key_path.to_string_lossy();
        let client = ClientBuilder::new()
            .build_from_service_account_key_file(&sa_key_path)
            .await
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;

        Ok(Self::with_client(project_id, client, jobs))
    }

    /// Creates an engine using Application Default Credentials.
    pub async fn new_with_adc(project_id: String, jobs: &JobConfig) -> AdapterResult<BigQueryEngine> {
        install_crypto_provider();

        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;

        Ok(Self::with_client(project_id, client, jobs))
    }

    /// Creates an engine talking to custom OAuth and BigQuery endpoints, used against emulators
    /// and mock servers.
    pub async fn new_with_urls(
        project_id: String,
        auth_base_url: String,
        v2_base_url: String,
        sa_key: &str,
        jobs: &JobConfig,
    ) -> AdapterResult<BigQueryEngine> {
        install_crypto_provider();

        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;
        let client = ClientBuilder::new()
            .with_auth_base_url(auth_base_url)
            .with_v2_base_url(v2_base_url)
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;

        Ok(Self::with_client(project_id, client, jobs))
    }

    fn with_client(project_id: String, client: Client, jobs: &JobConfig) -> BigQueryEngine {
        BigQueryEngine {
            project_id,
            client,
            poll_timeout_ms: i32::try_from(jobs.poll_timeout_ms).unwrap_or(i32::MAX),
        }
    }

    /// Fetches one page of a job's results, giving up when `cancel` fires.
    async fn fetch_page(
        &self,
        job_id: &str,
        location: Option<&str>,
        page_token: Option<String>,
        cancel: &mut Option<CancelRx>,
    ) -> AdapterResult<ResultPage> {
        let parameters = GetQueryResultsParameters {
            location: location.map(str::to_owned),
            page_token,
            timeout_ms: Some(self.poll_timeout_ms),
            ..Default::default()
        };

        let response = tokio::select! {
            biased;

            _ = cancellation_requested(cancel) => {
                self.cancel_job(job_id, location).await;
                return Err(adapter_error!(
                    ErrorKind::EngineCanceled,
                    "Job canceled",
                    format!("job {job_id} was canceled by the caller")
                )
                .with_job_id(job_id));
            }
            response = self.client.job().get_query_results(&self.project_id, job_id, parameters) => {
                response.map_err(|err| {
                    bq_error_to_adapter_error(err, JobPhase::Polling).with_job_id(job_id)
                })?
            }
        };

        if let Some(errors) = response.errors.as_deref().filter(|errors| !errors.is_empty()) {
            return Err(job_errors_to_adapter_error(Some(job_id), errors));
        }

        Ok(ResultPage {
            complete: response.job_complete.unwrap_or(false),
            schema: response.schema,
            rows: response.rows.unwrap_or_default(),
            page_token: response.page_token,
        })
    }

    /// Requests cancellation of a running job. Failures are logged, the job may still finish.
    async fn cancel_job(&self, job_id: &str, location: Option<&str>) {
        match self
            .client
            .job()
            .cancel_job(&self.project_id, job_id, location)
            .await
        {
            Ok(_) => info!(job_id, "bigquery job cancellation requested"),
            Err(err) => warn!(job_id, error = %err, "failed to cancel bigquery job"),
        }
    }
}

impl QueryEngine for BigQueryEngine {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn execute(
        &self,
        sql: &str,
        location: Option<&str>,
        mut cancel: Option<CancelRx>,
    ) -> AdapterResult<QueryOutput> {
        if already_canceled(&cancel) {
            bail!(
                ErrorKind::EngineCanceled,
                "Job canceled",
                "the call was canceled before the job was submitted"
            );
        }

        let mut request = QueryRequest::new(sql.to_owned());
        request.location = location.map(str::to_owned);
        request.timeout_ms = Some(self.poll_timeout_ms);

        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|err| bq_error_to_adapter_error(err, JobPhase::Submission))?;

        let job_id = response
            .job_reference
            .as_ref()
            .and_then(|reference| reference.job_id.clone());
        let job_location = response
            .job_reference
            .as_ref()
            .and_then(|reference| reference.location.clone())
            .or_else(|| location.map(str::to_owned));

        if let Some(errors) = response.errors.as_deref().filter(|errors| !errors.is_empty()) {
            return Err(job_errors_to_adapter_error(job_id.as_deref(), errors));
        }

        let mut page = ResultPage {
            complete: response.job_complete.unwrap_or(false),
            schema: response.schema,
            rows: response.rows.unwrap_or_default(),
            page_token: response.page_token,
        };

        if page.complete && page.page_token.is_none() {
            let rows = convert_rows(&column_shapes(page.schema.as_ref()), page.rows);
            debug!(job_id = job_id.as_deref(), rows = rows.len(), "bigquery job finished");

            return Ok(QueryOutput { job_id, rows });
        }

        let Some(job_id) = job_id else {
            bail!(
                ErrorKind::EngineExecutionFailed,
                "BigQuery job reference missing",
                "the job did not finish within the request and has no id to poll"
            );
        };

        while !page.complete {
            debug!(%job_id, "waiting for bigquery job to finish");
            page = self
                .fetch_page(&job_id, job_location.as_deref(), None, &mut cancel)
                .await?;
        }

        let shapes = column_shapes(page.schema.as_ref());
        let mut rows = convert_rows(&shapes, page.rows);
        let mut page_token = page.page_token;
        while let Some(token) = page_token {
            let next = self
                .fetch_page(&job_id, job_location.as_deref(), Some(token), &mut cancel)
                .await?;
            rows.extend(convert_rows(&shapes, next.rows));
            page_token = next.page_token;
        }

        debug!(%job_id, rows = rows.len(), "bigquery job finished");

        Ok(QueryOutput {
            job_id: Some(job_id),
            rows,
        })
    }
}
