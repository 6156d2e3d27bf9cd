//! Command line access to tenant tables through the BigQuery adapter.
//!
//! Reads `configuration/base.yaml` and the environment specific file from the working directory
//! (or `--config-dir`), then runs one read operation for the given tenant and prints the result
//! as JSON.

use std::path::PathBuf;

use adapter::adapter::BigQueryAdapter;
use adapter::context::{CallContext, TenantMeta};
use adapter::engine::bigquery::BigQueryEngine;
use adapter::filter::RawFilter;
use adapter::router::ConfigRouter;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::shared::{AdapterConfig, AdapterConfigWithoutSecrets};
use config::{Environment, load_config, load_config_from};
use serde_json::Value;
use telemetry::tracing::init_tracing;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bqdb", version, about = "Query tenant tables in BigQuery")]
struct Args {
    /// Directory holding the configuration files, defaults to `./configuration`.
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Configuration environment, defaults to `APP_ENVIRONMENT` or `dev`.
    #[arg(long)]
    environment: Option<Environment>,

    /// Organization owning the tenant.
    #[arg(long)]
    organization: String,

    /// Tenant key the call acts on behalf of.
    #[arg(long)]
    tenant: String,

    /// Logical table, falls back to the configured default table.
    #[arg(long)]
    table: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the rows matching a filter.
    Find {
        /// Filter as JSON, e.g. `{"query": {"age": 7}, "sort": "-name", "limit": 10}`.
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Print the first row matching a filter.
    FindOne {
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Print the number of rows matching a filter.
    Count {
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Print the row with the given primary key.
    FindById {
        /// Primary key value, read as JSON and as a plain string when it is not valid JSON.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let config: AdapterConfig = match (&args.config_dir, args.environment) {
        (Some(directory), environment) => {
            let environment = match environment {
                Some(environment) => environment,
                None => Environment::load()?,
            };
            load_config_from(directory, environment)?
        }
        (None, Some(environment)) => {
            let directory = std::env::current_dir()?.join("configuration");
            load_config_from(&directory, environment)?
        }
        (None, None) => load_config()?,
    };
    info!(
        config = ?AdapterConfigWithoutSecrets::from(config.clone()),
        "loaded adapter configuration"
    );

    let engine = BigQueryEngine::from_config(&config).await?;
    let router = ConfigRouter::new(config.project_id.clone(), config.routing.clone());
    let adapter = BigQueryAdapter::init(&config, router, engine)?;

    let mut tenant = TenantMeta::new(args.organization, args.tenant);
    if let Some(table) = args.table {
        tenant = tenant.with_table(table);
    }
    let ctx = CallContext::new().attach_tenant(tenant);

    let output = match args.command {
        Command::Find { filter } => {
            let rows = adapter.find(&ctx, parse_filter(&filter)?).await?;
            Value::Array(rows.into_iter().map(Value::Object).collect())
        }
        Command::FindOne { filter } => adapter
            .find_one(&ctx, parse_filter(&filter)?)
            .await?
            .map(Value::Object)
            .unwrap_or(Value::Null),
        Command::Count { filter } => {
            Value::from(adapter.count(&ctx, parse_filter(&filter)?).await?)
        }
        Command::FindById { id } => adapter
            .find_by_id(&ctx, parse_id(&id))
            .await?
            .map(Value::Object)
            .unwrap_or(Value::Null),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    adapter.shutdown().await?;

    Ok(())
}

fn parse_filter(filter: &str) -> anyhow::Result<RawFilter> {
    serde_json::from_str(filter).with_context(|| format!("invalid filter `{filter}`"))
}

fn parse_id(id: &str) -> Value {
    serde_json::from_str(id).unwrap_or_else(|_| Value::String(id.to_owned()))
}
