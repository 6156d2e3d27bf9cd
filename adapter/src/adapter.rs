use config::shared::AdapterConfig;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::bail;
use crate::context::{CallContext, TenantContext, resolve_tenant};
use crate::engine::{QueryEngine, QueryOutput};
use crate::error::{AdapterResult, ErrorKind};
use crate::filter::{RawFilter, normalize, normalize_where};
use crate::router::TenantRouter;
use crate::sql::{SqlBatch, TableRef, builder};
use crate::types::{COUNT_COLUMN, Entity, Row};

/// Per call routing resolved before any SQL is built.
#[derive(Debug)]
struct Call {
    tenant: TenantContext,
    table: TableRef,
    primary_key: String,
}

/// Multi-tenant CRUD adapter over BigQuery.
///
/// The adapter holds no per-call state. Every operation resolves the tenant attached to the
/// [`CallContext`], builds SQL against the tenant's table and runs it as one or more jobs on the
/// engine, in the tenant's region.
///
/// Writes are followed by a read in the same job so that callers receive the rows as stored.
/// Removes read the rows first and delete them in a second job. Rows written by another call
/// between the two jobs can be deleted without appearing in the returned pre-image.
#[derive(Debug)]
pub struct BigQueryAdapter<E, R> {
    engine: E,
    router: R,
    project_id: String,
    query_denylist: Vec<String>,
    show_logs: bool,
}

impl<E, R> BigQueryAdapter<E, R>
where
    E: QueryEngine,
    R: TenantRouter,
{
    /// Validates `config` and creates an adapter running jobs on `engine`.
    pub fn init(config: &AdapterConfig, router: R, engine: E) -> AdapterResult<Self> {
        config.validate()?;

        info!(
            project_id = %config.project_id,
            engine = E::name(),
            denylisted_keys = config.query_denylist.len(),
            "bigquery adapter initialized"
        );

        Ok(Self {
            engine,
            router,
            project_id: config.project_id.clone(),
            query_denylist: config.query_denylist.clone(),
            show_logs: config.show_logs,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// Returns the rows matching `filter`.
    pub async fn find(&self, ctx: &CallContext, filter: RawFilter) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let descriptor = normalize(filter, &call.primary_key, &self.query_denylist);
        let sql = builder::select(&call.table, &descriptor, &call.primary_key)?;

        let output = self.submit(ctx, &call, "find", SqlBatch::new(sql)).await?;

        Ok(output.rows)
    }

    /// Returns the first row matching `filter`. Finding nothing is not an error.
    pub async fn find_one(&self, ctx: &CallContext, filter: RawFilter) -> AdapterResult<Option<Row>> {
        let call = self.prepare(ctx).await?;
        let mut descriptor = normalize(filter, &call.primary_key, &self.query_denylist);
        descriptor.limit = Some(1);
        let sql = builder::select(&call.table, &descriptor, &call.primary_key)?;

        let output = self.submit(ctx, &call, "find_one", SqlBatch::new(sql)).await?;

        Ok(output.rows.into_iter().next())
    }

    pub async fn find_by_id(&self, ctx: &CallContext, id: Value) -> AdapterResult<Option<Row>> {
        let call = self.prepare(ctx).await?;
        let sql = builder::select_where(&call.table, &primary_key_constraint(&call, id))?;

        let output = self.submit(ctx, &call, "find_by_id", SqlBatch::new(sql)).await?;

        Ok(output.rows.into_iter().next())
    }

    /// Returns the rows whose primary key is one of `ids`, in no particular order.
    pub async fn find_by_ids(&self, ctx: &CallContext, ids: Vec<Value>) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let constraint = primary_key_constraint(&call, Value::Array(ids));
        let sql = builder::select_where(&call.table, &constraint)?;

        let output = self.submit(ctx, &call, "find_by_ids", SqlBatch::new(sql)).await?;

        Ok(output.rows)
    }

    /// Counts the rows matching `filter`. Sort, limit and offset are ignored.
    pub async fn count(&self, ctx: &CallContext, filter: RawFilter) -> AdapterResult<u64> {
        let call = self.prepare(ctx).await?;
        let mut descriptor = normalize(filter, &call.primary_key, &self.query_denylist);
        descriptor.count_only = true;
        let sql = builder::select(&call.table, &descriptor, &call.primary_key)?;

        let output = self.submit(ctx, &call, "count", SqlBatch::new(sql)).await?;

        read_count(&output.rows)
    }

    /// Inserts `entity` and returns it as stored.
    pub async fn insert(&self, ctx: &CallContext, entity: Entity) -> AdapterResult<Option<Row>> {
        let rows = self.insert_many(ctx, vec![entity]).await?;

        Ok(rows.into_iter().next())
    }

    /// Inserts `entities` in one job and returns them as stored.
    ///
    /// Every entity must carry a value for the primary key column.
    pub async fn insert_many(
        &self,
        ctx: &CallContext,
        entities: Vec<Entity>,
    ) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        if entities.is_empty() {
            debug!(table = %call.table, "insert_many called without entities");
            return Ok(Vec::new());
        }

        let batch = builder::insert(&call.table, &call.primary_key, &entities)?;

        let output = self.submit(ctx, &call, "insert_many", batch).await?;

        Ok(output.rows)
    }

    /// Applies `changes` to every row matching `query` and returns the matching rows after the
    /// update.
    pub async fn update_many(
        &self,
        ctx: &CallContext,
        query: Map<String, Value>,
        changes: Entity,
    ) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let constraints = self.mutation_constraints(query, &call)?;
        let batch = builder::update(&call.table, &constraints, &changes)?;

        let output = self.submit(ctx, &call, "update_many", batch).await?;

        Ok(output.rows)
    }

    pub async fn update_by_id(
        &self,
        ctx: &CallContext,
        id: Value,
        changes: Entity,
    ) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let batch = builder::update(&call.table, &primary_key_constraint(&call, id), &changes)?;

        let output = self.submit(ctx, &call, "update_by_id", batch).await?;

        Ok(output.rows)
    }

    /// Deletes every row matching `query` and returns the rows read right before the delete.
    pub async fn remove_many(
        &self,
        ctx: &CallContext,
        query: Map<String, Value>,
    ) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let constraints = self.mutation_constraints(query, &call)?;

        self.remove(ctx, &call, "remove_many", &constraints).await
    }

    pub async fn remove_by_id(&self, ctx: &CallContext, id: Value) -> AdapterResult<Vec<Row>> {
        let call = self.prepare(ctx).await?;
        let constraints = primary_key_constraint(&call, id);

        self.remove(ctx, &call, "remove_by_id", &constraints).await
    }

    /// Shuts the adapter down. Jobs still running on BigQuery are left alone.
    pub async fn shutdown(&self) -> AdapterResult<()> {
        info!(project_id = %self.project_id, engine = E::name(), "shutting down bigquery adapter");

        self.engine.shutdown().await
    }

    async fn remove(
        &self,
        ctx: &CallContext,
        call: &Call,
        operation: &'static str,
        constraints: &Map<String, Value>,
    ) -> AdapterResult<Vec<Row>> {
        let pre_image = builder::select_where(&call.table, constraints)?;
        let delete = builder::delete(&call.table, constraints)?;

        let removed = self.submit(ctx, call, operation, SqlBatch::new(pre_image)).await?;
        self.submit(ctx, call, operation, SqlBatch::new(delete)).await?;

        Ok(removed.rows)
    }

    /// Normalizes the query of a bulk write. A non-empty query left empty by the denylist is
    /// rejected instead of matching the whole table.
    fn mutation_constraints(
        &self,
        query: Map<String, Value>,
        call: &Call,
    ) -> AdapterResult<Map<String, Value>> {
        let requested: Vec<String> = query.keys().cloned().collect();
        let constraints = normalize_where(query, &call.primary_key, &self.query_denylist);

        if !requested.is_empty() && constraints.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "Query only references denylisted columns",
                format!("table {} was queried by {}", call.table, requested.join(", "))
            );
        }

        Ok(constraints)
    }

    async fn prepare(&self, ctx: &CallContext) -> AdapterResult<Call> {
        let tenant = resolve_tenant(&self.router, ctx).await?;
        let table = TableRef::new(&tenant.table_name)?;
        let primary_key = self.router.id_key(ctx).await?;

        Ok(Call {
            tenant,
            table,
            primary_key,
        })
    }

    async fn submit(
        &self,
        ctx: &CallContext,
        call: &Call,
        operation: &'static str,
        batch: SqlBatch,
    ) -> AdapterResult<QueryOutput> {
        let batch = batch.in_region(call.tenant.region.clone());
        let region = batch.region();
        let sql = self.router.wrap_query(batch.body(), region);

        let result = self.engine.execute(&sql, region, ctx.cancellation()).await;

        match &result {
            Ok(output) if self.show_logs => info!(
                operation,
                tenant = %call.tenant.tenant_key,
                table = %call.table,
                region,
                job_id = output.job_id.as_deref(),
                rows = output.rows.len(),
                sql = %sql,
                "bigquery job finished"
            ),
            Ok(output) => debug!(
                operation,
                tenant = %call.tenant.tenant_key,
                table = %call.table,
                region,
                job_id = output.job_id.as_deref(),
                rows = output.rows.len(),
                sql = %sql,
                "bigquery job finished"
            ),
            Err(err) if self.show_logs => warn!(
                operation,
                tenant = %call.tenant.tenant_key,
                table = %call.table,
                region,
                job_id = err.job_id(),
                error = %err,
                sql = %sql,
                "bigquery job failed"
            ),
            Err(err) => warn!(
                operation,
                tenant = %call.tenant.tenant_key,
                table = %call.table,
                region,
                job_id = err.job_id(),
                error = %err,
                "bigquery job failed"
            ),
        }

        result
    }
}

fn primary_key_constraint(call: &Call, id: Value) -> Map<String, Value> {
    let mut constraint = Map::new();
    constraint.insert(call.primary_key.clone(), id);
    constraint
}

/// Reads the scalar of a count query. BigQuery may return int64 values as strings.
fn read_count(rows: &[Row]) -> AdapterResult<u64> {
    let Some(row) = rows.first() else {
        return Ok(0);
    };

    let count = match row.get(COUNT_COLUMN) {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    };

    match count {
        Some(count) => Ok(count),
        None => bail!(
            ErrorKind::DeserializationError,
            "Count result is not a number",
            format!("column `{COUNT_COLUMN}` held {:?}", row.get(COUNT_COLUMN))
        ),
    }
}
