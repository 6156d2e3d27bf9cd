//! Per-call tenant context.
//!
//! Every adapter operation receives a [`CallContext`]. The embedding service attaches the caller's
//! [`TenantMeta`] with [`CallContext::attach_tenant`] before invoking the adapter, and may attach a
//! cancellation signal so that an abandoned call also cancels its BigQuery job.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::bail;
use crate::error::{AdapterResult, ErrorKind};
use crate::router::TenantRouter;

/// Transmitter side of a call cancellation signal.
pub type CancelTx = watch::Sender<()>;

/// Receiver side of a call cancellation signal.
pub type CancelRx = watch::Receiver<()>;

/// Creates a cancellation signal pair.
///
/// Sending on the [`CancelTx`] cancels every call holding a receiver. Dropping the transmitter
/// without sending does not cancel anything.
pub fn create_cancellation() -> (CancelTx, CancelRx) {
    watch::channel(())
}

/// Tenant metadata attached to a call by the embedding service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMeta {
    pub organization_id: String,
    #[serde(alias = "impactId")]
    pub tenant_key: String,
    /// Logical table override. The router decides what happens when it is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl TenantMeta {
    pub fn new(organization_id: impl Into<String>, tenant_key: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            tenant_key: tenant_key.into(),
            table: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// Out-of-band values accompanying one adapter call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    tenant: Option<TenantMeta>,
    cancel: Option<CancelRx>,
}

impl CallContext {
    /// Creates a context with no tenant attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the tenant the call acts on behalf of.
    pub fn attach_tenant(mut self, tenant: TenantMeta) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Attaches a cancellation signal observed while jobs of this call are running.
    pub fn with_cancellation(mut self, cancel: CancelRx) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn tenant(&self) -> Option<&TenantMeta> {
        self.tenant.as_ref()
    }

    /// Returns the attached tenant or fails with [`ErrorKind::MissingContext`].
    pub fn require_tenant(&self) -> AdapterResult<&TenantMeta> {
        match self.tenant.as_ref() {
            Some(tenant) => Ok(tenant),
            None => bail!(
                ErrorKind::MissingContext,
                "Tenant context missing",
                "no tenant metadata was attached to the call"
            ),
        }
    }

    /// Returns a fresh receiver for the call's cancellation signal, if any.
    pub fn cancellation(&self) -> Option<CancelRx> {
        self.cancel.clone()
    }
}

/// Tenant routing resolved for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub organization_id: String,
    pub tenant_key: String,
    /// Fully-qualified table name, never empty.
    pub table_name: String,
    /// Execution location, `None` lets BigQuery choose.
    pub region: Option<String>,
}

/// Resolves the tenant attached to `ctx` into a table name and region.
///
/// Fails with [`ErrorKind::MissingContext`] when no tenant is attached and with
/// [`ErrorKind::InvalidTableName`] when the router produces an empty table name.
pub async fn resolve_tenant<R>(router: &R, ctx: &CallContext) -> AdapterResult<TenantContext>
where
    R: TenantRouter,
{
    let tenant = ctx.require_tenant()?;

    let table_name = router.table_name(tenant)?;
    if table_name.trim().is_empty() {
        bail!(
            ErrorKind::InvalidTableName,
            "Resolved table name is empty",
            format!("tenant `{}` resolved to an empty table", tenant.tenant_key)
        );
    }

    let region = router.region(ctx).await?;

    Ok(TenantContext {
        organization_id: tenant.organization_id.clone(),
        tenant_key: tenant.tenant_key.clone(),
        table_name,
        region,
    })
}
