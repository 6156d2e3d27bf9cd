use std::future::Future;

use crate::context::CancelRx;
use crate::error::AdapterResult;
use crate::types::Row;

/// Rows returned by a finished job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Identifier of the job that produced the rows, when the engine assigns one.
    pub job_id: Option<String>,
    /// Rows of the last statement in the submission, fully materialized.
    pub rows: Vec<Row>,
}

/// Capability to run SQL as a warehouse job.
///
/// [`QueryEngine::execute`] submits one job, waits until it finishes and returns every result
/// row. Submission failures are reported as [`crate::error::ErrorKind::EngineUnavailable`] when
/// resubmitting may succeed and [`crate::error::ErrorKind::EngineSubmissionRejected`] otherwise.
/// Jobs that start and then fail are reported as
/// [`crate::error::ErrorKind::EngineExecutionFailed`]. Engines never retry on their own.
///
/// When a `cancel` receiver is given and fires while the job runs, the engine asks the warehouse
/// to cancel the job and fails with [`crate::error::ErrorKind::EngineCanceled`].
pub trait QueryEngine: Send + Sync {
    /// Returns the name of the engine.
    fn name() -> &'static str;

    /// Runs `sql` under `location` and returns the rows of its last statement.
    fn execute(
        &self,
        sql: &str,
        location: Option<&str>,
        cancel: Option<CancelRx>,
    ) -> impl Future<Output = AdapterResult<QueryOutput>> + Send;

    /// Releases engine resources. The default implementation does nothing.
    fn shutdown(&self) -> impl Future<Output = AdapterResult<()>> + Send {
        async { Ok(()) }
    }
}

/// Resolves once `cancel` has been signaled, never when it is absent or its sender is dropped.
pub(crate) async fn cancellation_requested(cancel: &mut Option<CancelRx>) {
    match cancel {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Returns `true` if `cancel` was signaled before the call started.
pub(crate) fn already_canceled(cancel: &Option<CancelRx>) -> bool {
    cancel
        .as_ref()
        .is_some_and(|rx| rx.has_changed().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::create_cancellation;

    #[tokio::test]
    async fn test_cancellation_requested_resolves_after_send() {
        let (tx, rx) = create_cancellation();
        let mut cancel = Some(rx);

        assert!(!already_canceled(&cancel));
        tx.send(()).unwrap();
        assert!(already_canceled(&cancel));

        tokio::time::timeout(Duration::from_secs(1), cancellation_requested(&mut cancel))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = create_cancellation();
        let mut cancel = Some(rx);
        drop(tx);

        let waited =
            tokio::time::timeout(Duration::from_millis(20), cancellation_requested(&mut cancel))
                .await;

        assert!(waited.is_err());
    }
}
