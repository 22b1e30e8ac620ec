//! Handles to in-flight orchestration operations

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    StartPreview,
    StopPreview,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::StartPreview => write!(f, "StartPreview"),
            OperationKind::StopPreview => write!(f, "StopPreview"),
        }
    }
}

/// Cloneable handle to a spawned operation.
///
/// Every clone observes the same terminal outcome; waiting never cancels the
/// operation, and dropping every handle leaves it running to completion.
#[derive(Clone)]
pub struct OperationHandle {
    id: u64,
    kind: OperationKind,
    outcome: Shared<BoxFuture<'static, Result<()>>>,
    task: AbortHandle,
}

impl OperationHandle {
    pub(crate) fn spawn<F>(runtime: &Handle, id: u64, kind: OperationKind, work: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = runtime.spawn(work);
        let abort = task.abort_handle();

        let outcome = async move {
            task.await.unwrap_or_else(|e| {
                Err(BridgeError::Cancelled(format!("{} #{} ended abnormally: {}", kind, id, e)))
            })
        }
        .boxed()
        .shared();

        Self {
            id,
            kind,
            outcome,
            task: abort,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Wait for the terminal outcome
    pub async fn wait(&self) -> Result<()> {
        self.outcome.clone().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_clone_sees_the_outcome() {
        let handle = OperationHandle::spawn(&Handle::current(), 1, OperationKind::StopPreview, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(BridgeError::InvalidState("boom".into()))
        });
        let other = handle.clone();

        let expected = Err(BridgeError::InvalidState("boom".into()));
        assert_eq!(handle.wait().await, expected);
        assert_eq!(other.wait().await, expected);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_panicking_operation_reports_cancelled() {
        let blow_up = true;
        let handle = OperationHandle::spawn(&Handle::current(), 7, OperationKind::StartPreview, async move {
            if blow_up {
                panic!("operation blew up");
            }
            Ok(())
        });

        assert!(matches!(handle.wait().await, Err(BridgeError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_dropped_handle_still_completes() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = OperationHandle::spawn(&Handle::current(), 2, OperationKind::StartPreview, async move {
            let _ = tx.send(());
            Ok(())
        });
        drop(handle);

        assert!(rx.await.is_ok());
    }
}
