//! Completion handles for asynchronous session operations.
//!
//! A `PendingOperation` is a result cell filled by a background task.
//! Waiting with a timeout only bounds the caller's wait; the operation keeps
//! running and its outcome stays readable from every clone of the handle.

use crate::error::{Result, TranscriberError};
use std::time::Duration;
use tokio::sync::watch;

/// Handle to an in-flight operation such as starting or stopping transcription
///
/// Holding the handle counts as observing the outcome, whether or not it is
/// awaited: a failure is reported through the handle alone. Drop the handle
/// to have a failure reported through the transcriber's `canceled` event
/// instead.
#[derive(Debug, Clone)]
pub struct PendingOperation<T> {
    operation: &'static str,
    rx: watch::Receiver<Option<Result<T>>>,
}

/// Producer side owned by the task running the operation
///
/// Dropping it without completing resolves the handle with the closed error.
#[derive(Debug)]
pub(crate) struct Completion<T> {
    operation: &'static str,
    tx: watch::Sender<Option<Result<T>>>,
}

pub(crate) fn pending<T>(operation: &'static str) -> (Completion<T>, PendingOperation<T>) {
    let (tx, rx) = watch::channel(None);
    (
        Completion { operation, tx },
        PendingOperation { operation, rx },
    )
}

impl<T> Completion<T> {
    /// Resolve the operation; returns false when every handle has been dropped
    pub(crate) fn complete(&self, result: Result<T>) -> bool {
        self.tx.send_replace(Some(result));
        self.tx.receiver_count() > 0
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let unresolved = self.tx.borrow().is_none();
        if unresolved {
            self.tx
                .send_replace(Some(Err(TranscriberError::closed(self.operation))));
        }
    }
}

impl<T: Clone> PendingOperation<T> {
    /// Handle that is already resolved
    pub(crate) fn resolved(operation: &'static str, result: Result<T>) -> Self {
        let (_tx, rx) = watch::channel(Some(result));
        Self { operation, rx }
    }

    /// Name of the operation, for diagnostics
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Outcome if already resolved
    pub fn try_result(&self) -> Option<Result<T>> {
        self.rx.borrow().clone()
    }

    /// Wait until the operation resolves
    pub async fn wait(&mut self) -> Result<T> {
        let operation = self.operation;
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(TranscriberError::closed(operation))),
            Err(_) => Err(TranscriberError::closed(operation)),
        }
    }

    /// Wait at most `timeout`; elapsing does not cancel the operation
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<T> {
        let operation = self.operation;
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| TranscriberError::Timeout {
                operation,
                waited: timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[tokio::test]
    async fn test_wait_returns_completed_value() {
        let (completion, mut handle) = pending::<u32>("test");
        assert!(!handle.is_done());

        tokio::spawn(async move {
            completion.complete(Ok(7));
        });

        assert_eq!(handle.wait().await, Ok(7));
        assert!(handle.is_done());
        assert_eq!(handle.try_result(), Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_timeout_does_not_cancel() {
        let (completion, mut handle) = pending::<()>("slow");

        let err = handle
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriberError::Timeout { operation: "slow", .. }));

        assert!(completion.complete(Ok(())), "handle is still observing");
        assert_eq!(handle.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_completion_resolves_as_closed() {
        let (completion, mut handle) = pending::<()>("start transcribing");
        drop(completion);

        assert_eq!(
            handle.wait().await,
            Err(TranscriberError::InvalidState {
                operation: "start transcribing",
                state: SessionState::Closed,
            })
        );
    }

    #[test]
    fn test_complete_reports_missing_observer() {
        let (completion, handle) = pending::<()>("orphan");
        drop(handle);
        assert!(!completion.complete(Ok(())));
    }
}
