//! Windowed execution of per-item operations.
//!
//! Items are processed in consecutive windows of `batch_size`. All items in a
//! window run concurrently; the next window starts only after every item of the
//! previous one has settled. Cancellation is checked between windows, so an
//! in-flight window always completes.

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Number of item failures shown when a result is displayed.
const MAX_DISPLAYED_FAILURES: usize = 5;

/// Progress of a running bulk operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperationState {
    pub total: usize,
    /// Items whose outcome is known. Never decreases.
    pub processed: usize,
    pub status: String,
    pub cancelled: bool,
}

/// One item that failed, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub message: String,
}

/// Aggregate outcome of a bulk operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub processed: usize,
    pub cancelled: bool,
    pub errors: Vec<ItemFailure>,
}

impl BatchResult {
    /// True when every scheduled item succeeded and nothing was skipped.
    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0 && !self.cancelled
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.success_count, self.failure_count
        )?;
        if self.cancelled {
            write!(f, " (cancelled after {} items)", self.processed)?;
        }
        if self.errors.is_empty() {
            return Ok(());
        }
        let shown: Vec<String> = self
            .errors
            .iter()
            .take(MAX_DISPLAYED_FAILURES)
            .map(|e| format!("{}: {}", e.id, e.message))
            .collect();
        write!(f, ": {}", shown.join("; "))?;
        if self.errors.len() > MAX_DISPLAYED_FAILURES {
            write!(
                f,
                " (and {} more)",
                self.errors.len() - MAX_DISPLAYED_FAILURES
            )?;
        }
        Ok(())
    }
}

/// Run `op` over `items` in windows of `batch_size`.
///
/// `on_progress` is called once after each completed window. Item errors are
/// recorded in the result and never abort the run. A `batch_size` of zero is
/// treated as one.
pub async fn run<F, Fut, T, E>(
    items: &[String],
    batch_size: usize,
    op: F,
    mut on_progress: impl FnMut(&BatchOperationState),
    cancel: &CancellationToken,
) -> BatchResult
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let batch_size = batch_size.max(1);
    let mut state = BatchOperationState {
        total: items.len(),
        ..BatchOperationState::default()
    };
    let mut result = BatchResult::default();

    for window in items.chunks(batch_size) {
        if cancel.is_cancelled() {
            tracing::info!(
                processed = state.processed,
                total = state.total,
                "Bulk operation cancelled"
            );
            result.cancelled = true;
            break;
        }

        let outcomes = join_all(window.iter().map(|id| op(id.clone()))).await;
        for (id, outcome) in window.iter().zip(outcomes) {
            match outcome {
                Ok(_) => {
                    result.success_count += 1;
                    tracing::debug!(id = %id, "Bulk item succeeded");
                }
                Err(e) => {
                    result.failure_count += 1;
                    tracing::warn!(id = %id, error = %e, "Bulk item failed");
                    result.errors.push(ItemFailure {
                        id: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        state.processed += window.len();
        state.status = format!("Processed {} of {}", state.processed, state.total);
        on_progress(&state);
    }

    result.processed = state.processed;
    result
}

type Observer = Box<dyn Fn(&BatchOperationState) + Send + Sync>;

/// Handle for one bulk operation: progress feed plus cancellation.
///
/// Progress is published on a watch channel ([`subscribe`](Self::subscribe))
/// and, if set, to a synchronous observer called at each window boundary.
pub struct BatchOperation {
    token: CancellationToken,
    state: watch::Sender<BatchOperationState>,
    observer: Option<Observer>,
}

impl BatchOperation {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a handle driven by an existing token, e.g. a child of a
    /// process-wide shutdown token.
    pub fn with_token(token: CancellationToken) -> Self {
        let (state, _) = watch::channel(BatchOperationState::default());
        Self {
            token,
            state,
            observer: None,
        }
    }

    /// Call `observer` synchronously after every window.
    pub fn with_observer(
        mut self,
        observer: impl Fn(&BatchOperationState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchOperationState> {
        self.state.subscribe()
    }

    /// Latest published state.
    pub fn state(&self) -> BatchOperationState {
        self.state.borrow().clone()
    }

    /// Stop scheduling new windows. The in-flight window still completes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `op` over `items`, publishing progress through this handle.
    pub async fn execute<F, Fut, T, E>(
        &self,
        label: &str,
        items: &[String],
        batch_size: usize,
        op: F,
    ) -> BatchResult
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.state.send_replace(BatchOperationState {
            total: items.len(),
            processed: 0,
            status: format!("{label}: starting"),
            cancelled: false,
        });

        let result = run(
            items,
            batch_size,
            op,
            |state| {
                self.state.send_replace(BatchOperationState {
                    status: format!("{label}: {}", state.status),
                    ..state.clone()
                });
                if let Some(observer) = &self.observer {
                    observer(state);
                }
            },
            &self.token,
        )
        .await;

        let status = if result.cancelled {
            format!("{label}: cancelled")
        } else {
            format!("{label}: done")
        };
        self.state.send_modify(|state| {
            state.status = status;
            state.cancelled = result.cancelled;
        });

        tracing::info!(
            operation = label,
            total = items.len(),
            processed = result.processed,
            succeeded = result.success_count,
            failed = result.failure_count,
            cancelled = result.cancelled,
            "Bulk operation finished"
        );
        result
    }
}

impl Default for BatchOperation {
    fn default() -> Self {
        Self::new()
    }
}
