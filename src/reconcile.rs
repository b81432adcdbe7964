//! Keeps a [`Board`] in step with the store.
//!
//! The change subscription only enqueues a "recompute" signal on a
//! single-slot channel; a lone consumer performs the resnapshot. Bursts of
//! notifications collapse into at most one pending recompute, and no two
//! resnapshots from this loop ever run at once.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::board::{Board, BoardError};
use crate::observability::FETCH_FAILURES_TOTAL;

/// Exponential backoff for failed fetches and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Consecutive failures before the view is marked degraded.
    pub degraded_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(30),
            degraded_after: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base, 2x, 4x, ... capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

pub struct Reconciler {
    board: Arc<Board>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(board: Arc<Board>, retry: RetryPolicy) -> Self {
        Self {
            board,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let (tx, rx) = mpsc::channel::<()>(1);
        info!("reconciler started");
        tokio::join!(
            listen(&self.board, self.retry, tx, &self.cancel),
            consume(&self.board, self.retry, rx, &self.cancel),
        );
        info!("reconciler stopped");
    }
}

/// Queue a recompute unless one is already queued.
fn signal(tx: &mpsc::Sender<()>) {
    if tx.try_send(()).is_err() {
        debug!("recompute already queued");
    }
}

async fn listen(
    board: &Board,
    retry: RetryPolicy,
    tx: mpsc::Sender<()>,
    cancel: &CancellationToken,
) {
    let mut failures = 0u32;
    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            r = board.store().subscribe_changes() => r,
        };
        let mut changes = match subscribed {
            Ok(changes) => changes,
            Err(e) => {
                failures += 1;
                metrics::counter!(FETCH_FAILURES_TOTAL).increment(1);
                warn!(failures, error = %e, "change subscription failed");
                if failures >= retry.degraded_after {
                    board.mark_degraded(failures, e.to_string());
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(retry.delay(failures - 1)) => {}
                }
                continue;
            }
        };

        failures = 0;
        // Anything that changed while unsubscribed was missed.
        signal(&tx);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = changes.next() => next,
            };
            match next {
                Some(event) => {
                    debug!(?event, "change notification");
                    signal(&tx);
                }
                None => {
                    warn!("change stream ended; resubscribing");
                    break;
                }
            }
        }
    }
}

async fn consume(
    board: &Board,
    retry: RetryPolicy,
    mut rx: mpsc::Receiver<()>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            signal = rx.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }
        resnapshot_with_retry(board, retry, cancel).await;
    }
}

/// Resnapshot until it sticks, backing off between failures. Returns
/// `false` if cancelled or the failure is not transient; the latter marks
/// the view degraded straight away.
pub async fn resnapshot_with_retry(
    board: &Board,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> bool {
    let mut failures = 0u32;
    loop {
        match board.resnapshot().await {
            Ok(_) => return true,
            // A newer fetch already won.
            Err(BoardError::StaleSnapshot { .. }) => return true,
            Err(e) if e.is_transient() => {
                failures += 1;
                warn!(failures, error = %e, "resnapshot failed");
                if failures >= retry.degraded_after {
                    board.mark_degraded(failures, e.to_string());
                }
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(retry.delay(failures - 1)) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "resnapshot failed; waiting for next change");
                board.mark_degraded(failures + 1, e.to_string());
                return false;
            }
        }
    }
}
