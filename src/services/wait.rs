//! 可取消的条件等待
//!
//! Waits on processes and services go through [`wait_until`]. The delete
//! retry of the copy phase runs its own loop around blocking attempts.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    Cancelled,
    TimedOut,
}

/// Poll `predicate` every `interval` until it holds, `cancel` fires, or
/// `timeout` (if any) elapses. The predicate is checked once before the first
/// sleep, so an already-true condition never waits.
pub async fn wait_until<F>(
    mut predicate: F,
    interval: Duration,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        if predicate() {
            return WaitOutcome::Satisfied;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return WaitOutcome::TimedOut;
        }

        tokio::select! {
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
