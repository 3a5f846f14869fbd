//! Request-scoped deadline and cancellation.
//!
//! A `CancelScope` owns the only cancellation source of a request: the
//! deadline timer and the "caller went away" signal both funnel into one
//! `CancellationToken`, and only the first trigger wins. The timer task is
//! aborted whenever the scope is dropped, whatever the exit path.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Absolute point in time after which upstream work is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self::from_start(Instant::now(), budget)
    }

    pub fn from_start(start: Instant, budget: Duration) -> Self {
        Self { at: start + budget }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn earliest(self, other: Deadline) -> Deadline {
        self.min(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Deadline,
    ClientGone,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::ClientGone => "client_gone",
        }
    }
}

#[derive(Debug)]
pub struct CancelScope {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    deadline: Deadline,
    timer: Option<JoinHandle<()>>,
    finished: bool,
}

impl CancelScope {
    /// Arm a scope whose timer cancels the token at `deadline`.
    /// Must be called inside a tokio runtime.
    pub fn start(deadline: Deadline) -> Self {
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());
        let timer = tokio::spawn({
            let token = token.clone();
            let reason = reason.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline.instant()) => {
                        if trigger(&token, &reason, CancelReason::Deadline) {
                            tracing::debug!("upstream deadline reached, aborting");
                        }
                    }
                    _ = token.cancelled() => {}
                }
            }
        });
        Self {
            token,
            reason,
            deadline,
            timer: Some(timer),
            finished: false,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Returns true only for the trigger that actually cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        trigger(&self.token, &self.reason, reason)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Mark a normal exit and release the timer now.
    pub fn finish(&mut self) {
        self.finished = true;
        self.release_timer();
    }

    fn release_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if !self.finished && self.cancel(CancelReason::ClientGone) {
            tracing::debug!("request dropped before completion, aborting upstream");
        }
        self.release_timer();
    }
}

fn trigger(token: &CancellationToken, slot: &OnceLock<CancelReason>, reason: CancelReason) -> bool {
    if slot.set(reason).is_ok() {
        token.cancel();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_the_token() {
        let scope = CancelScope::start(Deadline::after(Duration::from_millis(100)));
        assert!(!scope.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), scope.token().cancelled())
            .await
            .expect("timer should cancel the token");
        assert_eq!(scope.reason(), Some(CancelReason::Deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down_and_saturates() {
        let d = Deadline::after(Duration::from_secs(5));
        assert_eq!(d.remaining(), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(d.remaining(), Duration::from_secs(3));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(d.remaining(), Duration::ZERO);
        assert!(d.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_triggers_cancel_once() {
        let scope = CancelScope::start(Deadline::after(Duration::from_millis(10)));
        let first = scope.cancel(CancelReason::ClientGone);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = scope.cancel(CancelReason::Deadline);
        let third = scope.cancel(CancelReason::ClientGone);
        assert!(first);
        assert!(!second);
        assert!(!third);
        assert_eq!(scope.reason(), Some(CancelReason::ClientGone));
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_scope_does_not_cancel_on_drop() {
        let mut scope = CancelScope::start(Deadline::after(Duration::from_secs(5)));
        let token = scope.token().clone();
        scope.finish();
        drop(scope);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_scope_cancels_as_client_gone() {
        let scope = CancelScope::start(Deadline::after(Duration::from_secs(5)));
        let token = scope.token().clone();
        let reason = scope.reason.clone();
        drop(scope);
        assert!(token.is_cancelled());
        assert_eq!(reason.get().copied(), Some(CancelReason::ClientGone));
    }

    #[tokio::test(start_paused = true)]
    async fn drop_after_deadline_keeps_first_reason() {
        let scope = CancelScope::start(Deadline::after(Duration::from_millis(5)));
        let reason = scope.reason.clone();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(scope);
        assert_eq!(reason.get().copied(), Some(CancelReason::Deadline));
    }

    #[test]
    fn earliest_picks_the_sooner_deadline() {
        let start = Instant::now();
        let a = Deadline::from_start(start, Duration::from_secs(1));
        let b = Deadline::from_start(start, Duration::from_secs(2));
        assert_eq!(a.earliest(b), a);
        assert_eq!(b.earliest(a), a);
    }
}
