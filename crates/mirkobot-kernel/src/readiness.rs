//! Await-based startup gate.
//!
//! The kernel re-checks readiness whenever a module pokes its
//! [`ReadinessSignal`] or when the poll interval elapses, whichever comes
//! first. Between checks it is parked on the runtime, never spinning.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kernel::StartupError;

#[derive(Debug, Default)]
pub struct ReadinessGate {
    notify: Arc<Notify>,
    /// Aborts the wait in progress only; replaced after every cancel.
    cancel: Mutex<CancellationToken>,
    /// Closes the gate for good.
    shutdown: CancellationToken,
}

/// Handle given to modules to wake the gate after a state change.
#[derive(Debug, Clone)]
pub struct ReadinessSignal {
    notify: Arc<Notify>,
}

impl ReadinessSignal {
    pub fn notify(&self) {
        // notify_one keeps a permit when nobody waits yet, so a change between
        // the check and the park is not lost.
        self.notify.notify_one();
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> ReadinessSignal {
        ReadinessSignal {
            notify: Arc::clone(&self.notify),
        }
    }

    /// Abort the wait in progress. Later waits are unaffected.
    pub fn cancel(&self) {
        let current = std::mem::take(&mut *self.cancel.lock());
        current.cancel();
    }

    /// Abort the current wait and every future one.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until `ready()` holds.
    pub async fn wait_until<F>(
        &self,
        mut ready: F,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), StartupError>
    where
        F: FnMut() -> bool,
    {
        let cancel = self.cancel.lock().clone();
        let deadline = timeout.map(|t| Instant::now() + t);
        let expired = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut checks = 0u64;
        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                return Err(StartupError::Cancelled);
            }
            checks += 1;
            if ready() {
                debug!(checks, "readiness gate open");
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StartupError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(StartupError::Cancelled),
                _ = &mut expired => {
                    return Err(StartupError::ReadinessTimeout(timeout.unwrap_or_default()));
                }
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn opens_immediately_when_ready() {
        let gate = ReadinessGate::new();
        gate.wait_until(|| true, Duration::from_secs(1), None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval() {
        let gate = ReadinessGate::new();
        let checks = AtomicUsize::new(0);
        let start = Instant::now();
        gate.wait_until(
            || checks.fetch_add(1, Ordering::SeqCst) >= 3,
            Duration::from_secs(1),
            None,
        )
        .await
        .unwrap();
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn signal_wakes_before_poll_interval() {
        let gate = Arc::new(ReadinessGate::new());
        let flag = Arc::new(AtomicBool::new(false));
        let signal = gate.signal();
        {
            let flag = flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag.store(true, Ordering::SeqCst);
                signal.notify();
            });
        }
        let start = Instant::now();
        gate.wait_until(|| flag.load(Ordering::SeqCst), Duration::from_secs(60), None)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let gate = ReadinessGate::new();
        let err = gate
            .wait_until(|| false, Duration::from_secs(1), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, StartupError::ReadinessTimeout(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_only_the_pending_wait() {
        let gate = Arc::new(ReadinessGate::new());
        {
            let gate = gate.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                gate.cancel();
            });
        }
        let err = gate
            .wait_until(|| false, Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert_eq!(err, StartupError::Cancelled);

        // A fresh wait is not poisoned by the earlier cancel.
        gate.wait_until(|| true, Duration::from_secs(1), None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_every_wait() {
        let gate = ReadinessGate::new();
        gate.shutdown();
        assert!(gate.is_shut_down());
        let err = gate
            .wait_until(|| false, Duration::from_secs(1), None)
            .await
            .unwrap_err();
        assert_eq!(err, StartupError::Cancelled);
    }
}
