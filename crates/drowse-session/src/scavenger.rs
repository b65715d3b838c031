//! Background task that periodically sweeps sessions.

use std::sync::Weak;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records inspected.
    pub checked: usize,
    /// Records expired.
    pub expired: usize,
    /// Records idled to the store.
    pub idled: usize,
    /// Stored sessions adopted into the table.
    pub adopted: usize,
    /// Per-session failures; each is retried on the next sweep.
    pub failures: usize,
}

impl SweepReport {
    /// Whether the sweep changed anything or hit errors.
    pub fn is_noteworthy(&self) -> bool {
        self.expired > 0 || self.idled > 0 || self.adopted > 0 || self.failures > 0
    }
}

/// Something the scavenger can sweep.
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Time to wait before the next sweep.
    fn period(&self) -> Duration;

    /// Run one sweep.
    fn sweep(&self) -> SweepReport;
}

/// Handle to a running scavenger task.
pub(crate) struct Scavenger {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scavenger {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The task holds only a weak reference to its target and ends when the
    /// target is dropped or the scavenger is stopped.
    pub(crate) fn spawn<T: Sweep>(target: Weak<T>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("scavenger needs a tokio runtime: {e}")))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = runtime.spawn(async move {
            loop {
                let Some(period) = target.upgrade().map(|t| t.period()) else {
                    break;
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                let Some(strong) = target.upgrade() else {
                    break;
                };
                let swept = tokio::task::spawn_blocking(move || strong.sweep()).await;
                match swept {
                    Ok(report) if report.is_noteworthy() => info!(
                        checked = report.checked,
                        expired = report.expired,
                        idled = report.idled,
                        adopted = report.adopted,
                        failures = report.failures,
                        "Scavenger sweep complete"
                    ),
                    Ok(report) => debug!(checked = report.checked, "Scavenger sweep complete"),
                    Err(e) => warn!(error = %e, "Scavenger sweep aborted"),
                }
            }
            debug!("Scavenger stopped");
        });

        Ok(Self { cancel, handle })
    }

    /// Stop scheduling sweeps and wait for any sweep in flight.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Scavenger task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        sweeps: AtomicUsize,
    }

    impl Sweep for Counter {
        fn period(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn sweep(&self) -> SweepReport {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            SweepReport::default()
        }
    }

    #[tokio::test]
    async fn test_sweeps_until_shutdown() {
        let target = Arc::new(Counter {
            sweeps: AtomicUsize::new(0),
        });
        let scavenger = Scavenger::spawn(Arc::downgrade(&target)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scavenger.shutdown().await;

        let after_stop = target.sweeps.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several sweeps, got {after_stop}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.sweeps.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_ends_when_target_dropped() {
        let target = Arc::new(Counter {
            sweeps: AtomicUsize::new(0),
        });
        let scavenger = Scavenger::spawn(Arc::downgrade(&target)).unwrap();
        drop(target);

        tokio::time::timeout(Duration::from_secs(1), scavenger.handle)
            .await
            .expect("scavenger should exit once its target is gone")
            .unwrap();
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let target = Arc::new(Counter {
            sweeps: AtomicUsize::new(0),
        });
        let result = Scavenger::spawn(Arc::downgrade(&target));
        assert!(matches!(result, Err(Error::Runtime(_))));
    }
}
