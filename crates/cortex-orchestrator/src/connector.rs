//! The [`Connector`] trait – the boundary between an LLM command and the
//! outside world (a motor, a speaker, a webhook, a simulator).
//!
//! Connectors are shared as `Arc<dyn Connector>` and may be called
//! concurrently, so any mutable state lives behind interior mutability.
//! Drivers built on a synchronous SDK implement [`SyncConnector`] instead and
//! are wrapped in a [`BlockingConnector`], which runs each call on tokio's
//! blocking pool behind a semaphore.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::{Action, DispatchError};
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::warn;

/// Deadline applied to a connector call when none is configured.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Carries out commands of one or more action types.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Execute one command.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`]; mark it with [`DispatchError::fatal`] to
    /// halt a sequential dispatch.
    async fn connect(&self, action: &Action) -> Result<(), DispatchError>;

    /// Per-call deadline.
    fn timeout(&self) -> Duration {
        DEFAULT_CALL_TIMEOUT
    }

    /// Period of the keep-alive [`Connector::tick`]; `None` disables it.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic keep-alive work (heartbeats, watchdog refresh, …).
    async fn tick(&self) {}

    /// Release resources when the owning mode is deactivated.
    async fn stop(&self) {}
}

/// A connector whose driver blocks the calling thread.
pub trait SyncConnector: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn connect(&self, action: &Action) -> Result<(), DispatchError>;
}

/// Adapts a [`SyncConnector`] to the async [`Connector`] trait.
///
/// At most `max_in_flight` calls of this connector occupy blocking threads at
/// the same time; further calls wait for a permit.
///
/// A blocking call cannot be interrupted.  When the caller's deadline fires
/// the worker thread keeps running and holds its permit until the SDK call
/// returns, so a hung driver shrinks the pool.  Waiting for a permit is
/// logged.
pub struct BlockingConnector<C> {
    inner: Arc<C>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl<C: SyncConnector> BlockingConnector<C> {
    pub fn new(inner: C, max_in_flight: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Permits not held by a running blocking call.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<C: SyncConnector> Connector for BlockingConnector<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self, action: &Action) -> Result<(), DispatchError> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                warn!(
                    connector = %self.inner.name(),
                    action = %action.kind,
                    "all blocking workers busy; waiting for a permit"
                );
                self.permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| DispatchError::new(self.inner.name(), &action.kind, e.to_string()))?
            }
            Err(e @ TryAcquireError::Closed) => {
                return Err(DispatchError::new(self.inner.name(), &action.kind, e.to_string()));
            }
        };
        let inner = Arc::clone(&self.inner);
        let owned = action.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            inner.connect(&owned)
        })
        .await
        .map_err(|e| {
            DispatchError::new(
                self.inner.name(),
                &action.kind,
                format!("blocking worker failed: {e}"),
            )
        })?
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowSdk {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SyncConnector for SlowSdk {
        fn name(&self) -> &str {
            "slow_sdk"
        }

        fn connect(&self, action: &Action) -> Result<(), DispatchError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            if action.value == "bad" {
                Err(DispatchError::new("slow_sdk", &action.kind, "rejected"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn blocking_connector_bounds_parallelism() {
        let connector = Arc::new(BlockingConnector::new(
            SlowSdk {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            2,
        ));
        let calls = (0..6).map(|_| {
            let c = Arc::clone(&connector);
            tokio::spawn(async move { c.connect(&Action::new("move", "ok")).await })
        });
        for handle in futures_util::future::join_all(calls).await {
            handle.unwrap().unwrap();
        }
        assert!(connector.inner.peak.load(Ordering::SeqCst) <= 2);
    }

    struct HungSdk;

    impl SyncConnector for HungSdk {
        fn name(&self) -> &str {
            "hung_sdk"
        }

        fn connect(&self, _action: &Action) -> Result<(), DispatchError> {
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        }
    }

    #[tokio::test]
    async fn timed_out_call_holds_its_permit_until_the_sdk_returns() {
        let connector = BlockingConnector::new(HungSdk, 1);
        let action = Action::new("move", "ok");
        let outer = tokio::time::timeout(Duration::from_millis(20), connector.connect(&action)).await;
        assert!(outer.is_err());
        assert_eq!(connector.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connector.available_permits(), 1);
        connector.connect(&action).await.unwrap();
    }

    #[tokio::test]
    async fn blocking_connector_propagates_errors() {
        let connector = BlockingConnector::new(
            SlowSdk {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            },
            1,
        );
        let err = connector
            .connect(&Action::new("move", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "rejected");
        assert_eq!(connector.timeout(), DEFAULT_CALL_TIMEOUT);
    }
}
