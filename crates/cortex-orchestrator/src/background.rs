//! Long-running background components and their orchestrator.
//!
//! A [`Background`] performs one unit of work per [`Background::run`]; the
//! [`BackgroundOrchestrator`] calls it in a loop on its own task until the
//! mode is deactivated.  Errors are logged and the loop keeps going.  An
//! iteration still running at cancellation is dropped at its next await.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_types::CortexError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[async_trait]
pub trait Background: Send + Sync {
    fn name(&self) -> &str;

    /// One iteration of work.
    async fn run(&self) -> Result<(), CortexError>;

    /// Pause between iterations.
    fn interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn stop(&self) {}
}

/// Runs every background of a mode on its own task.
pub struct BackgroundOrchestrator {
    backgrounds: Vec<Arc<dyn Background>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundOrchestrator {
    /// `parent` cancellation also stops every loop.
    pub fn new(backgrounds: Vec<Arc<dyn Background>>, parent: &CancellationToken) -> Self {
        Self {
            backgrounds,
            cancel: parent.child_token(),
            handles: Vec::new(),
        }
    }

    /// Spawn one loop per background.  Duplicate names are started once.
    pub fn start(&mut self) {
        let mut started: Vec<String> = Vec::new();
        for background in &self.backgrounds {
            let name = background.name().to_string();
            if started.contains(&name) {
                warn!(background = %name, "background already started, skipping");
                continue;
            }
            started.push(name);
            let background = Arc::clone(background);
            let token = self.cancel.clone();
            self.handles.push(tokio::spawn(async move {
                loop {
                    let result = tokio::select! {
                        _ = token.cancelled() => break,
                        result = background.run() => result,
                    };
                    if let Err(e) = result {
                        warn!(background = %background.name(), error = %e, "background iteration failed");
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(background.interval()) => {}
                    }
                }
                debug!(background = %background.name(), "background loop exited");
            }));
        }
    }

    /// Cancel all loops, wait for them and call each background's `stop`.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "background task panicked");
            }
        }
        for background in &self.backgrounds {
            background.stop().await;
        }
    }

    pub fn len(&self) -> usize {
        self.backgrounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backgrounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Counter {
        runs: AtomicU32,
        stopped: AtomicBool,
        fail: bool,
    }

    #[async_trait]
    impl Background for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        async fn run(&self) -> Result<(), CortexError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CortexError::Inference("flaky".into()));
            }
            Ok(())
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }
        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn counter(fail: bool) -> Arc<Counter> {
        Arc::new(Counter {
            runs: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
            fail,
        })
    }

    #[tokio::test]
    async fn loops_until_stopped() {
        let bg = counter(false);
        let root = CancellationToken::new();
        let mut orch = BackgroundOrchestrator::new(vec![bg.clone() as Arc<dyn Background>], &root);
        orch.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.stop().await;
        let runs = bg.runs.load(Ordering::SeqCst);
        assert!(runs >= 2);
        assert!(bg.stopped.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bg.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn failures_do_not_end_the_loop() {
        let bg = counter(true);
        let root = CancellationToken::new();
        let mut orch = BackgroundOrchestrator::new(vec![bg.clone() as Arc<dyn Background>], &root);
        orch.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        root.cancel();
        orch.stop().await;
        assert!(bg.runs.load(Ordering::SeqCst) >= 2);
    }

    struct Stuck;

    #[async_trait]
    impl Background for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        async fn run(&self) -> Result<(), CortexError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_iteration() {
        let root = CancellationToken::new();
        let mut orch = BackgroundOrchestrator::new(vec![Arc::new(Stuck) as Arc<dyn Background>], &root);
        orch.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(1), orch.stop())
            .await
            .expect("stop returns while run is pending");
    }

    #[tokio::test]
    async fn duplicate_names_start_once() {
        let bg = counter(false);
        let root = CancellationToken::new();
        let mut orch = BackgroundOrchestrator::new(vec![bg.clone() as Arc<dyn Background>, bg.clone() as Arc<dyn Background>], &root);
        orch.start();
        assert_eq!(orch.handles.len(), 1);
        orch.stop().await;
    }
}
