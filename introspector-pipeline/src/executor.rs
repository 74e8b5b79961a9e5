//! Bounded background-task executor.
//!
//! Fire-and-forget work (archiving payloads, powering nodes off, settling
//! new IPMI credentials, reapply) runs detached from the request that
//! triggered it, but the pipeline still needs a bound on how much of it can
//! run at once — grounded on the original's `futurist.GreenThreadPoolExecutor`
//! sized by `CONF.processing.max_concurrency`, generalized here to a
//! `tokio`-native semaphore-gated spawn.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

pub struct BackgroundExecutor {
    semaphore: Arc<Semaphore>,
}

impl BackgroundExecutor {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity.max(1))) }
    }

    /// Spawns `fut` once a permit is free, bounding the number of these
    /// tasks that run concurrently (not the number queued).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("executor semaphore never closes");
            fut.await;
        });
    }

    /// Permits currently available; mostly useful for tests.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
