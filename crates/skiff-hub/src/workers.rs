use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::Semaphore;

/// Bounded front for blocking calls. The permit travels with the closure, so a
/// probe that outlives its timeout keeps its slot until it actually returns.
#[derive(Clone)]
pub struct Workers {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Workers {
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self { permits: Arc::new(Semaphore::new(size.max(1))), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_for(what, self.timeout, f).await
    }

    pub async fn run_for<T, F>(&self, what: &'static str, limit: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let work = async {
            let permit = self.permits.clone().acquire_owned().await.context("worker pool closed")?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await
            .map_err(|e| anyhow!("{} worker panicked: {}", what, e))?
        };
        match tokio::time::timeout(limit, work).await {
            Ok(r) => r.with_context(|| what),
            Err(_) => bail!("{} timed out after {:?}", what, limit),
        }
    }
}
