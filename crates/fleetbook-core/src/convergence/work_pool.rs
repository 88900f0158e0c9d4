// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Runs submitted jobs with at most `size` in flight and collects their outputs.
pub(crate) struct WorkPool<T> {
    permits: Arc<Semaphore>,
    jobs: JoinSet<T>,
}

impl<T: Send + 'static> WorkPool<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            jobs: JoinSet::new(),
        }
    }

    pub(crate) fn submit<F>(&mut self, job: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.jobs.spawn(async move {
            // the semaphore is never closed, so acquiring only waits
            let _permit = permits.acquire_owned().await;
            job.await
        });
    }

    /// Wait for every submitted job. Jobs that panicked are logged and dropped.
    pub(crate) async fn drain(mut self) -> Vec<T> {
        let mut outputs = Vec::with_capacity(self.jobs.len());
        while let Some(joined) = self.jobs.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(e) => error!(error = %e, "convergence job failed to complete"),
            }
        }
        outputs
    }
}
