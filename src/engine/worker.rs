// src/engine/worker.rs

//! Serial background queue.
//!
//! Jobs run one after another, in submission order. A supervision loop
//! occupies the worker until it is destroyed, so whatever is queued behind
//! it (for example an update submitted after the daemon was stopped) runs
//! only once the previous job has unwound.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug)]
pub struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn the worker loop. Must be called within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = tokio::spawn(async move {
            info!("worker loop started");

            while let Some(job) = rx.recv().await {
                // Own task per job so a panicking job does not take the
                // queue down with it.
                if let Err(e) = tokio::spawn(job).await {
                    warn!(error = %e, "worker job panicked");
                }
            }

            info!("worker loop finished (channel closed)");
        });

        Self { tx, handle }
    }

    /// Queue a job. `false` if the worker has stopped.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(job)).is_ok()
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(self) {
        let Self { tx, handle } = self;
        drop(tx);
        if let Err(e) = handle.await {
            warn!(error = %e, "worker loop ended abnormally");
        }
        debug!("worker drained");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn runs_jobs_in_submission_order() {
        let worker = Worker::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            assert!(worker.submit(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5 * (3 - i))).await;
                seen.lock().unwrap().push(i);
            }));
        }
        worker.shutdown().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn survives_a_panicking_job() {
        let worker = Worker::spawn();
        let ran = Arc::new(Mutex::new(false));

        worker.submit(async {
            panic!("boom");
        });
        let flag = Arc::clone(&ran);
        worker.submit(async move { *flag.lock().unwrap() = true });
        worker.shutdown().await;

        assert!(*ran.lock().unwrap());
    }
}
