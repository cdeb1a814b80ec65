//! Worker lanes.
//!
//! One lane is reserved for resolution so install-style resolvers never
//! compete with transforms for a slot; the remaining lanes run transforms
//! and generation, first idle lane first, otherwise queued in FIFO order.
//!
//! Every unit of work is spawned onto the runtime. A panic, a cancelled task
//! or an expired timeout surfaces as `WORKER_CRASHED` instead of tearing
//! down the build.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{PundleError, Result};

/// Default number of work lanes: CPU count capped at 8.
pub fn default_lanes() -> usize {
    num_cpus::get().clamp(1, 8)
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    resolve_lane: Arc<Semaphore>,
    work_lanes: Arc<Semaphore>,
    lanes: usize,
    timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(lanes: usize) -> Self {
        let lanes = lanes.max(1);
        Self {
            resolve_lane: Arc::new(Semaphore::new(1)),
            work_lanes: Arc::new(Semaphore::new(lanes)),
            lanes,
            timeout: None,
        }
    }

    /// Per-operation timeout, measured from the moment a lane is acquired.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run on the dedicated resolution lane.
    pub async fn run_resolve<F, T>(&self, label: impl Display + Send, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        run_on(&self.resolve_lane, self.timeout, label, work).await
    }

    /// Run on the first idle work lane.
    pub async fn run_work<F, T>(&self, label: impl Display + Send, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        run_on(&self.work_lanes, self.timeout, label, work).await
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(default_lanes())
    }
}

async fn run_on<F, T>(
    lane: &Arc<Semaphore>,
    timeout: Option<Duration>,
    label: impl Display + Send,
    work: F,
) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let permit = lane
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| PundleError::worker_crashed(format!("worker pool closed while {label}")))?;

    let handle = tokio::spawn(async move {
        let _permit = permit;
        work.await
    });
    let abort = handle.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(PundleError::worker_crashed(format!(
                    "timed out after {}ms while {label}",
                    limit.as_millis()
                )));
            }
        },
        None => handle.await,
    };

    joined.map_err(|err| {
        if err.is_panic() {
            PundleError::worker_crashed(format!("worker panicked while {label}"))
        } else {
            PundleError::worker_crashed(format!("worker cancelled while {label}"))
        }
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_work() {
        let pool = WorkerPool::new(2);
        let value = pool.run_work("adding", async { Ok::<_, PundleError>(1 + 1) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run_work("failing", async {
                Err::<(), _>(PundleError::transform_failed("nope"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransformFailed);
    }

    #[tokio::test]
    async fn test_panic_is_worker_crash() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run_work("transforming /root/a.js", async {
                if true {
                    panic!("transformer exploded");
                }
                Ok::<_, PundleError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkerCrashed);
        assert!(err.message.contains("/root/a.js"));

        // the lane is free again
        assert!(pool.run_work("after", async { Ok::<_, PundleError>(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_worker_crash() {
        let pool = WorkerPool::new(1).with_timeout(Some(Duration::from_millis(20)));
        let err = pool
            .run_work("hanging", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, PundleError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkerCrashed);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lanes_bound_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|i| {
            let running = running.clone();
            let peak = peak.clone();
            let pool = pool.clone();
            async move {
                pool.run_work(format!("task {i}"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, PundleError>(())
                })
                .await
            }
        });
        futures::future::try_join_all(tasks).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_resolve_lane_is_separate() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        // occupy the only work lane until resolution finishes
        let blocked = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.run_work("waiting", async move {
                    rx.await.ok();
                    Ok::<_, PundleError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        pool.run_resolve("resolving", async { Ok::<_, PundleError>(()) }).await.unwrap();
        tx.send(()).unwrap();
        blocked.await.unwrap().unwrap();
    }
}
