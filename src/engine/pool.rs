use super::Aggregator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Worker count and optional per-task pacing for one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    /// Delay each worker waits before handling a task.
    pub delay: Option<Duration>,
}

impl PoolConfig {
    /// Clamp a configured worker count; non-positive or missing values fall back to `default_workers`.
    pub fn new(configured: Option<i64>, default_workers: usize) -> Self {
        let workers = match configured {
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(default_workers),
            _ => default_workers,
        };
        Self {
            workers: workers.max(1),
            delay: None,
        }
    }

    /// Pace workers from a maximum operations-per-second value. Zero or unset means unlimited.
    pub fn with_rate_limit(mut self, ops_per_sec: Option<i64>) -> Self {
        self.delay = match ops_per_sec {
            Some(n) if n > 0 => Some(Duration::from_secs_f64(1.0 / n as f64)),
            _ => None,
        };
        self
    }
}

/// Run `handler` over `tasks` with at most `cfg.workers` handlers in flight.
///
/// Every item a handler returns goes through the aggregator, so the result is
/// de-duplicated and sorted. Returns when all tasks are consumed or when
/// `cancel` fires, whichever comes first; in the latter case the result is
/// whatever had been aggregated so far. A handler that panics only loses its
/// own items.
pub async fn run_pool<T, R, F, Fut>(
    tasks: Vec<T>,
    cfg: PoolConfig,
    cancel: &CancellationToken,
    handler: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Ord + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<R>> + Send + 'static,
{
    if tasks.is_empty() {
        return Vec::new();
    }

    let workers = cfg.workers.clamp(1, tasks.len());
    let total = tasks.len();
    let (task_tx, task_rx) = mpsc::channel::<T>(workers);
    let (result_tx, result_rx) = mpsc::channel::<R>(workers * 4);
    let task_rx = Arc::new(Mutex::new(task_rx));
    let handler = Arc::new(handler);
    let mut set = JoinSet::new();

    // Distributor: stops feeding as soon as cancellation is requested.
    let cancel2 = cancel.clone();
    set.spawn(async move {
        for task in tasks {
            tokio::select! {
                _ = cancel2.cancelled() => break,
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    for _ in 0..workers {
        let task_rx2 = task_rx.clone();
        let result_tx2 = result_tx.clone();
        let handler2 = handler.clone();
        let cancel2 = cancel.clone();
        let delay = cfg.delay;

        set.spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel2.cancelled() => None,
                    task = async { task_rx2.lock().await.recv().await } => task,
                };
                let Some(task) = next else { break };

                if let Some(d) = delay {
                    tokio::select! {
                        _ = cancel2.cancelled() => break,
                        _ = tokio::time::sleep(d) => {}
                    }
                }

                let produced = tokio::select! {
                    _ = cancel2.cancelled() => break,
                    out = handler2(task) => out,
                };

                for item in produced {
                    tokio::select! {
                        _ = cancel2.cancelled() => return,
                        sent = result_tx2.send(item) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
    }
    // Only workers hold senders now, so the stream closes when the last one exits.
    drop(result_tx);

    let collected = Aggregator::new(result_rx).collect(cancel).await;

    if cancel.is_cancelled() {
        set.abort_all();
    }
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                debug!("pool worker panicked: {e}");
            }
        }
    }

    debug!(
        tasks = total,
        workers,
        results = collected.len(),
        cancelled = cancel.is_cancelled(),
        "worker pool finished"
    );
    collected
}
