use crate::{DeleterSettings, DrainError, SubmitError};
use parking_lot::Mutex;
use snip_core::{DeletionRequest, PartitionIndex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, trace, warn};

/// Counters describing what the pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleterStats {
    /// Requests admitted by [`Deleter::submit`].
    pub submitted: u64,
    /// Ids handed to a store delete call that succeeded.
    pub applied_ids: u64,
    /// Ids whose store delete call failed. They are not retried.
    pub failed_ids: u64,
    /// Submissions refused because the pipeline was saturated.
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    applied_ids: AtomicU64,
    failed_ids: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DeleterStats {
        DeleterStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            applied_ids: self.applied_ids.load(Ordering::Relaxed),
            failed_ids: self.failed_ids.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

type Queue = Arc<AsyncMutex<mpsc::Receiver<DeletionRequest>>>;

/// A fixed pool of workers applying deletion requests in the background.
///
/// Requests go through a bounded queue. When it is full, a request is parked
/// in an overflow task that waits for room; the number of parked requests is
/// capped by [`DeleterSettings::overflow_limit`]. Overflow tasks hold a
/// sender, so the workers keep running until every parked request has been
/// queued and applied.
///
/// Work runs on the runtime the pipeline was spawned on and is not tied to
/// the caller of [`submit`](Deleter::submit): dropping the caller's future
/// does not cancel the deletion.
pub struct Deleter {
    sender: Mutex<Option<mpsc::Sender<DeletionRequest>>>,
    overflow: Arc<Semaphore>,
    /// Flips to `true` once every worker has exited.
    drained: watch::Receiver<bool>,
    counters: Arc<Counters>,
    runtime: Handle,
}

impl Deleter {
    /// Starts the worker pool.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn spawn<S>(store: Arc<S>, settings: DeleterSettings) -> Self
    where
        S: PartitionIndex + ?Sized,
    {
        let runtime = Handle::current();
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let queue: Queue = Arc::new(AsyncMutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let chunk_size = settings.chunk_size.max(1);

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                runtime.spawn(run_worker(
                    worker,
                    Arc::clone(&store),
                    Arc::clone(&queue),
                    chunk_size,
                    Arc::clone(&counters),
                ))
            })
            .collect::<Vec<_>>();

        let worker_count = workers.len();
        let (drained_tx, drained) = watch::channel(false);
        runtime.spawn(async move {
            for handle in workers {
                if let Err(err) = handle.await {
                    warn!(error = %err, "deletion worker terminated abnormally");
                }
            }
            drained_tx.send_replace(true);
        });

        info!(
            workers = worker_count,
            queue_capacity = settings.queue_capacity,
            overflow_limit = settings.overflow_limit,
            chunk_size,
            "deletion pipeline started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            overflow: Arc::new(Semaphore::new(settings.overflow_limit)),
            drained,
            counters,
            runtime,
        }
    }

    /// Hands a request to the pipeline without waiting for it to be applied.
    ///
    /// Never blocks. A request with no ids is accepted and dropped.
    ///
    /// Only admitted requests are applied. A request refused with
    /// [`SubmitError::Saturated`] or [`SubmitError::ShuttingDown`] is
    /// discarded and never reaches the store; resubmitting it is up to the
    /// caller.
    pub fn submit(&self, request: DeletionRequest) -> Result<(), SubmitError> {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(SubmitError::ShuttingDown);
        };

        if request.ids.is_empty() {
            trace!(owner = %request.owner, "ignoring empty deletion request");
            return Ok(());
        }

        match sender.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => return Err(SubmitError::ShuttingDown),
            Err(TrySendError::Full(request)) => {
                let Ok(permit) = Arc::clone(&self.overflow).try_acquire_owned() else {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        owner = %request.owner,
                        ids = request.ids.len(),
                        "deletion pipeline saturated, request rejected"
                    );
                    return Err(SubmitError::Saturated);
                };

                debug!(owner = %request.owner, "deletion queue full, parking request");
                let counters = Arc::clone(&self.counters);
                self.runtime.spawn(async move {
                    let _permit = permit;
                    if let Err(mpsc::error::SendError(request)) = sender.send(request).await {
                        counters
                            .failed_ids
                            .fetch_add(request.ids.len() as u64, Ordering::Relaxed);
                        warn!(
                            owner = %request.owner,
                            ids = request.ids.len(),
                            "deletion queue closed before parked request was admitted"
                        );
                    }
                });
            }
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> DeleterStats {
        self.counters.snapshot()
    }

    /// Stops admission and waits for queued and parked requests to finish.
    ///
    /// Every caller waits for the same completion, each under its own
    /// deadline, so `Ok` always means the pipeline is empty. On timeout the
    /// workers keep running and the stats at that moment are returned in the
    /// error; a later call can wait again.
    pub async fn shutdown(&self, timeout: Duration) -> Result<DeleterStats, DrainError> {
        if self.sender.lock().take().is_some() {
            info!(?timeout, "draining deletion pipeline");
        }

        let mut drained = self.drained.clone();
        // the supervisor signals before it drops its sender, so a closed channel also means done
        let finished = tokio::time::timeout(timeout, drained.wait_for(|done| *done))
            .await
            .is_ok();

        let stats = self.stats();
        if finished {
            info!(?stats, "deletion pipeline drained");
            Ok(stats)
        } else {
            warn!(?stats, "deletion pipeline drain timed out");
            Err(DrainError::TimedOut { stats })
        }
    }
}

async fn run_worker<S>(
    worker: usize,
    store: Arc<S>,
    queue: Queue,
    chunk_size: usize,
    counters: Arc<Counters>,
) where
    S: PartitionIndex + ?Sized,
{
    loop {
        let next = queue.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };
        apply(worker, &*store, request, chunk_size, &counters).await;
    }
    debug!(worker, "deletion worker stopped");
}

async fn apply<S>(
    worker: usize,
    store: &S,
    request: DeletionRequest,
    chunk_size: usize,
    counters: &Counters,
) where
    S: PartitionIndex + ?Sized,
{
    for chunk in request.ids.chunks(chunk_size) {
        match store.delete_for_user(request.owner, chunk).await {
            Ok(()) => {
                counters
                    .applied_ids
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                trace!(worker, owner = %request.owner, ids = chunk.len(), "applied deletion");
            }
            Err(err) => {
                counters
                    .failed_ids
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                warn!(
                    worker,
                    owner = %request.owner,
                    ids = chunk.len(),
                    error = %err,
                    "failed to apply deletion, dropping ids"
                );
            }
        }
    }
}
