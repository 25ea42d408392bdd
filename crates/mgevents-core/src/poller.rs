//! Polls the provider's event queue and hands each activity to a listener.
//!
//! Every worker runs the same loop against one shared transport: receive a
//! batch, decode each message body, dispatch its records, and delete the
//! message only once every record has been dispatched. A message that fails
//! anywhere stays on the queue and comes back after its visibility timeout,
//! so delivery is at-least-once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::activity::ActivityBatch;
use crate::config::PollerConfig;
use crate::error::Result;
use crate::listener::{dispatch, ActivityListener};
use crate::queue::{QueueMessage, QueueTransport};

/// Runs [`PollerConfig::threads`] worker loops against one queue.
///
/// # Example
///
/// ```no_run
/// use mgevents::{PollerConfig, QueuePoller, SqsQueue};
/// # use mgevents::ActivityListener;
///
/// # async fn example(listener: impl ActivityListener + 'static) {
/// let config = aws_config::from_env().load().await;
/// let poller_config = PollerConfig::default();
/// let queue_url = "https://sqs.us-east-1.amazonaws.com/123/events";
/// let queue = SqsQueue::from_config(&config, queue_url, poller_config.max_error_retry);
///
/// let poller = QueuePoller::new(queue, listener, poller_config);
/// let workers = poller.start();
/// // ...
/// poller.stop();
/// for worker in workers {
///     let _ = worker.await;
/// }
/// # }
/// ```
pub struct QueuePoller<T, L> {
    transport: Arc<T>,
    listener: Arc<L>,
    config: Arc<PollerConfig>,
    run: Mutex<Option<Arc<Run>>>,
}

/// The workers spawned by one call to [`QueuePoller::start`].
struct Run {
    running: AtomicBool,
    live: AtomicUsize,
}

impl Run {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.live.load(Ordering::SeqCst) > 0
    }

    fn worker_exited(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

impl<T, L> QueuePoller<T, L>
where
    T: QueueTransport + 'static,
    L: ActivityListener + 'static,
{
    pub fn new(transport: T, listener: L, config: PollerConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            listener: Arc::new(listener),
            config: Arc::new(config),
            run: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// True while the latest [`start`](Self::start) has at least one live
    /// worker and [`stop`](Self::stop) has not been called since.
    pub fn is_running(&self) -> bool {
        self.current().as_ref().is_some_and(|run| run.is_running())
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Arc<Run>>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the worker loops onto the current tokio runtime.
    ///
    /// The poller never waits for its workers. Callers that need a clean drain
    /// can [`stop`](Self::stop) the poller and then await the returned handles.
    /// Calling `start` on a running poller spawns nothing. Once every worker
    /// has exited, whether through `stop` or a fatal error, the poller can be
    /// started again; workers from earlier runs never rejoin.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut current = self.current();
        if current.as_ref().is_some_and(|run| run.is_running()) {
            warn!("queue poller is already running");
            return Vec::new();
        }

        let run = Arc::new(Run {
            running: AtomicBool::new(true),
            live: AtomicUsize::new(self.config.threads),
        });
        *current = Some(Arc::clone(&run));

        info!("starting queue poller(s) with {:?}", self.config);
        let workers = (1..=self.config.threads)
            .map(|id| {
                info!("starting queue poller worker #{id}");
                let worker = Worker {
                    id,
                    transport: Arc::clone(&self.transport),
                    listener: Arc::clone(&self.listener),
                    config: Arc::clone(&self.config),
                    state: Arc::clone(&run),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!("poller(s) started");

        workers
    }

    /// Asks every worker to exit at the top of its next iteration.
    ///
    /// An in-flight receive or dispatch is allowed to finish.
    pub fn stop(&self) {
        info!("stopping queue poller(s)");
        if let Some(run) = self.current().as_ref() {
            run.running.store(false, Ordering::SeqCst);
        }
    }

    /// Runs a single receive/dispatch/delete cycle on the calling task.
    ///
    /// Useful for draining a queue from a test or a cron-style job without
    /// spawning workers.
    ///
    /// # Returns
    ///
    /// The number of messages received, including any that failed and were
    /// left on the queue for redelivery.
    ///
    /// # Errors
    ///
    /// Returns the error when the receive call fails, or when deleting a
    /// message fails fatally (queue gone, access denied). Decode and listener
    /// failures are logged and never returned.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use mgevents::{ActivityListener, PollerConfig, QueuePoller, SqsQueue};
    /// # async fn example(queue: SqsQueue, listener: impl ActivityListener + 'static) -> mgevents::Result<()> {
    /// let poller = QueuePoller::new(queue, listener, PollerConfig::default());
    /// while poller.poll_once().await? > 0 {}
    /// # Ok(())
    /// # }
    /// ```
    pub async fn poll_once(&self) -> Result<usize> {
        poll_once(self.transport.as_ref(), self.listener.as_ref(), &self.config).await
    }
}

struct Worker<T, L> {
    id: usize,
    transport: Arc<T>,
    listener: Arc<L>,
    config: Arc<PollerConfig>,
    state: Arc<Run>,
}

// Also runs when the task is aborted or panics.
impl<T, L> Drop for Worker<T, L> {
    fn drop(&mut self) {
        self.state.worker_exited();
    }
}

impl<T: QueueTransport, L: ActivityListener> Worker<T, L> {
    async fn run(self) {
        let delay = self.config.empty_queue_delay();

        while self.state.running.load(Ordering::SeqCst) {
            match poll_once(self.transport.as_ref(), self.listener.as_ref(), &self.config).await {
                Ok(0) => {
                    info!(
                        "worker #{} received no messages, sleeping for {} seconds",
                        self.id,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(received) => info!("worker #{} received {received} messages", self.id),
                Err(e) if e.is_fatal() => {
                    error!("worker #{} cannot reach the queue and is stopping: {e}", self.id);
                    break;
                }
                Err(e) => {
                    warn!("worker #{} failed to receive messages, will retry: {e}", self.id);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!("worker #{} stopped", self.id);
    }
}

/// Receives one batch and processes every message in it.
///
/// Returns the number of messages received. A message that fails to decode
/// or dispatch is logged and left undeleted while the rest of the batch is
/// still processed; only fatal transport errors are returned.
async fn poll_once<T, L>(transport: &T, listener: &L, config: &PollerConfig) -> Result<usize>
where
    T: QueueTransport + ?Sized,
    L: ActivityListener + ?Sized,
{
    let messages = transport
        .receive(config.max_batch_size, config.visibility_timeout())
        .await?;
    let received = messages.len();

    for message in messages {
        match process_message(transport, listener, &message).await {
            Ok(dispatched) => debug!(
                "message {} dispatched {dispatched} activities and was deleted",
                message.message_id
            ),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(
                "message {} left on the queue for redelivery: {e}",
                message.message_id
            ),
        }
    }

    Ok(received)
}

async fn process_message<T, L>(transport: &T, listener: &L, message: &QueueMessage) -> Result<usize>
where
    T: QueueTransport + ?Sized,
    L: ActivityListener + ?Sized,
{
    match message.receive_count {
        Some(count) if count > 1 => warn!(
            "message {} has been received {count} times",
            message.message_id
        ),
        Some(count) => debug!("message {} receive count: {count}", message.message_id),
        None => {}
    }
    debug!("received message {}: {}", message.message_id, message.body);

    let batch = ActivityBatch::from_xml(&message.body)?;
    let dispatched = batch.len();
    for record in batch.into_records() {
        info!(
            "received {} belonging to job {}",
            record.kind(),
            record.request_id()
        );
        dispatch(listener, record)?;
    }

    transport.delete(&message.receipt_handle).await?;
    Ok(dispatched)
}
