//! Agent pipeline
//!
//! Three concurrent activities share one cancellable run scope:
//!
//! ```text
//! poll tick ──→ Sampler ──→ gauges / counters (local storage)
//!                                   │
//! report tick ──→ list_all ──→ job queue (bounded) ──→ sender worker 1..N ──→ collector
//! ```
//!
//! - **Collector loop**: samples gauges and bumps `PollCount` on every poll
//!   tick. A storage failure here is fatal and aborts the pipeline.
//! - **Reporter loop**: flattens both local snapshots onto the job queue on
//!   every report tick. A full queue blocks the reporter (backpressure).
//! - **Sender pool**: workers share the queue receiver and deliver each
//!   metric through the [`MetricSender`] wrapped in the [`RetryPolicy`].
//!
//! ## Shutdown
//!
//! Cancelling the shutdown token stops both loops between ticks. The
//! reporter drops its end of the queue and the workers drain whatever is
//! still queued before the pipeline reports [`PipelineState::Stopped`].
//!
//! A worker that exhausts its retries stops and its error is returned from
//! [`Agent::run`]. Sibling workers keep draining unless
//! `cancel_on_send_failure` is set, in which case the first such error
//! aborts the whole pipeline.

pub mod sampler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AgentConfig;
use crate::metric::Metric;
use crate::retry::RetryPolicy;
use crate::storage::{MemoryBackend, StorageBackend};
use crate::transport::{MetricSender, TransportError};
use sampler::Sampler;

/// Capacity of the job queue between reporter and senders
pub const JOB_QUEUE_CAPACITY: usize = 100;

/// Counter incremented once per sample
pub const POLL_COUNT: &str = "PollCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Metric>>>;

pub struct Agent {
    gauges: Arc<dyn StorageBackend>,
    counters: Arc<dyn StorageBackend>,
    sampler: Box<dyn Sampler>,
    sender: Arc<dyn MetricSender>,
    retry: RetryPolicy,

    poll_interval: Duration,
    report_interval: Duration,
    workers: usize,
    cancel_on_send_failure: bool,

    state: watch::Sender<PipelineState>,
}

impl Agent {
    pub fn new(
        config: &AgentConfig,
        sampler: impl Sampler + 'static,
        sender: Arc<dyn MetricSender>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);

        Self {
            gauges: Arc::new(MemoryBackend::new()),
            counters: Arc::new(MemoryBackend::new()),
            sampler: Box::new(sampler),
            sender,
            retry: RetryPolicy::default(),
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            workers: config.rate_limit.max(1),
            cancel_on_send_failure: config.cancel_on_send_failure,
            state,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the local gauge and counter stores
    pub fn with_storage(
        mut self,
        gauges: Arc<dyn StorageBackend>,
        counters: Arc<dyn StorageBackend>,
    ) -> Self {
        self.gauges = gauges;
        self.counters = counters;
        self
    }

    /// Observe pipeline state transitions
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` is cancelled or the pipeline aborts
    ///
    /// Returns the collector loop's fatal error if there was one, otherwise
    /// the first error of a sender worker that exhausted its retries.
    #[instrument(skip_all, fields(workers = self.workers))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Agent {
            gauges,
            counters,
            sampler,
            sender,
            retry,
            poll_interval,
            report_interval,
            workers,
            cancel_on_send_failure,
            state,
        } = self;

        // loops stop on `scope`; workers only stop early on `abort`
        let scope = shutdown.child_token();
        let abort = CancellationToken::new();

        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let queue: JobQueue = Arc::new(Mutex::new(rx));

        state.send_replace(PipelineState::Running);
        info!("agent pipeline running");

        let mut collector = tokio::spawn(collect_loop(
            sampler,
            gauges.clone(),
            counters.clone(),
            poll_interval,
            scope.clone(),
            abort.clone(),
        ));
        let mut reporter = tokio::spawn(report_loop(
            gauges,
            counters,
            tx,
            report_interval,
            scope.clone(),
        ));

        let mut senders = JoinSet::new();
        for worker in 0..workers {
            senders.spawn(send_loop(
                worker,
                queue.clone(),
                sender.clone(),
                retry.clone(),
                SendAbort {
                    enabled: cancel_on_send_failure,
                    scope: scope.clone(),
                    abort: abort.clone(),
                },
            ));
        }

        let mut collected = None;
        let mut reported = None;
        tokio::select! {
            _ = scope.cancelled() => {}
            result = &mut collector => collected = Some(result),
            result = &mut reporter => reported = Some(result),
        }
        // a loop only ends on its own after cancelling the scope, or by panicking
        if !scope.is_cancelled() {
            error!("agent loop exited unexpectedly, aborting pipeline");
            abort.cancel();
            scope.cancel();
        }
        state.send_replace(PipelineState::Draining);
        debug!("draining job queue");

        let collected = match collected {
            Some(result) => result,
            None => collector.await,
        };
        let reported = match reported {
            Some(result) => result,
            None => reporter.await,
        };

        let mut first_error: Option<TransportError> = None;
        while let Some(result) = senders.join_next().await {
            if let Err(e) = result.context("sender worker panicked")? {
                first_error.get_or_insert(e);
            }
        }

        state.send_replace(PipelineState::Stopped);
        info!("agent pipeline stopped");

        reported.context("reporter loop panicked")?;
        collected.context("collector loop panicked")??;
        match first_error {
            Some(e) => Err(e).context("metric delivery failed"),
            None => Ok(()),
        }
    }
}

async fn collect_once(
    sampler: &mut dyn Sampler,
    gauges: &dyn StorageBackend,
    counters: &dyn StorageBackend,
) -> Result<()> {
    gauges
        .put_many(sampler.sample())
        .await
        .context("failed to store gauges")?;
    counters
        .put(Metric::counter(POLL_COUNT, 1))
        .await
        .context("failed to store poll count")?;
    Ok(())
}

async fn collect_loop(
    mut sampler: Box<dyn Sampler>,
    gauges: Arc<dyn StorageBackend>,
    counters: Arc<dyn StorageBackend>,
    period: Duration,
    scope: CancellationToken,
    abort: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = collect_once(sampler.as_mut(), gauges.as_ref(), counters.as_ref()).await {
            error!("collector loop failed, aborting pipeline: {e:#}");
            abort.cancel();
            scope.cancel();
            return Err(e);
        }
    }

    debug!("collector loop stopped");
    Ok(())
}

async fn report_loop(
    gauges: Arc<dyn StorageBackend>,
    counters: Arc<dyn StorageBackend>,
    tx: mpsc::Sender<Metric>,
    period: Duration,
    scope: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut batch = match gauges.list_all().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("failed to read gauges: {e}");
                continue;
            }
        };
        match counters.list_all().await {
            Ok(counts) => batch.extend(counts),
            Err(e) => {
                warn!("failed to read counters: {e}");
                continue;
            }
        }

        let total = batch.len();
        let pushed = enqueue(&tx, batch, &scope).await;
        debug!("reported {pushed}/{total} metrics");
        if pushed < total {
            break;
        }
    }

    debug!("reporter loop stopped");
}

/// Push `batch` onto the job queue, waiting for free slots
///
/// Stops early when `scope` is cancelled or the queue is closed. Returns
/// the number of metrics pushed.
pub async fn enqueue(
    tx: &mpsc::Sender<Metric>,
    batch: Vec<Metric>,
    scope: &CancellationToken,
) -> usize {
    let mut pushed = 0;
    for metric in batch {
        tokio::select! {
            _ = scope.cancelled() => break,
            result = tx.send(metric) => {
                if result.is_err() {
                    debug!("job queue closed");
                    break;
                }
                pushed += 1;
            }
        }
    }
    pushed
}

struct SendAbort {
    enabled: bool,
    scope: CancellationToken,
    abort: CancellationToken,
}

async fn send_loop(
    worker: usize,
    queue: JobQueue,
    sender: Arc<dyn MetricSender>,
    retry: RetryPolicy,
    on_failure: SendAbort,
) -> Result<(), TransportError> {
    loop {
        let job = tokio::select! {
            biased;
            _ = on_failure.abort.cancelled() => break,
            job = async { queue.lock().await.recv().await } => job,
        };
        let Some(metric) = job else {
            break;
        };

        if let Err(e) = retry.run_always(|| sender.send(&metric)).await {
            error!(worker = worker, "giving up on {}: {e}", metric.key());
            if on_failure.enabled {
                on_failure.abort.cancel();
                on_failure.scope.cancel();
            }
            return Err(e);
        }
    }

    debug!(worker = worker, "sender worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricKey, MetricKind, MetricValue};
    use crate::storage::{HealthStatus, StorageError, StorageResult};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSampler;

    impl Sampler for FixedSampler {
        fn sample(&mut self) -> Vec<Metric> {
            vec![Metric::gauge("Alloc", 1.0), Metric::gauge("HeapSys", 2.0)]
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: StdMutex<Vec<Metric>>,
        delay: Duration,
    }

    #[async_trait]
    impl MetricSender for RecordingSender {
        async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().unwrap().push(metric.clone());
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl MetricSender for FailingSender {
        async fn send(&self, _metric: &Metric) -> Result<(), TransportError> {
            Err(TransportError::Status(503))
        }
    }

    /// Rejects the first delivery, accepts the rest
    #[derive(Default)]
    struct FlakySender {
        calls: AtomicUsize,
        delivered: StdMutex<Vec<Instant>>,
    }

    #[async_trait]
    impl MetricSender for FlakySender {
        async fn send(&self, _metric: &Metric) -> Result<(), TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(TransportError::Status(503));
            }
            self.delivered.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    struct BrokenStorage;

    #[async_trait]
    impl StorageBackend for BrokenStorage {
        async fn get(&self, key: &MetricKey) -> StorageResult<Metric> {
            Err(StorageError::NotFound(key.clone()))
        }

        async fn put(&self, _metric: Metric) -> StorageResult<Metric> {
            Err(StorageError::QueryFailed("broken".to_string()))
        }

        async fn put_many(&self, _metrics: Vec<Metric>) -> StorageResult<Vec<Metric>> {
            Err(StorageError::QueryFailed("broken".to_string()))
        }

        async fn list_all(&self) -> StorageResult<Vec<Metric>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> StorageResult<HealthStatus> {
            Err(StorageError::UnhealthyBackend("broken".to_string()))
        }
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            poll_interval: Duration::from_millis(10),
            report_interval: Duration::from_millis(25),
            rate_limit: 2,
            ..AgentConfig::default()
        }
    }

    fn no_delay() -> RetryPolicy {
        RetryPolicy::new(1, vec![Duration::ZERO])
    }

    #[tokio::test]
    async fn test_pipeline_delivers_samples() {
        let sender = Arc::new(RecordingSender::default());
        let counters: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let agent = Agent::new(&test_config(), FixedSampler, sender.clone())
            .with_storage(Arc::new(MemoryBackend::new()), counters.clone());
        let state = agent.state();
        assert_eq!(*state.borrow(), PipelineState::Idle);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(*state.borrow(), PipelineState::Running);
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*state.borrow(), PipelineState::Stopped);

        let sent = sender.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.id == "Alloc"));
        assert!(sent.iter().any(|m| m.id == "HeapSys"));
        assert!(sent.iter().any(|m| m.id == POLL_COUNT));

        let polls = counters
            .get(&MetricKey::new(MetricKind::Counter, POLL_COUNT))
            .await
            .unwrap();
        assert_matches::assert_matches!(polls.value, MetricValue::Counter(n) if n >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_metrics() {
        let sender = Arc::new(RecordingSender {
            sent: StdMutex::new(Vec::new()),
            delay: Duration::from_millis(30),
        });
        let config = AgentConfig {
            rate_limit: 1,
            ..test_config()
        };
        let agent = Agent::new(&config, FixedSampler, sender.clone());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run(shutdown.clone()));

        // first report lands at 25ms; one send takes 30ms
        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        // the whole first batch (two gauges and the poll count) was delivered
        assert!(sender.sent.lock().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_collector_failure_aborts_pipeline() {
        let agent = Agent::new(&test_config(), FixedSampler, Arc::new(FailingSender))
            .with_storage(Arc::new(BrokenStorage), Arc::new(MemoryBackend::new()));
        let state = agent.state();

        // returns without any external shutdown
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            agent.run(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(result.is_err());
        assert_eq!(*state.borrow(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_pipeline_running_by_default() {
        let agent =
            Agent::new(&test_config(), FixedSampler, Arc::new(FailingSender)).with_retry(no_delay());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_on_send_failure_aborts_pipeline() {
        let config = AgentConfig {
            cancel_on_send_failure: true,
            ..test_config()
        };
        let agent = Agent::new(&config, FixedSampler, Arc::new(FailingSender)).with_retry(no_delay());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            agent.run(CancellationToken::new()),
        )
        .await
        .unwrap();

        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_is_retried_after_delay() {
        let sender = Arc::new(FlakySender::default());
        let config = AgentConfig {
            report_interval: Duration::from_millis(100),
            rate_limit: 1,
            ..test_config()
        };
        let agent = Agent::new(&config, FixedSampler, sender.clone());
        let start = Instant::now();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.run(shutdown.clone()));

        // first report at 100ms fails; the single worker waits out the 1s delay
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert!(sender.delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = sender.delivered.lock().unwrap().first().copied().unwrap();
        assert!(first - start >= Duration::from_millis(1100));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_stops_pipeline() {
        let config = AgentConfig {
            poll_interval: Duration::ZERO,
            ..test_config()
        };
        let agent = Agent::new(&config, FixedSampler, Arc::new(RecordingSender::default()));
        let state = agent.state();

        // the collector loop dies on its own; nothing cancels `run` from outside
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            agent.run(CancellationToken::new()),
        )
        .await
        .unwrap();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("collector loop panicked"));
        assert_eq!(*state.borrow(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_reporter() {
        let (tx, mut rx) = mpsc::channel(2);
        let scope = CancellationToken::new();
        let batch = vec![
            Metric::gauge("a", 1.0),
            Metric::gauge("b", 2.0),
            Metric::gauge("c", 3.0),
        ];

        let push = tokio::spawn(async move { enqueue(&tx, batch, &scope).await });

        // two slots fill, the third push waits for a consumer
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!push.is_finished());

        assert_eq!(rx.recv().await.unwrap(), Metric::gauge("a", 1.0));
        let pushed = tokio::time::timeout(Duration::from_secs(1), push)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed, 3);
    }

    #[tokio::test]
    async fn test_enqueue_stops_on_cancellation() {
        let (tx, _rx) = mpsc::channel(1);
        let scope = CancellationToken::new();
        let batch = vec![Metric::gauge("a", 1.0), Metric::gauge("b", 2.0)];

        let cancel = scope.clone();
        let push = tokio::spawn(async move { enqueue(&tx, batch, &scope).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(push.await.unwrap(), 1);
    }
}
