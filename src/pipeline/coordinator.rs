//! Pipeline coordinator
//!
//! Runs fetch → parse → extract → emit for every queued source on a fixed
//! pool of worker tasks. Each document moves through its own state machine;
//! a failure in any stage ends that document only.
//!
//! Cancellation is two-phase. Once the run token fires, workers stop taking
//! new sources and queued ones are reported as cancelled. Documents already
//! in flight keep going until the grace period runs out, after which their
//! current stage is abandoned. Emit is never abandoned, only timed out, so a
//! sink never sees half a batch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::discovery::{discover_links, CrawlScope};
use super::observer::PipelineObserver;
use super::outcome::{DocumentReport, PipelineError, PipelineOutcome, RunSummary, Stage};
use super::state::{DocumentState, Lifecycle};
use super::work_queue::WorkQueue;
use crate::domain::{FetchError, Fetcher, Sink, SourceRef};
use crate::extraction::{Extraction, RuleSet};
use crate::parsing::HtmlParser;

/// Coordinator settings
///
/// Timeouts are in milliseconds; `0` disables that timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker count, and therefore the most documents in flight at once
    pub concurrency: usize,
    pub shutdown_grace_ms: u64,
    pub fetch_timeout_ms: u64,
    pub parse_timeout_ms: u64,
    pub extract_timeout_ms: u64,
    pub emit_timeout_ms: u64,
    /// Queue in-scope links found on fetched pages
    pub follow_links: bool,
    /// Cap on the total number of documents when following links
    pub max_documents: Option<usize>,
    /// Crawl scope prefixes; empty means "the seed URLs"
    pub scope: Vec<String>,
}

pub mod defaults {
    pub const CONCURRENCY: usize = 8;
    pub const SHUTDOWN_GRACE_MS: u64 = 5_000;
    pub const FETCH_TIMEOUT_MS: u64 = 30_000;
    pub const PARSE_TIMEOUT_MS: u64 = 10_000;
    pub const EXTRACT_TIMEOUT_MS: u64 = 10_000;
    pub const EMIT_TIMEOUT_MS: u64 = 30_000;
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE_MS,
            fetch_timeout_ms: defaults::FETCH_TIMEOUT_MS,
            parse_timeout_ms: defaults::PARSE_TIMEOUT_MS,
            extract_timeout_ms: defaults::EXTRACT_TIMEOUT_MS,
            emit_timeout_ms: defaults::EMIT_TIMEOUT_MS,
            follow_links: false,
            max_documents: None,
            scope: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self, stage: Stage) -> Option<Duration> {
        let ms = match stage {
            Stage::Fetch => self.fetch_timeout_ms,
            Stage::Parse => self.parse_timeout_ms,
            Stage::Extract => self.extract_timeout_ms,
            Stage::Emit => self.emit_timeout_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Everything a worker needs, shared by all workers of a run
struct WorkerContext {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<HtmlParser>,
    rules: Arc<RuleSet>,
    sink: Arc<dyn Sink>,
    observers: Vec<Arc<dyn PipelineObserver>>,
    config: PipelineConfig,
    queue: Arc<WorkQueue>,
    scope: Option<CrawlScope>,
    /// Fires when new work must stop being taken
    cancel: CancellationToken,
    /// Fires when in-flight work must be given up
    abandon: CancellationToken,
    reports: Mutex<Vec<DocumentReport>>,
}

pub struct PipelineCoordinator {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<HtmlParser>,
    rules: Arc<RuleSet>,
    sink: Arc<dyn Sink>,
    observers: Vec<Arc<dyn PipelineObserver>>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl PipelineCoordinator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: HtmlParser,
        rules: Arc<RuleSet>,
        sink: Arc<dyn Sink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            parser: Arc::new(parser),
            rules,
            sink,
            observers: Vec::new(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every source and return once each has a terminal outcome
    pub async fn run(&self, sources: impl IntoIterator<Item = SourceRef>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let workers = self.config.concurrency.max(1);

        let queue = Arc::new(WorkQueue::new(self.config.max_documents));
        let mut seeds = Vec::new();
        for source in sources {
            if queue.submit_seed(source.clone()).await.is_ok() {
                seeds.push(source);
            } else {
                debug!("Skipping duplicate source {}", source);
            }
        }

        let scope = self.config.follow_links.then(|| {
            if self.config.scope.is_empty() {
                CrawlScope::from_seeds(&seeds)
            } else {
                CrawlScope::new(self.config.scope.iter().cloned())
            }
        });

        let context = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            rules: Arc::clone(&self.rules),
            sink: Arc::clone(&self.sink),
            observers: self.observers.clone(),
            config: self.config.clone(),
            queue: Arc::clone(&queue),
            scope,
            cancel: self.cancel.clone(),
            abandon: CancellationToken::new(),
            reports: Mutex::new(Vec::new()),
        });

        debug!(
            "Run {} starting with {} sources on {} workers",
            run_id,
            seeds.len(),
            workers
        );
        for observer in &context.observers {
            if let Err(e) = observer.on_run_started(run_id, seeds.len()).await {
                warn!("Observer '{}' failed on run start: {:#}", observer.name(), e);
            }
        }

        let grace_timer = {
            let cancel = self.cancel.clone();
            let abandon = context.abandon.clone();
            let grace = self.config.grace_period();
            tokio::spawn(async move {
                cancel.cancelled().await;
                info!("🛑 Cancellation requested, allowing {:?} for in-flight documents", grace);
                tokio::time::sleep(grace).await;
                abandon.cancel();
            })
        };

        let handles: Vec<_> = (0..workers)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, Arc::clone(&context))))
            .collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task died: {}", e);
            }
        }
        grace_timer.abort();

        for source in queue.drain().await {
            let report = DocumentReport {
                source,
                outcome: PipelineOutcome::Failure(PipelineError::Cancelled),
                final_state: DocumentState::Failed,
                elapsed: Duration::ZERO,
                links_discovered: 0,
            };
            context.finish_document(report).await;
        }

        let reports = std::mem::take(&mut *context.reports.lock().await);
        let summary = RunSummary {
            run_id,
            reports,
            elapsed: started.elapsed(),
            peak_in_flight: queue.peak_in_flight().await,
        };

        if let Err(e) = self.sink.flush().await {
            warn!("Sink flush failed: {}", e);
        }

        for observer in &context.observers {
            if let Err(e) = observer.on_run_finished(&summary).await {
                warn!("Observer '{}' failed on run finish: {:#}", observer.name(), e);
            }
        }

        summary
    }
}

async fn worker_loop(worker_id: usize, context: Arc<WorkerContext>) {
    debug!("👷 Worker {} started", worker_id);
    while let Some(source) = context.queue.next(&context.cancel).await {
        let report = context.process(source).await;
        context.finish_document(report).await;
        context.queue.complete().await;
    }
    debug!("👷 Worker {} stopped", worker_id);
}

impl WorkerContext {
    async fn finish_document(&self, report: DocumentReport) {
        for observer in &self.observers {
            if let Err(e) = observer.on_document_finished(&report).await {
                warn!("Observer '{}' failed on {}: {:#}", observer.name(), report.source, e);
            }
        }
        self.reports.lock().await.push(report);
    }

    /// Run one document to a terminal outcome
    async fn process(&self, source: SourceRef) -> DocumentReport {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::new();
        let mut links_discovered = 0;

        let run = AssertUnwindSafe(self.execute(&source, &mut lifecycle, &mut links_discovered))
            .catch_unwind()
            .await;
        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => PipelineOutcome::Failure(error),
            Err(panic) => PipelineOutcome::Failure(PipelineError::Internal(format!(
                "panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let terminal = if outcome.is_failure() {
            DocumentState::Failed
        } else {
            DocumentState::Done
        };
        if let Err(e) = lifecycle.advance(terminal) {
            error!("{}: {}", source, e);
        }

        DocumentReport {
            source,
            outcome,
            final_state: lifecycle.state(),
            elapsed: started.elapsed(),
            links_discovered,
        }
    }

    async fn execute(
        &self,
        source: &SourceRef,
        lifecycle: &mut Lifecycle,
        links_discovered: &mut usize,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.enter(source, lifecycle, DocumentState::Fetching)?;
        let raw = self
            .guarded(Stage::Fetch, async {
                self.fetcher.fetch(source).await.map_err(PipelineError::from)
            })
            .await?;

        if !raw.is_html() {
            debug!(
                "Skipping {}: content type {}",
                source,
                raw.content_type.as_deref().unwrap_or("unknown")
            );
            return Ok(PipelineOutcome::Success(0));
        }

        self.enter(source, lifecycle, DocumentState::Parsing)?;
        let parser = Arc::clone(&self.parser);
        let tree = self
            .guarded(
                Stage::Parse,
                blocking(move || parser.parse_document(&raw).map_err(PipelineError::from)),
            )
            .await?;
        let tree = Arc::new(tree);

        if let Some(scope) = &self.scope {
            *links_discovered = self.submit_links(&discover_links(&tree, scope)).await;
        }

        self.enter(source, lifecycle, DocumentState::Extracting)?;
        let rules = Arc::clone(&self.rules);
        let Extraction { records, errors } = self
            .guarded(Stage::Extract, blocking(move || Ok(rules.apply(&tree))))
            .await?;

        self.enter(source, lifecycle, DocumentState::Emitting)?;
        let record_count = records.len();
        if record_count > 0 {
            self.guarded(Stage::Emit, async {
                self.sink
                    .emit(source, records)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        }

        Ok(if errors.is_empty() {
            PipelineOutcome::Success(record_count)
        } else {
            PipelineOutcome::PartialFailure {
                records: record_count,
                errors,
            }
        })
    }

    fn enter(
        &self,
        source: &SourceRef,
        lifecycle: &mut Lifecycle,
        next: DocumentState,
    ) -> Result<(), PipelineError> {
        debug!("{} {} -> {}", source, lifecycle.state(), next);
        lifecycle.advance(next)?;
        Ok(())
    }

    /// Apply the stage timeout and, outside of emit, the abandon signal to
    /// one stage
    async fn guarded<T>(
        &self,
        stage: Stage,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        let timed = async {
            match self.config.stage_timeout(stage) {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) if stage == Stage::Fetch => Err(FetchError::Timeout.into()),
                    Err(_) => Err(PipelineError::StageTimeout(stage)),
                },
                None => work.await,
            }
        };

        if stage == Stage::Emit {
            return timed.await;
        }
        tokio::select! {
            biased;
            result = timed => result,
            () = self.abandon.cancelled() => Err(PipelineError::Cancelled),
        }
    }

    async fn submit_links(&self, links: &[SourceRef]) -> usize {
        let mut submitted = 0;
        for link in links {
            if self.queue.submit(link.clone()).await.is_ok() {
                submitted += 1;
            }
        }
        if submitted > 0 {
            debug!("Queued {} new links", submitted);
        }
        submitted
    }
}

/// Run CPU-bound work on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(PipelineError::Internal(format!(
            "panicked: {}",
            panic_message(e.into_panic().as_ref())
        ))),
        Err(e) => Err(PipelineError::Internal(e.to_string())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
