//! End-to-end pipeline runs against in-memory fetchers and sinks

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use webharvest_lib::domain::{FetchError, Fetcher, RawDocument, Record, Sink, SinkError, SourceRef};
use webharvest_lib::extraction::{rule_set_from_json, RuleSet};
use webharvest_lib::infrastructure::MemorySink;
use webharvest_lib::parsing::HtmlParser;
use webharvest_lib::pipeline::{
    DocumentReport, DocumentState, PipelineConfig, PipelineCoordinator, PipelineError,
    PipelineObserver, PipelineOutcome, RunSummary, Stage,
};

const ITEM_PAGE: &str = r#"<html><body>
  <div class="item"><h2>First</h2><span class="price">10</span></div>
  <div class="item"><h2>Second</h2><span class="price">20</span></div>
</body></html>"#;

#[derive(Clone)]
enum Response {
    Html(&'static str),
    Typed(&'static str, &'static str),
    Error(FetchError),
    Slow(Duration, &'static str),
    Panic,
}

/// Serves canned responses and tracks how many fetches overlap
#[derive(Default)]
struct MapFetcher {
    pages: HashMap<String, Response>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MapFetcher {
    fn with(mut self, source: &str, response: Response) -> Self {
        self.pages.insert(source.to_string(), response);
        self
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<RawDocument, FetchError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let response = self
            .pages
            .get(source.as_str())
            .cloned()
            .ok_or(FetchError::NotFound)?;
        match response {
            Response::Html(body) => Ok(RawDocument::new(source.clone(), body)),
            Response::Typed(content_type, body) => {
                Ok(RawDocument::new(source.clone(), body).with_content_type(content_type))
            }
            Response::Error(error) => Err(error),
            Response::Slow(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(RawDocument::new(source.clone(), body))
            }
            Response::Panic => panic!("fetcher exploded on {source}"),
        }
    }
}

struct SlowSink(Duration);

#[async_trait]
impl Sink for SlowSink {
    async fn emit(&self, _source: &SourceRef, _records: Vec<Record>) -> Result<(), SinkError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct FailingObserver;

#[async_trait]
impl PipelineObserver for FailingObserver {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_run_started(&self, _run_id: uuid::Uuid, _seeds: usize) -> anyhow::Result<()> {
        anyhow::bail!("cannot start")
    }

    async fn on_document_finished(&self, _report: &DocumentReport) -> anyhow::Result<()> {
        anyhow::bail!("cannot record")
    }

    async fn on_run_finished(&self, _summary: &RunSummary) -> anyhow::Result<()> {
        anyhow::bail!("cannot finish")
    }
}

fn item_rules() -> Arc<RuleSet> {
    Arc::new(
        rule_set_from_json(
            r#"{ "rules": [ { "name": "item", "selector": "div.item",
                 "fields": { "title": { "selector": "h2", "required": true },
                             "price": "span.price" } } ] }"#,
        )
        .unwrap(),
    )
}

fn coordinator(
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn Sink>,
    config: PipelineConfig,
) -> PipelineCoordinator {
    PipelineCoordinator::new(fetcher, HtmlParser::default(), item_rules(), sink, config)
}

fn outcome<'a>(summary: &'a RunSummary, source: &str) -> &'a PipelineOutcome {
    &summary
        .report_for(&SourceRef::new(source))
        .unwrap_or_else(|| panic!("no report for {source}"))
        .outcome
}

#[tokio::test]
async fn one_fetch_timeout_fails_only_that_source() {
    let mut fetcher = MapFetcher::default();
    let sources: Vec<String> = (0..10).map(|i| format!("https://shop.test/p/{i}")).collect();
    for (i, source) in sources.iter().enumerate() {
        let response = if i == 4 {
            Response::Error(FetchError::Timeout)
        } else {
            Response::Html(ITEM_PAGE)
        };
        fetcher = fetcher.with(source, response);
    }

    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), PipelineConfig::default())
        .run(sources.iter().map(SourceRef::new))
        .await;

    assert_eq!(summary.total(), 10);
    assert_eq!(summary.success_count(), 9);
    assert_eq!(summary.failure_count(), 1);
    assert!(matches!(
        outcome(&summary, "https://shop.test/p/4"),
        PipelineOutcome::Failure(PipelineError::Fetch(FetchError::Timeout))
    ));
    assert_eq!(sink.record_count().await, 18);
}

#[tokio::test]
async fn records_reach_the_sink_in_document_order() {
    let fetcher = MapFetcher::default().with("https://shop.test/", Response::Html(ITEM_PAGE));
    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), PipelineConfig::default())
        .run([SourceRef::new("https://shop.test/")])
        .await;

    assert!(matches!(outcome(&summary, "https://shop.test/"), PipelineOutcome::Success(2)));
    let records = sink.records_for(&SourceRef::new("https://shop.test/")).await;
    let titles: Vec<_> = records.iter().filter_map(|r| r.text("title")).collect();
    assert_eq!(titles, ["First", "Second"]);
    assert_eq!(records[1].text("price"), Some("20"));
}

#[tokio::test]
async fn missing_required_field_is_a_partial_failure() {
    let page = concat!(
        r#"<div class="item"><h2>Kept</h2></div>"#,
        r#"<div class="item"><span class="price">5</span></div>"#,
    );
    let fetcher = MapFetcher::default().with("https://shop.test/partial", Response::Html(page));
    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), PipelineConfig::default())
        .run([SourceRef::new("https://shop.test/partial")])
        .await;

    match outcome(&summary, "https://shop.test/partial") {
        PipelineOutcome::PartialFailure { records, errors } => {
            assert_eq!(*records, 1);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].field, "title");
            assert_eq!(errors[0].match_index, 1);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    assert_eq!(summary.partial_count(), 1);
    assert_eq!(sink.record_count().await, 1);
}

#[tokio::test]
async fn failures_are_isolated_per_document() {
    let fetcher = MapFetcher::default()
        .with("https://shop.test/ok", Response::Html(ITEM_PAGE))
        .with("https://shop.test/panic", Response::Panic)
        .with("https://shop.test/broken", Response::Error(FetchError::transport("reset")))
        .with("https://shop.test/empty", Response::Html("   "));

    let summary = coordinator(
        Arc::new(fetcher),
        Arc::new(MemorySink::new()),
        PipelineConfig::default(),
    )
    .run(
        ["ok", "panic", "broken", "empty", "missing"]
            .iter()
            .map(|path| SourceRef::new(format!("https://shop.test/{path}"))),
    )
    .await;

    assert_eq!(summary.total(), 5);
    assert!(outcome(&summary, "https://shop.test/ok").is_success());
    assert!(matches!(
        outcome(&summary, "https://shop.test/panic"),
        PipelineOutcome::Failure(PipelineError::Internal(reason)) if reason.contains("exploded")
    ));
    assert!(matches!(
        outcome(&summary, "https://shop.test/broken"),
        PipelineOutcome::Failure(PipelineError::Fetch(FetchError::Transport(_)))
    ));
    assert!(matches!(
        outcome(&summary, "https://shop.test/empty"),
        PipelineOutcome::Failure(PipelineError::Parse(_))
    ));
    assert!(matches!(
        outcome(&summary, "https://shop.test/missing"),
        PipelineOutcome::Failure(PipelineError::Fetch(FetchError::NotFound))
    ));
    for report in summary.failures() {
        assert_eq!(report.final_state, DocumentState::Failed);
    }
}

#[tokio::test]
async fn in_flight_documents_never_exceed_concurrency() {
    let mut fetcher = MapFetcher::default();
    let sources: Vec<String> = (0..20).map(|i| format!("https://shop.test/slow/{i}")).collect();
    for source in &sources {
        fetcher = fetcher.with(source, Response::Slow(Duration::from_millis(20), ITEM_PAGE));
    }
    let fetcher = Arc::new(fetcher);

    let config = PipelineConfig {
        concurrency: 3,
        ..PipelineConfig::default()
    };
    let summary = coordinator(fetcher.clone(), Arc::new(MemorySink::new()), config)
        .run(sources.iter().map(SourceRef::new))
        .await;

    assert_eq!(summary.success_count(), 20);
    assert!(summary.peak_in_flight <= 3);
    assert!(summary.peak_in_flight >= 1);
    assert!(fetcher.peak() <= 3);
}

#[tokio::test]
async fn cancellation_abandons_in_flight_work_after_grace() {
    let mut fetcher = MapFetcher::default();
    let sources: Vec<String> = (0..5).map(|i| format!("https://shop.test/stuck/{i}")).collect();
    for source in &sources {
        fetcher = fetcher.with(source, Response::Slow(Duration::from_secs(10), ITEM_PAGE));
    }

    let config = PipelineConfig {
        concurrency: 1,
        shutdown_grace_ms: 100,
        ..PipelineConfig::default()
    };
    let coordinator = coordinator(Arc::new(fetcher), Arc::new(MemorySink::new()), config);
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.run(sources.iter().map(SourceRef::new)),
    )
    .await
    .expect("run should finish soon after the grace period");

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.failure_count(), 5);
    for report in &summary.reports {
        assert!(matches!(
            report.outcome,
            PipelineOutcome::Failure(PipelineError::Cancelled)
        ));
    }
}

#[tokio::test]
async fn grace_period_lets_in_flight_documents_finish() {
    let mut fetcher = MapFetcher::default();
    let sources: Vec<String> = (0..6).map(|i| format!("https://shop.test/grace/{i}")).collect();
    for source in &sources {
        fetcher = fetcher.with(source, Response::Slow(Duration::from_millis(200), ITEM_PAGE));
    }

    let config = PipelineConfig {
        concurrency: 2,
        shutdown_grace_ms: 5_000,
        ..PipelineConfig::default()
    };
    let coordinator = coordinator(Arc::new(fetcher), Arc::new(MemorySink::new()), config);
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let summary = coordinator.run(sources.iter().map(SourceRef::new)).await;

    assert_eq!(summary.total(), 6);
    assert_eq!(summary.success_count(), 2);
    assert_eq!(summary.failure_count(), 4);
}

#[tokio::test]
async fn slow_stages_time_out_individually() {
    let fetcher = MapFetcher::default()
        .with("https://shop.test/slow", Response::Slow(Duration::from_secs(5), ITEM_PAGE));
    let config = PipelineConfig {
        fetch_timeout_ms: 50,
        ..PipelineConfig::default()
    };
    let summary = coordinator(Arc::new(fetcher), Arc::new(MemorySink::new()), config)
        .run([SourceRef::new("https://shop.test/slow")])
        .await;
    assert!(matches!(
        outcome(&summary, "https://shop.test/slow"),
        PipelineOutcome::Failure(PipelineError::Fetch(FetchError::Timeout))
    ));

    let fetcher = MapFetcher::default().with("https://shop.test/emit", Response::Html(ITEM_PAGE));
    let config = PipelineConfig {
        emit_timeout_ms: 50,
        ..PipelineConfig::default()
    };
    let summary = coordinator(
        Arc::new(fetcher),
        Arc::new(SlowSink(Duration::from_secs(5))),
        config,
    )
    .run([SourceRef::new("https://shop.test/emit")])
    .await;
    assert!(matches!(
        outcome(&summary, "https://shop.test/emit"),
        PipelineOutcome::Failure(PipelineError::StageTimeout(Stage::Emit))
    ));
}

static BIG_LISTING: Lazy<String> = Lazy::new(|| {
    let item = r#"<div class="item"><h2>Item</h2><span class="price">1</span></div>"#;
    format!("<html><body>{}</body></html>", item.repeat(50_000))
});

#[tokio::test]
async fn slow_parse_and_extract_time_out_as_their_stage() {
    let page = BIG_LISTING.as_str();

    let fetcher = MapFetcher::default().with("https://shop.test/big", Response::Html(page));
    let config = PipelineConfig {
        parse_timeout_ms: 1,
        ..PipelineConfig::default()
    };
    let summary = coordinator(Arc::new(fetcher), Arc::new(MemorySink::new()), config)
        .run([SourceRef::new("https://shop.test/big")])
        .await;
    assert!(matches!(
        outcome(&summary, "https://shop.test/big"),
        PipelineOutcome::Failure(PipelineError::StageTimeout(Stage::Parse))
    ));

    let fetcher = MapFetcher::default().with("https://shop.test/big", Response::Html(page));
    let config = PipelineConfig {
        parse_timeout_ms: 0,
        extract_timeout_ms: 1,
        ..PipelineConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), config)
        .run([SourceRef::new("https://shop.test/big")])
        .await;
    assert!(matches!(
        outcome(&summary, "https://shop.test/big"),
        PipelineOutcome::Failure(PipelineError::StageTimeout(Stage::Extract))
    ));
    assert_eq!(sink.record_count().await, 0);
}

#[tokio::test]
async fn emit_in_progress_is_not_abandoned_after_grace() {
    let fetcher = MapFetcher::default().with("https://shop.test/", Response::Html(ITEM_PAGE));
    let config = PipelineConfig {
        shutdown_grace_ms: 20,
        ..PipelineConfig::default()
    };
    let coordinator = coordinator(
        Arc::new(fetcher),
        Arc::new(SlowSink(Duration::from_millis(300))),
        config,
    );
    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let summary = coordinator.run([SourceRef::new("https://shop.test/")]).await;
    assert!(matches!(outcome(&summary, "https://shop.test/"), PipelineOutcome::Success(2)));
    assert_eq!(summary.reports[0].final_state, DocumentState::Done);
}

#[tokio::test]
async fn unknown_header_charset_still_succeeds() {
    let fetcher = MapFetcher::default().with(
        "https://shop.test/mb4",
        Response::Typed("text/html; charset=utf8mb4", ITEM_PAGE),
    );
    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), PipelineConfig::default())
        .run([SourceRef::new("https://shop.test/mb4")])
        .await;
    assert!(matches!(outcome(&summary, "https://shop.test/mb4"), PipelineOutcome::Success(2)));
    assert_eq!(sink.record_count().await, 2);
}

#[tokio::test]
async fn non_html_documents_are_skipped() {
    let fetcher = MapFetcher::default()
        .with("https://shop.test/file.pdf", Response::Typed("application/pdf", "%PDF-1.4"));
    let sink = Arc::new(MemorySink::new());
    let summary = coordinator(Arc::new(fetcher), sink.clone(), PipelineConfig::default())
        .run([SourceRef::new("https://shop.test/file.pdf")])
        .await;

    assert!(matches!(
        outcome(&summary, "https://shop.test/file.pdf"),
        PipelineOutcome::Success(0)
    ));
    assert_eq!(summary.reports[0].final_state, DocumentState::Done);
    assert_eq!(sink.record_count().await, 0);
}

#[tokio::test]
async fn duplicate_sources_are_processed_once() {
    let fetcher = MapFetcher::default().with("https://shop.test/", Response::Html(ITEM_PAGE));
    let summary = coordinator(
        Arc::new(fetcher),
        Arc::new(MemorySink::new()),
        PipelineConfig::default(),
    )
    .run(["https://shop.test/", "https://shop.test/", " https://shop.test/ "].map(SourceRef::new))
    .await;
    assert_eq!(summary.total(), 1);
}

const INDEX_PAGE: &str = r#"<html><body>
  <a href="page1.html">one</a>
  <a href="page2.html#reviews">two</a>
  <a href="page2.html">two again</a>
  <a href="/elsewhere.html">outside</a>
  <a href="https://other.test/a/">other host</a>
  <a href="mailto:shop@shop.test">mail</a>
</body></html>"#;

const LEAF_PAGE: &str = r#"<html><body>
  <div class="item"><h2>Leaf</h2></div>
  <a href="./">home</a>
</body></html>"#;

fn crawl_fetcher() -> MapFetcher {
    MapFetcher::default()
        .with("https://shop.test/a/", Response::Html(INDEX_PAGE))
        .with("https://shop.test/a/page1.html", Response::Html(LEAF_PAGE))
        .with("https://shop.test/a/page2.html", Response::Html(LEAF_PAGE))
}

#[tokio::test]
async fn link_discovery_stays_in_scope() {
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig {
        follow_links: true,
        ..PipelineConfig::default()
    };
    let summary = coordinator(Arc::new(crawl_fetcher()), sink.clone(), config)
        .run([SourceRef::new("https://shop.test/a/")])
        .await;

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.failure_count(), 0);
    assert_eq!(
        summary
            .report_for(&SourceRef::new("https://shop.test/a/"))
            .map(|r| r.links_discovered),
        Some(2)
    );
    assert_eq!(sink.record_count().await, 2);
}

#[tokio::test]
async fn link_discovery_respects_the_document_cap() {
    let config = PipelineConfig {
        follow_links: true,
        max_documents: Some(2),
        ..PipelineConfig::default()
    };
    let summary = coordinator(Arc::new(crawl_fetcher()), Arc::new(MemorySink::new()), config)
        .run([SourceRef::new("https://shop.test/a/")])
        .await;
    assert_eq!(summary.total(), 2);
}

#[tokio::test]
async fn links_are_ignored_unless_enabled() {
    let summary = coordinator(
        Arc::new(crawl_fetcher()),
        Arc::new(MemorySink::new()),
        PipelineConfig::default(),
    )
    .run([SourceRef::new("https://shop.test/a/")])
    .await;
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.reports[0].links_discovered, 0);
}

#[tokio::test]
async fn observer_errors_do_not_affect_the_run() {
    let fetcher = MapFetcher::default().with("https://shop.test/", Response::Html(ITEM_PAGE));
    let summary = coordinator(
        Arc::new(fetcher),
        Arc::new(MemorySink::new()),
        PipelineConfig::default(),
    )
    .with_observer(Arc::new(FailingObserver))
    .run([SourceRef::new("https://shop.test/")])
    .await;
    assert_eq!(summary.success_count(), 1);
}

#[tokio::test]
async fn empty_input_completes_immediately() {
    let summary = coordinator(
        Arc::new(MapFetcher::default()),
        Arc::new(MemorySink::new()),
        PipelineConfig::default(),
    )
    .run(Vec::<SourceRef>::new())
    .await;
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.peak_in_flight, 0);
}
