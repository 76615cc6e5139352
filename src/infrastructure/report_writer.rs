//! Plain-text run report
//!
//! `ReportWriter` is a pipeline observer that writes one indented report file
//! per run: a line per document, error details beneath failed or partial
//! documents, and a closing stats block.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::domain::SourceRef;
use crate::pipeline::{DocumentReport, PipelineObserver, PipelineOutcome, RunSummary};

const INDENT: &str = "  ";

/// String builder that prefixes every line with the current indent
#[derive(Debug, Default)]
struct IndentWriter {
    out: String,
    depth: usize,
}

impl IndentWriter {
    fn line(&mut self, text: impl AsRef<str>) {
        for part in text.as_ref().lines() {
            if !part.is_empty() {
                self.out.push_str(&INDENT.repeat(self.depth));
            }
            self.out.push_str(part);
            self.out.push('\n');
        }
    }

    fn pair(&mut self, label: &str, value: impl std::fmt::Display) {
        self.line(format!("{label}: {value}"));
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn indent(&mut self) {
        self.depth += 1;
    }

    fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

/// Writes a plain-text report when the run finishes
pub struct ReportWriter {
    path: PathBuf,
    started_at: Mutex<Option<DateTime<Local>>>,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started_at: Mutex::new(None),
        }
    }

    /// `<host>-<timestamp>.txt` inside `dir`, named after the first source
    pub fn in_directory(dir: impl AsRef<Path>, first_source: &SourceRef) -> Self {
        let host = first_source
            .as_url()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| "local".to_string());
        let file_name = format!("{}-{}.txt", host, Local::now().format("%Y%m%d-%H%M%S"));
        Self::new(dir.as_ref().join(file_name))
    }

    /// A file report at `target`, or a host-named one when `target` is an
    /// existing directory
    pub fn for_target(target: impl AsRef<Path>, first_source: &SourceRef) -> Self {
        let target = target.as_ref();
        if target.is_dir() {
            Self::in_directory(target, first_source)
        } else {
            Self::new(target)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the full report text
    pub fn render(summary: &RunSummary, started_at: Option<DateTime<Local>>) -> String {
        let mut w = IndentWriter::default();
        w.line(format!("Run {}", summary.run_id));
        if let Some(started_at) = started_at {
            w.pair("Started", started_at.format("%Y-%m-%d %H:%M:%S"));
        }
        w.blank();

        w.line("Documents");
        w.indent();
        for report in &summary.reports {
            write_document(&mut w, report);
        }
        w.dedent();

        w.blank();
        w.line("******* Stats *******");
        w.indent();
        w.pair("Total documents", summary.total());
        w.pair("Succeeded", summary.success_count());
        w.pair("Partial", summary.partial_count());
        w.pair("Failed", summary.failure_count());
        w.pair("Records", summary.record_count());
        w.pair("Peak in flight", summary.peak_in_flight);
        w.pair(
            "Time taken (in seconds)",
            format!("{:.2}", summary.elapsed.as_secs_f64()),
        );
        w.dedent();
        w.out
    }
}

fn write_document(w: &mut IndentWriter, report: &DocumentReport) {
    let mut header = String::new();
    match &report.outcome {
        PipelineOutcome::Success(records) => {
            let _ = write!(header, "[ok]      {} ({} records", report.source, records);
        }
        PipelineOutcome::PartialFailure { records, errors } => {
            let _ = write!(
                header,
                "[partial] {} ({} records, {} dropped",
                report.source,
                records,
                errors.len()
            );
        }
        PipelineOutcome::Failure(_) => {
            let _ = write!(header, "[failed]  {} ({}", report.source, report.final_state);
        }
    }
    if report.links_discovered > 0 {
        let _ = write!(header, ", {} links", report.links_discovered);
    }
    let _ = write!(header, ", {:.2}s)", report.elapsed.as_secs_f64());
    w.line(header);

    w.indent();
    match &report.outcome {
        PipelineOutcome::PartialFailure { errors, .. } => {
            for error in errors {
                w.pair("Error", error);
            }
        }
        PipelineOutcome::Failure(error) => w.pair("Error", error),
        PipelineOutcome::Success(_) => {}
    }
    w.dedent();
}

#[async_trait]
impl PipelineObserver for ReportWriter {
    fn name(&self) -> &str {
        "report"
    }

    async fn on_run_started(&self, _run_id: Uuid, _seeds: usize) -> anyhow::Result<()> {
        *self.started_at.lock().await = Some(Local::now());
        Ok(())
    }

    async fn on_run_finished(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let started_at = *self.started_at.lock().await;
        let text = Self::render(summary, started_at);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, text).await?;
        info!("📄 Report written to {:?}", self.path);
        Ok(())
    }
}
