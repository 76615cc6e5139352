//! Run observers
//!
//! Observers see a run from the outside: when it starts, every finished
//! document, and the final summary. A failing observer is logged and
//! otherwise ignored.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::outcome::{DocumentReport, PipelineOutcome, RunSummary};

#[async_trait]
pub trait PipelineObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_run_started(&self, _run_id: Uuid, _seeds: usize) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_document_finished(&self, _report: &DocumentReport) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_run_finished(&self, _summary: &RunSummary) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reports progress through `tracing`
#[derive(Debug, Default)]
pub struct LogObserver;

#[async_trait]
impl PipelineObserver for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_run_started(&self, run_id: Uuid, seeds: usize) -> anyhow::Result<()> {
        info!("🚀 Run {} started with {} sources", run_id, seeds);
        Ok(())
    }

    async fn on_document_finished(&self, report: &DocumentReport) -> anyhow::Result<()> {
        match &report.outcome {
            PipelineOutcome::Success(records) => {
                info!("✅ {} - {} records in {:?}", report.source, records, report.elapsed);
            }
            PipelineOutcome::PartialFailure { records, errors } => {
                warn!(
                    "⚠️ {} - {} records, {} dropped: {}",
                    report.source,
                    records,
                    errors.len(),
                    errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                );
            }
            PipelineOutcome::Failure(error) => {
                warn!("❌ {} - {}", report.source, error);
            }
        }
        Ok(())
    }

    async fn on_run_finished(&self, summary: &RunSummary) -> anyhow::Result<()> {
        info!(
            "🏁 Run {} finished in {:.2}s: {} ok, {} partial, {} failed, {} records",
            summary.run_id,
            summary.elapsed.as_secs_f64(),
            summary.success_count(),
            summary.partial_count(),
            summary.failure_count(),
            summary.record_count()
        );
        Ok(())
    }
}
