//! Pipeline layer - concurrent fetch → parse → extract → emit

pub mod coordinator;
pub mod discovery;
pub mod observer;
pub mod outcome;
pub mod state;
pub mod work_queue;

pub use coordinator::{PipelineConfig, PipelineCoordinator};
pub use discovery::{discover_links, CrawlScope};
pub use observer::{LogObserver, PipelineObserver};
pub use outcome::{DocumentReport, PipelineError, PipelineOutcome, RunSummary, Stage};
pub use state::{DocumentState, Lifecycle, TransitionError};
pub use work_queue::{Rejected, WorkQueue};
