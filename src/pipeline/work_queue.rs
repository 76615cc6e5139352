//! Shared work queue
//!
//! The only structure several workers mutate. It hands out sources, counts
//! how many are in flight, and decides when a run is over: nothing pending
//! and nothing in flight means no more work can ever appear.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::SourceRef;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<SourceRef>,
    seen: HashSet<SourceRef>,
    in_flight: usize,
    peak_in_flight: usize,
    finished: bool,
}

/// Why a submission was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    Duplicate,
    LimitReached,
    Finished,
}

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Cap on total submissions, seeds excluded from the check
    max_documents: Option<usize>,
}

impl WorkQueue {
    pub fn new(max_documents: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_documents,
        }
    }

    /// Queue an initial source; only duplicates are refused
    pub async fn submit_seed(&self, source: SourceRef) -> Result<(), Rejected> {
        self.push(source, false).await
    }

    /// Queue a discovered source, subject to the document cap
    pub async fn submit(&self, source: SourceRef) -> Result<(), Rejected> {
        self.push(source, true).await
    }

    async fn push(&self, source: SourceRef, capped: bool) -> Result<(), Rejected> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(Rejected::Finished);
        }
        if state.seen.contains(&source) {
            return Err(Rejected::Duplicate);
        }
        if capped && self.max_documents.is_some_and(|max| state.seen.len() >= max) {
            return Err(Rejected::LimitReached);
        }
        state.seen.insert(source.clone());
        state.pending.push_back(source);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next source
    ///
    /// Returns `None` once the queue is exhausted or `cancel` fires. A
    /// returned source counts as in flight until `complete` is called.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<SourceRef> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a wake-up between the check
            // and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if cancel.is_cancelled() || state.finished {
                    return None;
                }
                if let Some(source) = state.pending.pop_front() {
                    state.in_flight += 1;
                    state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
                    return Some(source);
                }
                if state.in_flight == 0 {
                    state.finished = true;
                    debug!("Work queue exhausted");
                    self.notify.notify_waiters();
                    return None;
                }
            }

            tokio::select! {
                () = &mut notified => {}
                () = cancel.cancelled() => return None,
            }
        }
    }

    /// Mark one source returned by `next` as finished
    pub async fn complete(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Remove and return everything still pending
    pub async fn drain(&self) -> Vec<SourceRef> {
        let mut state = self.state.lock().await;
        state.finished = true;
        state.pending.drain(..).collect()
    }

    pub async fn peak_in_flight(&self) -> usize {
        self.state.lock().await.peak_in_flight
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }
}
