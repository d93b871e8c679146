//! The incremental bulk-fetch loop.
//!
//! Parents (profiles) yield children (photo descriptors); every child that is
//! not yet persisted is fetched and persisted. Per-item failures are recorded
//! in the [`RunSummary`] and never abort the run.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{PhotoEntry, PhotoId, QueueOrder};
use crate::error::HarvestError;
use crate::shutdown::Shutdown;
use crate::throttle::RateLimiter;

/// Identity of a child, used for de-duplication and reporting.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for PhotoEntry {
    fn key(&self) -> &str {
        match self {
            PhotoEntry::Valid(photo) => photo.id.as_str(),
            PhotoEntry::Invalid { key, .. } => key.as_str(),
        }
    }
}

impl Keyed for PhotoId {
    fn key(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Processed,
    Skipped,
    Failed(HarvestError),
}

#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub order: QueueOrder,
    /// Take at most this many children from each parent.
    pub per_parent_limit: Option<usize>,
}

/// Pacing, cancellation and progress reporting for one run.
pub struct LoopControl<'a> {
    pub limiter: RateLimiter,
    pub shutdown: Shutdown,
    pub sink: &'a dyn ProgressSink,
}

impl<'a> LoopControl<'a> {
    pub fn new(limiter: RateLimiter, shutdown: Shutdown, sink: &'a dyn ProgressSink) -> Self {
        Self {
            limiter,
            shutdown,
            sink,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub elapsed_ms: u64,
    pub parents: usize,
    /// Distinct children considered.
    pub queued: usize,
    /// Children left out by the per-parent limit.
    pub deferred: usize,
    /// Already persisted; nothing fetched.
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    fn record(&mut self, key: &str, outcome: ItemOutcome, sink: &dyn ProgressSink) {
        match outcome {
            ItemOutcome::Processed => self.processed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed(err) => {
                tracing::warn!(id = key, error = %err, "item failed");
                sink.event(ProgressEvent::failure(format!("failed for {key}: {err}")));
                self.failed += 1;
                self.failures.push(ItemFailure {
                    id: key.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

/// Flattens the children of `parents` into one de-duplicated work queue.
/// Returns the queue and the number of children dropped by the per-parent
/// limit.
pub fn build_queue<P, C, E>(parents: &[P], mut extract: E, options: &LoopOptions) -> (Vec<C>, usize)
where
    C: Keyed,
    E: FnMut(&P) -> Vec<C>,
{
    let mut deferred = 0;
    let per_parent: Vec<Vec<C>> = parents
        .iter()
        .map(|parent| {
            let mut children = extract(parent);
            if let Some(limit) = options.per_parent_limit {
                if children.len() > limit {
                    deferred += children.len() - limit;
                    children.truncate(limit);
                }
            }
            children
        })
        .collect();

    let ordered: Vec<C> = match options.order {
        QueueOrder::Sequential => per_parent.into_iter().flatten().collect(),
        QueueOrder::RoundRobin => {
            let mut iters: Vec<_> = per_parent.into_iter().map(Vec::into_iter).collect();
            let mut out = Vec::new();
            loop {
                let before = out.len();
                for iter in iters.iter_mut() {
                    if let Some(child) = iter.next() {
                        out.push(child);
                    }
                }
                if out.len() == before {
                    break;
                }
            }
            out
        }
    };

    let mut seen = HashSet::new();
    let queue = ordered
        .into_iter()
        .filter(|child| seen.insert(child.key().to_string()))
        .collect();
    (queue, deferred)
}

/// Visits every parent's children and fetches each one not yet persisted.
///
/// `is_persisted` is consulted right before the fetch, so a child persisted
/// earlier in the same run (or by a previous run) costs no fetch. Fetch
/// failures are recorded per item and the run continues.
pub fn fetch_missing<P, C, E, X, F>(
    parents: &[P],
    extract: E,
    mut is_persisted: X,
    mut fetch: F,
    options: &LoopOptions,
    control: &mut LoopControl<'_>,
) -> RunSummary
where
    C: Keyed,
    E: FnMut(&P) -> Vec<C>,
    X: FnMut(&C) -> bool,
    F: FnMut(&C) -> Result<(), HarvestError>,
{
    let start = Instant::now();
    let (queue, deferred) = build_queue(parents, extract, options);
    let mut summary = RunSummary {
        started_at: chrono::Utc::now().to_rfc3339(),
        parents: parents.len(),
        queued: queue.len(),
        deferred,
        ..RunSummary::default()
    };
    tracing::debug!(
        parents = summary.parents,
        queued = summary.queued,
        deferred,
        "work queue built"
    );

    for child in &queue {
        if control.shutdown.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        let key = child.key();
        if is_persisted(child) {
            summary.record(key, ItemOutcome::Skipped, control.sink);
            continue;
        }
        if !control.limiter.acquire(&control.shutdown) {
            summary.cancelled = true;
            break;
        }
        control.sink.event(ProgressEvent::info(key.to_string()));
        let outcome = match fetch(child) {
            Ok(()) => ItemOutcome::Processed,
            Err(err) => ItemOutcome::Failed(err),
        };
        summary.record(key, outcome, control.sink);
    }

    summary.elapsed_ms = start.elapsed().as_millis() as u64;
    summary
}
