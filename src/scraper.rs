use std::time::{Duration, Instant};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::encounters::EncounterSource;
use crate::error::HarvestError;
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::throttle::RateLimiter;

/// Exponential backoff: `initial`, then doubling up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Stop after this many page requests; `None` runs until cancelled.
    pub max_pages: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub pages_per_minute: Option<f64>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_consecutive_failures: None,
            backoff_initial: Duration::from_secs(60),
            backoff_max: Duration::from_secs(15 * 60),
            pages_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeSummary {
    pub started_at: String,
    pub elapsed_ms: u64,
    pub requests: u64,
    pub pages: u64,
    pub users_seen: u64,
    /// Page entries without a usable `user_id`.
    pub skipped_users: u64,
    pub new_profiles: u64,
    pub existing_profiles: u64,
    pub disliked: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub cancelled: bool,
    pub temp_files_removed: usize,
}

/// Polls encounter pages, stores unseen profiles and dislikes every user seen.
///
/// A failed page (either command, or a store write) is logged and followed by
/// a backoff sleep; a successful page resets the backoff. The loop ends on
/// cancellation, after `max_pages` requests, or with
/// [`HarvestError::TooManyFailures`].
pub fn scrape<S: EncounterSource>(
    source: &S,
    store: &Store,
    options: &ScrapeOptions,
    shutdown: &Shutdown,
    sink: &dyn ProgressSink,
) -> Result<ScrapeSummary, HarvestError> {
    store.ensure_profiles_root()?;
    let start = Instant::now();
    let mut summary = ScrapeSummary {
        started_at: chrono::Utc::now().to_rfc3339(),
        temp_files_removed: store.sweep_profile_temp_files()?,
        ..ScrapeSummary::default()
    };
    let mut limiter = options
        .pages_per_minute
        .map(|rate| RateLimiter::per_minute(rate, 1))
        .unwrap_or_default();
    let mut backoff = Backoff::new(options.backoff_initial, options.backoff_max);
    let mut consecutive_failures = 0u32;

    loop {
        if shutdown.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        if let Some(max) = options.max_pages {
            if summary.requests >= max {
                break;
            }
        }
        if !limiter.acquire(shutdown) {
            summary.cancelled = true;
            break;
        }
        summary.requests += 1;

        match scrape_page(source, store, shutdown, sink, &mut summary) {
            Ok(()) => {
                consecutive_failures = 0;
                backoff.reset();
            }
            Err(err) => {
                consecutive_failures += 1;
                summary.failures += 1;
                tracing::warn!(error = %err, consecutive_failures, "encounter page failed");
                sink.event(ProgressEvent::failure(format!("scrape: {err}")));
                summary.last_error = Some(err.to_string());
                if let Some(max) = options.max_consecutive_failures {
                    if consecutive_failures >= max {
                        return Err(HarvestError::TooManyFailures(consecutive_failures));
                    }
                }
                let delay = backoff.next_delay();
                sink.event(ProgressEvent::info(format!(
                    "backing off for {}s",
                    delay.as_secs()
                )));
                if shutdown.sleep(delay) {
                    summary.cancelled = true;
                    break;
                }
            }
        }
    }

    summary.elapsed_ms = start.elapsed().as_millis() as u64;
    Ok(summary)
}

fn scrape_page<S: EncounterSource>(
    source: &S,
    store: &Store,
    shutdown: &Shutdown,
    sink: &dyn ProgressSink,
    summary: &mut ScrapeSummary,
) -> Result<(), HarvestError> {
    let page = source.next_page()?;
    summary.pages += 1;
    summary.skipped_users += page.skipped as u64;
    if page.users.is_empty() {
        tracing::debug!(skipped = page.skipped, "encounters page had no users");
    }
    for user in page.users {
        if shutdown.is_cancelled() {
            break;
        }
        summary.users_seen += 1;
        if store.put_profile_if_absent(&user)? {
            summary.new_profiles += 1;
            sink.event(ProgressEvent::info(user.user_id().to_string()));
        } else {
            summary.existing_profiles += 1;
        }
        source.dislike(user.user_id())?;
        summary.disliked += 1;
    }
    Ok(())
}
