use std::io::Read;

use serde::Serialize;
use serde_json::Value;

use crate::counter::{self, CountSummary};
use crate::domain::{PhotoDescriptor, PhotoEntry, PhotoId, Processing, Profile, QueueOrder};
use crate::encounters::EncounterSource;
use crate::error::HarvestError;
use crate::fetcher::PhotoFetcher;
use crate::harvest::{self, ItemFailure, LoopControl, LoopOptions, RunSummary};
use crate::imaging;
use crate::scraper::{self, ScrapeOptions, ScrapeSummary};
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::throttle::RateLimiter;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub order: QueueOrder,
    pub per_profile_limit: Option<usize>,
    pub processing: Processing,
    pub requests_per_second: Option<f64>,
    pub burst: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            order: QueueOrder::RoundRobin,
            per_profile_limit: None,
            processing: Processing::Raw,
            requests_per_second: None,
            burst: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub profiles: usize,
    pub unreadable_profiles: Vec<ItemFailure>,
    pub temp_files_removed: usize,
    pub run: RunSummary,
}

#[derive(Debug, Clone, Copy)]
pub struct ResizeOptions {
    pub max: u32,
    pub quality: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResizeResult {
    pub temp_files_removed: usize,
    pub run: RunSummary,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Also fetch the photos of the imported profiles.
    pub download: Option<DownloadOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub records: usize,
    pub new_profiles: usize,
    pub existing_profiles: usize,
    /// Records without a usable `user_id`, keyed as `record <n>`.
    pub skipped: Vec<ItemFailure>,
    pub cancelled: bool,
    pub temp_files_removed: usize,
    pub photos: Option<RunSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: EventLevel,
    pub message: String,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Info,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Failure,
            message: message.into(),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Clone)]
pub struct App<S: EncounterSource, F: PhotoFetcher> {
    store: Store,
    source: S,
    fetcher: F,
}

impl<S: EncounterSource, F: PhotoFetcher> App<S, F> {
    pub fn new(store: Store, source: S, fetcher: F) -> Self {
        Self {
            store,
            source,
            fetcher,
        }
    }

    pub fn scrape(
        &self,
        options: &ScrapeOptions,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> Result<ScrapeSummary, HarvestError> {
        sink.event(ProgressEvent::info(format!(
            "phase=Scrape; storing profiles in {}",
            self.store.profiles_root()
        )));
        scraper::scrape(&self.source, &self.store, options, shutdown, sink)
    }

    /// Fetches every photo referenced by a stored profile that is not yet in
    /// the photo store.
    pub fn download(
        &self,
        options: &DownloadOptions,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, HarvestError> {
        self.store.ensure_photos_root()?;
        let temp_files_removed = self.store.sweep_photo_temp_files()?;
        let scan = self.store.scan_profiles()?;
        sink.event(ProgressEvent::info(format!(
            "phase=Resolve; {} profiles ({} unreadable)",
            scan.profiles.len(),
            scan.unreadable.len()
        )));
        let run = self.fetch_photos(&scan.profiles, options, shutdown, sink);

        Ok(DownloadResult {
            profiles: scan.profiles.len(),
            unreadable_profiles: scan.unreadable,
            temp_files_removed,
            run,
        })
    }

    /// Reads a stream of user records (one JSON object after another, as
    /// JSON lines or concatenated) into the profile store. Records already
    /// stored are left alone. A syntax error ends the import; records stored
    /// before it stay stored.
    pub fn import<R: Read>(
        &self,
        input: R,
        options: &ImportOptions,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, HarvestError> {
        self.store.ensure_profiles_root()?;
        let mut result = ImportResult::default();
        let mut imported = Vec::new();

        let stream = serde_json::Deserializer::from_reader(input).into_iter::<Value>();
        for (index, record) in stream.enumerate() {
            if shutdown.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let record = record.map_err(|err| HarvestError::ImportParse {
                line: err.line(),
                message: err.to_string(),
            })?;
            result.records += 1;
            match Profile::from_value(record) {
                Ok(profile) => {
                    if self.store.put_profile_if_absent(&profile)? {
                        result.new_profiles += 1;
                        sink.event(ProgressEvent::info(profile.user_id().to_string()));
                    } else {
                        result.existing_profiles += 1;
                    }
                    imported.push(profile);
                }
                Err(err) => {
                    let id = format!("record {}", index + 1);
                    tracing::warn!(record = index + 1, error = %err, "skipping record");
                    sink.event(ProgressEvent::failure(format!("skipped {id}: {err}")));
                    result.skipped.push(ItemFailure {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Some(download) = &options.download {
            if !result.cancelled {
                self.store.ensure_photos_root()?;
                result.temp_files_removed = self.store.sweep_photo_temp_files()?;
                result.photos = Some(self.fetch_photos(&imported, download, shutdown, sink));
            }
        }
        Ok(result)
    }

    fn fetch_photos(
        &self,
        profiles: &[Profile],
        options: &DownloadOptions,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> RunSummary {
        let limiter = match options.requests_per_second {
            Some(rate) => RateLimiter::per_second(rate, options.burst),
            None => RateLimiter::unlimited(),
        };
        let mut control = LoopControl::new(limiter, shutdown.clone(), sink);
        let loop_options = LoopOptions {
            order: options.order,
            per_parent_limit: options.per_profile_limit,
        };
        harvest::fetch_missing(
            profiles,
            Profile::photo_entries,
            |entry: &PhotoEntry| match entry {
                PhotoEntry::Valid(photo) => self.store.photo_exists(&photo.id),
                PhotoEntry::Invalid { id: Some(id), .. } => self.store.photo_exists(id),
                PhotoEntry::Invalid { id: None, .. } => false,
            },
            |entry: &PhotoEntry| match entry {
                PhotoEntry::Valid(photo) => self.fetch_photo(photo, options.processing),
                PhotoEntry::Invalid { reason, .. } => {
                    Err(HarvestError::InvalidPhoto(reason.clone()))
                }
            },
            &loop_options,
            &mut control,
        )
    }

    fn fetch_photo(
        &self,
        photo: &PhotoDescriptor,
        processing: Processing,
    ) -> Result<(), HarvestError> {
        let url = photo.fetch_url()?;
        let body = self.fetcher.fetch(&url)?;
        if body.is_empty() {
            return Err(HarvestError::Http(format!("empty response from {url}")));
        }
        let content = match processing {
            Processing::Raw => body,
            Processing::Thumbnail { max, quality } => imaging::thumbnail(&body, max, quality)?,
        };
        self.store.put_photo(&photo.id, &content)
    }

    /// Shrinks every stored photo larger than `max`×`max` in place. Photos
    /// already within bounds are left untouched.
    pub fn resize(
        &self,
        options: &ResizeOptions,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> Result<ResizeResult, HarvestError> {
        let temp_files_removed = self.store.sweep_photo_temp_files()?;
        let ids = self.store.list_photo_ids()?;
        sink.event(ProgressEvent::info(format!(
            "phase=Resolve; {} photos",
            ids.len()
        )));

        let mut control = LoopControl::new(RateLimiter::unlimited(), shutdown.clone(), sink);
        let loop_options = LoopOptions {
            order: QueueOrder::Sequential,
            per_parent_limit: None,
        };
        let ResizeOptions { max, quality } = *options;
        let run = harvest::fetch_missing(
            &ids,
            |id: &PhotoId| vec![id.clone()],
            // unreadable headers fall through to the full decode, which reports them
            |id: &PhotoId| {
                imaging::file_fits_within(&self.store.photo_path(id), max).unwrap_or(false)
            },
            |id: &PhotoId| {
                let content = self.store.read_photo(id)?;
                let resized = imaging::thumbnail(&content, max, quality)?;
                self.store.put_photo(id, &resized)
            },
            &loop_options,
            &mut control,
        );

        Ok(ResizeResult {
            temp_files_removed,
            run,
        })
    }

    pub fn count(&self, sink: &dyn ProgressSink) -> Result<CountSummary, HarvestError> {
        let scan = self.store.scan_profiles()?;
        let distinct_photos = counter::count_distinct_photos(&scan.profiles, sink);
        Ok(CountSummary {
            profiles: scan.profiles.len(),
            unreadable_profiles: scan.unreadable.len(),
            distinct_photos,
        })
    }
}
