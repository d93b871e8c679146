use std::collections::HashSet;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::Profile;

pub const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct CountSummary {
    pub profiles: usize,
    pub unreadable_profiles: usize,
    pub distinct_photos: usize,
}

/// Number of distinct photo ids referenced by `profiles`, reporting progress
/// each time another [`PROGRESS_EVERY`] ids have been found. Only a photo's
/// `id` is read, so descriptors the downloader cannot use still count.
pub fn count_distinct_photos(profiles: &[Profile], sink: &dyn ProgressSink) -> usize {
    let mut seen = HashSet::new();
    for profile in profiles {
        for id in profile.photo_ids() {
            if seen.insert(id) && seen.len() % PROGRESS_EVERY == 0 {
                sink.event(ProgressEvent::info(format!(
                    "found {} photos so far",
                    seen.len()
                )));
            }
        }
    }
    seen.len()
}
