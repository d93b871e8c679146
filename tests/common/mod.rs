#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use profile_harvester::app::{EventLevel, ProgressEvent, ProgressSink};
use profile_harvester::domain::{Album, PhotoDescriptor, Profile, UserId};
use profile_harvester::encounters::{EncounterPage, EncounterSource};
use profile_harvester::error::HarvestError;
use profile_harvester::fetcher::PhotoFetcher;
use profile_harvester::store::Store;

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new(root.join("profiles"), root.join("photos"));
    (temp, store)
}

pub fn photo(id: &str) -> PhotoDescriptor {
    PhotoDescriptor::new(id.parse().unwrap(), format!("//x/{id}.jpg"))
}

pub fn profile(user: &str, albums: Vec<Album>) -> Profile {
    Profile::new(user.parse().unwrap(), albums)
}

pub fn profile_with_photos(user: &str, ids: &[&str]) -> Profile {
    profile(
        user,
        vec![Album::with_photos(ids.iter().map(|id| photo(id)).collect())],
    )
}

/// A profile from raw JSON, for records the builders cannot express.
pub fn raw_profile(value: serde_json::Value) -> Profile {
    Profile::from_value(value).unwrap()
}

pub fn write_profiles(store: &Store, profiles: &[Profile]) {
    for profile in profiles {
        assert!(store.put_profile_if_absent(profile).unwrap());
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Returns canned bodies per URL (or `bytes of <url>`) and records every call.
#[derive(Default)]
pub struct MockFetcher {
    pub calls: Mutex<Vec<String>>,
    pub bodies: HashMap<String, Vec<u8>>,
    pub failing: HashSet<String>,
}

impl MockFetcher {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PhotoFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HarvestError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(HarvestError::Command(format!("curl exited with 22 for {url}")));
        }
        Ok(self
            .bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("bytes of {url}").into_bytes()))
    }
}

/// Serves the same page on every request and records dislikes.
#[derive(Default)]
pub struct MockEncounters {
    pub page: Vec<Profile>,
    pub skipped: usize,
    pub page_failures: Mutex<u32>,
    pub failing_dislike: Option<UserId>,
    pub requests: Mutex<u32>,
    pub disliked: Mutex<Vec<String>>,
}

impl EncounterSource for MockEncounters {
    fn next_page(&self) -> Result<EncounterPage, HarvestError> {
        *self.requests.lock().unwrap() += 1;
        let mut failures = self.page_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(HarvestError::Command("encounters.sh exited with 1".to_string()));
        }
        Ok(EncounterPage {
            users: self.page.clone(),
            skipped: self.skipped,
        })
    }

    fn dislike(&self, user: &UserId) -> Result<(), HarvestError> {
        if self.failing_dislike.as_ref() == Some(user) {
            return Err(HarvestError::Command("dislike.sh exited with 1".to_string()));
        }
        self.disliked.lock().unwrap().push(user.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn failures(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == EventLevel::Failure)
            .map(|event| event.message.clone())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
