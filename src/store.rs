use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{PhotoId, Profile, UserId};
use crate::error::HarvestError;
use crate::harvest::ItemFailure;

/// Prefix of in-flight temp files. Ids may not start with a dot, so these never
/// collide with stored entries.
pub const TEMP_PREFIX: &str = ".harvest-";

const PROFILE_EXT: &str = "json";
const PHOTO_EXT: &str = "jpg";

/// Two flat, id-keyed directories: `profiles/<user_id>.json` and
/// `photos/<photo_id>.jpg`. Every write goes through a temp file in the same
/// directory and a rename, so a file that exists is always complete.
#[derive(Debug, Clone)]
pub struct Store {
    profiles_root: Utf8PathBuf,
    photos_root: Utf8PathBuf,
}

#[derive(Debug, Default)]
pub struct ProfileScan {
    pub profiles: Vec<Profile>,
    pub unreadable: Vec<ItemFailure>,
}

impl Store {
    pub fn new(profiles_root: Utf8PathBuf, photos_root: Utf8PathBuf) -> Self {
        Self {
            profiles_root,
            photos_root,
        }
    }

    pub fn profiles_root(&self) -> &Utf8Path {
        &self.profiles_root
    }

    pub fn photos_root(&self) -> &Utf8Path {
        &self.photos_root
    }

    pub fn profile_path(&self, id: &UserId) -> Utf8PathBuf {
        self.profiles_root.join(format!("{id}.{PROFILE_EXT}"))
    }

    pub fn photo_path(&self, id: &PhotoId) -> Utf8PathBuf {
        self.photos_root.join(format!("{id}.{PHOTO_EXT}"))
    }

    pub fn ensure_profiles_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.profiles_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{}: {err}", self.profiles_root)))
    }

    pub fn ensure_photos_root(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.photos_root.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{}: {err}", self.photos_root)))
    }

    pub fn profile_exists(&self, id: &UserId) -> bool {
        self.profile_path(id).as_std_path().is_file()
    }

    pub fn photo_exists(&self, id: &PhotoId) -> bool {
        self.photo_path(id).as_std_path().is_file()
    }

    /// Stores the profile unless one with the same id is already present.
    /// Returns whether a file was written.
    pub fn put_profile_if_absent(&self, profile: &Profile) -> Result<bool, HarvestError> {
        if self.profile_exists(profile.user_id()) {
            return Ok(false);
        }
        let content = serde_json::to_vec(profile.record())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.profile_path(profile.user_id()), &content)?;
        Ok(true)
    }

    pub fn read_profile(&self, id: &UserId) -> Result<Profile, HarvestError> {
        read_profile_file(&self.profile_path(id))
    }

    pub fn put_photo(&self, id: &PhotoId, content: &[u8]) -> Result<(), HarvestError> {
        Self::write_bytes_atomic(&self.photo_path(id), content)
    }

    pub fn read_photo(&self, id: &PhotoId) -> Result<Vec<u8>, HarvestError> {
        let path = self.photo_path(id);
        fs::read(path.as_std_path()).map_err(|err| HarvestError::Filesystem(format!("{path}: {err}")))
    }

    /// Loads every stored profile in file-name order. Files that cannot be read
    /// or parsed are reported rather than aborting the scan.
    pub fn scan_profiles(&self) -> Result<ProfileScan, HarvestError> {
        let mut scan = ProfileScan::default();
        for (stem, path) in list_entries(&self.profiles_root, PROFILE_EXT)? {
            match read_profile_file(&path) {
                Ok(profile) => scan.profiles.push(profile),
                Err(err) => {
                    tracing::warn!(%path, error = %err, "skipping unreadable profile");
                    scan.unreadable.push(ItemFailure {
                        id: stem,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(scan)
    }

    pub fn list_photo_ids(&self) -> Result<Vec<PhotoId>, HarvestError> {
        let mut ids = Vec::new();
        for (stem, path) in list_entries(&self.photos_root, PHOTO_EXT)? {
            match stem.parse::<PhotoId>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(%path, "ignoring photo with unusable name"),
            }
        }
        Ok(ids)
    }

    /// Removes temp files left behind by an interrupted scrape. Only the
    /// scraper writes here, so this must not run while another process
    /// scrapes into the same directory.
    pub fn sweep_profile_temp_files(&self) -> Result<usize, HarvestError> {
        sweep_temp_files(&self.profiles_root)
    }

    /// Removes temp files left behind by an interrupted download or resize.
    pub fn sweep_photo_temp_files(&self) -> Result<usize, HarvestError> {
        sweep_temp_files(&self.photos_root)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{parent}: {err}")))?;
        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("{path}: {}", err.error)))?;
        Ok(())
    }
}

fn sweep_temp_files(root: &Utf8Path) -> Result<usize, HarvestError> {
    if !root.as_std_path().is_dir() {
        return Ok(0);
    }
    let entries = root
        .read_dir_utf8()
        .map_err(|err| HarvestError::Filesystem(format!("{root}: {err}")))?;
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        if entry.file_name().starts_with(TEMP_PREFIX) && entry.path().as_std_path().is_file() {
            fs::remove_file(entry.path().as_std_path())
                .map_err(|err| HarvestError::Filesystem(format!("{}: {err}", entry.path())))?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(%root, removed, "removed leftover temp files");
    }
    Ok(removed)
}

fn read_profile_file(path: &Utf8Path) -> Result<Profile, HarvestError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("{path}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| HarvestError::ProfileParse {
        path: path.to_string(),
        message: err.to_string(),
    })
}

/// Stored entries of one directory as `(stem, path)`, sorted by name. Hidden
/// files (including temp files) and other extensions are skipped; a missing
/// directory is an empty store.
fn list_entries(root: &Utf8Path, ext: &str) -> Result<Vec<(String, Utf8PathBuf)>, HarvestError> {
    if !root.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let entries = root
        .read_dir_utf8()
        .map_err(|err| HarvestError::Filesystem(format!("{root}: {err}")))?;
    let mut items = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%root, error = %err, "skipping unlistable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_name().starts_with('.') || !path.as_std_path().is_file() {
            continue;
        }
        if path.extension() != Some(ext) {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            items.push((stem.to_string(), path.to_path_buf()));
        }
    }
    items.sort();
    Ok(items)
}
