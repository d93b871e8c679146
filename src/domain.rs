use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HarvestError;

/// Both ids become file names in the stores, so anything that could escape the
/// store directory is rejected.
fn is_valid_key(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.starts_with('.')
        && !value
            .chars()
            .any(|ch| ch == '/' || ch == '\\' || ch == '\0')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !is_valid_key(value) {
            return Err(HarvestError::InvalidUserId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for UserId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_key(&value) {
            return Err(HarvestError::InvalidUserId(value));
        }
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhotoId(String);

impl PhotoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PhotoId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !is_valid_key(value) {
            return Err(HarvestError::InvalidPhotoId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for PhotoId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_key(&value) {
            return Err(HarvestError::InvalidPhotoId(value));
        }
        Ok(Self(value))
    }
}

impl From<PhotoId> for String {
    fn from(value: PhotoId) -> Self {
        value.0
    }
}

/// A scraped user record, kept as the JSON object it arrived as so a stored
/// profile is byte-for-byte what the source sent. Only `user_id` is required;
/// albums and photos are read leniently on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Profile {
    user_id: UserId,
    record: Map<String, Value>,
}

impl Profile {
    pub fn new(user_id: UserId, albums: Vec<Album>) -> Self {
        let mut record = Map::new();
        record.insert("user_id".to_string(), Value::String(user_id.to_string()));
        record.insert(
            "albums".to_string(),
            Value::Array(albums.into_iter().map(Value::from).collect()),
        );
        Self { user_id, record }
    }

    /// Accepts any JSON object with a usable string `user_id`.
    pub fn from_value(value: Value) -> Result<Self, HarvestError> {
        let Value::Object(record) = value else {
            return Err(HarvestError::InvalidProfile(
                "expected a JSON object".to_string(),
            ));
        };
        let user_id = match record.get("user_id") {
            Some(Value::String(id)) => id.parse::<UserId>()?,
            Some(other) => return Err(HarvestError::InvalidUserId(other.to_string())),
            None => {
                return Err(HarvestError::InvalidProfile(
                    "missing user_id".to_string(),
                ));
            }
        };
        Ok(Self { user_id, record })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Raw entries of every album's `photos` list, in album order. Albums
    /// without a `photos` array contribute nothing.
    fn photo_values(&self) -> impl Iterator<Item = &Value> {
        self.record
            .get("albums")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|album| album.get("photos").and_then(Value::as_array))
            .flatten()
    }

    /// Every photo entry, each parsed on its own so one malformed descriptor
    /// does not hide its siblings.
    pub fn photo_entries(&self) -> Vec<PhotoEntry> {
        self.photo_values()
            .enumerate()
            .map(|(index, value)| match PhotoDescriptor::deserialize(value) {
                Ok(photo) => PhotoEntry::Valid(photo),
                Err(err) => {
                    let raw = raw_photo_id(value);
                    PhotoEntry::Invalid {
                        id: raw.as_deref().and_then(|id| id.parse().ok()),
                        key: raw.unwrap_or_else(|| format!("{}#{index}", self.user_id)),
                        reason: err.to_string(),
                    }
                }
            })
            .collect()
    }

    /// Ids of every photo entry that carries one, whether or not the rest of
    /// the descriptor is usable.
    pub fn photo_ids(&self) -> Vec<String> {
        self.photo_values().filter_map(raw_photo_id).collect()
    }
}

fn raw_photo_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

impl TryFrom<Value> for Profile {
    type Error = HarvestError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<Profile> for Value {
    fn from(value: Profile) -> Self {
        Value::Object(value.record)
    }
}

/// Builder for an album entry of a [`Profile`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Album {
    pub photos: Option<Vec<PhotoDescriptor>>,
    pub extra: Map<String, Value>,
}

impl Album {
    pub fn with_photos(photos: Vec<PhotoDescriptor>) -> Self {
        Self {
            photos: Some(photos),
            extra: Map::new(),
        }
    }

    pub fn without_photos() -> Self {
        Self::default()
    }
}

impl From<Album> for Value {
    fn from(value: Album) -> Self {
        let mut object = value.extra;
        if let Some(photos) = value.photos {
            object.insert(
                "photos".to_string(),
                Value::Array(photos.into_iter().map(Value::from).collect()),
            );
        }
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhotoDescriptor {
    pub id: PhotoId,
    pub large_url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhotoDescriptor {
    pub fn new(id: PhotoId, large_url: impl Into<String>) -> Self {
        Self {
            id,
            large_url: large_url.into(),
            extra: Map::new(),
        }
    }

    /// The source data stores protocol-relative URLs (`//host/path`).
    pub fn fetch_url(&self) -> Result<String, HarvestError> {
        let url = self.large_url.trim();
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(url.to_string());
        }
        match url.strip_prefix("//") {
            Some(rest) if !rest.is_empty() => Ok(format!("https:{url}")),
            _ => Err(HarvestError::InvalidPhotoUrl(self.large_url.clone())),
        }
    }
}

impl From<PhotoDescriptor> for Value {
    fn from(value: PhotoDescriptor) -> Self {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(value.id.into()));
        object.insert("large_url".to_string(), Value::String(value.large_url));
        object.extend(value.extra);
        Value::Object(object)
    }
}

/// One entry of an album's `photos` list.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoEntry {
    Valid(PhotoDescriptor),
    /// Unusable descriptor. `key` is its raw id, or `<user_id>#<index>` when it
    /// has none; `id` is set when that raw id is also a valid photo id.
    Invalid {
        key: String,
        id: Option<PhotoId>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum QueueOrder {
    /// Every photo of the first profile, then every photo of the next.
    Sequential,
    /// First photo of every profile, then the second of every profile, and so on.
    #[default]
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    Raw,
    /// Re-encode as JPEG at `quality`, scaled to fit in `max`×`max`.
    Thumbnail { max: u32, quality: u8 },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_ids() {
        let id: PhotoId = "abc123".parse().unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert_matches!("".parse::<PhotoId>(), Err(HarvestError::InvalidPhotoId(_)));
        assert_matches!("../x".parse::<UserId>(), Err(HarvestError::InvalidUserId(_)));
        assert_matches!(".hidden".parse::<UserId>(), Err(HarvestError::InvalidUserId(_)));
    }

    #[test]
    fn protocol_relative_url_gets_https() {
        let photo = PhotoDescriptor::new("a".parse().unwrap(), "//x/a.jpg");
        assert_eq!(photo.fetch_url().unwrap(), "https://x/a.jpg");
    }

    #[test]
    fn absolute_url_is_kept() {
        let photo = PhotoDescriptor::new("a".parse().unwrap(), "http://x/a.jpg");
        assert_eq!(photo.fetch_url().unwrap(), "http://x/a.jpg");
    }

    #[test]
    fn malformed_url_is_rejected() {
        let photo = PhotoDescriptor::new("a".parse().unwrap(), "x/a.jpg");
        assert_matches!(photo.fetch_url(), Err(HarvestError::InvalidPhotoUrl(_)));
        let photo = PhotoDescriptor::new("a".parse().unwrap(), "//");
        assert_matches!(photo.fetch_url(), Err(HarvestError::InvalidPhotoUrl(_)));
    }

    fn valid_ids(profile: &Profile) -> Vec<String> {
        profile
            .photo_entries()
            .into_iter()
            .filter_map(|entry| match entry {
                PhotoEntry::Valid(photo) => Some(photo.id.to_string()),
                PhotoEntry::Invalid { .. } => None,
            })
            .collect()
    }

    #[test]
    fn albums_without_photos_contribute_nothing() {
        let profile: Profile = serde_json::from_str(
            r#"{"user_id":"u1","name":"N","albums":[
                {"uid":"x"},
                {"uid":"y","photos":null},
                {"photos":[{"id":"a","large_url":"//x/a.jpg","width":10}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(valid_ids(&profile), vec!["a"]);
        assert_eq!(profile.record()["name"], "N");
    }

    #[test]
    fn malformed_descriptor_keeps_its_siblings() {
        let profile = Profile::from_value(serde_json::json!({
            "user_id": "u1",
            "albums": [{"photos": [
                {"id": "p1", "large_url": "//x/p1.jpg"},
                {"id": "p2"},
                {"large_url": "//x/anon.jpg"},
                {"id": "a/b", "large_url": "//x/ab.jpg"}
            ]}]
        }))
        .unwrap();

        let entries = profile.photo_entries();
        assert_eq!(entries.len(), 4);
        assert_matches!(&entries[0], PhotoEntry::Valid(photo) if photo.id.as_str() == "p1");
        assert_matches!(
            &entries[1],
            PhotoEntry::Invalid { key, id: Some(_), reason }
                if key == "p2" && reason.contains("large_url")
        );
        assert_matches!(&entries[2], PhotoEntry::Invalid { key, id: None, .. } if key == "u1#2");
        assert_matches!(&entries[3], PhotoEntry::Invalid { key, id: None, .. } if key == "a/b");
        assert_eq!(profile.photo_ids(), vec!["p1", "p2", "a/b"]);
    }

    #[test]
    fn user_id_is_required() {
        assert_matches!(
            Profile::from_value(serde_json::json!({"albums": []})),
            Err(HarvestError::InvalidProfile(_))
        );
        assert_matches!(
            Profile::from_value(serde_json::json!({"user_id": 7})),
            Err(HarvestError::InvalidUserId(_))
        );
        assert_matches!(
            Profile::from_value(serde_json::json!([1, 2])),
            Err(HarvestError::InvalidProfile(_))
        );
    }

    #[test]
    fn profile_is_stored_verbatim() {
        let raw = r#"{"user_id":"u1","zeta":1,"albums":[{"uid":"x","photos":null},{"photos":[{"large_url":"//x/a.jpg","id":"a"}]}],"alpha":{"b":2,"a":1}}"#;
        let profile: Profile = serde_json::from_str(raw).unwrap();
        assert_eq!(serde_json::to_string(&profile).unwrap(), raw);
    }
}
