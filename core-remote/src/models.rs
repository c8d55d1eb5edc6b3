//! Domain models decoded from response payloads.
//!
//! Field names follow the wire format (camelCase). Servers are inconsistent
//! about a few details, so ids accept numbers as well as strings and list
//! fields accept a lone object where an array is expected.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

// ============================================================================
// Media
// ============================================================================

/// A single playable track. Immutable once created; download and queue state
/// live in the coordinator, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub cover_art: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub transcoded_suffix: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Server-side relative path, when the server exposes one.
    #[serde(default)]
    pub path: Option<String>,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration: None,
            cover_art: None,
            suffix: None,
            transcoded_suffix: None,
            content_type: None,
            size: None,
            path: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Extension of the bytes the server will send.
    pub fn effective_suffix(&self) -> &str {
        self.transcoded_suffix
            .as_deref()
            .or(self.suffix.as_deref())
            .unwrap_or("mp3")
    }

    /// Local cache path relative to the media directory.
    ///
    /// Derived from the server path when present (with the extension swapped
    /// for the transcoded one), otherwise from the item id. Parent and root
    /// components are dropped so the result never escapes the media directory.
    pub fn local_path(&self) -> PathBuf {
        let relative = match self.path.as_deref() {
            Some(path) if !path.trim().is_empty() => {
                Path::new(path).with_extension(self.effective_suffix())
            }
            _ => PathBuf::from(format!(
                "{}.{}",
                sanitize_component(&self.id),
                self.effective_suffix()
            )),
        };
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect()
    }
}

/// Replace path separators so `value` stays a single path component.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}

// ============================================================================
// Library listings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicFolder {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct MusicFolders {
    #[serde(default, rename = "musicFolder", deserialize_with = "one_or_many")]
    pub folders: Vec<MusicFolder>,
}

/// Payload of `getRandomSongs`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct RandomSongs {
    #[serde(default, rename = "song", deserialize_with = "one_or_many")]
    pub songs: Vec<MediaItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub album_count: Option<u32>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub cover_art: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexGroup {
    pub name: String,
    #[serde(default, rename = "artist", deserialize_with = "one_or_many")]
    pub artists: Vec<Artist>,
}

/// Result of `getIndexes` and `getArtists`. Both share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indexes {
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub ignored_articles: Option<String>,
    #[serde(default, rename = "index", deserialize_with = "one_or_many")]
    pub groups: Vec<IndexGroup>,
    #[serde(default, rename = "shortcut", deserialize_with = "one_or_many")]
    pub shortcuts: Vec<Artist>,
    /// Tracks sitting at the root of a folder.
    #[serde(default, rename = "child", deserialize_with = "one_or_many")]
    pub children: Vec<MediaItem>,
}

impl Indexes {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.shortcuts.is_empty() && self.children.is_empty()
    }

    pub fn artist_count(&self) -> usize {
        self.groups.iter().map(|g| g.artists.len()).sum()
    }
}

// ============================================================================
// Server state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub valid: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub license_expires: Option<String>,
}

/// Transport state of the server-side jukebox.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JukeboxStatus {
    /// `-1` when nothing is selected.
    #[serde(default = "no_index")]
    pub current_index: i32,
    #[serde(default)]
    pub playing: bool,
    #[serde(default)]
    pub gain: f32,
    /// Seconds into the current track.
    #[serde(default)]
    pub position: Option<u32>,
}

fn no_index() -> i32 {
    -1
}

// ============================================================================
// Lenient deserializers
// ============================================================================

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
    })
}
