use std::{borrow::Borrow, fmt, ops::Deref, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::protocol::tracks;

/// Opaque provider identifier of a track, unique within a collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for TrackId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<str> for TrackId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A track of a resolved collection.
///
/// Immutable once resolved; the download queue and the history only ever
/// hold clones.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub artists: String,

    /// Cover image URL, falling back to the collection cover.
    #[serde(rename = "coverUrl")]
    pub cover: String,

    #[serde(rename = "duration_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
}

impl Track {
    /// Builds a track from a collection entry, using `fallback_cover` when
    /// the entry has no cover of its own.
    #[must_use]
    pub fn from_entry(entry: tracks::Track, fallback_cover: &str) -> Self {
        let cover = entry
            .image
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| fallback_cover.to_owned());

        Self {
            id: entry.id.into(),
            name: entry.name,
            artists: entry.artists,
            cover,
            duration: entry.duration,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.artists.is_empty() {
            write!(f, "{}: \"{}\"", self.id, self.name)
        } else {
            write!(f, "{}: \"{} - {}\"", self.id, self.artists, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(image: Option<&str>) -> tracks::Track {
        tracks::Track {
            id: "t1".to_owned(),
            name: "One".to_owned(),
            artists: "A".to_owned(),
            duration: Duration::from_millis(1234),
            image: image.map(str::to_owned),
        }
    }

    #[test]
    fn cover_falls_back_to_collection() {
        let track = Track::from_entry(entry(None), "https://img.example/cover.jpg");
        assert_eq!(track.cover, "https://img.example/cover.jpg");

        let track = Track::from_entry(entry(Some("")), "https://img.example/cover.jpg");
        assert_eq!(track.cover, "https://img.example/cover.jpg");

        let track = Track::from_entry(entry(Some("https://img.example/t1.jpg")), "x");
        assert_eq!(track.cover, "https://img.example/t1.jpg");
    }

    #[test]
    fn display() {
        let track = Track::from_entry(entry(None), "");
        assert_eq!(track.to_string(), "t1: \"A - One\"");
    }

    #[test]
    fn history_format() {
        let track = Track::from_entry(entry(None), "c");
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["coverUrl"], "c");
        assert_eq!(json["duration_ms"], 1234);

        let back: Track = serde_json::from_value(json).unwrap();
        assert_eq!(back, track);
    }
}
