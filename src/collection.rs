//! Resolved collections and user-driven pruning of their track lists.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    protocol::tracks,
    track::Track,
};

/// What a collection reference points at.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// A single track.
    Track,
    Playlist,
    Album,
    Artist,
    #[default]
    #[serde(other)]
    Other,
}

impl CollectionKind {
    /// Whether the collection holds exactly one track by construction.
    #[must_use]
    pub fn is_single(self) -> bool {
        self == Self::Track
    }
}

impl From<&str> for CollectionKind {
    fn from(typ: &str) -> Self {
        match typ.to_ascii_lowercase().as_str() {
            "track" => Self::Track,
            "playlist" => Self::Playlist,
            "album" => Self::Album,
            "artist" => Self::Artist,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Track => "track",
            Self::Playlist => "playlist",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Other => "collection",
        };
        f.write_str(kind)
    }
}

/// Which tracks [`Collection::delete_tracks`] removes around an index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeleteMode {
    /// Only the track at the index.
    Single,
    /// The track at the index and every track before it.
    Above,
    /// The track at the index and every track after it.
    Below,
}

/// A single track or an ordered multi-track playlist or album.
///
/// The reference URL identifies a collection for de-duplication. Tracks are
/// never reordered; the only mutation is removing a contiguous range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collection {
    /// The reference this collection was resolved from.
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    pub image: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub artists: String,
    pub tracks: Vec<Track>,
}

impl Collection {
    /// Builds a collection from a resolver result for `reference`.
    ///
    /// A single-track result describes the track itself, so it becomes a
    /// collection with exactly that track.
    #[must_use]
    pub fn from_result(reference: &str, result: tracks::Collection) -> Self {
        let kind = CollectionKind::from(result.typ.as_str());

        let tracks = if kind.is_single() {
            vec![Track {
                id: result.id.as_str().into(),
                name: result.name.clone(),
                artists: result.artists.clone(),
                cover: result.image.clone(),
                duration: result.duration.unwrap_or_default(),
            }]
        } else {
            result
                .tracks
                .into_iter()
                .map(|entry| Track::from_entry(entry, &result.image))
                .collect()
        };

        Self {
            url: reference.to_owned(),
            name: result.name,
            kind,
            image: result.image,
            owner: result.owner,
            artists: result.artists,
            tracks,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Returns a copy of this collection without the tracks that `mode`
    /// selects around `index`.
    ///
    /// Given tracks `[t0, t1, t2, t3, t4]` and index 2:
    /// * [`DeleteMode::Single`] keeps `[t0, t1, t3, t4]`
    /// * [`DeleteMode::Above`] keeps `[t3, t4]`
    /// * [`DeleteMode::Below`] keeps `[t0, t1]`
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `index` does not point at a track.
    pub fn delete_tracks(&self, index: usize, mode: DeleteMode) -> Result<Self> {
        if index >= self.tracks.len() {
            return Err(Error::out_of_range(format!(
                "cannot delete track {index} of {} in {self}",
                self.tracks.len()
            )));
        }

        let mut pruned = self.clone();
        match mode {
            DeleteMode::Single => {
                pruned.tracks.remove(index);
            }
            DeleteMode::Above => {
                pruned.tracks.drain(..=index);
            }
            DeleteMode::Below => {
                pruned.tracks.truncate(index);
            }
        }

        Ok(pruned)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.name)?;
        let by = if self.owner.is_empty() {
            &self.artists
        } else {
            &self.owner
        };
        if !by.is_empty() {
            write!(f, " by {by}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;

    pub(crate) fn track(id: &str) -> Track {
        Track {
            id: id.into(),
            name: format!("Track {id}"),
            artists: "Artist".to_owned(),
            cover: String::new(),
            duration: Duration::from_secs(180),
        }
    }

    pub(crate) fn collection(ids: &[&str]) -> Collection {
        Collection {
            url: "https://open.spotify.com/playlist/X".to_owned(),
            name: "Mix".to_owned(),
            kind: CollectionKind::Playlist,
            image: String::new(),
            owner: "someone".to_owned(),
            artists: String::new(),
            tracks: ids.iter().map(|id| track(id)).collect(),
        }
    }

    fn ids(collection: &Collection) -> Vec<&str> {
        collection.tracks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn delete_modes() {
        let five = collection(&["t0", "t1", "t2", "t3", "t4"]);

        let above = five.delete_tracks(2, DeleteMode::Above).unwrap();
        assert_eq!(ids(&above), ["t3", "t4"]);

        let below = five.delete_tracks(2, DeleteMode::Below).unwrap();
        assert_eq!(ids(&below), ["t0", "t1"]);

        let single = five.delete_tracks(2, DeleteMode::Single).unwrap();
        assert_eq!(ids(&single), ["t0", "t1", "t3", "t4"]);

        // The original is untouched and metadata carries over.
        assert_eq!(five.len(), 5);
        assert_eq!(single.url, five.url);
        assert_eq!(single.name, five.name);
    }

    #[test]
    fn delete_at_edges() {
        let three = collection(&["a", "b", "c"]);
        assert!(three.delete_tracks(0, DeleteMode::Below).unwrap().is_empty());
        assert!(three.delete_tracks(2, DeleteMode::Above).unwrap().is_empty());
        assert_eq!(ids(&three.delete_tracks(2, DeleteMode::Below).unwrap()), ["a", "b"]);
    }

    #[test]
    fn delete_out_of_range() {
        let three = collection(&["a", "b", "c"]);
        let err = three.delete_tracks(3, DeleteMode::Single).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::OutOfRange);
    }

    #[test]
    fn single_track_result() {
        let result = tracks::Collection {
            id: "t9".to_owned(),
            typ: "track".to_owned(),
            name: "Nine".to_owned(),
            image: "https://img.example/t9.jpg".to_owned(),
            owner: String::new(),
            artists: "A".to_owned(),
            tracks: Vec::new(),
            gid: None,
            duration: Some(Duration::from_secs(90)),
        };

        let collection =
            Collection::from_result("https://open.spotify.com/track/t9", result);
        assert_eq!(collection.kind, CollectionKind::Track);
        assert_eq!(ids(&collection), ["t9"]);
        assert_eq!(collection.tracks[0].cover, "https://img.example/t9.jpg");
        assert_eq!(collection.tracks[0].duration, Duration::from_secs(90));
    }

    #[test]
    fn unknown_kinds_survive_history() {
        let json = r#""podcast""#;
        let kind: CollectionKind = serde_json::from_str(json).unwrap();
        assert_eq!(kind, CollectionKind::Other);
        assert_eq!(CollectionKind::from("Album"), CollectionKind::Album);
    }
}
