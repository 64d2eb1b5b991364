//! Collection metadata and track lists.
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "result": {
//!         "id": "37i9dQZF1DXcBWIGoYBM5M",
//!         "type": "playlist",
//!         "name": "Today's Top Hits",
//!         "image": "https://i.scdn.co/image/...",
//!         "owner": "Spotify",
//!         "artists": "",
//!         "tracks": [{
//!             "id": "4uLU6hMCjMI75M1A2tKUQC",
//!             "name": "Never Gonna Give You Up",
//!             "artists": "Rick Astley",
//!             "duration_ms": 213573,
//!             "image": "https://i.scdn.co/image/..."
//!         }],
//!         "gid": 1
//!     }
//! }
//! ```
//!
//! A failed lookup replaces `result` with `"error": {"message": "..."}`.
//! For a single track, `type` is `"track"`, `tracks` is absent, and the
//! result itself describes the track.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{
    formats::Flexible, serde_as, DefaultOnNull, DisplayFromStr, DurationMilliSeconds, PickFirst,
};

use super::ErrorBody;

#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Collection>,

    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Collection {
    pub id: String,

    #[serde(rename = "type")]
    pub typ: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub name: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub image: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub owner: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub artists: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub tracks: Vec<Track>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gid: Option<u64>,

    /// Only present when the collection is a single track.
    #[serde(rename = "duration_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64, Flexible>>")]
    pub duration: Option<Duration>,
}

#[serde_as]
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct Track {
    pub id: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub name: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub artists: String,

    #[serde(default, rename = "duration_ms")]
    #[serde_as(as = "DefaultOnNull<DurationMilliSeconds<u64, Flexible>>")]
    pub duration: Duration,

    #[serde(default)]
    pub image: Option<String>,
}
