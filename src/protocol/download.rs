//! Transient audio URLs for single tracks.
//!
//! # Wire Format
//!
//! Request:
//! ```json
//! {"url": "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"}
//! ```
//!
//! Response, on success:
//! ```json
//! {"file_url": "https://cdn.example/4uLU6hMCjMI75M1A2tKUQC.mp3?exp=..."}
//! ```
//!
//! and otherwise, with a non-2xx status:
//! ```json
//! {"error": "..."}
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use super::ErrorBody;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Debug, Hash)]
pub struct Request {
    pub url: String,
}

impl Request {
    /// Public link prefix the audio endpoint expects track ids under.
    pub const TRACK_LINK: &'static str = "https://open.spotify.com/track/";

    #[must_use]
    pub fn for_track(id: &str) -> Self {
        Self {
            url: format!("{}{id}", Self::TRACK_LINK),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize, Debug)]
pub struct Response {
    #[serde(default)]
    pub file_url: Option<Url>,

    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    #[test]
    fn request_body() {
        let body = serde_json::to_string(&Request::for_track("abc")).unwrap();
        assert_eq!(body, r#"{"url":"https://open.spotify.com/track/abc"}"#);
    }

    #[test]
    fn file_url() {
        let response: Response =
            protocol::json(r#"{"file_url": "https://cdn.example/a.mp3"}"#, "download").unwrap();
        assert_eq!(
            response.file_url.unwrap().as_str(),
            "https://cdn.example/a.mp3"
        );
        assert!(response.error.is_none());
    }

    #[test]
    fn error() {
        let response: Response =
            protocol::json(r#"{"error": "rate limited"}"#, "download").unwrap();
        assert!(response.file_url.is_none());
        assert_eq!(response.error.unwrap().message(), "rate limited");
    }
}
