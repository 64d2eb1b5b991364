//! Resolution of collection references and track audio URLs.
//!
//! The [`Resolver`] trait is the seam between the download machinery and
//! the provider. [`Gateway`](crate::gateway::Gateway) implements it over
//! HTTP; tests substitute in-memory fakes.

use async_trait::async_trait;
use url::Url;

use crate::{
    collection::Collection,
    error::{Error, Result},
    track::TrackId,
};

/// Host that collection and track links are published under.
pub const PROVIDER_HOST: &str = "open.spotify.com";

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves a collection reference into its metadata and ordered tracks.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if `reference` is not a supported link; no
    ///   request is made in that case
    /// * `NotFound` if the provider has no such collection
    /// * `Unavailable` if the provider keeps failing
    async fn resolve(&self, reference: &str) -> Result<Collection>;

    /// Resolves a track into a transient URL of its audio.
    ///
    /// The URL expires quickly; fetch it right away.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the provider has no audio for the track
    /// * `Unavailable` if the provider keeps failing
    async fn audio_url(&self, id: &TrackId) -> Result<Url>;
}

/// Checks that `reference` looks like something the provider can resolve.
///
/// Accepted are absolute `http` or `https` URLs and anything mentioning the
/// provider host, such as a link pasted without its scheme.
///
/// # Errors
///
/// Returns `InvalidArgument` for anything else.
pub fn validate_reference(reference: &str) -> Result<()> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(Error::invalid_argument("collection reference is empty"));
    }

    if reference.contains(PROVIDER_HOST) {
        return Ok(());
    }

    match Url::parse(reference) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(Error::invalid_argument(format!(
            "\"{reference}\" is not a link to a track, album or playlist"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepted_references() {
        for reference in [
            "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M",
            "open.spotify.com/playlist/X",
            "http://example.com/album/1",
            "  https://open.spotify.com/track/abc?si=1  ",
        ] {
            assert!(validate_reference(reference).is_ok(), "{reference}");
        }
    }

    #[test]
    fn rejected_references() {
        for reference in ["", "   ", "playlist X", "ftp://example.com/x", "spotify:playlist:X"] {
            let err = validate_reference(reference).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{reference}");
        }
    }
}
