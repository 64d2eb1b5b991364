//! Single-track downloads.
//!
//! A download resolves the transient audio URL of a track, streams the bytes
//! from it and hands them to a [`Storage`]. The three steps sit behind
//! traits so that the queue can be driven by fakes in tests.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use url::Url;

use crate::{
    error::{Error, Result},
    resolver::Resolver,
    storage::Storage,
    track::Track,
};

/// Body of an audio file as it arrives from the network.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Fetches the raw bytes behind a URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Starts fetching `url`.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response has a non-success
    /// status. Errors while streaming the body surface from the stream.
    async fn fetch(&self, url: &Url) -> Result<ByteStream>;
}

/// Downloads one track to wherever it belongs.
///
/// This is what the [`DownloadQueue`](crate::queue::DownloadQueue) drives.
#[async_trait]
pub trait Download: Send + Sync {
    /// Downloads `track` and returns where it was saved.
    ///
    /// # Errors
    ///
    /// Returns `DataLoss` wrapping the cause if any step fails.
    async fn download(&self, track: &Track) -> Result<PathBuf>;
}

/// [`Download`] that composes a resolver, a fetcher and a storage.
pub struct TrackDownloader {
    resolver: Arc<dyn Resolver>,
    fetch: Arc<dyn Fetch>,
    storage: Arc<dyn Storage>,
}

impl TrackDownloader {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetch: Arc<dyn Fetch>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            resolver,
            fetch,
            storage,
        }
    }

    async fn try_download(&self, track: &Track) -> Result<PathBuf> {
        let url = self.resolver.audio_url(&track.id).await?;
        trace!("{track}: audio at {}", url.host_str().unwrap_or("<no host>"));

        let body = self.fetch.fetch(&url).await?;
        self.storage.save(&track.name, body).await
    }
}

#[async_trait]
impl Download for TrackDownloader {
    async fn download(&self, track: &Track) -> Result<PathBuf> {
        self.try_download(track)
            .await
            .map_err(|e| Error::data_loss(format!("failed to download {track}: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use futures_util::{stream, StreamExt};

    use super::*;
    use crate::{collection::Collection, error::ErrorKind, track::TrackId};

    /// Resolver with fixed collections and an audio URL for every track
    /// that is not `missing`.
    #[derive(Default)]
    pub(crate) struct FakeResolver {
        pub(crate) collections: HashMap<String, Collection>,
        pub(crate) missing: Mutex<HashSet<TrackId>>,
        pub(crate) resolves: AtomicUsize,
        /// How long resolving a reference takes.
        pub(crate) latency: Duration,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(&self, reference: &str) -> Result<Collection> {
            crate::resolver::validate_reference(reference)?;
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.collections
                .get(reference)
                .cloned()
                .ok_or_else(|| Error::not_found(reference.to_owned()))
        }

        async fn audio_url(&self, id: &TrackId) -> Result<Url> {
            if self.missing.lock().unwrap().contains(id) {
                return Err(Error::unavailable(format!("no audio for {id}")));
            }
            Ok(Url::parse(&format!("https://cdn.example/{id}.mp3"))?)
        }
    }

    /// Fetcher that serves the URL back as the body.
    pub(crate) struct EchoFetch;

    #[async_trait]
    impl Fetch for EchoFetch {
        async fn fetch(&self, url: &Url) -> Result<ByteStream> {
            if url.path().contains("broken") {
                return Err(Error::unavailable("503 Service Unavailable"));
            }
            let body = Bytes::from(url.to_string());
            Ok(stream::iter([Ok(body)]).boxed())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        pub(crate) saved: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn save(&self, name: &str, mut body: ByteStream) -> Result<PathBuf> {
            let mut contents = Vec::new();
            while let Some(chunk) = body.next().await {
                contents.extend_from_slice(&chunk?);
            }
            self.saved
                .lock()
                .unwrap()
                .push((name.to_owned(), contents));
            Ok(PathBuf::from(format!("{name}.mp3")))
        }
    }

    fn downloader(missing: &[&str]) -> (TrackDownloader, Arc<MemoryStorage>) {
        let resolver = FakeResolver {
            missing: Mutex::new(missing.iter().map(|&id| id.into()).collect()),
            ..FakeResolver::default()
        };
        let storage = Arc::new(MemoryStorage::default());
        let downloader =
            TrackDownloader::new(Arc::new(resolver), Arc::new(EchoFetch), storage.clone());
        (downloader, storage)
    }

    #[tokio::test]
    async fn saves_under_track_name() {
        let (downloader, storage) = downloader(&[]);
        let track = crate::collection::tests::track("t1");

        let path = downloader.download(&track).await.unwrap();
        assert_eq!(path, PathBuf::from("Track t1.mp3"));

        let saved = storage.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "Track t1");
        assert_eq!(saved[0].1, b"https://cdn.example/t1.mp3");
    }

    #[tokio::test]
    async fn failures_are_data_loss() {
        let (downloader, storage) = downloader(&["t2"]);

        let err = downloader
            .download(&crate::collection::tests::track("t2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
        assert!(err.to_string().contains("no audio for t2"));

        let err = downloader
            .download(&crate::collection::tests::track("broken"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);

        assert!(storage.saved.lock().unwrap().is_empty());
    }
}
