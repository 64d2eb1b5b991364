//! The active collection and everything done with it.
//!
//! A [`Session`] resolves one collection at a time, remembers it in the
//! history and drives its tracks through the [`DownloadQueue`]. The track
//! list can be pruned between batches, not while one runs.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    collection::{Collection, DeleteMode},
    config::Config,
    download::TrackDownloader,
    error::{Error, Result},
    gateway::Gateway,
    history::{FileStore, History},
    queue::{DownloadQueue, Summary},
    resolver::Resolver,
    storage::FileStorage,
    track::TrackId,
};

pub struct Session {
    resolver: Arc<dyn Resolver>,
    queue: DownloadQueue,
    history: History,
    collection: Mutex<Option<Collection>>,
}

impl Session {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>, queue: DownloadQueue, history: History) -> Self {
        Self {
            resolver,
            queue,
            history,
            collection: Mutex::new(None),
        }
    }

    /// Wires up the HTTP gateway, file storage and file-backed history
    /// described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = Arc::new(Gateway::new(config)?);
        let storage = Arc::new(FileStorage::new(&config.output_dir));
        let downloader = TrackDownloader::new(gateway.clone(), gateway.clone(), storage);
        let queue = DownloadQueue::new(Arc::new(downloader), config.concurrency);
        let history = History::new(Box::new(FileStore::new(&config.history_file)));

        info!(
            "saving to {} with {} concurrent downloads",
            config.output_dir.display(),
            config.concurrency
        );
        Ok(Self::new(gateway, queue, history))
    }

    /// Makes the collection behind `reference` the active one.
    ///
    /// With `cached`, a collection from the history is reused when there is
    /// one. Otherwise the reference is resolved again, and the result
    /// replaces any history entry for the same URL once it becomes active.
    /// Download state of the previous collection is forgotten.
    ///
    /// # Errors
    ///
    /// * `FailedPrecondition` while downloads are running
    /// * whatever resolving the reference fails with
    pub async fn load(&self, reference: &str, cached: bool) -> Result<Collection> {
        self.ensure_idle("load another collection")?;
        let reference = reference.trim();

        let from_history = if cached {
            self.history.find(reference).unwrap_or_else(|e| {
                warn!("could not read history: {e}");
                None
            })
        } else {
            None
        };

        let (collection, resolved) = match from_history {
            Some(collection) => {
                info!("using {collection} from history");
                (collection, false)
            }
            None => (self.resolver.resolve(reference).await?, true),
        };

        // Fails if a batch started while resolving.
        self.queue.clear()?;

        if resolved {
            if let Err(e) = self.history.add(&collection) {
                warn!("could not update history: {e}");
            }
        }

        *self.lock() = Some(collection.clone());
        Ok(collection)
    }

    /// The active collection.
    #[must_use]
    pub fn collection(&self) -> Option<Collection> {
        self.lock().clone()
    }

    /// Downloads every track of the active collection.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if no collection is loaded, or
    /// `Cancelled` if the queue is shutting down.
    pub async fn download_all(&self) -> Result<Summary> {
        let collection = self.active()?;
        info!("downloading {} tracks of {collection}", collection.len());
        self.queue.download_all(&collection.tracks).await
    }

    /// Downloads the tracks of the active collection that failed last time.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` if no collection is loaded, or
    /// `Cancelled` if the queue is shutting down.
    pub async fn retry_failed(&self) -> Result<Summary> {
        let collection = self.active()?;
        let failed = self.failed_ids(&collection);

        if failed.is_empty() {
            debug!("nothing to retry");
            return Ok(Summary::default());
        }

        info!("retrying {} failed tracks of {collection}", failed.len());
        self.queue.retry_failed(&collection.tracks, &failed).await
    }

    /// Downloads the track at `index` of the active collection.
    ///
    /// Returns `Ok(None)` if that track is already downloading.
    ///
    /// # Errors
    ///
    /// * `FailedPrecondition` if no collection is loaded
    /// * `OutOfRange` if `index` does not point at a track
    /// * `DataLoss` if the download fails
    pub async fn download_one(&self, index: usize) -> Result<Option<PathBuf>> {
        let collection = self.active()?;
        let track = collection.tracks.get(index).ok_or_else(|| {
            Error::out_of_range(format!(
                "no track {index} in {collection} of {} tracks",
                collection.len()
            ))
        })?;
        self.queue.download_one(track).await
    }

    /// Removes tracks from the active collection; see
    /// [`Collection::delete_tracks`].
    ///
    /// The history keeps the collection as it was resolved.
    ///
    /// # Errors
    ///
    /// * `FailedPrecondition` if no collection is loaded or downloads are
    ///   running
    /// * `OutOfRange` if `index` does not point at a track
    pub fn delete_tracks(&self, index: usize, mode: DeleteMode) -> Result<Collection> {
        self.ensure_idle("delete tracks")?;

        let mut active = self.lock();
        let collection = active
            .as_ref()
            .ok_or_else(|| Error::failed_precondition("no collection loaded"))?;

        let pruned = collection.delete_tracks(index, mode)?;
        debug!(
            "{} tracks left in {pruned} after deleting {mode:?} at {index}",
            pruned.len()
        );
        *active = Some(pruned.clone());
        Ok(pruned)
    }

    /// Failed tracks of the active collection.
    #[must_use]
    pub fn failed(&self) -> Vec<TrackId> {
        let Some(collection) = self.collection() else {
            return Vec::new();
        };
        let failed = self.failed_ids(&collection);
        collection
            .tracks
            .into_iter()
            .filter(|track| failed.contains(&track.id))
            .map(|track| track.id)
            .collect()
    }

    /// Collections from the history, most recent first.
    ///
    /// # Errors
    ///
    /// Returns error if the history cannot be read.
    pub fn history(&self) -> Result<Vec<Collection>> {
        self.history.entries()
    }

    /// # Errors
    ///
    /// Returns error if the history cannot be written.
    pub fn clear_history(&self) -> Result<()> {
        self.history.clear()
    }

    #[must_use]
    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    fn lock(&self) -> MutexGuard<'_, Option<Collection>> {
        self.collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Result<Collection> {
        self.collection()
            .ok_or_else(|| Error::failed_precondition("no collection loaded"))
    }

    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.queue.is_busy() {
            return Err(Error::failed_precondition(format!(
                "cannot {what} while downloads are running"
            )));
        }
        Ok(())
    }

    fn failed_ids(&self, collection: &Collection) -> HashSet<TrackId> {
        let failed = self.queue.failed_ids();
        collection
            .tracks
            .iter()
            .filter(|track| failed.contains(&track.id))
            .map(|track| track.id.clone())
            .collect()
    }
}
