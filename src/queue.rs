//! Bounded-concurrency download queue with failure tracking.
//!
//! The queue owns the state of every track it has seen and drives batches of
//! downloads through a fixed number of workers. Each track is in at most one
//! of the states in [`TrackState`], so it can never be queued and failed, or
//! in flight and failed, at the same time.
//!
//! # Batches
//!
//! [`DownloadQueue::download_all`] and [`DownloadQueue::retry_failed`] copy
//! their tracks into a fresh FIFO and run `W` workers on the calling task.
//! Every worker takes a permit from the engine-wide semaphore, pops the head
//! of the FIFO and downloads it, until the FIFO is empty. The batch returns
//! once every worker stopped, which is when every track was attempted once.
//!
//! * Tracks are started in order; they may finish in any order.
//! * A failed track is recorded and logged, never returned. Siblings carry on.
//! * At most `W` downloads are in flight, standalone ones included.
//!
//! # Cancellation
//!
//! Dropping a batch or single download future stops it. Tracks it had queued
//! or in flight are forgotten, as if they had never been submitted.
//!
//! # Observing
//!
//! [`DownloadQueue::snapshot`] returns the current sets of ids, and
//! [`DownloadQueue::progress`] a watch channel of counts that changes on
//! every transition.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::future::join_all;
use tokio::sync::{watch, Semaphore};

use crate::{
    download::Download,
    error::{Error, Result},
    track::{Track, TrackId},
};

/// Where a track is in its download lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackState {
    /// Waiting in a batch for a worker.
    Queued,
    /// Being downloaded right now.
    InFlight,
    /// The last attempt failed.
    Failed,
    /// The last attempt succeeded.
    Done,
}

/// Ids of tracks per state at one moment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub queued: BTreeSet<TrackId>,
    pub in_flight: BTreeSet<TrackId>,
    pub failed: BTreeSet<TrackId>,
    pub done: BTreeSet<TrackId>,
}

/// Number of tracks per state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Progress {
    pub queued: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub done: usize,
}

impl Progress {
    /// Whether any track is queued or in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.queued > 0 || self.in_flight > 0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} done, {} failed, {} downloading, {} queued",
            self.done, self.failed, self.in_flight, self.queued
        )
    }
}

/// Outcome of one batch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Summary {
    pub done: usize,
    pub failed: usize,
    /// Tracks that were already in flight when their turn came.
    pub skipped: usize,
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        self.done += other.done;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} downloaded, {} failed", self.done, self.failed)?;
        if self.skipped > 0 {
            write!(f, ", {} already downloading", self.skipped)?;
        }
        Ok(())
    }
}

pub struct DownloadQueue {
    downloader: Arc<dyn Download>,
    concurrency: NonZeroUsize,
    permits: Semaphore,
    states: Mutex<HashMap<TrackId, TrackState>>,
    progress: watch::Sender<Progress>,
}

impl DownloadQueue {
    /// Creates a queue that runs at most `concurrency` downloads at a time.
    #[must_use]
    pub fn new(downloader: Arc<dyn Download>, concurrency: NonZeroUsize) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            downloader,
            concurrency,
            permits: Semaphore::new(concurrency.get()),
            states: Mutex::new(HashMap::new()),
            progress,
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    /// Downloads every track in `tracks`, starting them in order.
    ///
    /// Returns when each track has been attempted once. Failures end up in
    /// the failed set; they do not fail the batch.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the queue is shutting down.
    pub async fn download_all(&self, tracks: &[Track]) -> Result<Summary> {
        self.run(tracks.to_vec()).await
    }

    /// Re-downloads the tracks of `tracks` whose id is in `failed`.
    ///
    /// Tracks outside `failed` are left alone, whatever their state.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the queue is shutting down.
    pub async fn retry_failed(
        &self,
        tracks: &[Track],
        failed: &HashSet<TrackId>,
    ) -> Result<Summary> {
        let retry: Vec<_> = tracks
            .iter()
            .filter(|track| failed.contains(&track.id))
            .cloned()
            .collect();
        self.run(retry).await
    }

    /// Downloads a single track outside of any batch.
    ///
    /// Returns `Ok(None)` without doing anything if the track is already in
    /// flight.
    ///
    /// # Errors
    ///
    /// Returns the download error, after recording the track as failed, or
    /// `Cancelled` if the queue is shutting down.
    pub async fn download_one(&self, track: &Track) -> Result<Option<PathBuf>> {
        if self.state(&track.id) == Some(TrackState::InFlight) {
            debug!("{track}: already downloading");
            return Ok(None);
        }

        let _permit = self.permits.acquire().await?;
        self.attempt(track).await.transpose()
    }

    /// Current ids per state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (id, state) in self.lock().iter() {
            let set = match state {
                TrackState::Queued => &mut snapshot.queued,
                TrackState::InFlight => &mut snapshot.in_flight,
                TrackState::Failed => &mut snapshot.failed,
                TrackState::Done => &mut snapshot.done,
            };
            set.insert(id.clone());
        }
        snapshot
    }

    /// Subscribes to counts per state, updated on every transition.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn state(&self, id: &TrackId) -> Option<TrackState> {
        self.lock().get(id).copied()
    }

    /// Ids of the tracks whose last attempt failed.
    #[must_use]
    pub fn failed_ids(&self) -> HashSet<TrackId> {
        self.lock()
            .iter()
            .filter(|(_, state)| **state == TrackState::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether any track is queued or in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.progress.borrow().is_busy()
    }

    /// Forgets the state of every track.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` while tracks are queued or in flight.
    pub fn clear(&self) -> Result<()> {
        let mut states = self.lock();
        if states
            .values()
            .any(|state| matches!(state, TrackState::Queued | TrackState::InFlight))
        {
            return Err(Error::failed_precondition(
                "cannot clear while downloads are running",
            ));
        }

        states.clear();
        self.publish(&states);
        Ok(())
    }

    /// Closes the queue: downloads waiting for a worker fail with `Cancelled`.
    pub fn close(&self) {
        self.permits.close();
    }

    async fn run(&self, tracks: Vec<Track>) -> Result<Summary> {
        if tracks.is_empty() {
            return Ok(Summary::default());
        }

        let batch = Batch::new(self, &tracks);
        let total = tracks.len();
        let queue = Mutex::new(VecDeque::from(tracks));

        let workers = (0..self.concurrency.get()).map(|_| self.worker(&queue));
        let mut summary = Summary::default();
        for result in join_all(workers).await {
            summary += result?;
        }

        drop(batch);
        info!("{total} tracks attempted: {summary}");
        Ok(summary)
    }

    async fn worker(&self, queue: &Mutex<VecDeque<Track>>) -> Result<Summary> {
        let mut summary = Summary::default();

        loop {
            let _permit = self.permits.acquire().await?;
            let next = lock(queue).pop_front();
            let Some(track) = next else {
                return Ok(summary);
            };

            match self.attempt(&track).await {
                Some(Ok(_)) => summary.done += 1,
                Some(Err(_)) => summary.failed += 1,
                None => summary.skipped += 1,
            }
        }
    }

    /// Downloads `track` unless it is already in flight.
    ///
    /// The caller must hold a permit.
    async fn attempt(&self, track: &Track) -> Option<Result<PathBuf>> {
        let mut attempt = Attempt::begin(self, &track.id)?;
        debug!("{track}: downloading");

        let result = self.downloader.download(track).await;
        match &result {
            Ok(path) => {
                debug!("{track}: saved to {}", path.display());
                attempt.finish(TrackState::Done);
            }
            Err(e) => {
                warn!("{e}");
                attempt.finish(TrackState::Failed);
            }
        }

        Some(result)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackId, TrackState>> {
        lock(&self.states)
    }

    fn publish(&self, states: &HashMap<TrackId, TrackState>) {
        let mut progress = Progress::default();
        for state in states.values() {
            match state {
                TrackState::Queued => progress.queued += 1,
                TrackState::InFlight => progress.in_flight += 1,
                TrackState::Failed => progress.failed += 1,
                TrackState::Done => progress.done += 1,
            }
        }
        self.progress.send_replace(progress);
    }

    /// Sets `id` to `state`, returning what it was before.
    fn transition(&self, id: &TrackId, state: Option<TrackState>) -> Option<TrackState> {
        let mut states = self.lock();
        let previous = match state {
            Some(state) => states.insert(id.clone(), state),
            None => states.remove(id),
        };
        self.publish(&states);
        previous
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks of a running batch; forgets those still queued when dropped.
struct Batch<'a> {
    queue: &'a DownloadQueue,
    ids: Vec<TrackId>,
}

impl<'a> Batch<'a> {
    fn new(queue: &'a DownloadQueue, tracks: &[Track]) -> Self {
        let mut ids = Vec::with_capacity(tracks.len());
        let mut states = queue.lock();

        for track in tracks {
            let state = states.entry(track.id.clone()).or_insert(TrackState::Queued);
            // An in-flight download keeps its state; the worker skips it.
            if *state != TrackState::InFlight {
                *state = TrackState::Queued;
                ids.push(track.id.clone());
            }
        }

        queue.publish(&states);
        drop(states);
        Self { queue, ids }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        let mut states = self.queue.lock();
        let mut forgotten = 0;
        for id in &self.ids {
            if states.get(id) == Some(&TrackState::Queued) {
                states.remove(id);
                forgotten += 1;
            }
        }

        if forgotten > 0 {
            debug!("batch stopped with {forgotten} tracks not started");
            self.queue.publish(&states);
        }
    }
}

/// A track in flight; forgotten when dropped before it finished.
struct Attempt<'a> {
    queue: &'a DownloadQueue,
    id: TrackId,
    finished: bool,
}

impl<'a> Attempt<'a> {
    /// Marks `id` in flight, or returns `None` if it already is.
    fn begin(queue: &'a DownloadQueue, id: &TrackId) -> Option<Self> {
        let mut states = queue.lock();
        if states.get(id) == Some(&TrackState::InFlight) {
            return None;
        }

        states.insert(id.clone(), TrackState::InFlight);
        queue.publish(&states);
        drop(states);

        Some(Self {
            queue,
            id: id.clone(),
            finished: false,
        })
    }

    fn finish(&mut self, state: TrackState) {
        self.queue.transition(&self.id, Some(state));
        self.finished = true;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("{}: download stopped", self.id);
            self.queue.transition(&self.id, None);
        }
    }
}
