//! Persistence of downloaded audio.
//!
//! Saving is all-or-nothing. Bytes are streamed into a hidden temporary file
//! next to the destination, which is renamed into place only after the body
//! is complete and synced. A failed save leaves no file behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{fs, io::AsyncWriteExt};

use crate::{download::ByteStream, error::Result};

/// Where downloaded tracks end up.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Saves `body` under the display name `name` and returns the path.
    ///
    /// # Errors
    ///
    /// Returns error if the body stream fails or cannot be written. Nothing
    /// is left at the destination in that case.
    async fn save(&self, name: &str, body: ByteStream) -> Result<PathBuf>;
}

/// [`Storage`] that writes `.mp3` files into a directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Extension of saved audio files.
    pub const EXTENSION: &'static str = "mp3";

    /// Longest file stem, in UTF-8 bytes. Leaves room for the temporary name
    /// within the common 255-byte limit on file names.
    const MAX_STEM_LEN: usize = 200;

    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path that a track named `name` is saved to.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize(name), Self::EXTENSION))
    }

    async fn write(path: &Path, mut body: ByteStream) -> Result<u64> {
        let mut file = fs::File::create(path).await?;
        let mut written = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(&self, name: &str, body: ByteStream) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(name);
        let temp = self
            .dir
            .join(format!(".{}.{}.part", sanitize(name), uuid::Uuid::new_v4()));

        let written = match Self::write(&temp, body).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(e) = fs::remove_file(&temp).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("could not remove {}: {e}", temp.display());
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!("saved {written} bytes to {}", path.display());
        Ok(path)
    }
}

/// Turns a display name into a file stem that is valid on common platforms.
///
/// Path separators, reserved and control characters become `-`. Leading
/// dots are dropped so that the result is never hidden or relative.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let mut replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();

    if replaced.len() > FileStorage::MAX_STEM_LEN {
        let end = (0..=FileStorage::MAX_STEM_LEN)
            .rev()
            .find(|&i| replaced.is_char_boundary(i))
            .unwrap_or_default();
        replaced.truncate(end);
    }

    let stem = replaced.trim().trim_start_matches('.').trim_end();
    if stem.is_empty() {
        String::from("untitled")
    } else {
        stem.to_owned()
    }
}
