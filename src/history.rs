//! Recently resolved collections.
//!
//! The history is one JSON array stored under [`History::KEY`] in a
//! [`KeyValueStore`]. It is rewritten as a whole on every change, holds at
//! most [`History::CAPACITY`] collections, most recent first, and never
//! contains two collections with the same reference URL.

use std::{
    collections::HashMap,
    fs,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde_json::{Map, Value};

use crate::{collection::Collection, error::Result};

/// String values under string keys.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    fn set(&self, key: &str, value: String) -> Result<()>;

    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Store that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock()?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.lock()?.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock()?.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object in a file.
///
/// A missing file is an empty store. Writes go to a temporary file that
/// then replaces the original.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Map<String, Value>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Map::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");

        fs::write(&temp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&temp, &self.path)?;
        trace!("wrote {}", self.path.display());
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read()?;
        f(&mut values);
        self.write(&values)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = self.read()?.remove(key);
        Ok(value.map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        }))
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_owned(), Value::String(value));
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

pub struct History {
    store: Box<dyn KeyValueStore>,
}

impl History {
    /// Key that the history is stored under.
    pub const KEY: &'static str = "playlistHistory";

    /// Most collections kept.
    pub const CAPACITY: usize = 10;

    #[must_use]
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Collections, most recent first.
    ///
    /// A stored value that cannot be parsed is logged and treated as an empty
    /// history, so that the next [`add`](Self::add) replaces it.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub fn entries(&self) -> Result<Vec<Collection>> {
        let Some(json) = self.store.get(Self::KEY)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("ignoring unreadable history: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// The collection resolved from `url`, if it is in the history.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    pub fn find(&self, url: &str) -> Result<Option<Collection>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|collection| collection.url == url))
    }

    /// Puts `collection` in front, replacing any entry with the same URL and
    /// dropping the oldest beyond capacity.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written.
    pub fn add(&self, collection: &Collection) -> Result<()> {
        let mut entries = self.entries()?;
        entries.retain(|entry| entry.url != collection.url);
        entries.insert(0, collection.clone());
        entries.truncate(Self::CAPACITY);

        self.store.set(Self::KEY, serde_json::to_string(&entries)?)?;
        debug!("history holds {} collections", entries.len());
        Ok(())
    }

    /// Forgets every collection.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(Self::KEY)?;
        info!("history cleared");
        Ok(())
    }
}
