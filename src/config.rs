//! Runtime configuration.
//!
//! Settings come from an optional TOML file and are then overridden by the
//! command line. Both upstream endpoints are optional here: an unset endpoint
//! only fails the operation that needs it, and does so before any network
//! traffic.
//!
//! # Example file
//!
//! ```toml
//! tracks_api_url = "https://resolver.example/api/tracks"
//! download_api_url = "https://resolver.example/api/download"
//! concurrency = 15
//! output_dir = "music"
//!
//! [retry]
//! max_attempts = 10
//! initial_delay_ms = 500
//! factor = 2
//! ```

use std::{fs, num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use crate::{
    error::{Error, Result},
    retry::RetryPolicy,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub user_agent: String,

    /// Endpoint that resolves a collection reference into its track list.
    pub tracks_api_url: Option<Url>,

    /// Endpoint that resolves a track id into a transient audio URL.
    pub download_api_url: Option<Url>,

    /// Maximum number of tracks downloading at the same time.
    pub concurrency: NonZeroUsize,

    /// Directory that downloaded tracks are saved to.
    pub output_dir: PathBuf,

    /// File backing the collection history.
    pub history_file: PathBuf,

    pub retry: RetryPolicy,
}

/// Settings as they appear in the configuration file.
///
/// Every field is optional so that a partial file only overrides what it
/// names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub tracks_api_url: Option<Url>,
    pub download_api_url: Option<Url>,
    pub concurrency: Option<NonZeroUsize>,
    pub output_dir: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub retry: Option<FileRetry>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileRetry {
    pub max_attempts: Option<u32>,
    #[serde(rename = "initial_delay_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub initial_delay: Option<Duration>,
    pub factor: Option<u32>,
    #[serde(rename = "max_delay_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub max_delay: Option<Duration>,
}

impl Config {
    /// Workers that drain the download queue when nothing else is set.
    pub const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(15) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Name of the history file, relative to the working directory.
    const HISTORY_FILE: &'static str = "history.json";

    /// Upper bound on the configuration file size; anything larger is not a
    /// configuration file.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Creates a configuration with defaults and a user agent identifying this
    /// build and platform.
    ///
    /// # Panics
    ///
    /// Panics if the crate name or version contain characters that are not
    /// allowed in a `User-Agent` product token.
    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        assert!(
            !(app_name.is_empty()
                || app_name.contains(illegal_chars)
                || app_version.is_empty()
                || app_version.contains(illegal_chars)),
            "application name and/or version invalid (\"{app_name}\"; \"{app_version}\")"
        );

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let mut os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_version.is_empty() || os_version.contains(illegal_chars) {
            warn!("os version \"{os_version}\" unusable in user agent");
            os_version = String::from("0");
        }

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            user_agent,
            tracks_api_url: None,
            download_api_url: None,
            concurrency: Self::DEFAULT_CONCURRENCY,
            output_dir: PathBuf::from("."),
            history_file: PathBuf::from(Self::HISTORY_FILE),
            retry: RetryPolicy::default(),
        }
    }

    /// Loads defaults overridden by the settings in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is unreasonably large, or
    /// is not valid TOML for [`FileConfig`].
    pub fn from_file(path: &str) -> Result<Self> {
        // Prevent out-of-memory condition: configuration files are small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!("{path} is too large")));
        }

        let contents = fs::read_to_string(path)?;
        let file = toml::from_str::<FileConfig>(&contents)?;
        debug!("loaded configuration from {path}");

        let mut config = Self::new();
        config.apply(file);
        Ok(config)
    }

    /// Overrides the settings that `file` names.
    pub fn apply(&mut self, file: FileConfig) {
        if let Some(url) = file.tracks_api_url {
            self.tracks_api_url = Some(url);
        }
        if let Some(url) = file.download_api_url {
            self.download_api_url = Some(url);
        }
        if let Some(concurrency) = file.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(dir) = file.output_dir {
            self.output_dir = dir;
        }
        if let Some(history) = file.history_file {
            self.history_file = history;
        }
        if let Some(retry) = file.retry {
            if let Some(attempts) = retry.max_attempts {
                self.retry.max_attempts = attempts;
            }
            if let Some(delay) = retry.initial_delay {
                self.retry.initial_delay = delay;
            }
            if let Some(factor) = retry.factor {
                self.retry.factor = factor;
            }
            if let Some(delay) = retry.max_delay {
                self.retry.max_delay = delay;
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.concurrency.get(), 15);
        assert!(config.tracks_api_url.is_none());
        assert!(config.download_api_url.is_none());
        assert!(config.user_agent.starts_with("tunefetch/"));
        assert_eq!(config.retry.max_attempts, 10);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let file: FileConfig = toml::from_str(
            r#"
            download_api_url = "https://resolver.example/api/download"
            concurrency = 4

            [retry]
            initial_delay_ms = 250
            "#,
        )
        .unwrap();

        let mut config = Config::new();
        config.apply(file);

        assert!(config.tracks_api_url.is_none());
        assert_eq!(
            config.download_api_url.as_ref().map(Url::as_str),
            Some("https://resolver.example/api/download")
        );
        assert_eq!(config.concurrency.get(), 4);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 10);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(toml::from_str::<FileConfig>("concurrency = 0").is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunefetch.toml");
        fs::write(&path, "output_dir = \"music\"\n").unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("music"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunefetch.toml");
        fs::write(&path, "arl = \"secret\"\n").unwrap();

        let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }
}
