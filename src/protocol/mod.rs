//! Wire types for the resolver endpoints.
//!
//! # Submodules
//!
//! * [`tracks`] - collection metadata and track lists
//! * [`download`] - transient audio URLs for single tracks
//!
//! Both endpoints answer with a JSON object that carries either a result or
//! an `error` member, sometimes both. The types here accept every shape the
//! endpoints are known to produce and leave interpretation to the
//! [`gateway`](crate::gateway).

pub mod download;
pub mod tracks;

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parses and logs JSON responses from the resolver endpoints.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Parse error: logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: logs the error at ERROR level and the raw text at TRACE
///
/// # Errors
///
/// Returns error if `body` is not valid JSON or does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}

/// Error member of a resolver response.
///
/// Upstream sends `{"message": "..."}`; intermediaries sometimes flatten it
/// to a bare string.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Debug, Hash)]
#[serde(untagged)]
pub enum ErrorBody {
    Message { message: String },
    Text(String),
}

impl ErrorBody {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Message { message } => message,
            Self::Text(text) => text,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
