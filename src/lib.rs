//! Downloads every track of a music collection with bounded concurrency.
//!
//! A collection reference, such as a playlist link, is resolved into its
//! ordered tracks through the [`gateway`]. The [`queue`] then downloads them
//! with a fixed number of workers, keeps track of which ones failed, and can
//! re-drive exactly those.
//!
//! # Modules
//!
//! * [`session`] - the active collection, its downloads and the history
//! * [`queue`] - the download engine
//! * [`download`], [`storage`] - a single track from URL to file
//! * [`resolver`], [`gateway`], [`protocol`] - talking to the resolver endpoints
//! * [`retry`] - bounded retries with exponential backoff
//! * [`history`] - recently resolved collections
//! * [`config`], [`error`], [`http`], [`signal`] - plumbing
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod collection;
pub mod config;
pub mod download;
pub mod error;
pub mod gateway;
pub mod history;
pub mod http;
pub mod protocol;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod signal;
pub mod storage;
pub mod track;
