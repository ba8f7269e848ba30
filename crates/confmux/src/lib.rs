// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration with live reload.
//!
//! A [`Loader`] owns an ordered list of [`Source`]s, merges their fragments
//! into one [`Snapshot`] and, unless watching is disabled, keeps that snapshot
//! current by re-reading every source whenever any of them reports a change.
//!
//! Later sources override earlier ones, so defaults go first and CLI flags last.
//!
//! # Usage
//!
//! ```ignore
//! use confmux::sources::{EnvSource, FileSource};
//! use confmux::Loader;
//!
//! let loader = Loader::builder()
//! 	.source(FileSource::new("/etc/app/config.toml"))
//! 	.source(EnvSource::new().with_stripped_prefix("APP"))
//! 	.build()
//! 	.await?;
//!
//! let port = loader.values().int("http.port", 8080);
//! let mut updates = loader.subscribe();
//! updates.changed().await?;
//! loader.close().await;
//! ```

pub mod error;
pub mod loader;
pub mod options;
pub mod reader;
pub mod snapshot;
pub mod sources;
mod watch;

pub use error::{LoaderError, ReaderError};
pub use loader::{Loader, LoaderBuilder};
pub use options::{LoaderOptions, Mode, WatchRetryConfig};
pub use reader::{PathWatcher, Values};
pub use snapshot::Snapshot;

// Re-export core types for convenience
pub use confmux_core::{
	merge, nest, nest_with, ChangeSet, EncodeError, Encoder, Encoders, JsonEncoder, MergeError,
	NoopWatcher, Source, SourceError, TomlEncoder, Value, Watcher,
};
