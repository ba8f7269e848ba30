// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loader and reader error types.

use confmux_core::{EncodeError, MergeError, SourceError};

/// Errors from building or driving a [`Loader`](crate::Loader).
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
	/// The loader was given no sources
	#[error("no configuration sources configured")]
	NoSources,

	/// A source failed its first read; the loader cannot start
	#[error("initial read of source '{source_name}' failed: {error}")]
	InitialRead {
		source_name: String,
		#[source]
		error: SourceError,
	},

	/// A source's first fragment could not be decoded; the loader cannot start
	#[error("initial decode of source '{source_name}' failed: {error}")]
	InitialDecode {
		source_name: String,
		#[source]
		error: EncodeError,
	},

	/// A source failed to read during reconciliation
	#[error("reading source '{source_name}' failed: {error}")]
	Read {
		source_name: String,
		#[source]
		error: SourceError,
	},

	/// No fragment could be merged
	#[error("merge failed: {0}")]
	Merge(#[from] MergeError),

	/// Encoding a value for a write failed
	#[error("encode error: {0}")]
	Encode(#[from] EncodeError),

	/// No source with this name is registered
	#[error("unknown source '{0}'")]
	UnknownSource(String),

	/// A source rejected a write
	#[error("write to source '{source_name}' failed: {error}")]
	Write {
		source_name: String,
		#[source]
		error: SourceError,
	},

	/// The loader has been closed
	#[error("loader is closed")]
	Closed,
}

impl LoaderError {
	/// True when a write failed only because the source is read-only.
	pub fn is_write_unsupported(&self) -> bool {
		matches!(self, Self::Write { error, .. } if error.is_unsupported())
	}
}

/// Errors from typed access to a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
	#[error("no value at '{0}'")]
	NotFound(String),

	#[error("value at '{path}' has the wrong shape: {error}")]
	Deserialize {
		path: String,
		#[source]
		error: serde_json::Error,
	},
}
