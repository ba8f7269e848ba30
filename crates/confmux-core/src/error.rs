// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types shared by sources, encoders and the merge step.

use std::path::PathBuf;

use crate::merge::SkippedFragment;

/// Errors raised while encoding or decoding a fragment.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
	/// JSON encode/decode failure
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// TOML decode failure
	#[error("TOML parse error: {0}")]
	TomlDecode(#[from] toml::de::Error),

	/// TOML encode failure
	#[error("TOML serialize error: {0}")]
	TomlEncode(#[from] toml::ser::Error),

	/// No encoder is registered for the format tag
	#[error("no encoder registered for format '{0}'")]
	UnknownFormat(String),

	/// The value cannot be represented in the target format
	#[error("unsupported value for {format}: {message}")]
	Unsupported {
		format: &'static str,
		message: String,
	},
}

/// Errors surfaced by a [`Source`](crate::Source) or its watcher.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
	/// I/O error reading or writing the backing store
	#[error("I/O error in source '{source_name}': {error}")]
	Io {
		source_name: String,
		#[source]
		error: std::io::Error,
	},

	/// A file backing the source does not exist
	#[error("source '{source_name}': file not found: {path}")]
	NotFound { source_name: String, path: PathBuf },

	/// The fragment could not be encoded or decoded
	#[error("source '{source_name}': {error}")]
	Encode {
		source_name: String,
		#[source]
		error: EncodeError,
	},

	/// Generic read failure reported by an adapter
	#[error("source '{source_name}' read failed: {message}")]
	Read {
		source_name: String,
		message: String,
	},

	/// The source is read-only
	#[error("source '{0}' does not support writes")]
	WriteUnsupported(String),

	/// The watcher was stopped or its stream ended
	#[error("watcher stopped")]
	WatcherStopped,

	/// The watcher stream failed
	#[error("watch failed for source '{source_name}': {message}")]
	Watch {
		source_name: String,
		message: String,
	},
}

impl SourceError {
	/// Create a read error
	pub fn read(source_name: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Read {
			source_name: source_name.into(),
			message: message.into(),
		}
	}

	/// Create a watch error
	pub fn watch(source_name: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Watch {
			source_name: source_name.into(),
			message: message.into(),
		}
	}

	/// Create an encode error attributed to a source
	pub fn encode(source_name: impl Into<String>, error: EncodeError) -> Self {
		Self::Encode {
			source_name: source_name.into(),
			error,
		}
	}

	/// Create an I/O error attributed to a source
	pub fn io(source_name: impl Into<String>, error: std::io::Error) -> Self {
		Self::Io {
			source_name: source_name.into(),
			error,
		}
	}

	/// True when the source declined a write because it is read-only.
	pub fn is_unsupported(&self) -> bool {
		matches!(self, Self::WriteUnsupported(_))
	}

	/// True when a watcher terminated rather than failed.
	pub fn is_stopped(&self) -> bool {
		matches!(self, Self::WatcherStopped)
	}
}

/// Errors from folding change sets into one value.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
	/// Every fragment failed to decode, or there were none
	#[error("no decodable fragment among {total} change set(s)")]
	NothingDecodable {
		total: usize,
		/// Why each fragment was rejected, in slice order
		skipped: Vec<SkippedFragment>,
	},

	/// The merged value could not be encoded for checksumming
	#[error("failed to encode merged value: {0}")]
	Encode(#[from] EncodeError),
}
