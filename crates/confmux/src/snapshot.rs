// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable merged configuration as published by the loader.

use chrono::{DateTime, Utc};
use confmux_core::{EncodeError, Encoder, Value};

/// One fully merged configuration value.
///
/// Snapshots are immutable and shared behind an `Arc`; each publication by the
/// loader is a brand-new instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
	value: Value,
	checksum: String,
	version: u64,
	timestamp: DateTime<Utc>,
	sources: Vec<String>,
}

impl Snapshot {
	pub(crate) fn new(value: Value, checksum: String, version: u64, sources: Vec<String>) -> Self {
		Self {
			value,
			checksum,
			version,
			timestamp: Utc::now(),
			sources,
		}
	}

	/// The merged mapping.
	pub fn value(&self) -> &Value {
		&self.value
	}

	/// Aggregate checksum; equal checksums mean equal merged values.
	pub fn checksum(&self) -> &str {
		&self.checksum
	}

	/// 0 for the initial snapshot, incremented on each publication.
	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn timestamp(&self) -> DateTime<Utc> {
		self.timestamp
	}

	/// Names of the sources whose fragments were merged, in precedence order.
	/// Sources skipped because their fragment failed to decode are left out.
	pub fn sources(&self) -> &[String] {
		&self.sources
	}

	/// Encodes the merged value with `encoder`.
	pub fn encode(&self, encoder: &dyn Encoder) -> Result<Vec<u8>, EncodeError> {
		encoder.encode(&self.value)
	}
}
