// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable encoded configuration fragments.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// One source's current fragment, encoded, with its checksum and origin.
///
/// Fields are private: the checksum is always the hash of the exact bytes held
/// by the same instance. A changed fragment is a new `ChangeSet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
	format: String,
	data: Vec<u8>,
	checksum: String,
	timestamp: DateTime<Utc>,
	source: String,
}

impl ChangeSet {
	/// Builds a change set captured now.
	pub fn new(
		format: impl Into<String>,
		data: impl Into<Vec<u8>>,
		source: impl Into<String>,
	) -> Self {
		Self::with_timestamp(format, data, source, Utc::now())
	}

	pub fn with_timestamp(
		format: impl Into<String>,
		data: impl Into<Vec<u8>>,
		source: impl Into<String>,
		timestamp: DateTime<Utc>,
	) -> Self {
		let data = data.into();
		let checksum = Self::sum(&data);
		Self {
			format: format.into(),
			data,
			checksum,
			timestamp,
			source: source.into(),
		}
	}

	/// Lowercase hex SHA-256 of `data`.
	pub fn sum(data: &[u8]) -> String {
		hex::encode(Sha256::digest(data))
	}

	/// Recomputes the checksum and compares it with the stored one.
	pub fn verify(&self) -> bool {
		Self::sum(&self.data) == self.checksum
	}

	/// Format tag naming the encoder that produced `data`.
	pub fn format(&self) -> &str {
		&self.format
	}

	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn checksum(&self) -> &str {
		&self.checksum
	}

	/// Capture time. Informational only; precedence comes from source order.
	pub fn timestamp(&self) -> DateTime<Utc> {
		self.timestamp
	}

	/// Name of the producing source.
	pub fn source(&self) -> &str {
		&self.source
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}
