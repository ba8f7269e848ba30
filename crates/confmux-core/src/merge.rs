// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic deep merge of configuration fragments.
//!
//! Fragments are applied left to right, so source-list order is the only
//! precedence rule: put defaults first and overrides (CLI flags) last.
//!
//! - two mappings at the same key merge recursively
//! - anything else at the same key is replaced by the later value
//! - a mapping meeting a non-mapping is replaced outright, never partially merged

use serde_json::{Map, Value};
use tracing::warn;

use crate::change_set::ChangeSet;
use crate::encoder::{Encoder, Encoders, JsonEncoder};
use crate::error::{EncodeError, MergeError};

/// Merges `overlay` into `base` in place.
pub fn merge_values(base: &mut Value, overlay: Value) {
	match (base, overlay) {
		(Value::Object(base_map), Value::Object(overlay_map)) => {
			for (key, value) in overlay_map {
				match base_map.get_mut(&key) {
					Some(existing) => merge_values(existing, value),
					None => {
						base_map.insert(key, value);
					}
				}
			}
		}
		(base, overlay) => *base = overlay,
	}
}

/// Folds `fragments` left to right into one mapping.
pub fn merge<I>(fragments: I) -> Value
where
	I: IntoIterator<Item = Value>,
{
	let mut merged = Value::Object(Map::new());
	for fragment in fragments {
		merge_values(&mut merged, fragment);
	}
	merged
}

/// A change set left out of a merge.
#[derive(Debug)]
pub struct SkippedFragment {
	pub source: String,
	pub error: EncodeError,
}

/// Result of merging a list of change sets.
#[derive(Debug)]
pub struct Merged {
	pub value: Value,
	/// Checksum of the canonical JSON encoding of `value`.
	pub checksum: String,
	pub skipped: Vec<SkippedFragment>,
}

/// Decodes each change set with the encoder named by its format and merges the
/// results in slice order.
///
/// Fragments that fail to decode, or whose root is not a mapping, are skipped
/// and reported in [`Merged::skipped`]. Empty fragments contribute nothing.
/// Fails only when nothing at all could be decoded.
pub fn merge_change_sets(
	encoders: &Encoders,
	change_sets: &[ChangeSet],
) -> Result<Merged, MergeError> {
	let mut fragments = Vec::with_capacity(change_sets.len());
	let mut skipped = Vec::new();

	for cs in change_sets {
		if cs.is_empty() {
			fragments.push(Value::Object(Map::new()));
			continue;
		}
		match decode_fragment(encoders, cs) {
			Ok(value) => fragments.push(value),
			Err(error) => {
				warn!(
					source = cs.source(),
					format = cs.format(),
					error = %error,
					"skipping undecodable fragment"
				);
				skipped.push(SkippedFragment {
					source: cs.source().to_string(),
					error,
				});
			}
		}
	}

	if fragments.is_empty() {
		return Err(MergeError::NothingDecodable {
			total: change_sets.len(),
			skipped,
		});
	}

	let value = merge(fragments);
	let checksum = checksum_of(&value)?;
	Ok(Merged {
		value,
		checksum,
		skipped,
	})
}

/// Aggregate checksum of a merged value.
///
/// serde_json keeps object keys sorted, so equal values always encode to the
/// same bytes.
pub fn checksum_of(value: &Value) -> Result<String, EncodeError> {
	Ok(ChangeSet::sum(&JsonEncoder.encode(value)?))
}

fn decode_fragment(encoders: &Encoders, cs: &ChangeSet) -> Result<Value, EncodeError> {
	let value = encoders.encoder_for(cs.format())?.decode(cs.data())?;
	match value {
		Value::Object(_) => Ok(value),
		Value::Null => Ok(Value::Object(Map::new())),
		other => Err(EncodeError::Unsupported {
			format: "fragment",
			message: format!("root must be a mapping, got {}", kind(&other)),
		}),
	}
}

fn kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "mapping",
	}
}
