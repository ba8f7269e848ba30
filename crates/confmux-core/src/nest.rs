// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-path nesting for flat, delimited key names.
//!
//! Flag- and environment-style sources expose keys like `db-host`. Nesting
//! turns them into the fragment `{"db": {"host": value}}` so they merge with
//! structured sources at the right depth. Purely syntactic: no schema, no
//! failure modes.

use serde_json::{Map, Value};

/// Delimiters recognised by [`nest`].
pub const DEFAULT_DELIMITERS: &[char] = &['-', '_'];

/// Nests `key` using `-` and `_` as path separators.
///
/// ```
/// use confmux_core::nest;
/// use serde_json::json;
///
/// assert_eq!(nest("DB-Host", json!("localhost")), json!({"db": {"host": "localhost"}}));
/// ```
pub fn nest(key: &str, value: Value) -> Value {
	nest_with(key, value, DEFAULT_DELIMITERS)
}

/// Nests `key` using a caller-chosen delimiter set.
///
/// Empty segments (leading, trailing or repeated delimiters) are dropped; a key
/// made only of delimiters yields an empty mapping.
pub fn nest_with(key: &str, value: Value, delimiters: &[char]) -> Value {
	let lowered = key.to_lowercase();
	let mut segments: Vec<&str> = lowered
		.split(|c: char| delimiters.contains(&c))
		.filter(|s| !s.is_empty())
		.collect();
	segments.reverse();

	let mut segments = segments.into_iter();
	let Some(innermost) = segments.next() else {
		return Value::Object(Map::new());
	};

	let mut acc = Map::new();
	acc.insert(innermost.to_string(), value);
	for segment in segments {
		let mut outer = Map::new();
		outer.insert(segment.to_string(), Value::Object(acc));
		acc = outer;
	}
	Value::Object(acc)
}
