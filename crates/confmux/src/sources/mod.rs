// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bundled source adapters: in-memory values, environment variables, files and
//! parsed command-line flags.

mod env;
mod file;
mod flags;
mod memory;

pub use env::EnvSource;
pub use file::FileSource;
pub use flags::ClapSource;
pub use memory::MemorySource;

use confmux_core::Value;

/// Interprets a raw string as the most specific scalar it spells.
///
/// `true`/`false` become booleans, integers and finite floats become numbers,
/// everything else stays a string.
pub fn infer_scalar(raw: &str) -> Value {
	match raw {
		"true" => return Value::Bool(true),
		"false" => return Value::Bool(false),
		_ => {}
	}
	if let Ok(i) = raw.parse::<i64>() {
		return Value::from(i);
	}
	if let Ok(f) = raw.parse::<f64>() {
		if f.is_finite() {
			return Value::from(f);
		}
	}
	Value::String(raw.to_string())
}
