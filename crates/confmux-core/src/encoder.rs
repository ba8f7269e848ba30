// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encoders turn structured values into bytes and back.
//!
//! Sources and the aggregator are format-agnostic: a [`ChangeSet`](crate::ChangeSet)
//! carries the name of the encoder that produced it, and [`Encoders`] resolves
//! that name when the fragment is merged.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::EncodeError;

/// Encoding and decoding of one configuration format.
pub trait Encoder: Send + Sync {
	fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError>;
	fn decode(&self, data: &[u8]) -> Result<Value, EncodeError>;
	/// Format tag, recorded as `ChangeSet::format`.
	fn name(&self) -> &'static str;
}

/// Decodes `data` with `encoder` straight into a typed target.
pub fn decode_into<T: DeserializeOwned>(
	encoder: &dyn Encoder,
	data: &[u8],
) -> Result<T, EncodeError> {
	let value = encoder.decode(data)?;
	Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
	fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
		Ok(serde_json::to_vec(value)?)
	}

	fn decode(&self, data: &[u8]) -> Result<Value, EncodeError> {
		Ok(serde_json::from_slice(data)?)
	}

	fn name(&self) -> &'static str {
		"json"
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TomlEncoder;

impl Encoder for TomlEncoder {
	fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
		if !value.is_object() {
			return Err(EncodeError::Unsupported {
				format: "toml",
				message: "document root must be a table".to_string(),
			});
		}
		Ok(toml::to_string(value)?.into_bytes())
	}

	fn decode(&self, data: &[u8]) -> Result<Value, EncodeError> {
		let text = std::str::from_utf8(data).map_err(|e| EncodeError::Unsupported {
			format: "toml",
			message: format!("invalid UTF-8: {e}"),
		})?;
		Ok(toml::from_str(text)?)
	}

	fn name(&self) -> &'static str {
		"toml"
	}
}

/// Registry of encoders keyed by format tag.
#[derive(Clone)]
pub struct Encoders {
	by_name: BTreeMap<String, Arc<dyn Encoder>>,
}

impl Encoders {
	/// An empty registry.
	pub fn empty() -> Self {
		Self {
			by_name: BTreeMap::new(),
		}
	}

	/// Registers `encoder` under its own name, replacing any previous one.
	pub fn register(&mut self, encoder: Arc<dyn Encoder>) {
		self.by_name.insert(encoder.name().to_string(), encoder);
	}

	pub fn with(mut self, encoder: Arc<dyn Encoder>) -> Self {
		self.register(encoder);
		self
	}

	pub fn encoder_for(&self, format: &str) -> Result<Arc<dyn Encoder>, EncodeError> {
		self
			.by_name
			.get(format)
			.cloned()
			.ok_or_else(|| EncodeError::UnknownFormat(format.to_string()))
	}

	/// Picks an encoder from a file extension (`config.toml` → `toml`).
	pub fn for_path(&self, path: &Path) -> Result<Arc<dyn Encoder>, EncodeError> {
		let ext = path
			.extension()
			.and_then(|e| e.to_str())
			.map(|e| e.to_ascii_lowercase())
			.unwrap_or_default();
		self.encoder_for(&ext)
	}

	pub fn formats(&self) -> impl Iterator<Item = &str> {
		self.by_name.keys().map(String::as_str)
	}
}

impl Default for Encoders {
	fn default() -> Self {
		Self::empty()
			.with(Arc::new(JsonEncoder))
			.with(Arc::new(TomlEncoder))
	}
}

impl std::fmt::Debug for Encoders {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.by_name.keys()).finish()
	}
}
