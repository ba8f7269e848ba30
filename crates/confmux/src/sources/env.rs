// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use confmux_core::{
	merge_values, nest_with, ChangeSet, Encoder, JsonEncoder, NoopWatcher, Source, SourceError,
	Value, Watcher,
};
use serde_json::Map;
use tracing::{debug, trace};

use super::infer_scalar;

/// Environment variables as a configuration fragment.
///
/// Keys are nested on `_`: `DATABASE_HOST=db` becomes `{"database": {"host": "db"}}`.
/// With no prefixes configured every variable is included.
///
/// - [`with_prefix`](EnvSource::with_prefix) keeps matching variables whole
/// - [`with_stripped_prefix`](EnvSource::with_stripped_prefix) keeps matching
///   variables and removes the prefix before nesting
///
/// Read-only, and the environment has no change notification.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
	prefixes: Vec<String>,
	stripped_prefixes: Vec<String>,
}

impl EnvSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefixes.push(prefix.into());
		self
	}

	pub fn with_stripped_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.stripped_prefixes.push(prefix.into());
		self
	}

	fn filtered(&self) -> bool {
		!self.prefixes.is_empty() || !self.stripped_prefixes.is_empty()
	}

	/// Maps a variable name to the key that gets nested, or `None` if filtered out.
	fn key_for<'a>(&self, name: &'a str) -> Option<&'a str> {
		if !self.filtered() {
			return Some(name);
		}
		for prefix in &self.stripped_prefixes {
			if let Some(rest) = after_prefix(name, prefix) {
				return Some(rest.trim_start_matches('_'));
			}
		}
		self
			.prefixes
			.iter()
			.any(|prefix| after_prefix(name, prefix).is_some())
			.then_some(name)
	}

	/// Builds the nested fragment from `vars`.
	pub fn collect<I>(&self, vars: I) -> Value
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let mut fragment = Value::Object(Map::new());
		for (name, raw) in vars {
			let Some(key) = self.key_for(&name) else {
				continue;
			};
			if key.is_empty() {
				continue;
			}
			trace!(variable = %name, "including environment variable");
			merge_values(&mut fragment, nest_with(key, infer_scalar(&raw), &['_']));
		}
		fragment
	}
}

/// The remainder of `name` when `prefix` matches it on a `_` boundary, so
/// `APP` matches `APP` and `APP_PORT` but not `APPLE`.
fn after_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
	name
		.strip_prefix(prefix)
		.filter(|rest| rest.is_empty() || rest.starts_with('_'))
}

#[async_trait]
impl Source for EnvSource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		debug!("loading environment variables");
		// Sorted so the fragment, and its checksum, do not depend on environ order.
		let mut vars: Vec<(String, String)> = std::env::vars_os()
			.filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
			.collect();
		vars.sort();
		let fragment = self.collect(vars);
		let encoder = JsonEncoder;
		let data = encoder
			.encode(&fragment)
			.map_err(|e| SourceError::encode(self.name(), e))?;
		Ok(ChangeSet::new(encoder.name(), data, self.name()))
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		Ok(NoopWatcher::boxed())
	}

	fn name(&self) -> &str {
		"env"
	}
}
