// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use clap::ArgMatches;
use confmux_core::{
	merge_values, nest, ChangeSet, Encoder, JsonEncoder, NoopWatcher, Source, SourceError, Value,
	Watcher,
};
use tracing::trace;

use super::infer_scalar;

/// Parsed command-line flags as a configuration fragment.
///
/// Each argument id is nested on `-` and `_`, so `--db-host localhost` yields
/// `{"db": {"host": "localhost"}}`. Defaults declared on the command count as
/// values. Flags are fixed for the life of the process; the watcher never
/// fires and writes are rejected.
pub struct ClapSource {
	matches: ArgMatches,
	exclude: Vec<String>,
}

impl ClapSource {
	pub fn new(matches: &ArgMatches) -> Self {
		Self {
			matches: matches.clone(),
			exclude: Vec::new(),
		}
	}

	/// Leaves `id` out of the fragment, for flags that configure the program
	/// rather than the application.
	pub fn exclude(mut self, id: impl Into<String>) -> Self {
		self.exclude.push(id.into());
		self
	}

	fn collect(&self) -> Value {
		let mut root = Value::Object(Default::default());
		for id in self.matches.ids() {
			let id = id.as_str();
			if self.exclude.iter().any(|e| e == id) {
				continue;
			}
			// Groups and external subcommand ids carry no raw values.
			let Ok(Some(raw)) = self.matches.try_get_raw(id) else {
				continue;
			};
			let mut items: Vec<Value> = raw
				.filter_map(|v| v.to_str())
				.map(infer_scalar)
				.collect();
			let value = match items.len() {
				0 => continue,
				1 => items.remove(0),
				_ => Value::Array(items),
			};
			trace!(flag = id, "collected flag");
			merge_values(&mut root, nest(id, value));
		}
		root
	}
}

#[async_trait]
impl Source for ClapSource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		let encoder = JsonEncoder;
		let data = encoder
			.encode(&self.collect())
			.map_err(|e| SourceError::encode(self.name(), e))?;
		Ok(ChangeSet::new(encoder.name(), data, self.name()))
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		Ok(NoopWatcher::boxed())
	}

	fn name(&self) -> &str {
		"cli"
	}
}
