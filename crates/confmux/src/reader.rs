// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed, default-returning access to a merged snapshot.
//!
//! Paths are dotted (`db.host`); a numeric segment indexes into an array
//! (`servers.0.addr`).

use std::sync::Arc;

use confmux_core::Value;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::error::ReaderError;
use crate::snapshot::Snapshot;
use crate::watch::stopped;

/// Looks up a dotted path inside `root`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
	path
		.split('.')
		.filter(|segment| !segment.is_empty())
		.try_fold(root, |current, segment| match current {
			Value::Object(map) => map.get(segment),
			Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
			_ => None,
		})
}

/// Read-only view of one snapshot.
#[derive(Debug, Clone)]
pub struct Values {
	snapshot: Arc<Snapshot>,
}

impl Values {
	pub fn new(snapshot: Arc<Snapshot>) -> Self {
		Self { snapshot }
	}

	pub fn snapshot(&self) -> &Arc<Snapshot> {
		&self.snapshot
	}

	pub fn get(&self, path: &str) -> Option<&Value> {
		lookup(self.snapshot.value(), path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.get(path).is_some()
	}

	/// Strings as-is; numbers and booleans are rendered.
	pub fn string(&self, path: &str, default: &str) -> String {
		match self.get(path) {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Number(n)) => n.to_string(),
			Some(Value::Bool(b)) => b.to_string(),
			_ => default.to_string(),
		}
	}

	pub fn bool(&self, path: &str, default: bool) -> bool {
		match self.get(path) {
			Some(Value::Bool(b)) => *b,
			Some(Value::String(s)) => s.parse().unwrap_or(default),
			_ => default,
		}
	}

	pub fn int(&self, path: &str, default: i64) -> i64 {
		match self.get(path) {
			Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
			Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
			_ => default,
		}
	}

	pub fn float(&self, path: &str, default: f64) -> f64 {
		match self.get(path) {
			Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
			Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
			_ => default,
		}
	}

	/// Arrays of scalars, or a comma-separated string.
	pub fn string_list(&self, path: &str, default: &[&str]) -> Vec<String> {
		match self.get(path) {
			Some(Value::Array(items)) => items
				.iter()
				.filter_map(|item| match item {
					Value::String(s) => Some(s.clone()),
					Value::Number(n) => Some(n.to_string()),
					Value::Bool(b) => Some(b.to_string()),
					_ => None,
				})
				.collect(),
			Some(Value::String(s)) => s
				.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect(),
			_ => default.iter().map(|s| s.to_string()).collect(),
		}
	}

	/// Deserializes the value at `path` (the whole snapshot for `""`).
	pub fn scan<T: DeserializeOwned>(&self, path: &str) -> Result<T, ReaderError> {
		let value = self
			.get(path)
			.ok_or_else(|| ReaderError::NotFound(path.to_string()))?;
		T::deserialize(value).map_err(|error| ReaderError::Deserialize {
			path: path.to_string(),
			error,
		})
	}
}

/// Follows one path across snapshot publications.
pub struct PathWatcher {
	path: String,
	snapshots: watch::Receiver<Arc<Snapshot>>,
	shutdown: watch::Receiver<bool>,
	last: Value,
}

impl PathWatcher {
	pub(crate) fn new(
		path: String,
		mut snapshots: watch::Receiver<Arc<Snapshot>>,
		shutdown: watch::Receiver<bool>,
	) -> Self {
		let last = lookup(snapshots.borrow_and_update().value(), &path)
			.cloned()
			.unwrap_or(Value::Null);
		Self {
			path,
			snapshots,
			shutdown,
			last,
		}
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	/// The value most recently observed; `Null` when the path is absent.
	pub fn current(&self) -> &Value {
		&self.last
	}

	/// Resolves with the new value once a publication changes it.
	///
	/// Publications that leave this path untouched are skipped. Returns `None`
	/// once the loader is closed or dropped.
	pub async fn next(&mut self) -> Option<Value> {
		loop {
			tokio::select! {
				biased;
				_ = stopped(&mut self.shutdown) => return None,
				changed = self.snapshots.changed() => changed.ok()?,
			}

			let value = lookup(self.snapshots.borrow_and_update().value(), &self.path)
				.cloned()
				.unwrap_or(Value::Null);
			if value != self.last {
				self.last = value.clone();
				return Some(value);
			}
		}
	}
}
