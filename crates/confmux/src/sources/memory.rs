// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use confmux_core::{
	ChangeSet, Encoder, Encoders, JsonEncoder, Source, SourceError, Value, Watcher,
};
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A source backed by a value held in memory.
///
/// Clones share the same value, so a handle kept by the caller can update the
/// configuration after the source has been handed to a loader. Every
/// [`set`](MemorySource::set) fires all open watchers.
#[derive(Clone)]
pub struct MemorySource {
	name: String,
	value: Arc<RwLock<Value>>,
	changes: broadcast::Sender<()>,
	encoders: Encoders,
}

impl MemorySource {
	pub fn new(value: Value) -> Self {
		Self::named("memory", value)
	}

	pub fn named(name: impl Into<String>, value: Value) -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
		Self {
			name: name.into(),
			value: Arc::new(RwLock::new(value)),
			changes,
			encoders: Encoders::default(),
		}
	}

	/// Replaces the value and notifies watchers.
	pub fn set(&self, value: Value) {
		match self.value.write() {
			Ok(mut guard) => *guard = value,
			Err(poisoned) => *poisoned.into_inner() = value,
		}
		let receivers = self.changes.send(()).unwrap_or(0);
		debug!(source = %self.name, receivers, "memory source updated");
	}

	pub fn get(&self) -> Value {
		match self.value.read() {
			Ok(guard) => guard.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}
}

#[async_trait]
impl Source for MemorySource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		let encoder = JsonEncoder;
		let data = encoder
			.encode(&self.get())
			.map_err(|e| SourceError::encode(&self.name, e))?;
		Ok(ChangeSet::new(encoder.name(), data, &self.name))
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		Ok(Box::new(MemoryWatcher {
			rx: Some(self.changes.subscribe()),
		}))
	}

	async fn write(&self, change_set: &ChangeSet) -> Result<(), SourceError> {
		let value = self
			.encoders
			.encoder_for(change_set.format())
			.and_then(|encoder| encoder.decode(change_set.data()))
			.map_err(|e| SourceError::encode(&self.name, e))?;
		self.set(value);
		Ok(())
	}

	fn name(&self) -> &str {
		&self.name
	}
}

struct MemoryWatcher {
	rx: Option<broadcast::Receiver<()>>,
}

#[async_trait]
impl Watcher for MemoryWatcher {
	async fn next(&mut self) -> Result<(), SourceError> {
		let Some(rx) = self.rx.as_mut() else {
			return Err(SourceError::WatcherStopped);
		};
		match rx.recv().await {
			// Missed events still mean "changed".
			Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Ok(()),
			Err(broadcast::error::RecvError::Closed) => Err(SourceError::WatcherStopped),
		}
	}

	fn stop(&mut self) {
		self.rx = None;
	}
}
