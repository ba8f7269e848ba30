// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use confmux_core::{ChangeSet, Encoder, Encoders, Source, SourceError, Watcher};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, trace};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A configuration file.
///
/// The format follows the file extension (`.json`, `.toml`) unless an encoder
/// is given. Changes are detected by polling the file's checksum.
pub struct FileSource {
	path: PathBuf,
	name: String,
	encoder: Option<Arc<dyn Encoder>>,
	encoders: Encoders,
	optional: bool,
	poll_interval: Duration,
}

impl FileSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let name = format!("file:{}", path.display());
		Self {
			path,
			name,
			encoder: None,
			encoders: Encoders::default(),
			optional: false,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}

	/// A missing optional file reads as an empty fragment instead of an error.
	pub fn optional(mut self) -> Self {
		self.optional = true;
		self
	}

	pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
		self.encoder = Some(encoder);
		self
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn encoder(&self) -> Result<Arc<dyn Encoder>, SourceError> {
		match &self.encoder {
			Some(encoder) => Ok(Arc::clone(encoder)),
			None => self
				.encoders
				.for_path(&self.path)
				.map_err(|e| SourceError::encode(&self.name, e)),
		}
	}
}

#[async_trait]
impl Source for FileSource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		let encoder = self.encoder()?;
		match tokio::fs::read(&self.path).await {
			Ok(data) => {
				trace!(path = %self.path.display(), bytes = data.len(), "read config file");
				Ok(ChangeSet::new(encoder.name(), data, &self.name))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				if self.optional {
					debug!(path = %self.path.display(), "config file not found, skipping");
					Ok(ChangeSet::new(encoder.name(), Vec::new(), &self.name))
				} else {
					Err(SourceError::NotFound {
						source_name: self.name.clone(),
						path: self.path.clone(),
					})
				}
			}
			Err(e) => Err(SourceError::io(&self.name, e)),
		}
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		let mut interval = tokio::time::interval(self.poll_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
		let last = file_checksum(&self.path).await;
		Ok(Box::new(FileWatcher {
			path: self.path.clone(),
			interval,
			last,
			stopped: false,
		}))
	}

	/// Writes the fragment in the file's own format, re-encoding if needed.
	async fn write(&self, change_set: &ChangeSet) -> Result<(), SourceError> {
		let encoder = self.encoder()?;
		let data = if change_set.format() == encoder.name() {
			change_set.data().to_vec()
		} else {
			self.encoders
				.encoder_for(change_set.format())
				.and_then(|incoming| incoming.decode(change_set.data()))
				.and_then(|value| encoder.encode(&value))
				.map_err(|e| SourceError::encode(&self.name, e))?
		};
		tokio::fs::write(&self.path, data)
			.await
			.map_err(|e| SourceError::io(&self.name, e))?;
		debug!(path = %self.path.display(), "config file written");
		Ok(())
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// `None` when the file is missing or unreadable.
async fn file_checksum(path: &Path) -> Option<String> {
	tokio::fs::read(path)
		.await
		.ok()
		.map(|data| ChangeSet::sum(&data))
}

struct FileWatcher {
	path: PathBuf,
	interval: Interval,
	last: Option<String>,
	stopped: bool,
}

#[async_trait]
impl Watcher for FileWatcher {
	async fn next(&mut self) -> Result<(), SourceError> {
		loop {
			if self.stopped {
				return Err(SourceError::WatcherStopped);
			}
			self.interval.tick().await;
			let current = file_checksum(&self.path).await;
			if current != self.last {
				trace!(path = %self.path.display(), "config file changed");
				self.last = current;
				return Ok(());
			}
		}
	}

	fn stop(&mut self) {
		self.stopped = true;
	}
}
