// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The capability contracts every configuration source implements.

use async_trait::async_trait;

use crate::change_set::ChangeSet;
use crate::error::SourceError;

/// A pluggable provider of one configuration fragment.
///
/// Implementations hold only what they need (a path, a prefix, a client).
/// `read` must not affect other sources. The aggregator always re-reads on a
/// watch event instead of trusting pushed data, so watchers carry no payload.
#[async_trait]
pub trait Source: Send + Sync {
	/// Produces the source's current fragment.
	async fn read(&self) -> Result<ChangeSet, SourceError>;

	/// Opens a change-notification stream.
	///
	/// Sources without native notification return a [`NoopWatcher`].
	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError>;

	/// Persists a fragment to the backing store.
	///
	/// Read-only sources keep this default and report
	/// [`SourceError::WriteUnsupported`].
	async fn write(&self, change_set: &ChangeSet) -> Result<(), SourceError> {
		let _ = change_set;
		Err(SourceError::WriteUnsupported(self.name().to_string()))
	}

	/// Stable identifier, recorded as `ChangeSet::source`.
	fn name(&self) -> &str;
}

/// A cancellable stream of "something changed" events for one source.
#[async_trait]
pub trait Watcher: Send {
	/// Resolves once per change.
	///
	/// Returns [`SourceError::WatcherStopped`] once the stream has terminated,
	/// either through [`stop`](Watcher::stop) or because the underlying feed
	/// closed. Other errors are stream failures.
	async fn next(&mut self) -> Result<(), SourceError>;

	/// Terminates the stream. Safe to call more than once.
	fn stop(&mut self);
}

/// Watcher for sources with no change notification: never fires.
#[derive(Debug, Default)]
pub struct NoopWatcher {
	stopped: bool,
}

impl NoopWatcher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn boxed() -> Box<dyn Watcher> {
		Box::new(Self::new())
	}
}

#[async_trait]
impl Watcher for NoopWatcher {
	async fn next(&mut self) -> Result<(), SourceError> {
		if self.stopped {
			return Err(SourceError::WatcherStopped);
		}
		std::future::pending::<()>().await;
		Err(SourceError::WatcherStopped)
	}

	fn stop(&mut self) {
		self.stopped = true;
	}
}
