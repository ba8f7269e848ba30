// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The aggregator: initial load, live reconciliation and snapshot publication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use confmux_core::{
	merge_change_sets, ChangeSet, Encoder, Encoders, JsonEncoder, MergeError, SkippedFragment,
	Source, Value, Watcher,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::LoaderError;
use crate::options::{LoaderOptions, Mode, WatchRetryConfig};
use crate::reader::{PathWatcher, Values};
use crate::snapshot::Snapshot;
use crate::watch::{run_watch_loop, stopped};

/// State shared between the loader handle and its background tasks.
struct Engine {
	sources: Vec<Arc<dyn Source>>,
	encoders: Encoders,
	snapshot_tx: watch::Sender<Arc<Snapshot>>,
	/// Serialises reconciliation passes.
	pass_lock: Mutex<()>,
	closed: AtomicBool,
}

impl Engine {
	fn source_names(&self) -> Vec<String> {
		self.sources.iter().map(|s| s.name().to_string()).collect()
	}

	/// One full re-read and re-merge. Returns whether a new snapshot was published.
	async fn reconcile(&self) -> Result<bool, LoaderError> {
		let _pass = self.pass_lock.lock().await;
		if self.closed.load(Ordering::SeqCst) {
			return Err(LoaderError::Closed);
		}

		let mut change_sets = Vec::with_capacity(self.sources.len());
		for source in &self.sources {
			let cs = source.read().await.map_err(|error| LoaderError::Read {
				source_name: source.name().to_string(),
				error,
			})?;
			change_sets.push(cs);
		}

		let merged = merge_change_sets(&self.encoders, &change_sets)?;

		let current = self.snapshot_tx.borrow().clone();
		if merged.checksum == current.checksum() {
			debug!(version = current.version(), "configuration unchanged");
			return Ok(false);
		}

		// close() may have run while sources were being read.
		if self.closed.load(Ordering::SeqCst) {
			return Err(LoaderError::Closed);
		}

		let contributors = self
			.source_names()
			.into_iter()
			.filter(|name| !merged.skipped.iter().any(|s| &s.source == name))
			.collect();
		let next = Snapshot::new(
			merged.value,
			merged.checksum,
			current.version() + 1,
			contributors,
		);
		let version = next.version();
		self.snapshot_tx.send_replace(Arc::new(next));
		info!(version, skipped = merged.skipped.len(), "configuration snapshot published");
		Ok(true)
	}
}

/// Owns an ordered list of sources and the merged snapshot built from them.
///
/// Source order is precedence order: later sources override earlier ones.
pub struct Loader {
	engine: Arc<Engine>,
	mode: Mode,
	shutdown_tx: watch::Sender<bool>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Loader {
	pub fn builder() -> LoaderBuilder {
		LoaderBuilder::default()
	}

	/// Reads every source, merges the result into the first snapshot and, in
	/// live mode, starts watching.
	///
	/// Any source that fails to read or decode here is fatal: the loader never
	/// starts without a complete first snapshot.
	#[instrument(skip_all, fields(sources = sources.len(), watch = options.watch))]
	pub async fn new(
		sources: Vec<Box<dyn Source>>,
		options: LoaderOptions,
	) -> Result<Self, LoaderError> {
		if sources.is_empty() {
			return Err(LoaderError::NoSources);
		}

		let sources: Vec<Arc<dyn Source>> = sources.into_iter().map(Arc::from).collect();
		let mode = options.mode();

		// Watchers open before the first read so no change slips between the two.
		let watchers = match mode {
			Mode::Live => Some(open_watchers(&sources).await),
			Mode::Static => None,
		};

		let first = match initial_snapshot(&sources, &options.encoders).await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				if let Some(watchers) = watchers {
					for mut w in watchers.into_iter().flatten() {
						w.stop();
					}
				}
				return Err(e);
			}
		};

		info!(
			mode = %mode,
			version = first.version(),
			checksum = %first.checksum(),
			"configuration loaded"
		);

		let (snapshot_tx, _) = watch::channel(Arc::new(first));
		let (shutdown_tx, _) = watch::channel(false);

		let engine = Arc::new(Engine {
			sources,
			encoders: options.encoders,
			snapshot_tx,
			pass_lock: Mutex::new(()),
			closed: AtomicBool::new(false),
		});

		let handles = match watchers {
			Some(watchers) => spawn_live(&engine, watchers, options.retry, &shutdown_tx),
			None => Vec::new(),
		};

		Ok(Self {
			engine,
			mode,
			shutdown_tx,
			handles: Mutex::new(handles),
		})
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	/// The current merged snapshot. Never a partially merged value.
	pub fn snapshot(&self) -> Arc<Snapshot> {
		self.engine.snapshot_tx.borrow().clone()
	}

	/// Typed accessors over the current snapshot.
	pub fn values(&self) -> Values {
		Values::new(self.snapshot())
	}

	/// Receives every published snapshot.
	pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
		self.engine.snapshot_tx.subscribe()
	}

	/// Follows the value at a dotted path across publications.
	pub fn watch_path(&self, path: impl Into<String>) -> PathWatcher {
		PathWatcher::new(path.into(), self.subscribe(), self.shutdown_tx.subscribe())
	}

	/// Names of the sources, in precedence order.
	pub fn source_names(&self) -> Vec<String> {
		self.engine.source_names()
	}

	pub fn is_closed(&self) -> bool {
		self.engine.closed.load(Ordering::SeqCst)
	}

	/// Runs one reconciliation pass now.
	///
	/// Returns `Ok(true)` if a new snapshot was published, `Ok(false)` if the
	/// merged configuration did not change. On error the previous snapshot
	/// stays current.
	#[instrument(skip(self))]
	pub async fn sync(&self) -> Result<bool, LoaderError> {
		self.engine.reconcile().await
	}

	/// Persists `value` through the named source.
	///
	/// Read-only sources fail with an error for which
	/// [`LoaderError::is_write_unsupported`] is true.
	#[instrument(skip(self, value))]
	pub async fn write(&self, source_name: &str, value: &Value) -> Result<(), LoaderError> {
		if self.is_closed() {
			return Err(LoaderError::Closed);
		}
		let source = self
			.engine
			.sources
			.iter()
			.find(|s| s.name() == source_name)
			.ok_or_else(|| LoaderError::UnknownSource(source_name.to_string()))?;

		let encoder = JsonEncoder;
		let cs = ChangeSet::new(encoder.name(), encoder.encode(value)?, source_name);
		source.write(&cs).await.map_err(|error| LoaderError::Write {
			source_name: source_name.to_string(),
			error,
		})
	}

	/// Stops every watcher and the reconciliation task.
	///
	/// Idempotent. Once this returns no background task is running and no new
	/// snapshot will be published; [`snapshot`](Self::snapshot) keeps
	/// returning the last value.
	#[instrument(skip(self))]
	pub async fn close(&self) {
		let already_closed = self.engine.closed.swap(true, Ordering::SeqCst);
		self.shutdown_tx.send_replace(true);

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			if let Err(e) = handle.await {
				if e.is_panic() {
					warn!(error = %e, "background task panicked");
				}
			}
		}
		drop(handles);

		// Wait out a pass started through sync().
		let _pass = self.engine.pass_lock.lock().await;

		if !already_closed {
			info!("configuration loader closed");
		}
	}
}

impl Drop for Loader {
	fn drop(&mut self) {
		self.shutdown_tx.send_replace(true);
		for handle in self.handles.get_mut().drain(..) {
			handle.abort();
		}
	}
}

impl std::fmt::Debug for Loader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Loader")
			.field("mode", &self.mode)
			.field("sources", &self.source_names())
			.field("version", &self.snapshot().version())
			.finish()
	}
}

async fn open_watchers(sources: &[Arc<dyn Source>]) -> Vec<Option<Box<dyn Watcher>>> {
	let mut watchers = Vec::with_capacity(sources.len());
	for source in sources {
		match source.watch().await {
			Ok(w) => watchers.push(Some(w)),
			Err(e) => {
				// The watch task retries with backoff.
				warn!(source = source.name(), error = %e, "failed to open watcher");
				watchers.push(None);
			}
		}
	}
	watchers
}

async fn initial_snapshot(
	sources: &[Arc<dyn Source>],
	encoders: &Encoders,
) -> Result<Snapshot, LoaderError> {
	let mut change_sets = Vec::with_capacity(sources.len());
	for source in sources {
		debug!(source = source.name(), "reading configuration source");
		let cs = source
			.read()
			.await
			.map_err(|error| LoaderError::InitialRead {
				source_name: source.name().to_string(),
				error,
			})?;
		change_sets.push(cs);
	}

	// Any rejected fragment is fatal here, whether or not the others decoded.
	let mut merged = match merge_change_sets(encoders, &change_sets) {
		Ok(merged) => merged,
		Err(MergeError::NothingDecodable { total, skipped }) => {
			return Err(match skipped.into_iter().next() {
				Some(first) => initial_decode(first),
				None => MergeError::NothingDecodable {
					total,
					skipped: Vec::new(),
				}
				.into(),
			});
		}
		Err(e) => return Err(e.into()),
	};
	if let Some(first) = merged.skipped.drain(..).next() {
		return Err(initial_decode(first));
	}

	let names = sources.iter().map(|s| s.name().to_string()).collect();
	Ok(Snapshot::new(merged.value, merged.checksum, 0, names))
}

fn initial_decode(skipped: SkippedFragment) -> LoaderError {
	LoaderError::InitialDecode {
		source_name: skipped.source,
		error: skipped.error,
	}
}

fn spawn_live(
	engine: &Arc<Engine>,
	watchers: Vec<Option<Box<dyn Watcher>>>,
	retry: WatchRetryConfig,
	shutdown_tx: &watch::Sender<bool>,
) -> Vec<JoinHandle<()>> {
	// Capacity one: a pending pass absorbs any further signals.
	let (signal_tx, signal_rx) = mpsc::channel::<()>(1);
	let mut handles = Vec::with_capacity(engine.sources.len() + 1);

	for (source, watcher) in engine.sources.iter().zip(watchers) {
		handles.push(tokio::spawn(run_watch_loop(
			Arc::clone(source),
			watcher,
			signal_tx.clone(),
			retry.clone(),
			shutdown_tx.subscribe(),
		)));
	}

	handles.push(tokio::spawn(run_reconcile_loop(
		Arc::clone(engine),
		signal_rx,
		shutdown_tx.subscribe(),
	)));

	debug!(watchers = engine.sources.len(), "live reconciliation started");
	handles
}

async fn run_reconcile_loop(
	engine: Arc<Engine>,
	mut signal_rx: mpsc::Receiver<()>,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			biased;
			_ = stopped(&mut shutdown) => break,
			signal = signal_rx.recv() => {
				if signal.is_none() {
					break;
				}
			}
		}

		tokio::select! {
			biased;
			_ = stopped(&mut shutdown) => break,
			result = engine.reconcile() => match result {
				Ok(true) => {}
				Ok(false) => debug!("change signal produced no new configuration"),
				Err(LoaderError::Closed) => break,
				Err(e) => warn!(error = %e, "reconciliation skipped, keeping last good snapshot"),
			},
		}
	}
	debug!("reconciliation task stopped");
}

/// Collects sources and options for [`Loader::new`].
#[derive(Default)]
pub struct LoaderBuilder {
	sources: Vec<Box<dyn Source>>,
	options: LoaderOptions,
}

impl LoaderBuilder {
	/// Appends a source. Later sources take precedence.
	pub fn source<S: Source + 'static>(mut self, source: S) -> Self {
		self.sources.push(Box::new(source));
		self
	}

	pub fn boxed_source(mut self, source: Box<dyn Source>) -> Self {
		self.sources.push(source);
		self
	}

	/// Registers an extra encoder for decoding change sets.
	pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
		self.options.encoders.register(encoder);
		self
	}

	/// Enables or disables live watching (enabled by default).
	pub fn watch(mut self, enabled: bool) -> Self {
		self.options.watch = enabled;
		self
	}

	pub fn retry(mut self, retry: WatchRetryConfig) -> Self {
		self.options.retry = retry;
		self
	}

	pub fn options(mut self, options: LoaderOptions) -> Self {
		self.options = options;
		self
	}

	pub async fn build(self) -> Result<Loader, LoaderError> {
		Loader::new(self.sources, self.options).await
	}
}
