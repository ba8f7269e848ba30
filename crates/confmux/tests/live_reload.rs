// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use confmux::sources::{ClapSource, EnvSource, FileSource, MemorySource};
use confmux::{
	ChangeSet, Loader, LoaderError, Snapshot, Source, SourceError, WatchRetryConfig, Watcher,
};
use serde_json::json;
use tokio::sync::{watch, Notify, Semaphore};

const WAIT: Duration = Duration::from_secs(5);

async fn next_snapshot(rx: &mut watch::Receiver<Arc<Snapshot>>) -> Arc<Snapshot> {
	tokio::time::timeout(WAIT, rx.changed())
		.await
		.expect("timed out waiting for a snapshot")
		.expect("loader dropped");
	rx.borrow_and_update().clone()
}

fn fast_retry(max_attempts: u32) -> WatchRetryConfig {
	WatchRetryConfig {
		base_delay: Duration::from_millis(5),
		max_delay: Duration::from_millis(20),
		max_attempts,
		use_exponential_backoff: true,
	}
}

/// Wraps a memory source and can be told to fail reads or return garbage.
struct FlakySource {
	inner: MemorySource,
	fail_reads: Arc<AtomicBool>,
	corrupt: Arc<AtomicBool>,
}

impl FlakySource {
	fn new(inner: MemorySource) -> Self {
		Self {
			inner,
			fail_reads: Arc::new(AtomicBool::new(false)),
			corrupt: Arc::new(AtomicBool::new(false)),
		}
	}
}

#[async_trait]
impl Source for FlakySource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		if self.fail_reads.load(Ordering::SeqCst) {
			return Err(SourceError::read(self.name(), "backend unavailable"));
		}
		if self.corrupt.load(Ordering::SeqCst) {
			return Ok(ChangeSet::new("json", b"{not json".to_vec(), self.name()));
		}
		self.inner.read().await
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		self.inner.watch().await
	}

	fn name(&self) -> &str {
		self.inner.name()
	}
}

/// Fails the first `failures` calls to `watch`.
struct UnreliableWatchSource {
	inner: MemorySource,
	watch_calls: Arc<AtomicUsize>,
	failures: usize,
}

#[async_trait]
impl Source for UnreliableWatchSource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		self.inner.read().await
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		let call = self.watch_calls.fetch_add(1, Ordering::SeqCst) + 1;
		if call <= self.failures {
			return Err(SourceError::watch(self.name(), "watch endpoint unavailable"));
		}
		self.inner.watch().await
	}

	fn name(&self) -> &str {
		self.inner.name()
	}
}

/// Holds every read at a gate once armed, and records read concurrency.
struct GatedSource {
	inner: MemorySource,
	armed: AtomicBool,
	entered: Notify,
	release: Semaphore,
	reads: AtomicUsize,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl GatedSource {
	fn new(inner: MemorySource) -> Self {
		Self {
			inner,
			armed: AtomicBool::new(false),
			entered: Notify::new(),
			release: Semaphore::new(0),
			reads: AtomicUsize::new(0),
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
		}
	}
}

#[async_trait]
impl Source for GatedSource {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);
		self.reads.fetch_add(1, Ordering::SeqCst);
		if self.armed.load(Ordering::SeqCst) {
			self.entered.notify_one();
			self.release.acquire().await.unwrap().forget();
		}
		let cs = self.inner.read().await;
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		cs
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		self.inner.watch().await
	}

	fn name(&self) -> &str {
		self.inner.name()
	}
}

/// Lets a shared `GatedSource` be handed to the loader.
struct Shared(Arc<GatedSource>);

#[async_trait]
impl Source for Shared {
	async fn read(&self) -> Result<ChangeSet, SourceError> {
		self.0.read().await
	}

	async fn watch(&self) -> Result<Box<dyn Watcher>, SourceError> {
		self.0.watch().await
	}

	fn name(&self) -> &str {
		self.0.name()
	}
}

#[tokio::test]
async fn test_later_sources_take_precedence_live() {
	let defaults = MemorySource::named("defaults", json!({"port": 80, "host": "a"}));
	let file = MemorySource::named("file", json!({"port": 8080}));
	let flags = MemorySource::named("flags", json!({"host": "c"}));
	let file_handle = file.clone();

	let loader = Loader::builder()
		.source(defaults)
		.source(file)
		.source(flags)
		.build()
		.await
		.unwrap();
	assert_eq!(loader.snapshot().value(), &json!({"port": 8080, "host": "c"}));

	let mut rx = loader.subscribe();
	file_handle.set(json!({"port": 9090, "host": "b"}));
	let snapshot = next_snapshot(&mut rx).await;

	// "flags" still overrides host even though "file" changed it.
	assert_eq!(snapshot.value(), &json!({"port": 9090, "host": "c"}));
	assert_eq!(snapshot.version(), 1);
	loader.close().await;
}

#[tokio::test]
async fn test_type_conflicts_resolve_to_later_source() {
	let loader = Loader::builder()
		.source(MemorySource::named("one", json!({"a": {"b": 1}, "c": "x"})))
		.source(MemorySource::named("two", json!({"a": "x", "c": {"d": 1}})))
		.watch(false)
		.build()
		.await
		.unwrap();
	assert_eq!(
		loader.snapshot().value(),
		&json!({"a": "x", "c": {"d": 1}})
	);
}

#[tokio::test]
async fn test_flags_nest_over_defaults() {
	let matches = clap::Command::new("app")
		.arg(
			clap::Arg::new("db-host")
				.long("db-host")
				.default_value("myval"),
		)
		.try_get_matches_from(["app", "--db-host", "localhost"])
		.unwrap();

	let loader = Loader::builder()
		.source(MemorySource::named(
			"defaults",
			json!({"db": {"host": "db.internal", "port": 5432}}),
		))
		.source(ClapSource::new(&matches))
		.watch(false)
		.build()
		.await
		.unwrap();

	let values = loader.values();
	assert_eq!(values.string("db.host", ""), "localhost");
	assert_eq!(values.int("db.port", 0), 5432);
}

#[tokio::test]
async fn test_identical_content_publishes_nothing() {
	let memory = MemorySource::new(json!({"a": 1, "b": [1, 2]}));
	let handle = memory.clone();
	let loader = Loader::builder().source(memory).build().await.unwrap();
	let mut rx = loader.subscribe();
	let checksum = loader.snapshot().checksum().to_string();

	handle.set(json!({"b": [1, 2], "a": 1}));
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert!(!rx.has_changed().unwrap());
	assert_eq!(loader.snapshot().version(), 0);
	assert_eq!(loader.snapshot().checksum(), checksum);
	assert!(!loader.sync().await.unwrap());
	loader.close().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_burst_of_changes_is_coalesced() {
	let memory = MemorySource::new(json!({"n": 0}));
	let handle = memory.clone();
	let loader = Loader::builder().source(memory).build().await.unwrap();
	let mut rx = loader.subscribe();

	// No await between sets: the watch task only runs once all three landed.
	handle.set(json!({"n": 1}));
	handle.set(json!({"n": 2}));
	handle.set(json!({"n": 3}));

	let snapshot = next_snapshot(&mut rx).await;
	assert_eq!(snapshot.value(), &json!({"n": 3}));
	assert_eq!(snapshot.version(), 1);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(!rx.has_changed().unwrap());
	assert_eq!(loader.snapshot().version(), 1);
	loader.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changes_during_a_pass_collapse_into_one_more_pass() {
	let memory = MemorySource::new(json!({"n": 0}));
	let handle = memory.clone();
	let gated = Arc::new(GatedSource::new(memory));
	let loader = Arc::new(
		Loader::builder()
			.source(Shared(Arc::clone(&gated)))
			.build()
			.await
			.unwrap(),
	);
	assert_eq!(gated.reads.load(Ordering::SeqCst), 1);

	// Start a pass and hold it inside its read.
	gated.armed.store(true, Ordering::SeqCst);
	handle.set(json!({"n": 1}));
	tokio::time::timeout(WAIT, gated.entered.notified())
		.await
		.expect("pass never started");

	handle.set(json!({"n": 2}));
	handle.set(json!({"n": 3}));
	handle.set(json!({"n": 4}));
	let sync = tokio::spawn({
		let loader = Arc::clone(&loader);
		async move { loader.sync().await }
	});
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(gated.reads.load(Ordering::SeqCst), 2);

	gated.release.add_permits(16);
	let synced = tokio::time::timeout(WAIT, sync).await.unwrap().unwrap();
	assert!(!synced.unwrap());
	tokio::time::sleep(Duration::from_millis(100)).await;

	// Initial read, the held pass, the queued sync and one pass for the burst.
	assert_eq!(gated.reads.load(Ordering::SeqCst), 4);
	assert_eq!(gated.max_in_flight.load(Ordering::SeqCst), 1);
	let snapshot = loader.snapshot();
	assert_eq!(snapshot.value(), &json!({"n": 4}));
	assert_eq!(snapshot.version(), 1);
	loader.close().await;
}

#[tokio::test]
async fn test_read_failure_keeps_last_snapshot() {
	let memory = MemorySource::new(json!({"a": 1}));
	let handle = memory.clone();
	let flaky = FlakySource::new(memory);
	let fail_reads = Arc::clone(&flaky.fail_reads);

	let loader = Loader::builder().source(flaky).build().await.unwrap();
	let mut rx = loader.subscribe();

	fail_reads.store(true, Ordering::SeqCst);
	handle.set(json!({"a": 2}));
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(!rx.has_changed().unwrap());
	assert_eq!(loader.values().int("a", 0), 1);

	let err = loader.sync().await.unwrap_err();
	assert!(matches!(err, LoaderError::Read { .. }));

	fail_reads.store(false, Ordering::SeqCst);
	handle.set(json!({"a": 3}));
	let snapshot = next_snapshot(&mut rx).await;
	assert_eq!(snapshot.value(), &json!({"a": 3}));
	assert_eq!(snapshot.version(), 1);
	loader.close().await;
}

#[tokio::test]
async fn test_undecodable_fragment_is_skipped() {
	let base = MemorySource::named("base", json!({"a": 1, "b": 1}));
	let base_handle = base.clone();
	let overlay = FlakySource::new(MemorySource::named("overlay", json!({"b": 2})));
	let corrupt = Arc::clone(&overlay.corrupt);

	let loader = Loader::builder()
		.source(base)
		.source(overlay)
		.watch(false)
		.build()
		.await
		.unwrap();
	assert_eq!(loader.snapshot().value(), &json!({"a": 1, "b": 2}));

	corrupt.store(true, Ordering::SeqCst);
	base_handle.set(json!({"a": 5, "b": 1}));
	assert!(loader.sync().await.unwrap());
	assert_eq!(loader.snapshot().value(), &json!({"a": 5, "b": 1}));
	assert_eq!(loader.snapshot().sources(), &["base"]);

	corrupt.store(false, Ordering::SeqCst);
	assert!(loader.sync().await.unwrap());
	assert_eq!(loader.snapshot().sources(), &["base", "overlay"]);
}

#[tokio::test]
async fn test_single_malformed_source_names_itself() {
	let flaky = FlakySource::new(MemorySource::named("settings", json!({})));
	flaky.corrupt.store(true, Ordering::SeqCst);
	let err = Loader::builder().source(flaky).build().await.unwrap_err();
	match err {
		LoaderError::InitialDecode { source_name, error } => {
			assert_eq!(source_name, "settings");
			assert!(matches!(error, confmux::EncodeError::Json(_)));
		}
		other => panic!("expected InitialDecode, got {other:?}"),
	}
}

#[tokio::test]
async fn test_construction_fails_on_bad_source() {
	let flaky = FlakySource::new(MemorySource::new(json!({})));
	flaky.fail_reads.store(true, Ordering::SeqCst);
	let err = Loader::builder().source(flaky).build().await.unwrap_err();
	assert!(matches!(err, LoaderError::InitialRead { ref source_name, .. } if source_name == "memory"));

	let flaky = FlakySource::new(MemorySource::new(json!({})));
	flaky.corrupt.store(true, Ordering::SeqCst);
	let err = Loader::builder()
		.source(MemorySource::named("ok", json!({"a": 1})))
		.source(flaky)
		.build()
		.await
		.unwrap_err();
	assert!(matches!(err, LoaderError::InitialDecode { ref source_name, .. } if source_name == "memory"));
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
	let memory = MemorySource::new(json!({"a": 1}));
	let handle = memory.clone();
	let loader = Loader::builder().source(memory).build().await.unwrap();
	let mut rx = loader.subscribe();

	loader.close().await;
	loader.close().await;
	assert!(loader.is_closed());

	handle.set(json!({"a": 2}));
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!rx.has_changed().unwrap());
	assert_eq!(loader.values().int("a", 0), 1);
	assert!(matches!(
		loader.write("memory", &json!({})).await,
		Err(LoaderError::Closed)
	));
}

#[tokio::test]
async fn test_watch_gives_up_after_max_attempts() {
	let watch_calls = Arc::new(AtomicUsize::new(0));
	let source = UnreliableWatchSource {
		inner: MemorySource::new(json!({"a": 1})),
		watch_calls: Arc::clone(&watch_calls),
		failures: usize::MAX,
	};

	let loader = Loader::builder()
		.source(source)
		.retry(fast_retry(3))
		.build()
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(watch_calls.load(Ordering::SeqCst), 3);

	// Explicit reconciliation still works without a watcher.
	assert!(!loader.sync().await.unwrap());
	loader.close().await;
}

#[tokio::test]
async fn test_reopened_watcher_catches_up() {
	let memory = MemorySource::new(json!({"a": 1}));
	let handle = memory.clone();
	let watch_calls = Arc::new(AtomicUsize::new(0));
	let source = UnreliableWatchSource {
		inner: memory,
		watch_calls: Arc::clone(&watch_calls),
		failures: 1,
	};

	let loader = Loader::builder()
		.source(source)
		.retry(WatchRetryConfig {
			base_delay: Duration::from_millis(50),
			..fast_retry(5)
		})
		.build()
		.await
		.unwrap();
	let mut rx = loader.subscribe();

	// Lands while no watcher is open.
	handle.set(json!({"a": 2}));

	let snapshot = next_snapshot(&mut rx).await;
	assert_eq!(snapshot.value(), &json!({"a": 2}));
	assert_eq!(watch_calls.load(Ordering::SeqCst), 2);
	loader.close().await;
}

#[tokio::test]
async fn test_path_watcher_follows_one_key() {
	let memory = MemorySource::new(json!({"db": {"host": "a"}, "x": 1}));
	let handle = memory.clone();
	let loader = Loader::builder().source(memory).build().await.unwrap();
	let mut host = loader.watch_path("db.host");
	assert_eq!(host.current(), &json!("a"));

	handle.set(json!({"db": {"host": "a"}, "x": 2}));
	handle.set(json!({"db": {"host": "b"}, "x": 2}));

	let next = tokio::time::timeout(WAIT, host.next()).await.unwrap();
	assert_eq!(next, Some(json!("b")));

	loader.close().await;
	assert_eq!(host.next().await, None);
}

#[tokio::test]
async fn test_file_source_reloads_on_edit() {
	let dir = tempfile::TempDir::new().unwrap();
	let path = dir.path().join("app.toml");
	std::fs::write(&path, "[server]\nport = 8080\n").unwrap();

	let loader = Loader::builder()
		.source(MemorySource::named("defaults", json!({"server": {"host": "0.0.0.0"}})))
		.source(FileSource::new(&path).with_poll_interval(Duration::from_millis(10)))
		.build()
		.await
		.unwrap();
	assert_eq!(loader.values().int("server.port", 0), 8080);

	let mut rx = loader.subscribe();
	// Replace atomically so a poll never sees a half-written file.
	let staged = dir.path().join("app.toml.new");
	std::fs::write(&staged, "[server]\nport = 9090\n").unwrap();
	std::fs::rename(&staged, &path).unwrap();
	let snapshot = next_snapshot(&mut rx).await;
	assert_eq!(
		snapshot.value(),
		&json!({"server": {"host": "0.0.0.0", "port": 9090}})
	);
	loader.close().await;
}

#[tokio::test]
async fn test_write_to_read_only_source() {
	let loader = Loader::builder()
		.source(EnvSource::new().with_stripped_prefix("CONFMUX_IT_UNUSED"))
		.watch(false)
		.build()
		.await
		.unwrap();
	let err = loader.write("env", &json!({"a": 1})).await.unwrap_err();
	assert!(err.is_write_unsupported());
}
