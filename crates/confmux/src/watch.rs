// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-source watch tasks.
//!
//! Each task blocks on one source's watcher and forwards "changed" into the
//! loader's single-slot signal channel. A failed or terminated stream is
//! reopened with bounded backoff.

use std::sync::Arc;

use confmux_core::{Source, SourceError, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::options::WatchRetryConfig;

enum PumpOutcome {
	Shutdown,
	Ended(SourceError),
}

/// Runs until shutdown, until the reconciliation task is gone, or until the
/// retry budget for this source is exhausted.
///
/// `watcher` is the stream opened during construction; `None` means that open
/// failed and counts as the first failure.
pub(crate) async fn run_watch_loop(
	source: Arc<dyn Source>,
	mut watcher: Option<Box<dyn Watcher>>,
	signal: mpsc::Sender<()>,
	config: WatchRetryConfig,
	mut shutdown: watch::Receiver<bool>,
) {
	let name = source.name().to_string();
	let mut consecutive_failures: u32 = u32::from(watcher.is_none());

	loop {
		if consecutive_failures > 0 {
			if config.exhausted(consecutive_failures) {
				error!(
					source = %name,
					attempts = consecutive_failures,
					"max watch attempts reached, no longer watching source"
				);
				return;
			}

			let delay = config.delay_for(consecutive_failures);
			debug!(
				source = %name,
				delay_ms = delay.as_millis() as u64,
				"reopening watcher after delay"
			);
			tokio::select! {
				biased;
				_ = stopped(&mut shutdown) => return,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		let opened = match watcher.take() {
			Some(w) => Ok(w),
			None => {
				tokio::select! {
					biased;
					_ = stopped(&mut shutdown) => return,
					opened = source.watch() => opened,
				}
			}
		};

		let mut w = match opened {
			Ok(w) => w,
			Err(e) => {
				consecutive_failures += 1;
				warn!(
					source = %name,
					error = %e,
					attempts = consecutive_failures,
					"failed to open watcher"
				);
				continue;
			}
		};

		if consecutive_failures > 0 {
			info!(source = %name, attempts = consecutive_failures, "watcher reopened");
			// Changes made while the watcher was down would otherwise be missed.
			if !notify(&signal, &name) {
				w.stop();
				return;
			}
		}

		let outcome = pump(
			w.as_mut(),
			&signal,
			&name,
			&mut shutdown,
			&mut consecutive_failures,
		)
		.await;
		w.stop();

		match outcome {
			PumpOutcome::Shutdown => {
				debug!(source = %name, "watch task stopping");
				return;
			}
			PumpOutcome::Ended(e) => {
				consecutive_failures += 1;
				warn!(
					source = %name,
					error = %e,
					attempts = consecutive_failures,
					"watcher ended"
				);
			}
		}
	}
}

async fn pump(
	watcher: &mut dyn Watcher,
	signal: &mpsc::Sender<()>,
	name: &str,
	shutdown: &mut watch::Receiver<bool>,
	consecutive_failures: &mut u32,
) -> PumpOutcome {
	loop {
		tokio::select! {
			biased;
			_ = stopped(shutdown) => return PumpOutcome::Shutdown,
			event = watcher.next() => match event {
				Ok(()) => {
					*consecutive_failures = 0;
					debug!(source = %name, "change detected");
					if !notify(signal, name) {
						return PumpOutcome::Shutdown;
					}
				}
				Err(e) => return PumpOutcome::Ended(e),
			},
		}
	}
}

/// Resolves once shutdown is requested or the loader is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
	let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Marks a reconciliation as pending. A full slot means one already is, so the
/// event is absorbed. Returns false once the reconciliation task has gone away.
pub(crate) fn notify(signal: &mpsc::Sender<()>, name: &str) -> bool {
	match signal.try_send(()) {
		Ok(()) => true,
		Err(TrySendError::Full(())) => {
			debug!(source = %name, "reconciliation already pending, coalescing");
			true
		}
		Err(TrySendError::Closed(())) => false,
	}
}
