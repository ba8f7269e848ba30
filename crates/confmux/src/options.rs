// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loader options and the watcher retry policy.

use std::fmt;
use std::time::Duration;

use confmux_core::Encoders;
use serde::Deserialize;

/// Whether the loader follows source changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	/// Snapshot only changes through [`Loader::sync`](crate::Loader::sync).
	Static,
	/// Watchers are open and a background task re-merges on change.
	Live,
}

impl fmt::Display for Mode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Mode::Static => write!(f, "static"),
			Mode::Live => write!(f, "live"),
		}
	}
}

/// How a watch task reopens a watcher whose stream failed or ended.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchRetryConfig {
	/// Delay before the first reopen attempt.
	#[serde(rename = "base_delay_ms", with = "duration_ms")]
	pub base_delay: Duration,
	/// Upper bound on the delay between attempts.
	#[serde(rename = "max_delay_ms", with = "duration_ms")]
	pub max_delay: Duration,
	/// Consecutive failures after which the source stops being watched (0 = unlimited).
	pub max_attempts: u32,
	/// Double the delay after each consecutive failure.
	pub use_exponential_backoff: bool,
}

impl Default for WatchRetryConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			max_attempts: 10,
			use_exponential_backoff: true,
		}
	}
}

impl WatchRetryConfig {
	/// Delay before the reopen that follows `consecutive_failures` failures.
	pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
		if !self.use_exponential_backoff {
			return self.base_delay.min(self.max_delay);
		}
		let exponent = consecutive_failures.saturating_sub(1).min(16);
		let factor = 2u32.saturating_pow(exponent);
		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}

	/// True once `consecutive_failures` has used up the retry budget.
	pub fn exhausted(&self, consecutive_failures: u32) -> bool {
		self.max_attempts > 0 && consecutive_failures >= self.max_attempts
	}
}

/// Options for building a [`Loader`](crate::Loader).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
	/// Follow source changes (live mode). Defaults to true.
	pub watch: bool,
	pub retry: WatchRetryConfig,
	/// Encoders used to decode change sets, keyed by format tag.
	#[serde(skip)]
	pub encoders: Encoders,
}

impl Default for LoaderOptions {
	fn default() -> Self {
		Self {
			watch: true,
			retry: WatchRetryConfig::default(),
			encoders: Encoders::default(),
		}
	}
}

impl LoaderOptions {
	pub fn mode(&self) -> Mode {
		if self.watch {
			Mode::Live
		} else {
			Mode::Static
		}
	}
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer};

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_retry_defaults() {
		let config = WatchRetryConfig::default();
		assert_eq!(config.base_delay, Duration::from_secs(1));
		assert_eq!(config.max_delay, Duration::from_secs(30));
		assert_eq!(config.max_attempts, 10);
		assert!(config.use_exponential_backoff);
	}

	#[test]
	fn test_exponential_delay_is_capped() {
		let config = WatchRetryConfig::default();
		assert_eq!(config.delay_for(1), Duration::from_secs(1));
		assert_eq!(config.delay_for(2), Duration::from_secs(2));
		assert_eq!(config.delay_for(3), Duration::from_secs(4));
		assert_eq!(config.delay_for(6), Duration::from_secs(30));
		assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(30));
	}

	#[test]
	fn test_fixed_delay() {
		let config = WatchRetryConfig {
			use_exponential_backoff: false,
			..Default::default()
		};
		assert_eq!(config.delay_for(5), Duration::from_secs(1));
	}

	#[test]
	fn test_exhausted() {
		let config = WatchRetryConfig {
			max_attempts: 3,
			..Default::default()
		};
		assert!(!config.exhausted(2));
		assert!(config.exhausted(3));

		let unlimited = WatchRetryConfig {
			max_attempts: 0,
			..Default::default()
		};
		assert!(!unlimited.exhausted(u32::MAX));
	}

	#[test]
	fn test_options_from_toml() {
		let options: LoaderOptions = toml::from_str(
			r#"
			watch = false

			[retry]
			base_delay_ms = 250
			max_attempts = 4
			"#,
		)
		.unwrap();
		assert_eq!(options.mode(), Mode::Static);
		assert_eq!(options.retry.base_delay, Duration::from_millis(250));
		assert_eq!(options.retry.max_delay, Duration::from_secs(30));
		assert_eq!(options.retry.max_attempts, 4);
		assert_eq!(options.encoders.formats().count(), 2);
	}

	#[test]
	fn test_mode_display() {
		assert_eq!(LoaderOptions::default().mode().to_string(), "live");
		assert_eq!(Mode::Static.to_string(), "static");
	}
}
