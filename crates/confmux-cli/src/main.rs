// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `confmux`: merge configuration files, environment variables and inline
//! overrides, then print the result.
//!
//! Precedence, lowest first: files in the order given, environment, `--set`.
//! With `--watch` the merged document is printed again on every change until
//! interrupted.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use confmux::reader::lookup;
use confmux::sources::{infer_scalar, EnvSource, FileSource, MemorySource};
use confmux::{merge, nest_with, Encoder, Loader, Snapshot, TomlEncoder, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
	Json,
	Toml,
}

#[derive(Debug, Parser)]
#[command(name = "confmux", version, about = "Print merged configuration")]
struct Args {
	/// Configuration files, lowest precedence first (.json or .toml)
	#[arg(short, long = "file", env = "CONFMUX_FILES", value_delimiter = ',')]
	files: Vec<PathBuf>,

	/// Treat missing files as empty
	#[arg(long)]
	optional: bool,

	/// Read environment variables starting with this prefix (stripped before nesting)
	#[arg(long, env = "CONFMUX_ENV_PREFIX")]
	env_prefix: Option<String>,

	/// Inline override, e.g. `--set db.port=5432`; highest precedence
	#[arg(long = "set", value_name = "KEY=VALUE")]
	overrides: Vec<String>,

	/// Only print the value at this dotted path
	#[arg(long)]
	path: Option<String>,

	/// Keep running and print the configuration again whenever it changes
	#[arg(short, long, env = "CONFMUX_WATCH")]
	watch: bool,

	/// How often watched files are checked, in milliseconds
	#[arg(long, default_value_t = 1000)]
	poll_ms: u64,

	#[arg(long, value_enum, default_value_t = OutputFormat::Json)]
	format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
	// Logs go to stderr; stdout carries the configuration.
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let args = Args::parse();
	let loader = build_loader(&args).await?;

	print_snapshot(&loader.snapshot(), &args)?;
	if !args.watch {
		return Ok(());
	}

	let mut rx = loader.subscribe();
	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("received shutdown signal");
				break;
			}
			changed = rx.changed() => {
				if changed.is_err() {
					break;
				}
				let snapshot = rx.borrow_and_update().clone();
				print_snapshot(&snapshot, &args)?;
			}
		}
	}

	loader.close().await;
	Ok(())
}

async fn build_loader(args: &Args) -> Result<Loader> {
	let mut builder = Loader::builder().watch(args.watch);

	for path in &args.files {
		let mut source =
			FileSource::new(path).with_poll_interval(Duration::from_millis(args.poll_ms.max(1)));
		if args.optional {
			source = source.optional();
		}
		builder = builder.source(source);
	}

	if let Some(prefix) = &args.env_prefix {
		builder = builder.source(EnvSource::new().with_stripped_prefix(prefix.clone()));
	}

	if !args.overrides.is_empty() {
		let value = overrides(&args.overrides)?;
		debug!(count = args.overrides.len(), "applying inline overrides");
		builder = builder.source(MemorySource::named("overrides", value));
	}

	builder.build().await.context("failed to load configuration")
}

/// Folds `KEY=VALUE` assignments into one fragment. Keys are dotted paths.
fn overrides(assignments: &[String]) -> Result<Value> {
	let fragments = assignments
		.iter()
		.map(|assignment| {
			let (key, raw) = assignment
				.split_once('=')
				.ok_or_else(|| anyhow!("override '{assignment}' is not KEY=VALUE"))?;
			if key.trim().is_empty() {
				return Err(anyhow!("override '{assignment}' has an empty key"));
			}
			Ok(nest_with(key.trim(), infer_scalar(raw), &['.']))
		})
		.collect::<Result<Vec<_>>>()?;
	Ok(merge(fragments))
}

fn render(snapshot: &Snapshot, args: &Args) -> Result<Vec<u8>> {
	let value = match &args.path {
		Some(path) => lookup(snapshot.value(), path)
			.ok_or_else(|| anyhow!("no value at '{path}'"))?,
		None => snapshot.value(),
	};

	let mut out = match args.format {
		OutputFormat::Json => serde_json::to_vec_pretty(value)?,
		// TOML needs a table at the root.
		OutputFormat::Toml => TomlEncoder
			.encode(value)
			.context("cannot render as toml")?,
	};
	if out.last() != Some(&b'\n') {
		out.push(b'\n');
	}
	Ok(out)
}

fn print_snapshot(snapshot: &Snapshot, args: &Args) -> Result<()> {
	let out = render(snapshot, args)?;
	debug!(version = snapshot.version(), checksum = %snapshot.checksum(), "printing snapshot");
	let mut stdout = std::io::stdout().lock();
	stdout.write_all(&out)?;
	stdout.flush()?;
	Ok(())
}
