// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core contracts for confmux.
//!
//! This crate provides:
//! - [`ChangeSet`], the immutable encoded fragment every source produces
//! - The [`Source`] and [`Watcher`] capability traits
//! - The [`Encoder`] capability with JSON and TOML implementations
//! - Key-path nesting for flat, delimited keys (`db-host` → `{db: {host}}`)
//! - The deep-merge algorithm that folds fragments in source order
//!
//! Nothing here spawns tasks or owns a runtime; the live aggregator lives in
//! the `confmux` crate.

pub mod change_set;
pub mod encoder;
pub mod error;
pub mod merge;
pub mod nest;
pub mod source;

pub use change_set::ChangeSet;
pub use encoder::{decode_into, Encoder, Encoders, JsonEncoder, TomlEncoder};
pub use error::{EncodeError, MergeError, SourceError};
pub use merge::{checksum_of, merge, merge_change_sets, merge_values, Merged, SkippedFragment};
pub use nest::{nest, nest_with, DEFAULT_DELIMITERS};
pub use source::{NoopWatcher, Source, Watcher};

/// The structured value every fragment decodes into.
pub use serde_json::Value;
