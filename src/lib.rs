//! `relsync` - incremental document-store to relational-store migration
//! engine.
//!
//! Reads collections from a MongoDB source, translates them into rows of
//! a registry-declared PostgreSQL schema, and applies them incrementally
//! using a per-table strategy chosen from four variants (direct
//! translation, array extraction, delete-and-insert, and a set-diff
//! optimization for high-churn relationship tables).
//!
//! # Architecture
//!
//! - [`registry`] - declarative target schema (C1)
//! - [`source`] - filtered, paginated Mongo reads (C2)
//! - [`target`] - batched Postgres writes with savepoint fallback (C3)
//! - [`strategy`] - the four per-table import variants (C4)
//! - [`watermark`] - per-table incremental sync boundary (C5)
//! - [`reconcile`] - additive schema diff and apply (C6)
//! - [`summary`] - per-run success/skip/error accounting (C7)
//! - [`runner`] - ties the above together for one migration run (C8)
//! - [`analytics`] - one-way mirror of an external analytics store (C9)
//! - [`compare`] - standalone source/target identifier audit (C10)
//! - [`config`] - environment-sourced run configuration
//! - [`error`] - crate-wide error taxonomy
//! - [`logging`] - tracing setup and secret redaction
//! - [`value`] - the dynamic document/row value currency
//! - [`cli`] - command-line interface using clap

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod analytics;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod source;
pub mod strategy;
pub mod summary;
pub mod target;
pub mod value;
pub mod watermark;

pub use error::{MigrationError, Result};
