//! Incremental day segmentation: turn a running transcript of someone's day
//! into durable, merged events and a daily reflection.
//!
//! Each fragment of transcript is staged, claimed, and judged against the day's
//! most recent ("active") event: it either extends that event or starts a new
//! one. Merges never lose information (people are unioned, the end only moves
//! forward, scores are duration-weighted) and every write is version-checked.
//! Per-fragment state is tracked so duplicates, retries and concurrent
//! submissions for the same day all converge on one consistent result.
//!
//! # Architecture
//!
//! - **Storage**: SQLite, partitioned by `(username, day)`, with an audit log
//! - **Extraction**: pluggable [`extract::SemanticExtractor`]; a built-in
//!   lexicon reader or a remote model over HTTP
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP, plus a CLI
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, migrations, and health checks
//! - [`error`]: The domain error type
//! - [`extract`]: Place/activity/people extraction from fragment text
//! - [`journal`]: Segmentation engine, event repository, chunk tracker, reflection, orchestrator
//! - [`staging`]: Short-lived TTL staging of raw fragments

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod journal;
pub mod staging;
