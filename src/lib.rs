// Idempotent entity-creation service.
//
// Two creation paths share one idempotency guarantee:
// - a synchronous path where the caller supplies an Idempotency-Key header,
//   waits behind a bounded per-key lock, and gets the outcome in-band;
// - an asynchronous path where requests flow through a key-partitioned
//   broker and settle into a queryable message tracker.
// Across both, at most one entity is ever created per idempotency key.

pub mod batch;
pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod store;
pub mod tracking;

pub use config::Config;
pub use context::AppContext;
pub use error::{AppError, AppResult};
