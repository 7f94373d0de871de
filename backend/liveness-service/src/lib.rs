//! Liveness reconciliation for live sessions.
//!
//! Keeps the TTL hint store, the upstream streaming backends and the durable
//! session records in agreement. Expiring hints drive the fast path
//! ([`jobs::ReactiveReconciler`]); a fixed-interval probe sweep
//! ([`jobs::ProactiveReconciler`]) is the backstop. Both converge on
//! [`services::SessionTeardown`].

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
