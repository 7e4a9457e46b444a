//! Live monitoring client for a wireless sensor network backend.
//!
//! The crate follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes a narrow surface through this gateway.
//! - `service`: the Data Service seam and its REST implementation
//! - `push`: the Push Channel WebSocket client
//! - `reconciler`: the live in-memory view and its merge rules
//! - `routes`: the local read API over the reconciled view
pub mod config;
pub mod error;
pub mod models;
pub mod push;
pub mod reconciler;
pub mod routes;
pub mod service;

pub use config::Config;
pub use error::ApiError;
pub use push::{PushChannel, PushEvent, TokenSource};
pub use reconciler::{
    compute_stats, AckOutcome, LoadOutcome, PageStatus, PageView, Reconciler, ReconcilerPolicy,
    SessionState, Stats, StatsError, Trend, TrendPolicy,
};
pub use service::{AlertFilter, ApiResult, DataService, HttpDataService, PageRequest, ReadingFilter};
