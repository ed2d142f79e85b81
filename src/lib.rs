//! FraudPulse Library
//!
//! Dual-model fraud scoring over a replayed transaction feed, with push
//! (WebSocket) and pull (polling) delivery and live aggregate statistics.

pub mod api;
pub mod config;
pub mod dataset;
pub mod error;
pub mod explain;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod service;
pub mod stats_cache;
pub mod stream;
pub mod types;

pub use config::AppConfig;
pub use error::ServiceError;
pub use models::combiner::ScoreCombiner;
pub use service::ServiceContext;
pub use stream::engine::StreamEngine;
pub use types::{score::ScoreResult, stream::StreamItem};
