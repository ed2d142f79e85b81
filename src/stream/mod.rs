//! Demo pool replay: engine, live statistics, replay buffer and push feed

pub mod buffer;
pub mod engine;
pub mod feed;
pub mod pool;
pub mod stats;

pub use buffer::ReplayBuffer;
pub use engine::{EngineStatus, StreamEngine};
pub use feed::{Cadence, Feed, FeedProducer, FeedSubscription};
pub use pool::{DemoPool, PoolOptions};
pub use stats::{LiveStats, LiveStatsSnapshot};
