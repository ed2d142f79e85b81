//! Stream engine: cycles the demo pool, scores each row, and keeps the live
//! statistics and the replay buffer in delivery order.
//!
//! Every mutation happens inside [`StreamEngine::step`] under one lock, so
//! observers never see the cursor, the statistics, and the buffer out of step
//! with each other. A cycle reset is committed together with the first item of
//! the new cycle.

use crate::dataset::Dataset;
use crate::error::{Result, ServiceError};
use crate::models::combiner::ScoreCombiner;
use crate::stream::buffer::ReplayBuffer;
use crate::stream::pool::DemoPool;
use crate::stream::stats::{LiveStats, LiveStatsSnapshot};
use crate::types::stream::StreamItem;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct EngineState {
    /// Next pool position; equals the pool length once a cycle is exhausted
    cursor: usize,
    cycle_count: u64,
    stats: LiveStats,
    buffer: ReplayBuffer,
}

/// Position of the feed, reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub cursor: usize,
    pub cycle: u64,
    pub pool_len: usize,
    pub buffered: usize,
    pub buffer_capacity: usize,
}

pub struct StreamEngine {
    pool: DemoPool,
    dataset: Arc<Dataset>,
    combiner: Arc<ScoreCombiner>,
    state: Mutex<EngineState>,
}

impl StreamEngine {
    /// Fails when the pool references rows the dataset does not have
    pub fn new(
        dataset: Arc<Dataset>,
        combiner: Arc<ScoreCombiner>,
        pool: DemoPool,
        buffer_capacity: usize,
    ) -> Result<Self> {
        if let Some(max) = pool.max_index() {
            if max >= dataset.len() {
                return Err(ServiceError::IndexOutOfRange {
                    index: max as i64,
                    len: dataset.len(),
                });
            }
        }

        info!(
            pool_len = pool.len(),
            dataset_rows = dataset.len(),
            buffer_capacity = buffer_capacity,
            "Stream engine initialized"
        );

        Ok(Self {
            pool,
            dataset,
            combiner,
            state: Mutex::new(EngineState {
                cursor: 0,
                cycle_count: 0,
                stats: LiveStats::new(),
                buffer: ReplayBuffer::new(buffer_capacity),
            }),
        })
    }

    /// Score the next pool entry and commit it to the statistics and the buffer.
    ///
    /// On failure nothing is committed, including a pending cycle reset.
    pub fn step(&self) -> Result<StreamItem> {
        self.step_then(|_| {})
    }

    /// Like [`step`](Self::step), running `on_commit` before the lock is
    /// released so that anything it emits follows commit order. `on_commit`
    /// must not block or call back into the engine.
    pub fn step_then<F>(&self, on_commit: F) -> Result<StreamItem>
    where
        F: FnOnce(&StreamItem),
    {
        if self.pool.is_empty() {
            return Err(ServiceError::DatasetNotLoaded);
        }

        let mut state = self.state.lock();

        let wraps = state.cursor >= self.pool.len();
        let position = if wraps { 0 } else { state.cursor };

        let row = self
            .pool
            .get(position)
            .ok_or(ServiceError::DatasetNotLoaded)?;
        let record = self
            .dataset
            .get(row)
            .ok_or(ServiceError::IndexOutOfRange {
                index: row as i64,
                len: self.dataset.len(),
            })?;

        let score = self.combiner.score(&record.features)?;

        if wraps {
            state.stats.reset();
            state.buffer.clear();
            state.cycle_count += 1;
            info!(
                cycle = state.cycle_count,
                pool_len = self.pool.len(),
                "Demo pool exhausted, live statistics reset"
            );
        }

        state.stats.record(&score, record.amount, record.label());

        let item = StreamItem::new(position as u64, state.cycle_count, row, record, score);
        state.buffer.push(item.clone());
        state.cursor = position + 1;

        debug!(
            id = item.id,
            df_idx = row,
            risk_level = ?item.score.risk_level,
            combined_confidence = item.score.combined_confidence,
            "Feed step committed"
        );

        on_commit(&item);
        drop(state);

        Ok(item)
    }

    pub fn live_stats(&self) -> LiveStatsSnapshot {
        self.state.lock().stats.snapshot()
    }

    /// Buffered items newer than `since_id`, ascending, at most `limit`
    pub fn buffered(&self, since_id: Option<u64>, limit: usize) -> Vec<StreamItem> {
        self.state.lock().buffer.since(since_id, limit)
    }

    pub fn cycle_count(&self) -> u64 {
        self.state.lock().cycle_count
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            cursor: state.cursor,
            cycle: state.cycle_count,
            pool_len: self.pool.len(),
            buffered: state.buffer.len(),
            buffer_capacity: state.buffer.capacity(),
        }
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }
}
