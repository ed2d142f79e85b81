//! Items delivered on the live feed

use crate::types::score::ScoreResult;
use crate::types::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};

/// One scored transaction as seen by push subscribers and pull callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    /// Position in the demo pool; restarts at 0 every cycle
    pub id: u64,
    /// Cycle the item was produced in
    pub cycle: u64,
    /// Dataset row id, usable with the predict/explain endpoints
    pub df_idx: usize,
    pub time: f64,
    pub amount: f64,
    /// Ground-truth label
    pub is_fraud: u8,
    #[serde(flatten)]
    pub score: ScoreResult,
}

impl StreamItem {
    pub fn new(
        id: u64,
        cycle: u64,
        df_idx: usize,
        record: &TransactionRecord,
        score: ScoreResult,
    ) -> Self {
        Self {
            id,
            cycle,
            df_idx,
            time: record.time,
            amount: record.amount,
            is_fraud: record.label(),
            score,
        }
    }
}
