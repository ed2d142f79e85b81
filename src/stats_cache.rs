//! Dataset-wide statistics computed once per process from a seeded sample.
//!
//! This read model is independent of the live feed statistics: it is computed
//! on first request and then served unchanged.

use crate::dataset::Dataset;
use crate::error::{Result, ServiceError};
use crate::models::combiner::ScoreCombiner;
use crate::types::score::{round_to, RiskLevel};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedStats {
    pub total_transactions: usize,
    /// Ground-truth fraud rows in the whole dataset
    pub flagged_transactions: usize,
    pub fraud_rate: f64,
    /// Sample accuracy of the HIGH/CRITICAL fraud prediction
    pub model_accuracy: f64,
    /// Flagged amount in the sample, extrapolated to the dataset size
    pub blocked_amount: f64,
    pub avg_risk_score: f64,
    /// Sample rows per risk level
    pub risk_distribution: BTreeMap<RiskLevel, u64>,
}

/// Score a seeded sample of `sample_size` rows and aggregate
pub fn compute(
    dataset: &Dataset,
    combiner: &ScoreCombiner,
    sample_size: usize,
    seed: u64,
) -> Result<CachedStats> {
    let total = dataset.len();
    let sample_size = sample_size.min(total);
    if sample_size == 0 {
        return Ok(CachedStats::default());
    }

    let fraud_count = dataset.fraud_count();
    let mut rng = StdRng::seed_from_u64(seed);
    let sample = rand::seq::index::sample(&mut rng, total, sample_size);

    let mut correct = 0u64;
    let mut flagged_amount = 0.0;
    let mut risk_sum = 0.0;
    let mut risk_distribution: BTreeMap<RiskLevel, u64> =
        RiskLevel::ALL.iter().map(|&level| (level, 0)).collect();

    for index in sample.iter() {
        let record = dataset
            .get(index)
            .ok_or(ServiceError::IndexOutOfRange {
                index: index as i64,
                len: total,
            })?;
        let score = combiner.score(&record.features)?;

        let predicted_fraud = score.is_flagged();
        if predicted_fraud == record.features.is_fraud() {
            correct += 1;
        }
        if predicted_fraud {
            flagged_amount += record.amount.abs();
        }
        risk_sum += score.combined_confidence;
        *risk_distribution.entry(score.risk_level).or_insert(0) += 1;
    }

    let sample_len = sample_size as f64;
    Ok(CachedStats {
        total_transactions: total,
        flagged_transactions: fraud_count,
        fraud_rate: round_to(fraud_count as f64 / total as f64, 6),
        model_accuracy: round_to(correct as f64 / sample_len, 4),
        blocked_amount: round_to(flagged_amount * (total as f64 / sample_len), 2),
        avg_risk_score: round_to(risk_sum / sample_len, 4),
        risk_distribution,
    })
}

/// Computes [`CachedStats`] once; failures are returned and retried on the next call
pub struct StatsCache {
    sample_size: usize,
    seed: u64,
    cell: OnceCell<CachedStats>,
}

impl StatsCache {
    pub fn new(sample_size: usize, seed: u64) -> Self {
        Self {
            sample_size,
            seed,
            cell: OnceCell::new(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get_or_compute(
        &self,
        dataset: Arc<Dataset>,
        combiner: Arc<ScoreCombiner>,
    ) -> Result<CachedStats> {
        let (sample_size, seed) = (self.sample_size, self.seed);

        self.cell
            .get_or_try_init(|| async move {
                let stats = tokio::task::spawn_blocking(move || {
                    compute(&dataset, &combiner, sample_size, seed)
                })
                .await
                .map_err(|e| ServiceError::inference(format!("stats task failed: {}", e)))??;

                info!(
                    total = stats.total_transactions,
                    sample_size = sample_size,
                    model_accuracy = stats.model_accuracy,
                    "Dataset statistics cached"
                );
                Ok(stats)
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::combiner::testing::{features_for, stub_combiner};
    use crate::types::transaction::TransactionRecord;

    fn dataset() -> Dataset {
        Dataset::from_records(vec![
            TransactionRecord::new(0.0, 10.0, features_for(0.1, 0)),
            TransactionRecord::new(1.0, 20.0, features_for(0.2, 0)),
            TransactionRecord::new(2.0, 300.0, features_for(0.9, 1)),
            TransactionRecord::new(3.0, 40.0, features_for(0.7, 0)),
        ])
    }

    #[test]
    fn test_full_sample() {
        let stats = compute(&dataset(), &stub_combiner(), 200, 42).unwrap();

        assert_eq!(stats.total_transactions, 4);
        assert_eq!(stats.flagged_transactions, 1);
        assert_eq!(stats.fraud_rate, 0.25);
        // row 3 is a false positive
        assert_eq!(stats.model_accuracy, 0.75);
        assert_eq!(stats.blocked_amount, 340.0);
        assert_eq!(stats.avg_risk_score, 0.475);
        assert_eq!(stats.risk_distribution[&RiskLevel::Low], 2);
        assert_eq!(stats.risk_distribution[&RiskLevel::High], 1);
        assert_eq!(stats.risk_distribution[&RiskLevel::Critical], 1);
        assert_eq!(stats.risk_distribution[&RiskLevel::Medium], 0);
    }

    #[test]
    fn test_sample_is_seeded() {
        let records = (0..100)
            .map(|i| TransactionRecord::new(0.0, i as f64, features_for((i % 10) as f64 / 10.0, 0)))
            .collect();
        let dataset = Dataset::from_records(records);

        let a = compute(&dataset, &stub_combiner(), 20, 42).unwrap();
        let b = compute(&dataset, &stub_combiner(), 20, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.risk_distribution.values().sum::<u64>(), 20);
    }

    #[test]
    fn test_empty_dataset_is_zero() {
        let stats = compute(&Dataset::from_records(vec![]), &stub_combiner(), 200, 42).unwrap();
        assert_eq!(stats, CachedStats::default());
    }

    #[test]
    fn test_unloaded_models() {
        let result = compute(&dataset(), &ScoreCombiner::unloaded(), 200, 42);
        assert_eq!(result.unwrap_err(), ServiceError::ModelsNotReady);
    }

    #[test]
    fn test_risk_distribution_serializes_by_level_name() {
        let stats = compute(&dataset(), &stub_combiner(), 200, 42).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["risk_distribution"]["CRITICAL"], 1);
    }

    #[tokio::test]
    async fn test_cache_computes_once() {
        let cache = StatsCache::new(200, 42);
        let dataset = Arc::new(dataset());
        assert!(!cache.is_cached());

        let err = cache
            .get_or_compute(dataset.clone(), Arc::new(ScoreCombiner::unloaded()))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::ModelsNotReady);
        assert!(!cache.is_cached());

        let first = cache
            .get_or_compute(dataset.clone(), Arc::new(stub_combiner()))
            .await
            .unwrap();
        assert!(cache.is_cached());

        // A later call is served from the cache even though the models are gone
        let second = cache
            .get_or_compute(dataset, Arc::new(ScoreCombiner::unloaded()))
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
