//! Dataset loading and feature preparation.
//!
//! Rows are turned into model inputs in the exact column order the models were
//! trained on. `Time` and `Amount` are standard-scaled over the loaded dataset;
//! the PCA components are used as-is.

use crate::error::{Result as ServiceResult, ServiceError};
use crate::types::transaction::{FeaturePack, RawTransaction, TransactionRecord};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Number of model input features (`Time`, `V1..V28`, `Amount`)
pub const FEATURE_COUNT: usize = 30;

/// Feature names in model input order
pub fn feature_names() -> Vec<String> {
    let mut names = Vec::with_capacity(FEATURE_COUNT);
    names.push("Time".to_string());
    names.extend((1..=28).map(|i| format!("V{}", i)));
    names.push("Amount".to_string());
    names
}

/// Mean and population standard deviation of one column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardScaler {
    pub mean: f64,
    pub std: f64,
}

impl StandardScaler {
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std: 1.0 };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        Self {
            mean,
            // Constant column: leave values centred instead of dividing by zero
            std: if std > 0.0 { std } else { 1.0 },
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }
}

/// Immutable in-memory dataset addressed by 0-based row index
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Vec<TransactionRecord>,
    feature_names: Vec<String>,
}

impl Dataset {
    /// Build from prepared records
    pub fn from_records(records: Vec<TransactionRecord>) -> Self {
        Self {
            records,
            feature_names: feature_names(),
        }
    }

    /// Scale raw rows into model inputs
    pub fn from_raw(rows: Vec<RawTransaction>) -> Self {
        let times: Vec<f64> = rows.iter().map(|r| r.time).collect();
        let amounts: Vec<f64> = rows.iter().map(|r| r.amount).collect();
        let time_scaler = StandardScaler::fit(&times);
        let amount_scaler = StandardScaler::fit(&amounts);

        let records = rows
            .into_iter()
            .map(|raw| {
                let mut values = Vec::with_capacity(FEATURE_COUNT);
                values.push(time_scaler.transform(raw.time) as f32);
                values.extend(raw.components().iter().map(|&v| v as f32));
                values.push(amount_scaler.transform(raw.amount) as f32);

                TransactionRecord::new(raw.time, raw.amount, FeaturePack::new(values, raw.class))
            })
            .collect();

        Self::from_records(records)
    }

    /// Load and scale a CSV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;

        let rows = reader
            .deserialize::<RawTransaction>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;

        let dataset = Self::from_raw(rows);
        info!(
            path = %path.display(),
            rows = dataset.len(),
            fraud_rows = dataset.fraud_count(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Row by index from the transport layer; negative or past-the-end ids are not found
    pub fn record(&self, index: i64) -> ServiceResult<&TransactionRecord> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .ok_or(ServiceError::IndexOutOfRange {
                index,
                len: self.records.len(),
            })
    }

    /// Row by pool index
    pub fn get(&self, index: usize) -> Option<&TransactionRecord> {
        self.records.get(index)
    }

    /// Ground-truth labels in row order
    pub fn labels(&self) -> Vec<u8> {
        self.records.iter().map(|r| r.label()).collect()
    }

    pub fn fraud_count(&self) -> usize {
        self.records.iter().filter(|r| r.features.is_fraud()).count()
    }
}
