//! Transaction rows and the feature vectors fed to the anomaly models

use serde::{Deserialize, Serialize};

/// Model input for one transaction plus its ground-truth label.
///
/// Values are in the order the models were trained on (`Time`, `V1..V28`, `Amount`),
/// with `Time` and `Amount` already standard-scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePack {
    values: Vec<f32>,
    label: u8,
}

impl FeaturePack {
    pub fn new(values: Vec<f32>, label: u8) -> Self {
        Self { values, label }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Ground truth: 1 = fraud, 0 = legitimate
    pub fn label(&self) -> u8 {
        self.label
    }

    pub fn is_fraud(&self) -> bool {
        self.label == 1
    }
}

/// One dataset row as loaded at startup
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// Seconds since the first transaction in the dataset (unscaled)
    pub time: f64,
    /// Transaction amount (unscaled)
    pub amount: f64,
    pub features: FeaturePack,
}

impl TransactionRecord {
    pub fn new(time: f64, amount: f64, features: FeaturePack) -> Self {
        Self {
            time,
            amount,
            features,
        }
    }

    pub fn label(&self) -> u8 {
        self.features.label()
    }
}

/// Raw CSV row of the credit card dataset
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "V1")]
    pub v1: f64,
    #[serde(rename = "V2")]
    pub v2: f64,
    #[serde(rename = "V3")]
    pub v3: f64,
    #[serde(rename = "V4")]
    pub v4: f64,
    #[serde(rename = "V5")]
    pub v5: f64,
    #[serde(rename = "V6")]
    pub v6: f64,
    #[serde(rename = "V7")]
    pub v7: f64,
    #[serde(rename = "V8")]
    pub v8: f64,
    #[serde(rename = "V9")]
    pub v9: f64,
    #[serde(rename = "V10")]
    pub v10: f64,
    #[serde(rename = "V11")]
    pub v11: f64,
    #[serde(rename = "V12")]
    pub v12: f64,
    #[serde(rename = "V13")]
    pub v13: f64,
    #[serde(rename = "V14")]
    pub v14: f64,
    #[serde(rename = "V15")]
    pub v15: f64,
    #[serde(rename = "V16")]
    pub v16: f64,
    #[serde(rename = "V17")]
    pub v17: f64,
    #[serde(rename = "V18")]
    pub v18: f64,
    #[serde(rename = "V19")]
    pub v19: f64,
    #[serde(rename = "V20")]
    pub v20: f64,
    #[serde(rename = "V21")]
    pub v21: f64,
    #[serde(rename = "V22")]
    pub v22: f64,
    #[serde(rename = "V23")]
    pub v23: f64,
    #[serde(rename = "V24")]
    pub v24: f64,
    #[serde(rename = "V25")]
    pub v25: f64,
    #[serde(rename = "V26")]
    pub v26: f64,
    #[serde(rename = "V27")]
    pub v27: f64,
    #[serde(rename = "V28")]
    pub v28: f64,
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "Class")]
    pub class: u8,
}

impl RawTransaction {
    /// PCA components in column order
    pub fn components(&self) -> [f64; 28] {
        [
            self.v1, self.v2, self.v3, self.v4, self.v5, self.v6, self.v7, self.v8, self.v9,
            self.v10, self.v11, self.v12, self.v13, self.v14, self.v15, self.v16, self.v17,
            self.v18, self.v19, self.v20, self.v21, self.v22, self.v23, self.v24, self.v25,
            self.v26, self.v27, self.v28,
        ]
    }
}
