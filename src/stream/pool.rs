//! Demo pool: the fixed playback order of the live feed

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Options for [`DemoPool::build`]
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    /// Times each fraud row appears
    pub fraud_multiplier: usize,
    /// Keep at most this many legitimate rows (seeded sample)
    pub legit_cap: Option<usize>,
    pub seed: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            fraud_multiplier: 3,
            legit_cap: None,
            seed: 42,
        }
    }
}

/// Shuffled, fraud-oversampled ordering of dataset row indices.
///
/// Built once at startup and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoPool {
    indices: Vec<usize>,
}

impl DemoPool {
    /// Partition by label, oversample fraud rows, then shuffle with `options.seed`
    pub fn build(labels: &[u8], options: &PoolOptions) -> Self {
        let mut legit: Vec<usize> = Vec::new();
        let mut fraud: Vec<usize> = Vec::new();
        for (idx, &label) in labels.iter().enumerate() {
            if label == 1 {
                fraud.push(idx);
            } else {
                legit.push(idx);
            }
        }

        let mut rng = StdRng::seed_from_u64(options.seed);

        if let Some(cap) = options.legit_cap {
            if cap < legit.len() {
                let sampled = legit.partial_shuffle(&mut rng, cap).0.to_vec();
                legit = sampled;
            }
        }

        let mut indices = Vec::with_capacity(legit.len() + fraud.len() * options.fraud_multiplier);
        indices.extend_from_slice(&legit);
        for _ in 0..options.fraud_multiplier {
            indices.extend_from_slice(&fraud);
        }
        indices.shuffle(&mut rng);

        Self { indices }
    }

    /// Pool in the given order, no shuffling
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<usize> {
        self.indices.get(position).copied()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Largest row index referenced, for validating against the dataset
    pub fn max_index(&self) -> Option<usize> {
        self.indices.iter().copied().max()
    }
}
