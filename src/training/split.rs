use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of a train/test partition, each list ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits per class so both sides keep the class ratio. Each class contributes
/// `round(test_fraction * n)` rows to the test side. The same labels, fraction
/// and seed always give the same split.
pub fn stratified_split(labels: &[usize], test_fraction: f64, seed: u64) -> SplitIndices {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let fraction = test_fraction.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64 * fraction).round() as usize).min(indices.len());
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    SplitIndices { train, test }
}
