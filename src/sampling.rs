//! Seeded class rebalancing and train/test splitting

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices that keep every fraud row and a `fraction` of the others,
/// shuffled.
pub fn downsample_non_fraud(labels: &[u8], fraction: f64, seed: u64) -> Result<Vec<usize>> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(Error::Training(format!(
            "non-fraud fraction must be within [0, 1], got {}",
            fraction
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let fraud: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 1).collect();
    let mut non_fraud: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] != 1).collect();
    let keep = (non_fraud.len() as f64 * fraction).round() as usize;
    non_fraud.shuffle(&mut rng);
    non_fraud.truncate(keep);

    let mut rows: Vec<usize> = fraud.into_iter().chain(non_fraud).collect();
    rows.shuffle(&mut rng);
    Ok(rows)
}

/// Train and test row indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified split holding out `test_size` of each class.
pub fn stratified_split(labels: &[u8], test_size: f64, seed: u64) -> Result<Split> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(Error::Training(format!(
            "test size must be within (0, 1), got {}",
            test_size
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };

    for class in [0u8, 1u8] {
        let mut rows: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if rows.len() < 2 {
            return Err(Error::Training(format!(
                "class {} has {} rows; a stratified split needs at least 2",
                class,
                rows.len()
            )));
        }
        rows.shuffle(&mut rng);
        let n_test =
            ((rows.len() as f64 * test_size - 1e-9).ceil() as usize).clamp(1, rows.len() - 1);
        split.test.extend_from_slice(&rows[..n_test]);
        split.train.extend_from_slice(&rows[n_test..]);
    }

    split.train.shuffle(&mut rng);
    split.test.shuffle(&mut rng);
    Ok(split)
}
