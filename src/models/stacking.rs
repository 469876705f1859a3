//! Stacked ensemble: two boosted base learners feeding a logistic meta-learner.
//!
//! The meta-learner sees `[p_a, p_b, x...]`, where the base probabilities
//! are out-of-fold predictions during fit so it never trains on scores the
//! base learners produced for their own training rows.

use crate::error::{Error, Result};
use crate::models::boosting::{BoostingParams, GradientBoostedTrees};
use crate::models::classifier::{validate_training_data, Classifier};
use crate::models::linear::LogisticRegression;
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedEnsemble {
    base_a: GradientBoostedTrees,
    base_b: GradientBoostedTrees,
    meta: LogisticRegression,
    folds: usize,
    seed: u64,
}

impl StackedEnsemble {
    pub fn new(
        params_a: BoostingParams,
        params_b: BoostingParams,
        folds: usize,
        seed: u64,
    ) -> Self {
        Self {
            base_a: GradientBoostedTrees::new(params_a),
            base_b: GradientBoostedTrees::new(params_b),
            meta: LogisticRegression::default(),
            folds,
            seed,
        }
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    /// Fold index of every row; each class is spread evenly over the folds.
    fn stratified_folds(&self, y: &[u8]) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut assignment = vec![0; y.len()];
        for class in [0u8, 1u8] {
            let mut rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
            rows.shuffle(&mut rng);
            for (position, row) in rows.into_iter().enumerate() {
                assignment[row] = position % self.folds;
            }
        }
        assignment
    }

    fn meta_features(p_a: &[f64], p_b: &[f64], x: ArrayView2<f64>) -> Array2<f64> {
        Array2::from_shape_fn((x.nrows(), x.ncols() + 2), |(row, col)| match col {
            0 => p_a[row],
            1 => p_b[row],
            _ => x[[row, col - 2]],
        })
    }
}

impl Classifier for StackedEnsemble {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8]) -> Result<()> {
        let (negatives, positives) = validate_training_data(x, y)?;
        if self.folds < 2 {
            return Err(Error::Training(format!(
                "stacking needs at least 2 folds, got {}",
                self.folds
            )));
        }
        if negatives.min(positives) < self.folds {
            return Err(Error::Training(format!(
                "each class needs at least {} rows for stacking, got {} negative and {} positive",
                self.folds, negatives, positives
            )));
        }

        let assignment = self.stratified_folds(y);
        let mut oof_a = vec![0.0; y.len()];
        let mut oof_b = vec![0.0; y.len()];

        for fold in 0..self.folds {
            let (held_out, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| assignment[i] == fold);
            let x_train = x.select(Axis(0), &train);
            let y_train: Vec<u8> = train.iter().map(|&i| y[i]).collect();
            let x_held = x.select(Axis(0), &held_out);

            let mut fold_a = GradientBoostedTrees::new(self.base_a.params().clone());
            let mut fold_b = GradientBoostedTrees::new(self.base_b.params().clone());
            fold_a.fit(x_train.view(), &y_train)?;
            fold_b.fit(x_train.view(), &y_train)?;

            let p_a = fold_a.predict_proba(x_held.view());
            let p_b = fold_b.predict_proba(x_held.view());
            for (position, &row) in held_out.iter().enumerate() {
                oof_a[row] = p_a[position];
                oof_b[row] = p_b[position];
            }
            debug!(fold, held_out = held_out.len(), "Out-of-fold predictions ready");
        }

        let meta_x = Self::meta_features(&oof_a, &oof_b, x);
        self.meta.fit(meta_x.view(), y)?;

        self.base_a.fit(x, y)?;
        self.base_b.fit(x, y)?;
        info!(folds = self.folds, rows = y.len(), "Stacked ensemble fitted");
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        let p_a = self.base_a.predict_proba(x);
        let p_b = self.base_b.predict_proba(x);
        self.meta.predict_proba(Self::meta_features(&p_a, &p_b, x).view())
    }
}
