//! Class-balanced, L2-regularized logistic regression

use crate::error::Result;
use crate::models::classifier::{sigmoid, validate_training_data, Classifier};
use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    pub c: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tolerance: f64,
    weights: Vec<f64>,
    intercept: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            c: 1.0,
            learning_rate: 0.5,
            max_iter: 1000,
            tolerance: 1e-7,
            weights: Vec::new(),
            intercept: 0.0,
        }
    }
}

impl LogisticRegression {
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Classifier for LogisticRegression {
    /// Full-batch gradient descent on the sample-weighted mean log loss.
    /// Each class carries half of the total sample weight.
    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8]) -> Result<()> {
        let (negatives, positives) = validate_training_data(x, y)?;
        let n = y.len() as f64;
        let sample_weight: Array1<f64> = y
            .iter()
            .map(|&label| {
                let class_count = if label == 1 { positives } else { negatives };
                n / (2.0 * class_count as f64)
            })
            .collect();
        let targets: Array1<f64> = y.iter().map(|&label| label as f64).collect();

        let mut w = Array1::<f64>::zeros(x.ncols());
        let mut b = 0.0;
        let penalty = 1.0 / (self.c * n);

        for iteration in 0..self.max_iter {
            let z = x.dot(&w) + b;
            let residual = (z.mapv(sigmoid) - &targets) * &sample_weight;

            let grad_w = x.t().dot(&residual) / n + &w * penalty;
            let grad_b = residual.sum() / n;

            w.scaled_add(-self.learning_rate, &grad_w);
            b -= self.learning_rate * grad_b;

            let step = grad_w.iter().map(|g| g * g).sum::<f64>() + grad_b * grad_b;
            if step.sqrt() < self.tolerance {
                debug!(iteration, "Logistic regression converged");
                break;
            }
        }

        self.weights = w.to_vec();
        self.intercept = b;
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Vec<f64> {
        x.axis_iter(Axis(0))
            .map(|row| {
                let dot = row.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>();
                let z = dot + self.intercept;
                sigmoid(z)
            })
            .collect()
    }
}
