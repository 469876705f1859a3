//! Keyed ensemble of trained classifiers used for inference.

use crate::error::{Error, Result};
use crate::features::FeatureMatrix;
use crate::models::boosting::GradientBoostedTrees;
use crate::models::classifier::Classifier;
use crate::models::stacking::StackedEnsemble;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Probability cut used by the base models whatever threshold the caller sends.
pub const BASE_MODEL_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKey {
    Xgb,
    Cat,
    Stack,
}

impl ModelKey {
    pub const ALL: [ModelKey; 3] = [ModelKey::Xgb, ModelKey::Cat, ModelKey::Stack];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKey::Xgb => "xgb",
            ModelKey::Cat => "cat",
            ModelKey::Stack => "stack",
        }
    }

    /// Human-readable model name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKey::Xgb => "XGBoost",
            ModelKey::Cat => "CatBoost",
            ModelKey::Stack => "Stacking",
        }
    }

    /// Only the stacked model honours a caller-supplied threshold.
    pub fn supports_threshold(&self) -> bool {
        matches!(self, ModelKey::Stack)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xgb" => Ok(ModelKey::Xgb),
            "cat" => Ok(ModelKey::Cat),
            "stack" => Ok(ModelKey::Stack),
            other => Err(Error::UnknownModelKey(other.to_string())),
        }
    }
}

/// One trained classifier of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnsembleMember {
    BoostedA(GradientBoostedTrees),
    BoostedB(GradientBoostedTrees),
    Stacked(StackedEnsemble),
}

impl EnsembleMember {
    fn classifier(&self) -> &dyn Classifier {
        match self {
            EnsembleMember::BoostedA(model) | EnsembleMember::BoostedB(model) => model,
            EnsembleMember::Stacked(model) => model,
        }
    }

    pub fn predict_proba(&self, matrix: &FeatureMatrix) -> Vec<f64> {
        self.classifier().predict_proba(matrix.values().view())
    }

    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        self.classifier().feature_importances()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEnsemble {
    members: BTreeMap<ModelKey, EnsembleMember>,
}

impl ModelEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ModelKey, member: EnsembleMember) {
        self.members.insert(key, member);
    }

    pub fn keys(&self) -> impl Iterator<Item = ModelKey> + '_ {
        self.members.keys().copied()
    }

    pub fn contains(&self, key: ModelKey) -> bool {
        self.members.contains_key(&key)
    }

    pub fn member(&self, key: ModelKey) -> Result<&EnsembleMember> {
        self.members
            .get(&key)
            .ok_or_else(|| Error::UnknownModelKey(key.to_string()))
    }

    /// Fraud probability for every row of the matrix.
    pub fn score(&self, key: ModelKey, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        let probabilities = self.member(key)?.predict_proba(matrix);
        debug!(model = %key, rows = probabilities.len(), "Scored batch");
        Ok(probabilities)
    }

    /// Feature name → importance weight, when the model records importances.
    pub fn importance_map(
        &self,
        key: ModelKey,
        columns: &[String],
    ) -> Result<Option<HashMap<String, f64>>> {
        let importances = self.member(key)?.feature_importances();
        Ok(importances.map(|weights| columns.iter().cloned().zip(weights).collect()))
    }
}

/// Binarize probabilities. Base models always cut at 0.5; the stacked model
/// uses `threshold`.
pub fn classify(key: ModelKey, probabilities: &[f64], threshold: f64) -> Vec<u8> {
    let cut = if key.supports_threshold() {
        threshold
    } else {
        BASE_MODEL_THRESHOLD
    };
    probabilities.iter().map(|&p| u8::from(p > cut)).collect()
}
