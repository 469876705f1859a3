//! Classifiers, the keyed ensemble and artifact loading

pub mod boosting;
pub mod classifier;
pub mod ensemble;
pub mod inference;
pub mod linear;
pub mod loader;
pub mod stacking;

pub use boosting::{BoostingParams, GradientBoostedTrees};
pub use classifier::Classifier;
pub use ensemble::{classify, EnsembleMember, ModelEnsemble, ModelKey};
pub use inference::{score_upload, ScoredBatch};
pub use linear::LogisticRegression;
pub use loader::{ArtifactBundle, LazyArtifact};
pub use stacking::StackedEnsemble;
