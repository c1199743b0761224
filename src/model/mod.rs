/// Prediction models and how tables are bound to them.
///
/// ```text
///   table name ──► binding ──► fetch "{table}.json" ──► ModelArtifact
///                                                            │
///                          FeatureMatrix ──► Regressor::predict ──► Vec<f64>
/// ```
pub mod artifact;
pub mod binding;

use crate::data::model::FeatureMatrix;
use crate::error::InferenceError;

pub use artifact::{ForestModel, LinearModel, ModelArtifact, ModelKind, TreeModel, TreeNode};
pub use binding::{ArtifactModelBinding, ModelBinding};

/// A fitted regressor. Holds no reference to the table it was resolved for.
pub trait Regressor: Send {
    /// One prediction per matrix row, in row order.
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>, InferenceError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}
