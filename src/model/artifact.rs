use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::data::model::FeatureMatrix;
use crate::error::InferenceError;

/// Deepest tree accepted from an artifact.
const MAX_TREE_DEPTH: usize = 512;

// ---------------------------------------------------------------------------
// Serialized model format
// ---------------------------------------------------------------------------

/// A serialized model as stored under `{table}.json`.
///
/// ```json
/// { "kind": "linear", "n_features": 2, "coefficients": [0.5, -1.0], "intercept": 3.0 }
/// { "kind": "forest", "trees": [ { "root": { "feature": 0, "threshold": 1.5,
///     "left": { "value": 1.0 }, "right": { "value": 2.0 } } } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Feature count the model was fit with, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_features: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_names: Vec<String>,
    #[serde(flatten)]
    pub model: ModelKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Linear(LinearModel),
    Tree(TreeModel),
    Forest(ForestModel),
}

/// `y = intercept + coefficients · x`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    pub root: TreeNode,
}

/// Mean of its trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<TreeModel>,
}

/// Regression tree node. Rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f64,
    },
}

// ---------------------------------------------------------------------------
// Decoding + structural checks
// ---------------------------------------------------------------------------

impl ModelArtifact {
    /// Deserialize and validate. The error string is the corruption reason.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let artifact: ModelArtifact =
            serde_json::from_slice(bytes).map_err(|e| format!("undecodable model: {e}"))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Checks that do not depend on the data the model will see.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(n) = self.n_features {
            if !self.feature_names.is_empty() && self.feature_names.len() != n {
                return Err(format!(
                    "n_features is {n} but {} feature name(s) given",
                    self.feature_names.len()
                ));
            }
        }
        match &self.model {
            ModelKind::Linear(m) => {
                if !m.intercept.is_finite() || m.coefficients.iter().any(|c| !c.is_finite()) {
                    return Err("linear model has non-finite parameters".into());
                }
                if let Some(n) = self.n_features {
                    if n != m.coefficients.len() {
                        return Err(format!(
                            "n_features is {n} but {} coefficient(s) given",
                            m.coefficients.len()
                        ));
                    }
                }
            }
            ModelKind::Tree(t) => validate_node(&t.root, 1)?,
            ModelKind::Forest(f) => {
                if f.trees.is_empty() {
                    return Err("forest has no trees".into());
                }
                for t in &f.trees {
                    validate_node(&t.root, 1)?;
                }
            }
        }
        Ok(())
    }

    /// Feature count the model requires, if it can tell.
    pub fn expected_features(&self) -> Option<usize> {
        self.n_features
            .or_else(|| match &self.model {
                ModelKind::Linear(m) => Some(m.coefficients.len()),
                _ => None,
            })
            .or_else(|| (!self.feature_names.is_empty()).then_some(self.feature_names.len()))
    }
}

fn validate_node(node: &TreeNode, depth: usize) -> Result<(), String> {
    if depth > MAX_TREE_DEPTH {
        return Err(format!("tree deeper than {MAX_TREE_DEPTH} levels"));
    }
    match node {
        TreeNode::Leaf { value } if !value.is_finite() => Err("tree leaf is not finite".into()),
        TreeNode::Leaf { .. } => Ok(()),
        TreeNode::Split { threshold, .. } if threshold.is_nan() => {
            Err("tree split threshold is NaN".into())
        }
        TreeNode::Split { left, right, .. } => {
            validate_node(left, depth + 1)?;
            validate_node(right, depth + 1)
        }
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

impl TreeNode {
    fn predict_one(&self, row: &[f64]) -> Result<f64, InferenceError> {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return Ok(*value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row.get(*feature).ok_or(InferenceError::FeatureOutOfRange {
                        feature: *feature,
                        n_cols: row.len(),
                    })?;
                    node = if x <= threshold { &**left } else { &**right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

impl ModelKind {
    fn predict_one(&self, row: &[f64]) -> Result<f64, InferenceError> {
        match self {
            ModelKind::Linear(m) => Ok(m.intercept
                + m.coefficients
                    .iter()
                    .zip(row)
                    .map(|(w, x)| w * x)
                    .sum::<f64>()),
            ModelKind::Tree(t) => t.root.predict_one(row),
            ModelKind::Forest(f) => {
                let mut sum = 0.0;
                for t in &f.trees {
                    sum += t.root.predict_one(row)?;
                }
                Ok(sum / f.trees.len() as f64)
            }
        }
    }
}

impl Regressor for ModelArtifact {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>, InferenceError> {
        if let Some(expected) = self.expected_features() {
            if expected != features.n_cols() {
                return Err(InferenceError::FeatureCountMismatch {
                    expected,
                    actual: features.n_cols(),
                });
            }
        }

        features
            .rows()
            .enumerate()
            .map(|(i, row)| {
                let y = self.model.predict_one(row)?;
                if y.is_finite() {
                    Ok(y)
                } else {
                    Err(InferenceError::NonFinite { row: i })
                }
            })
            .collect()
    }

    fn describe(&self) -> String {
        match &self.model {
            ModelKind::Linear(m) => format!("linear({} coefficients)", m.coefficients.len()),
            ModelKind::Tree(t) => format!("tree(depth {})", t.root.depth()),
            ModelKind::Forest(f) => format!("forest({} trees)", f.trees.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> TreeModel {
        TreeModel {
            root: TreeNode::Split {
                feature,
                threshold,
                left: Box::new(TreeNode::Leaf { value: left }),
                right: Box::new(TreeNode::Leaf { value: right }),
            },
        }
    }

    #[test]
    fn linear_model_from_json() {
        let m = ModelArtifact::from_slice(
            br#"{"kind":"linear","coefficients":[2.0,-1.0],"intercept":0.5}"#,
        )
        .unwrap();
        let x = FeatureMatrix::from_rows(2, &[vec![1.0, 1.0], vec![3.0, 0.0]]);
        assert_eq!(m.predict(&x).unwrap(), vec![1.5, 6.5]);
        assert_eq!(m.describe(), "linear(2 coefficients)");
    }

    #[test]
    fn forest_averages_trees() {
        let m = ModelArtifact::from_slice(
            br#"{"kind":"forest","trees":[
                {"root":{"feature":0,"threshold":1.5,"left":{"value":1.0},"right":{"value":3.0}}},
                {"root":{"value":5.0}}
            ]}"#,
        )
        .unwrap();
        let x = FeatureMatrix::from_rows(1, &[vec![1.0], vec![2.0]]);
        assert_eq!(m.predict(&x).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn feature_count_mismatch_is_an_inference_error() {
        let m = ModelArtifact {
            n_features: None,
            feature_names: Vec::new(),
            model: ModelKind::Linear(LinearModel {
                coefficients: vec![1.0, 1.0, 1.0],
                intercept: 0.0,
            }),
        };
        let x = FeatureMatrix::from_rows(2, &[vec![1.0, 2.0]]);
        assert_eq!(
            m.predict(&x),
            Err(InferenceError::FeatureCountMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn tree_split_past_last_column_fails_at_predict() {
        let m = ModelArtifact {
            n_features: None,
            feature_names: Vec::new(),
            model: ModelKind::Tree(stump(4, 0.0, 1.0, 2.0)),
        };
        let x = FeatureMatrix::from_rows(2, &[vec![1.0, 2.0]]);
        assert_eq!(
            m.predict(&x),
            Err(InferenceError::FeatureOutOfRange {
                feature: 4,
                n_cols: 2
            })
        );
    }

    #[test]
    fn non_finite_predictions_are_rejected() {
        let m = ModelArtifact {
            n_features: Some(1),
            feature_names: Vec::new(),
            model: ModelKind::Linear(LinearModel {
                coefficients: vec![f64::MAX],
                intercept: 0.0,
            }),
        };
        let x = FeatureMatrix::from_rows(1, &[vec![1.0], vec![10.0]]);
        assert_eq!(m.predict(&x), Err(InferenceError::NonFinite { row: 1 }));
    }

    #[test]
    fn structurally_invalid_artifacts_are_rejected() {
        assert!(ModelArtifact::from_slice(b"\x80\x04pickle").is_err());
        assert!(ModelArtifact::from_slice(br#"{"kind":"svm"}"#).is_err());
        assert!(ModelArtifact::from_slice(br#"{"kind":"forest","trees":[]}"#).is_err());
        assert!(ModelArtifact::from_slice(
            br#"{"kind":"linear","n_features":3,"coefficients":[1.0],"intercept":0.0}"#
        )
        .is_err());
    }

    #[test]
    fn artifacts_survive_serialization() {
        let m = ModelArtifact {
            n_features: Some(1),
            feature_names: vec!["volume".into()],
            model: ModelKind::Tree(stump(0, 10.0, -1.0, 1.0)),
        };
        let bytes = serde_json::to_vec(&m).unwrap();
        assert_eq!(ModelArtifact::from_slice(&bytes).unwrap(), m);
    }

    #[test]
    fn zero_row_matrix_predicts_nothing() {
        let m = ModelArtifact {
            n_features: None,
            feature_names: Vec::new(),
            model: ModelKind::Tree(stump(0, 0.0, 0.0, 0.0)),
        };
        assert!(m.predict(&FeatureMatrix::with_columns(1)).unwrap().is_empty());
    }
}
