//! Goodness-of-fit over a table's prediction records.

use serde::Serialize;

use crate::data::model::PredictionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitMetrics {
    pub rmse: f64,
    pub mae: f64,
    /// Undefined when the actual series is constant.
    pub r2: Option<f64>,
}

impl FitMetrics {
    /// `None` for an empty record set.
    pub fn compute(records: &[PredictionRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let n = records.len() as f64;
        let mean = records.iter().map(|r| r.actual).sum::<f64>() / n;

        let (mut sse, mut sae, mut sst) = (0.0, 0.0, 0.0);
        for r in records {
            let err = r.actual - r.predicted;
            sse += err * err;
            sae += err.abs();
            sst += (r.actual - mean).powi(2);
        }

        Some(Self {
            rmse: (sse / n).sqrt(),
            mae: sae / n,
            r2: (sst > 0.0).then(|| 1.0 - sse / sst),
        })
    }
}
