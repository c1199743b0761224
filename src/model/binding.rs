use std::sync::Arc;

use log::info;

use super::Regressor;
use super::artifact::ModelArtifact;
use crate::error::BindingError;
use crate::fetch::{ArtifactFetch, join_location};

/// Resolves a table name to its fitted model.
///
/// Resolution does not check that the model fits the table's columns; a
/// mismatch shows up as an inference error on `predict`.
pub trait ModelBinding: Send + Sync {
    fn resolve(&self, table: &str) -> Result<Box<dyn Regressor>, BindingError>;
}

/// Closures make convenient per-test fakes.
impl<F> ModelBinding for F
where
    F: Fn(&str) -> Result<Box<dyn Regressor>, BindingError> + Send + Sync,
{
    fn resolve(&self, table: &str) -> Result<Box<dyn Regressor>, BindingError> {
        self(table)
    }
}

/// Wrap a closure as a shared binding.
pub fn from_fn<F>(f: F) -> Arc<dyn ModelBinding>
where
    F: Fn(&str) -> Result<Box<dyn Regressor>, BindingError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fetches `{base}/{table}.json` and decodes it as a [`ModelArtifact`].
/// Nothing is cached: every call fetches again.
#[derive(Clone)]
pub struct ArtifactModelBinding {
    fetcher: Arc<dyn ArtifactFetch>,
    base: String,
}

impl ArtifactModelBinding {
    pub fn new(fetcher: Arc<dyn ArtifactFetch>, base: impl Into<String>) -> Self {
        Self {
            fetcher,
            base: base.into(),
        }
    }

    pub fn location_for(&self, table: &str) -> String {
        join_location(&self.base, &format!("{table}.json"))
    }
}

impl ModelBinding for ArtifactModelBinding {
    fn resolve(&self, table: &str) -> Result<Box<dyn Regressor>, BindingError> {
        let location = self.location_for(table);
        let bytes = self
            .fetcher
            .fetch(&location)
            .map_err(|source| BindingError::Unavailable {
                table: table.to_string(),
                source,
            })?;
        let artifact = ModelArtifact::from_slice(&bytes).map_err(|reason| BindingError::Corrupt {
            table: table.to_string(),
            reason,
        })?;
        info!("{table}: loaded {} from {location}", artifact.describe());
        Ok(Box::new(artifact))
    }
}
