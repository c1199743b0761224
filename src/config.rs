use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Everything a batch run needs to know. Loaded from an optional JSON file,
/// then overridden by command-line flags.
///
/// ```json
/// {
///   "dataset": "https://example.com/joined_data.db",
///   "models": "https://example.com/models/",
///   "output_dir": "predictions",
///   "fetch_timeout_secs": 30,
///   "jobs": 4
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// URL or path of the dataset (SQLite, csv, json or parquet).
    pub dataset: String,
    /// Base URL or directory holding `{table}.json` model artifacts.
    pub models: String,
    pub output_dir: PathBuf,
    /// Where the fetched dataset is materialized.
    pub work_dir: PathBuf,
    pub fetch_timeout_secs: u64,
    pub jobs: usize,
    /// Tables to run; empty runs all of them.
    pub tables: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            models: "models".to_string(),
            output_dir: PathBuf::from("predictions"),
            work_dir: PathBuf::from("."),
            fetch_timeout_secs: 30,
            jobs: 1,
            tables: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dataset.trim().is_empty() {
            bail!("no dataset given (use --dataset or the `dataset` config key)");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch timeout must be at least one second");
        }
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "table-predict",
    version,
    about = "Predict every table of a time-series dataset with its pre-trained model"
)]
pub struct Cli {
    /// Dataset URL or path
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Base URL or directory of `{table}.json` model artifacts
    #[arg(short, long)]
    pub models: Option<String>,

    /// Directory for charts, CSVs and the batch summary
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory the dataset is downloaded into
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tables processed in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Timeout for each dataset/model fetch, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Only run these tables (repeatable)
    #[arg(short, long = "table")]
    pub tables: Vec<String>,
}

impl Cli {
    /// Config file (if any) with flags applied on top.
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = &self.dataset {
            cfg.dataset = v.clone();
        }
        if let Some(v) = &self.models {
            cfg.models = v.clone();
        }
        if let Some(v) = &self.output {
            cfg.output_dir = v.clone();
        }
        if let Some(v) = &self.work_dir {
            cfg.work_dir = v.clone();
        }
        if let Some(v) = self.jobs {
            cfg.jobs = v;
        }
        if let Some(v) = self.timeout_secs {
            cfg.fetch_timeout_secs = v;
        }
        if !self.tables.is_empty() {
            cfg.tables = self.tables.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{"dataset":"a.db","models":"m/","jobs":2,"tables":["x"]}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "table-predict",
            "--config",
            path.to_str().unwrap(),
            "--jobs",
            "8",
            "--timeout-secs",
            "5",
        ]);
        let cfg = cli.resolve().unwrap();
        assert_eq!(cfg.dataset, "a.db");
        assert_eq!(cfg.models, "m/");
        assert_eq!(cfg.jobs, 8);
        assert_eq!(cfg.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.tables, vec!["x"]);
        assert_eq!(cfg.output_dir, PathBuf::from("predictions"));
    }

    #[test]
    fn dataset_is_required() {
        let cli = Cli::parse_from(["table-predict"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        assert!(serde_json::from_str::<PipelineConfig>(r#"{"datasett":"x"}"#).is_err());
    }

    #[test]
    fn repeatable_table_flag() {
        let cli = Cli::parse_from(["table-predict", "-d", "x.db", "-t", "a", "--table", "b"]);
        assert_eq!(cli.resolve().unwrap().tables, vec!["a", "b"]);
    }
}
