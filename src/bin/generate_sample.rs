use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use clap::Parser;
use rusqlite::{Connection, params};

use table_predict::model::{
    ForestModel, LinearModel, ModelArtifact, ModelKind, TreeModel, TreeNode,
};

/// Write a small demo dataset (`sample_data.db`) and matching model
/// artifacts. `TSLA` is deliberately left without a model.
#[derive(Debug, Parser)]
struct Args {
    /// Output directory
    #[arg(default_value = "sample")]
    out: PathBuf,

    /// Rows per table
    #[arg(long, default_value_t = 120)]
    rows: usize,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Ticker {
    name: &'static str,
    base_volume: f64,
    /// close = intercept + w_volume * volume + w_session * session_code
    intercept: f64,
    w_volume: f64,
    w_session: f64,
    reversed: bool,
}

const TICKERS: &[Ticker] = &[
    Ticker {
        name: "AAPL",
        base_volume: 80.0,
        intercept: 120.0,
        w_volume: 0.4,
        w_session: -2.0,
        reversed: false,
    },
    Ticker {
        name: "MSFT",
        base_volume: 30.0,
        intercept: 240.0,
        w_volume: 1.1,
        w_session: 3.5,
        reversed: true,
    },
    Ticker {
        name: "XOM",
        base_volume: 20.0,
        intercept: 95.0,
        w_volume: 0.0,
        w_session: 0.0,
        reversed: false,
    },
    Ticker {
        name: "TSLA",
        base_volume: 110.0,
        intercept: 180.0,
        w_volume: 0.6,
        w_session: 5.0,
        reversed: false,
    },
];

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(42);

    let models_dir = args.out.join("models");
    std::fs::create_dir_all(&models_dir)
        .with_context(|| format!("creating {}", models_dir.display()))?;
    let db_path = args.out.join("sample_data.db");
    if db_path.exists() {
        std::fs::remove_file(&db_path).context("removing previous sample_data.db")?;
    }
    let mut conn = Connection::open(&db_path).context("creating sample_data.db")?;

    let start = NaiveDate::from_ymd_opt(2023, 1, 2).context("start date")?;

    for ticker in TICKERS {
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "CREATE TABLE \"{}\" (Date TEXT, volume REAL, session TEXT, close REAL)",
                ticker.name
            ),
            [],
        )?;

        let mut rows: Vec<usize> = (0..args.rows).collect();
        if ticker.reversed {
            rows.reverse();
        }
        let first = rows.first().copied().unwrap_or(0);

        for i in rows {
            let date = (start + Duration::days(i as i64)).format("%Y-%m-%d").to_string();
            let volume = (ticker.base_volume + rng.gauss(0.0, ticker.base_volume * 0.2)).max(1.0);
            // The first inserted row is always "regular" so it encodes to 0.
            let session = if i != first && i % 5 == 0 { "extended" } else { "regular" };
            let code = if session == "regular" { 0.0 } else { 1.0 };

            let signal = if ticker.name == "XOM" {
                if volume <= 20.0 { 92.0 } else { 98.0 }
            } else {
                ticker.intercept + ticker.w_volume * volume + ticker.w_session * code
            };
            let close = signal + rng.gauss(0.0, 0.5);

            // Sprinkle gaps the cleaner has to drop.
            let volume_cell = (i % 37 != 11).then_some(volume);
            let close_cell = (i % 41 != 7).then_some(close);
            tx.execute(
                &format!("INSERT INTO \"{}\" VALUES (?1, ?2, ?3, ?4)", ticker.name),
                params![date, volume_cell, session, close_cell],
            )?;
        }
        tx.commit()?;

        if ticker.name == "TSLA" {
            continue;
        }
        let artifact = model_for(ticker);
        let path = models_dir.join(format!("{}.json", ticker.name));
        std::fs::write(&path, serde_json::to_vec_pretty(&artifact)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    println!(
        "Wrote {} tables ({} rows each) to {} and models to {}",
        TICKERS.len(),
        args.rows,
        db_path.display(),
        models_dir.display()
    );
    Ok(())
}

fn model_for(ticker: &Ticker) -> ModelArtifact {
    let model = if ticker.name == "XOM" {
        let stump = |threshold: f64| TreeModel {
            root: TreeNode::Split {
                feature: 0,
                threshold,
                left: Box::new(TreeNode::Leaf { value: 92.0 }),
                right: Box::new(TreeNode::Leaf { value: 98.0 }),
            },
        };
        ModelKind::Forest(ForestModel {
            trees: vec![stump(19.5), stump(20.5)],
        })
    } else {
        ModelKind::Linear(LinearModel {
            coefficients: vec![ticker.w_volume, ticker.w_session],
            intercept: ticker.intercept,
        })
    };
    ModelArtifact {
        n_features: Some(2),
        feature_names: vec!["volume".into(), "session".into()],
        model,
    }
}
