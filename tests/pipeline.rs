use std::io;
use std::sync::Arc;

use rusqlite::Connection;
use table_predict::config::PipelineConfig;
use table_predict::data::catalog::MemorySource;
use table_predict::data::model::{RawTable, RawValue};
use table_predict::emit::{ArtifactEmitter, BlobStore, MemoryStore};
use table_predict::error::FailureKind;
use table_predict::fetch::MemoryFetcher;
use table_predict::model::ArtifactModelBinding;
use table_predict::runner::{BatchRunner, CancelFlag, PredictionRunner, TableStatus};

const LINEAR_1: &str = r#"{"kind":"linear","coefficients":[2.0],"intercept":1.0}"#;

fn text(s: &str) -> RawValue {
    RawValue::Text(s.to_string())
}

fn prices(name: &str) -> RawTable {
    RawTable::new(
        name,
        vec!["Date".into(), "volume".into(), "close".into()],
        vec![
            vec![text("2021-01-03"), RawValue::Integer(3), RawValue::Float(7.0)],
            vec![text("2021-01-01"), RawValue::Integer(1), RawValue::Float(3.0)],
            vec![text("2021-01-02"), RawValue::Integer(2), RawValue::Float(5.5)],
        ],
    )
}

fn batch(
    tables: Vec<RawTable>,
    fetcher: MemoryFetcher,
    store: Arc<dyn BlobStore>,
) -> BatchRunner {
    let binding = Arc::new(ArtifactModelBinding::new(Arc::new(fetcher), "models"));
    BatchRunner::new(
        PredictionRunner::new(Arc::new(MemorySource::new(tables)), binding),
        ArtifactEmitter::with_store(store),
    )
}

#[test]
fn missing_model_does_not_stop_other_tables() {
    let fetcher = MemoryFetcher::new()
        .with("models/AAPL.json", LINEAR_1)
        .with("models/XOM.json", LINEAR_1);
    let store = Arc::new(MemoryStore::new());
    let report = batch(
        vec![prices("AAPL"), prices("MSFT"), prices("XOM")],
        fetcher,
        store.clone(),
    )
    .run_all()
    .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(
        report.get("MSFT").and_then(TableStatus::failure_kind),
        Some(FailureKind::ArtifactUnavailable)
    );
    match report.get("MSFT") {
        Some(TableStatus::Failure { message, .. }) => assert!(message.contains("MSFT")),
        other => panic!("unexpected status {other:?}"),
    }
    for ok in ["AAPL", "XOM"] {
        match report.get(ok) {
            Some(TableStatus::Success(summary)) => {
                assert_eq!(summary.records, 3);
                assert_eq!(summary.artifacts.table, format!("{ok}_predictions.csv"));
            }
            other => panic!("{ok}: unexpected status {other:?}"),
        }
    }
    assert_eq!(
        store.names(),
        vec![
            "AAPL_predictions.csv",
            "AAPL_predictions.html",
            "XOM_predictions.csv",
            "XOM_predictions.html",
        ]
    );

    let csv = String::from_utf8(store.get("AAPL_predictions.csv").unwrap()).unwrap();
    assert_eq!(
        csv,
        "Date,Actual,Predicted\n2021-01-01,3,3\n2021-01-02,5.5,5\n2021-01-03,7,7\n"
    );
}

#[test]
fn every_failure_kind_is_reported_per_table() {
    let fetcher = MemoryFetcher::new()
        .with("models/corrupt.json", "\u{80}\u{04}not json")
        .with(
            "models/mismatch.json",
            r#"{"kind":"linear","coefficients":[1.0,1.0],"intercept":0.0}"#,
        )
        .with("models/empty.json", LINEAR_1)
        .with("models/good.json", LINEAR_1);

    let empty = RawTable::new(
        "empty",
        vec!["Date".into(), "volume".into(), "close".into()],
        vec![vec![
            text("2021-01-01"),
            RawValue::Float(f64::NAN),
            RawValue::Float(1.0),
        ]],
    );
    let malformed = RawTable::new("malformed", vec!["Date".into()], vec![vec![text("x")]]);

    let report = batch(
        vec![
            prices("corrupt"),
            prices("mismatch"),
            empty,
            malformed,
            prices("good"),
        ],
        fetcher,
        Arc::new(MemoryStore::new()),
    )
    .run_all()
    .unwrap();

    let kind = |t: &str| report.get(t).and_then(TableStatus::failure_kind);
    assert_eq!(kind("corrupt"), Some(FailureKind::ArtifactCorrupt));
    assert_eq!(kind("mismatch"), Some(FailureKind::InferenceError));
    assert_eq!(kind("empty"), Some(FailureKind::EmptyTableAfterCleaning));
    assert_eq!(kind("malformed"), Some(FailureKind::MalformedTable));
    assert!(report.get("good").unwrap().is_success());
    assert_eq!(report.failed(), 4);
}

#[test]
fn requested_table_absent_from_source_is_a_fetch_error() {
    let report = batch(
        vec![prices("AAPL")],
        MemoryFetcher::new().with("models/AAPL.json", LINEAR_1),
        Arc::new(MemoryStore::new()),
    )
    .only(vec!["AAPL".into(), "GOOG".into()])
    .run_all()
    .unwrap();

    assert!(report.get("AAPL").unwrap().is_success());
    assert_eq!(
        report.get("GOOG").and_then(TableStatus::failure_kind),
        Some(FailureKind::FetchError)
    );
}

struct FailingStore;

impl BlobStore for FailingStore {
    fn put(&self, name: &str, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, name.to_string()))
    }
}

#[test]
fn write_failures_are_emit_failures() {
    let report = batch(
        vec![prices("AAPL")],
        MemoryFetcher::new().with("models/AAPL.json", LINEAR_1),
        Arc::new(FailingStore),
    )
    .run_all()
    .unwrap();

    assert_eq!(
        report.get("AAPL").and_then(TableStatus::failure_kind),
        Some(FailureKind::EmitFailure)
    );
}

#[test]
fn parallel_batch_matches_sequential() {
    let names: Vec<String> = (0..8).map(|i| format!("T{i}")).collect();
    let mut fetcher = MemoryFetcher::new();
    for name in names.iter().step_by(2) {
        fetcher.insert(format!("models/{name}.json"), LINEAR_1);
    }
    let tables: Vec<RawTable> = names.iter().map(|n| prices(n)).collect();

    let sequential = batch(tables.clone(), fetcher.clone(), Arc::new(MemoryStore::new()))
        .run_all()
        .unwrap();
    let parallel = batch(tables, fetcher, Arc::new(MemoryStore::new()))
        .jobs(4)
        .run_all()
        .unwrap();

    assert_eq!(sequential, parallel);
    assert_eq!(parallel.succeeded(), 4);
    assert_eq!(parallel.failed(), 4);
}

#[test]
fn rerun_writes_identical_csv() {
    let fetcher = MemoryFetcher::new().with("models/AAPL.json", LINEAR_1);
    let store = Arc::new(MemoryStore::new());
    let runner = batch(vec![prices("AAPL")], fetcher, store.clone());

    runner.run_all().unwrap();
    let first = store.get("AAPL_predictions.csv").unwrap();
    runner.run_all().unwrap();
    assert_eq!(store.get("AAPL_predictions.csv").unwrap(), first);
    assert_eq!(store.names().len(), 2);
}

#[test]
fn sqlite_dataset_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("joined_data.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE spy (Date TEXT, session TEXT, volume REAL, close REAL);
         INSERT INTO spy VALUES ('2021-01-05', 'regular', 2.0, 12.0);
         INSERT INTO spy VALUES ('2021-01-04', 'extended', 1.0, 11.0);
         INSERT INTO spy VALUES ('2021-01-06', 'regular', NULL, 13.0);
         INSERT INTO spy VALUES ('2021-01-07', 'regular', 4.0, NULL);
         CREATE TABLE qqq (Date TEXT, volume REAL, close REAL);
         INSERT INTO qqq VALUES ('2021-01-04', 1.0, 2.0);",
    )
    .unwrap();
    drop(conn);

    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    // features are [session, volume]; session encodes regular → 0, extended → 1
    std::fs::write(
        models.join("spy.json"),
        r#"{"kind":"linear","n_features":2,"coefficients":[5.0,1.0],"intercept":0.0}"#,
    )
    .unwrap();

    let cfg = PipelineConfig {
        dataset: db.to_str().unwrap().to_string(),
        models: models.to_str().unwrap().to_string(),
        output_dir: dir.path().join("out"),
        work_dir: dir.path().join("work"),
        ..PipelineConfig::default()
    };
    let report = table_predict::run_pipeline(&cfg, CancelFlag::new()).unwrap();

    match report.get("spy") {
        Some(TableStatus::Success(summary)) => {
            assert_eq!(summary.records, 2);
            assert_eq!(summary.dropped_rows, 2);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(
        report.get("qqq").and_then(TableStatus::failure_kind),
        Some(FailureKind::ArtifactUnavailable)
    );

    let out = cfg.output_dir;
    let csv = std::fs::read_to_string(out.join("spy_predictions.csv")).unwrap();
    assert_eq!(csv, "Date,Actual,Predicted\n2021-01-04,11,6\n2021-01-05,12,2\n");
    assert!(out.join("spy_predictions.html").exists());
    assert!(!out.join("qqq_predictions.csv").exists());

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join(table_predict::SUMMARY_NAME)).unwrap())
            .unwrap();
    assert_eq!(summary["tables"]["spy"]["status"], "success");
    assert_eq!(summary["tables"]["qqq"]["kind"], "ArtifactUnavailable");
}

#[test]
fn unwritable_output_still_reports_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE spy (Date TEXT, volume REAL, close REAL);
         INSERT INTO spy VALUES ('2021-01-04', 1.0, 3.0);",
    )
    .unwrap();
    drop(conn);

    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("spy.json"), LINEAR_1).unwrap();

    // A regular file where the output directory should be.
    let blocked = dir.path().join("out");
    std::fs::write(&blocked, b"").unwrap();

    let cfg = PipelineConfig {
        dataset: db.to_str().unwrap().to_string(),
        models: models.to_str().unwrap().to_string(),
        output_dir: blocked,
        work_dir: dir.path().join("work"),
        ..PipelineConfig::default()
    };
    let report = table_predict::run_pipeline(&cfg, CancelFlag::new()).unwrap();

    assert!(report.has_failures());
    assert_eq!(
        report.get("spy").and_then(TableStatus::failure_kind),
        Some(FailureKind::EmitFailure)
    );
}
