use std::process::ExitCode;

use clap::Parser;
use log::error;

use table_predict::config::Cli;
use table_predict::runner::CancelFlag;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = match cli.resolve() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    match table_predict::run_pipeline(&cfg, CancelFlag::new()) {
        Ok(report) => {
            for (table, status) in &report.tables {
                println!("{table}: {status}");
            }
            println!("{report}");
            if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
