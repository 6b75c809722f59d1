use std::process::ExitCode;

use batchflow::{scenario, AppConfig, AppResult};

fn run() -> AppResult<()> {
    let cfg = AppConfig::load()?;
    log::info!("main:config {cfg:?}");
    let (train, test) = scenario::datasets(&cfg)?;
    let report = scenario::run(&cfg, train, test)?;
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{report:?}")));
    Ok(())
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("main:failed {e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
