//! ledgerfsck: verify a channel's block chain.
//!
//! ```text
//! ledgerfsck --channel mychannel --msp-path ./msp --msp-id Org1MSP [--root-dir /var/ledger]
//! ```
//!
//! Prints `PASS` and exits 0, or `FAIL: <reason>` and exits 1. The rest of
//! the store configuration comes from the `LEDGER_*` environment.

use std::process::ExitCode;

use anyhow::Context;
use block_storage::StoreConfig;
use clap::Parser;
use ledger_telemetry::{init_tracing, TelemetryConfig};
use ledgerfsck::{run, Args, Outcome};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.json_logs = false;
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("Warning: {}", e);
    }

    let outcome = match StoreConfig::from_env().context("Invalid store configuration") {
        Ok(config) => run(&args, config).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(Outcome::Pass(report)) => {
            tracing::info!(blocks = report.verified, "[fsck] chain verified");
            println!("PASS");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Fail(failure)) => {
            println!("FAIL: {}", failure);
            ExitCode::FAILURE
        }
        Err(e) => {
            println!("FAIL: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
