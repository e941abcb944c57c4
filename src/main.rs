use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use s3cp::cli::Cli;
use s3cp::config::Config;
use s3cp::signal::done_signal;
use s3cp::store::S3Store;
use s3cp::transfer::{CopyContext, handle_cp};
use s3cp::util::{init_progress, print_summary, set_startup_header};
use s3cp::logging;

/// Returns the process exit code.
fn run(config: Config) -> anyhow::Result<i32> {
    let (canceller, done) = done_signal();
    let canceller = Arc::new(canceller);
    {
        let c = canceller.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("[s3cp] interrupted; finishing in-flight requests");
            c.cancel();
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let store = S3Store::connect(&config.s3).context("failed to set up S3 client")?;
    let json = config.log.json;
    let (mp, total_pb, header) = init_progress(config.show_progress, 0);
    set_startup_header(
        &header,
        if config.recursive { "tree" } else { "file" },
        config.workers,
        config.part_size,
        config.backoff.initial_interval.as_millis() as u64,
    );

    let ctx = CopyContext::new(config, Arc::new(store), done).with_progress(total_pb.clone());
    let result = handle_cp(&ctx);

    let _ = mp.clear();
    header.finish_and_clear();
    total_pb.finish_and_clear();

    let summary = result?;
    if json {
        if let Ok(line) = serde_json::to_string(&summary) {
            tracing::info!("[s3cp] summary {}", line);
        }
    } else {
        print_summary(&summary);
    }
    if canceller.is_cancelled() {
        tracing::warn!("[s3cp] run was cancelled; rerun to resume open uploads");
        return Ok(1);
    }
    Ok(summary.exit_code())
}

fn main() {
    let cli = Cli::parse();
    let config = match Config::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let guard = match logging::init(&config.log) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(2);
        }
    };

    let code = match run(config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("[s3cp] {:#}", e);
            1
        }
    };
    guard.finish(code);
    std::process::exit(code);
}
