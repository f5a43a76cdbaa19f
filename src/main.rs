//! CLI entry point for the fetcher tool.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fetcher_core::download::constants::CONNECT_TIMEOUT_SECS;
use fetcher_core::download::filename_from_url;
use fetcher_core::{
    BatchReport, BatchScheduler, DownloadEngine, EngineConfig, JobRequest, ReqwestTransport,
    RetryPredicate, retry_transient_failures,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so the report on stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    // Read input: from positional args or stdin
    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://example.com/file.pdf' | fetcher -o downloads");
        return Ok(());
    };

    let urls = parse_urls(&input_text);
    if urls.is_empty() {
        info!("No URLs found in input");
        return Ok(());
    }

    let requests: Vec<JobRequest> = urls
        .iter()
        .map(|url| {
            let request = JobRequest::new(*url);
            if args.in_memory {
                request
            } else {
                request.with_destination(args.output_dir.join(filename_from_url(url)))
            }
        })
        .collect();
    info!(urls = requests.len(), output_dir = %args.output_dir.display(), "Fetcher starting");

    let transport = ReqwestTransport::with_timeouts(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        Duration::from_secs(args.timeout),
    )
    .context("failed to build HTTP client")?;
    let engine = DownloadEngine::new(Arc::new(transport), EngineConfig::default());
    let scheduler = BatchScheduler::new(Arc::new(engine));

    let retry: Option<RetryPredicate> = args
        .retry_failed
        .then(|| Arc::new(retry_transient_failures) as RetryPredicate);
    let report = scheduler
        .run_batch(requests, args.concurrency_limit(), retry)
        .await
        .context("batch aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, args.quiet);
    }

    Ok(())
}

/// One URL per whitespace-separated token; `#` starts a comment line.
fn parse_urls(input: &str) -> Vec<&str> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(str::split_whitespace)
        .collect()
}

fn print_summary(report: &BatchReport, quiet: bool) {
    for job in &report.jobs {
        match job.last_error() {
            None if quiet => {}
            None => match job.destination() {
                Some(path) => println!("ok    {} -> {}", job.url(), path.display()),
                None => println!(
                    "ok    {} ({})",
                    job.url(),
                    job.mime_type().unwrap_or("no content type")
                ),
            },
            Some(error) => {
                warn!(url = job.url(), failures = job.failure_count(), "job failed");
                println!("fail  {}: {error}", job.url());
            }
        }
    }

    if !quiet {
        for pass in &report.passes {
            println!(
                "pass {}: {} dispatched, {} ok, {} failed, median {:?}, mean {:?}",
                pass.pass,
                pass.dispatched,
                pass.succeeded,
                pass.failed,
                pass.durations.median,
                pass.durations.mean
            );
        }
        println!("{} succeeded, {} failed", report.succeeded(), report.failed());
    }
}
