//! sitescan -- probe a set of URLs with bounded concurrency and retries.

mod cli;
mod prober;
mod terminal;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use sitescan_core::{PriorityPattern, SchedulerConfig};
use sitescan_queue::{Dispatcher, RunCallbacks};

use crate::cli::CliArgs;
use crate::prober::HttpProber;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    sitescan_core::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let urls = args.collect_urls()?;
    let config = build_config(&args)?;
    config.log_summary();

    let short_status = config.enable_short_status;
    let dispatcher = Arc::new(Dispatcher::new(config, HttpProber::new(CONNECT_TIMEOUT))?);

    let canceller = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight probes");
            canceller.cancel();
        }
    });

    let callbacks = RunCallbacks::new().on_short_status(terminal::print_status_line);
    info!(urls = urls.len(), "starting scan");
    let summary = dispatcher.run(urls, callbacks).await?;
    if short_status {
        terminal::finish_status_line();
    }

    if args.json {
        terminal::print_summary_json(&summary)?;
    } else {
        terminal::print_summary(&summary)?;
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Config file (or defaults plus env), then command-line overrides.
fn build_config(args: &CliArgs) -> Result<SchedulerConfig> {
    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => SchedulerConfig::from_env().context("invalid SITESCAN_* environment")?,
    };

    if let Some(n) = args.concurrency {
        config = config.with_max_concurrent(n);
    }
    if let Some(n) = args.retries {
        config = config.with_max_retries(n);
    }
    if let Some(ms) = args.timeout_ms {
        config = config.with_probe_timeout(Duration::from_millis(ms));
    }
    if args.quiet {
        config = config.with_short_status(false);
    }

    let mut patterns: Vec<PriorityPattern> = args
        .parsed_priorities()?
        .into_iter()
        .map(|(pattern, priority)| PriorityPattern::new(pattern, priority))
        .collect();
    patterns.append(&mut config.priority_patterns);
    config.priority_patterns = patterns;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_rules_take_precedence() {
        let args = CliArgs::parse_from([
            "sitescan", "--priority", "/home=7", "-c", "5", "-q", "/home",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert!(!config.enable_short_status);
        assert_eq!(config.priority_for("/home"), 7);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let args = CliArgs::parse_from(["sitescan", "-c", "0", "/a"]);
        assert!(build_config(&args).is_err());
    }
}
