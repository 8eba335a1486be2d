use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

/// Probe a list of URLs with bounded concurrency and retries.
///
/// URLs come from positional arguments and/or `--file` (one per line,
/// `#` starts a comment). Relative paths are resolved against `--base-url`.
#[derive(Parser, Debug)]
#[command(name = "sitescan", version, about)]
pub struct CliArgs {
    /// URLs or paths to probe
    pub urls: Vec<String>,

    /// Read additional URLs from a file
    #[arg(long, short)]
    pub file: Option<PathBuf>,

    /// Path to a TOML scheduler config
    #[arg(long, env = "SITESCAN_CONFIG")]
    pub config: Option<String>,

    /// Prefix for URLs that are not absolute (e.g. https://example.com)
    #[arg(long, env = "SITESCAN_BASE_URL")]
    pub base_url: Option<String>,

    /// Number of concurrent probes (overrides config)
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// Retries per URL after the first attempt (overrides config)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-probe timeout in milliseconds (overrides config)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Priority rule PATTERN=N; URLs containing PATTERN are probed first.
    /// May be repeated; the first matching rule wins.
    #[arg(long = "priority", value_name = "PATTERN=N")]
    pub priorities: Vec<String>,

    /// Disable the periodic status line
    #[arg(long, short)]
    pub quiet: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl CliArgs {
    /// Positional URLs followed by those read from `--file`, resolved and
    /// in order. Duplicates are left for the queue to drop.
    pub fn collect_urls(&self) -> Result<Vec<String>> {
        let mut raw = self.urls.clone();
        if let Some(path) = &self.file {
            raw.extend(read_url_file(path)?);
        }
        if raw.is_empty() {
            bail!("no URLs given; pass them as arguments or with --file");
        }
        Ok(raw
            .iter()
            .map(|u| resolve_url(self.base_url.as_deref(), u))
            .collect())
    }

    pub fn parsed_priorities(&self) -> Result<Vec<(String, i32)>> {
        self.priorities.iter().map(|p| parse_priority(p)).collect()
    }
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read URL file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// `PATTERN=N`, split on the last `=` so patterns may contain one.
pub fn parse_priority(raw: &str) -> Result<(String, i32)> {
    let (pattern, priority) = raw
        .rsplit_once('=')
        .with_context(|| format!("priority rule '{raw}' must look like PATTERN=N"))?;
    if pattern.is_empty() {
        bail!("priority rule '{raw}' has an empty pattern");
    }
    let priority = priority
        .trim()
        .parse()
        .with_context(|| format!("priority rule '{raw}': '{priority}' is not an integer"))?;
    Ok((pattern.to_string(), priority))
}

pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match base {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        None => url.to_string(),
    }
}
