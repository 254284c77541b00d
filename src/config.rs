use anyhow::{Context, Result, bail};
use std::env;

pub const THREADS_ENV: &str = "CLASS_LINEMAP_THREADS";

/// One worker per available processor, leaving one for the caller.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

pub fn resolve_threads(flag: Option<usize>) -> Result<usize> {
    if let Some(n) = flag {
        return validate_threads(n, "--threads");
    }

    if let Ok(raw) = env::var(THREADS_ENV) {
        let n = raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{THREADS_ENV} is not a number: {raw}"))?;
        return validate_threads(n, THREADS_ENV);
    }

    Ok(default_threads())
}

fn validate_threads(n: usize, source: &str) -> Result<usize> {
    if n == 0 {
        bail!("{source} must be at least 1");
    }
    Ok(n)
}

pub fn log_filter(quiet: bool, verbose: bool) -> Option<log::LevelFilter> {
    if quiet {
        Some(log::LevelFilter::Warn)
    } else if verbose {
        Some(log::LevelFilter::Debug)
    } else {
        None
    }
}
