//! Runs a decompile batch through the hook on a bounded worker pool.
//!
//! The archive store lives for exactly one batch: it is closed after every
//! unit has been handled, whether or not units failed, and a close failure
//! fails the batch because the source archive may be left inconsistent.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::archive::ArchiveStore;
use crate::hook::{DecompileUnit, LineMappingSaver, LineOutcome, ResultSaver, SaveOutcome};
use crate::sink::TextSink;

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: crate::config::default_threads(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub source: String,
    pub units: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub text_failures: usize,
    pub duration_ms: u64,
}

#[derive(Default)]
struct BatchStats {
    persisted: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    text_failures: AtomicUsize,
}

impl BatchStats {
    fn record(&self, outcome: SaveOutcome) {
        let counter = match outcome.lines {
            LineOutcome::Persisted => &self.persisted,
            LineOutcome::Skipped => &self.skipped,
            LineOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !outcome.text_saved {
            self.text_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn run_batch<S: TextSink>(
    source: &Path,
    units: &[DecompileUnit],
    sink: &S,
    config: &BatchConfig,
) -> Result<BatchSummary> {
    let start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .build()
        .context("Failed to build worker pool")?;

    let store = ArchiveStore::new();
    let stats = BatchStats::default();
    {
        let saver = LineMappingSaver::new(source, sink, &store);
        pool.install(|| {
            units
                .par_iter()
                .for_each(|unit| stats.record(saver.save_class_entry(unit)));
        });
    }

    let sink_closed = sink.close();
    store
        .close_all()
        .with_context(|| format!("Failed to persist patched classes in {}", source.display()))?;
    sink_closed?;

    let summary = BatchSummary {
        source: source.to_string_lossy().to_string(),
        units: units.len(),
        persisted: stats.persisted.into_inner(),
        skipped: stats.skipped.into_inner(),
        failed: stats.failed.into_inner(),
        text_failures: stats.text_failures.into_inner(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    log::info!(
        "Processed {} classes from {}: {} remapped, {} without mapping, {} failed",
        summary.units,
        summary.source,
        summary.persisted,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}
