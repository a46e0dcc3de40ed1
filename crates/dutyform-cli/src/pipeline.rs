//! Snapshot pipelines: bulk formula compilation and adjustment synthesis.

use std::time::Instant;

use anyhow::Context;
use dutyform_ai::{CompletionProvider, RateCompiler};
use dutyform_core::{BatchSynthesizer, GenerationMethod, SynthesisStats};
use dutyform_store::{SnapshotStore, StoreError};

pub struct CompileStats {
    pub pattern: usize,
    pub ai: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_secs: f64,
}

/// Compile the rate columns of every entry and write them into the snapshot.
pub async fn run_compile_pipeline<P: CompletionProvider>(
    store: &mut SnapshotStore,
    compiler: &RateCompiler<P>,
) -> anyhow::Result<CompileStats> {
    let start = Instant::now();
    eprintln!("  Compiling rates for {} entries", store.len());

    let report = compiler.compile_entries(store.entries()).await;
    store
        .apply_formulas(&report.updates)
        .context("writing compiled formulas")?;

    for failure in &report.failures {
        eprintln!(
            "  ! {} [{}] {:?}: {}",
            failure.code,
            failure.column.as_str(),
            failure.rate_text,
            failure.error
        );
    }

    Ok(CompileStats {
        pattern: report.count(GenerationMethod::Pattern),
        ai: report.count(GenerationMethod::Ai),
        failed: report.failures.len(),
        skipped: report.skipped,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

pub struct SynthesisRun {
    pub store: SnapshotStore,
    pub stats: SynthesisStats,
    pub elapsed_secs: f64,
}

/// Synthesize adjusted formulas across the snapshot.
///
/// Synthesis blocks on its worker threads, so it runs on tokio's blocking
/// pool and hands the store back when done.
pub async fn run_synthesis_pipeline(
    mut store: SnapshotStore,
    synthesizer: BatchSynthesizer,
) -> anyhow::Result<SynthesisRun> {
    let start = Instant::now();
    eprintln!("  Synthesizing adjustments for {} entries", store.len());
    let (store, stats) = tokio::task::spawn_blocking(move || {
        let stats = store.synthesize(&synthesizer)?;
        Ok::<_, StoreError>((store, stats))
    })
    .await
    .context("synthesis task panicked")?
    .context("writing synthesis batches")?;
    Ok(SynthesisRun {
        store,
        stats,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}
