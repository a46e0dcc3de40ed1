//! Batch synthesis across a schedule snapshot.
//!
//! Builds the additional-duty index once, synthesizes every ordinary entry,
//! and queues a write only where a derived field actually changed, so a
//! repeated run over unchanged data writes nothing.

use std::thread;

use chrono::Utc;
use tracing::{debug, info};

use crate::adjustment::{
    AdditionalDutyIndex, AdjustmentResult, AdjustmentStatus, default_non_ntr_countries,
    normalize_country_list, synthesize_adjustment,
};
use crate::entry::{EntryUpdate, ScheduleEntry, SynthesisProvenance};
use crate::links::resolve_chapter99_links;
use crate::validator::extract_variables;

/// Writes flushed per batch.
pub const WRITE_BATCH_SIZE: usize = 500;

/// Destination for synthesis writes.
pub trait UpdateSink {
    type Error;

    fn write_batch(&mut self, batch: Vec<EntryUpdate>) -> Result<(), Self::Error>;
}

/// Aggregate counters of a synthesis run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisStats {
    pub processed: usize,
    pub updated: usize,
    pub linked: usize,
    pub unresolved: usize,
    pub non_ntr_defaults_applied: usize,
}

/// Synthesis outcome for one entry.
pub struct EntrySynthesis {
    pub result: AdjustmentResult,
    pub update: EntryUpdate,
    pub non_ntr_defaulted: bool,
    /// Whether `update` differs from what the entry already holds.
    pub changed: bool,
}

/// Drives adjustment synthesis over a whole snapshot.
#[derive(Debug, Clone)]
pub struct BatchSynthesizer {
    batch_size: usize,
    workers: usize,
}

impl Default for BatchSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSynthesizer {
    pub fn new() -> Self {
        Self {
            batch_size: WRITE_BATCH_SIZE,
            workers: 1,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolve entries on up to `workers` threads. Output order and counters
    /// are identical to a sequential run.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Synthesize every ordinary entry without writing anything.
    pub fn plan(&self, entries: &[ScheduleEntry]) -> Vec<EntrySynthesis> {
        let index = AdditionalDutyIndex::build(entries);
        info!(headings = index.len(), "indexed additional-duty headings");

        let targets: Vec<&ScheduleEntry> =
            entries.iter().filter(|e| !e.is_additional_duty()).collect();

        if self.workers == 1 || targets.len() < 2 {
            return targets.iter().map(|e| synthesize_entry(e, &index)).collect();
        }

        let chunk_size = targets.len().div_ceil(self.workers);
        let index = &index;
        thread::scope(|scope| {
            let handles: Vec<_> = targets
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|e| synthesize_entry(e, index))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    /// Synthesize and flush changed entries to `sink` in fixed-size batches.
    pub fn run<S: UpdateSink>(
        &self,
        entries: &[ScheduleEntry],
        sink: &mut S,
    ) -> Result<SynthesisStats, S::Error> {
        let mut stats = SynthesisStats::default();
        let mut pending = Vec::with_capacity(self.batch_size);

        for synthesis in self.plan(entries) {
            stats.processed += 1;
            match synthesis.result.status {
                AdjustmentStatus::Linked => stats.linked += 1,
                AdjustmentStatus::Unresolved => stats.unresolved += 1,
                AdjustmentStatus::NoLinks => {}
            }
            if synthesis.non_ntr_defaulted {
                stats.non_ntr_defaults_applied += 1;
            }
            if synthesis.changed {
                stats.updated += 1;
                pending.push(synthesis.update);
                if pending.len() >= self.batch_size {
                    debug!(size = pending.len(), "flushing synthesis batch");
                    sink.write_batch(std::mem::take(&mut pending))?;
                }
            }
        }
        if !pending.is_empty() {
            debug!(size = pending.len(), "flushing synthesis batch");
            sink.write_batch(pending)?;
        }

        info!(
            processed = stats.processed,
            updated = stats.updated,
            linked = stats.linked,
            unresolved = stats.unresolved,
            non_ntr_defaults = stats.non_ntr_defaults_applied,
            "synthesis complete"
        );
        Ok(stats)
    }
}

/// Resolve links, synthesize, and diff against the entry's stored fields.
pub fn synthesize_entry(entry: &ScheduleEntry, index: &AdditionalDutyIndex<'_>) -> EntrySynthesis {
    let links = resolve_chapter99_links(entry);
    let result = synthesize_adjustment(entry, &links, index);

    let non_ntr_defaulted = is_non_ntr_defaulted(entry);

    let selected = result.selected_reference.as_ref();
    let synthesis = SynthesisProvenance {
        status: result.status,
        selected_code: selected.map(|r| r.code.clone()),
        adjustment_rate: selected.map(|r| r.adjustment_rate),
        pass_through_marker: selected.is_some_and(|r| r.is_pass_through_marker),
        reason: result.reason.clone(),
        non_ntr_defaulted,
        synthesized_at: Some(Utc::now()),
    };

    let update = EntryUpdate {
        code: entry.code.clone(),
        chapter99_links: links,
        chapter99_applicable_countries: result.applicable_countries.clone(),
        non_ntr_applicable_countries: result.non_ntr_countries.clone(),
        adjusted_formula: result.adjusted_formula.clone(),
        adjusted_variables: result
            .adjusted_formula
            .as_deref()
            .map(|f| extract_variables(f).into_iter().collect())
            .unwrap_or_default(),
        synthesis,
    };
    let changed = differs(entry, &update);

    EntrySynthesis {
        result,
        update,
        non_ntr_defaulted,
        changed,
    }
}

/// Whether the entry's non-NTR countries come from the default list.
///
/// A stored list counts as a default only when the last run wrote it from
/// the defaults and it still equals them. Any other non-empty list is an
/// explicit override.
fn is_non_ntr_defaulted(entry: &ScheduleEntry) -> bool {
    let Some(stored) = entry
        .non_ntr_applicable_countries
        .as_deref()
        .filter(|l| !l.is_empty())
    else {
        return true;
    };
    let previously_defaulted = entry
        .metadata
        .synthesis
        .as_ref()
        .is_some_and(|s| s.non_ntr_defaulted);
    previously_defaulted && normalize_country_list(stored) == default_non_ntr_countries()
}

fn differs(entry: &ScheduleEntry, update: &EntryUpdate) -> bool {
    let stored_links = normalize_list(entry.chapter99_links.as_deref());
    let stored_countries = entry
        .chapter99_applicable_countries
        .as_deref()
        .map(normalize_country_list);
    let stored_non_ntr = entry
        .non_ntr_applicable_countries
        .as_deref()
        .map(normalize_country_list)
        .unwrap_or_default();
    let provenance_same = entry
        .metadata
        .synthesis
        .as_ref()
        .is_some_and(|s| s.same_outcome(&update.synthesis));

    stored_links != update.chapter99_links
        || stored_countries != update.chapter99_applicable_countries
        || stored_non_ntr != update.non_ntr_applicable_countries
        || entry.adjusted_formula != update.adjusted_formula
        || !provenance_same
}

fn normalize_list(list: Option<&[String]>) -> Vec<String> {
    let mut out: Vec<String> = list
        .unwrap_or_default()
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
