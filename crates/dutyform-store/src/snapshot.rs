//! JSON schedule snapshots with in-memory write-back.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use dutyform_core::{
    BatchSynthesizer, EntryUpdate, FormulaUpdate, ScheduleEntry, SynthesisStats, UpdateSink,
    validate_formula,
};
use tracing::{info, warn};

use crate::StoreError;

/// A schedule snapshot held in memory.
///
/// Entries keep their load order. Writes go through [`apply_formulas`] and
/// the [`UpdateSink`] impl, both keyed by code.
///
/// [`apply_formulas`]: Self::apply_formulas
#[derive(Debug, Default)]
pub struct SnapshotStore {
    entries: Vec<ScheduleEntry>,
    by_code: HashMap<String, usize>,
    batches_written: usize,
}

impl SnapshotStore {
    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        let mut by_code = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if by_code.insert(entry.code.clone(), i).is_some() {
                warn!(code = %entry.code, "duplicate code in snapshot; last one wins");
            }
        }
        Self {
            entries,
            by_code,
            batches_written: 0,
        }
    }

    /// Load a JSON array of entries.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::SnapshotNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let entries: Vec<ScheduleEntry> = serde_json::from_reader(reader)?;
        info!(path = %path.display(), count = entries.len(), "loaded snapshot");
        Ok(Self::from_entries(entries))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.entries)?;
        writer.flush()?;
        info!(path = %path.display(), count = self.entries.len(), "saved snapshot");
        Ok(())
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn get(&self, code: &str) -> Option<&ScheduleEntry> {
        self.by_code.get(code).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Synthesis batches received so far.
    pub fn batches_written(&self) -> usize {
        self.batches_written
    }

    fn position(&self, code: &str) -> Result<usize, StoreError> {
        self.by_code
            .get(code)
            .copied()
            .ok_or_else(|| StoreError::UnknownCode(code.to_string()))
    }

    /// Resolve the position of `code`, refusing a formula that fails the
    /// safety gate.
    fn checked_position(&self, code: &str, formula: Option<&str>) -> Result<usize, StoreError> {
        if let Some(formula) = formula {
            let check = validate_formula(formula);
            if !check.valid {
                return Err(StoreError::InvalidFormula {
                    code: code.to_string(),
                    reason: check.error.unwrap_or_default(),
                });
            }
        }
        self.position(code)
    }

    /// Write compiled formulas. Nothing is written if any code is unknown or
    /// any formula is invalid.
    pub fn apply_formulas(&mut self, updates: &[FormulaUpdate]) -> Result<usize, StoreError> {
        let positions = updates
            .iter()
            .map(|u| self.checked_position(&u.code, Some(&u.formula.formula)))
            .collect::<Result<Vec<_>, _>>()?;
        for (update, i) in updates.iter().zip(positions) {
            self.entries[i].apply_formula(update);
        }
        Ok(updates.len())
    }

    /// Run adjustment synthesis over this snapshot, writing back in place.
    pub fn synthesize(
        &mut self,
        synthesizer: &BatchSynthesizer,
    ) -> Result<SynthesisStats, StoreError> {
        let snapshot = self.entries.clone();
        synthesizer.run(&snapshot, self)
    }
}

impl UpdateSink for SnapshotStore {
    type Error = StoreError;

    /// Apply one batch. Nothing is written if any code is unknown or any
    /// adjusted formula is invalid.
    fn write_batch(&mut self, batch: Vec<EntryUpdate>) -> Result<(), StoreError> {
        let positions = batch
            .iter()
            .map(|u| self.checked_position(&u.code, u.adjusted_formula.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        for (update, i) in batch.iter().zip(positions) {
            self.entries[i].apply_synthesis(update);
        }
        self.batches_written += 1;
        Ok(())
    }
}
