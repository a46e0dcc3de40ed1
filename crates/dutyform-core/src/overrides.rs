//! Manual formula overrides.
//!
//! Overrides are maintained outside the compiler and always supersede
//! computed formulas. Lookup is by code, country and formula kind, with
//! specificity precedence:
//!
//! - an exact country beats `ALL`
//! - an exact version beats "applies to all future versions" (`version: None`)
//!
//! Country specificity is compared first. An override whose formula fails
//! [`validate_formula`] is never returned.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::ScheduleEntry;
use crate::validator::validate_formula;

/// Country wildcard.
pub const ALL_COUNTRIES: &str = "ALL";

/// Which formula an override replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaKind {
    General,
    Other,
    Adjusted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaOverride {
    pub code: String,
    /// ISO country code, or `ALL`.
    pub country: String,
    pub kind: FormulaKind,
    pub formula: String,
    /// Schedule version; `None` applies to all future versions.
    pub version: Option<String>,
    pub note: Option<String>,
}

/// A validated set of overrides.
#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    overrides: Vec<FormulaOverride>,
}

impl OverrideSet {
    /// Keep only overrides whose formula passes validation.
    pub fn new(overrides: Vec<FormulaOverride>) -> Self {
        let overrides = overrides
            .into_iter()
            .filter(|o| {
                let check = validate_formula(&o.formula);
                if !check.valid {
                    warn!(
                        code = %o.code,
                        country = %o.country,
                        error = check.error.as_deref().unwrap_or_default(),
                        "ignoring invalid override formula"
                    );
                }
                check.valid
            })
            .collect();
        Self { overrides }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// The most specific override for a lookup. Ties go to the earliest.
    pub fn resolve(
        &self,
        code: &str,
        country: &str,
        kind: FormulaKind,
        version: Option<&str>,
    ) -> Option<&FormulaOverride> {
        let mut best: Option<(u8, u8, &FormulaOverride)> = None;
        for o in self.overrides.iter().filter(|o| o.code == code && o.kind == kind) {
            let country_rank = if o.country.eq_ignore_ascii_case(country) {
                2
            } else if o.country.eq_ignore_ascii_case(ALL_COUNTRIES) {
                1
            } else {
                continue;
            };
            let version_rank = match (o.version.as_deref(), version) {
                (None, _) => 1,
                (Some(v), Some(wanted)) if v == wanted => 2,
                _ => continue,
            };
            if best.is_none_or(|(c, v, _)| (country_rank, version_rank) > (c, v)) {
                best = Some((country_rank, version_rank, o));
            }
        }
        best.map(|(_, _, o)| o)
    }

    /// The formula to use: the override when one applies, else the computed one.
    pub fn effective_formula<'a>(
        &'a self,
        entry: &'a ScheduleEntry,
        kind: FormulaKind,
        country: &str,
        version: Option<&str>,
    ) -> Option<&'a str> {
        if let Some(o) = self.resolve(&entry.code, country, kind, version) {
            return Some(&o.formula);
        }
        match kind {
            FormulaKind::General => entry.rate_formula.as_deref(),
            FormulaKind::Other => entry.other_rate_formula.as_deref(),
            FormulaKind::Adjusted => entry.adjusted_formula.as_deref(),
        }
    }
}
