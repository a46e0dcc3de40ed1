//! Schedule entry records exchanged with the import and persistence layers.
//!
//! Field names serialise in camelCase to match the staged JSON records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adjustment::AdjustmentStatus;
use crate::formula::{CompiledFormula, GenerationMethod, Variable};

/// Chapter of the additional-duty headings.
pub const ADDITIONAL_DUTY_CHAPTER: &str = "99";

/// One tariff schedule line.
///
/// Owned by the import layer. The compiler only reads the rate, footnote and
/// link fields and writes back the formula and provenance fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleEntry {
    pub code: String,
    pub chapter: String,
    pub description: String,
    pub general_rate_text: Option<String>,
    pub other_rate_text: Option<String>,
    /// Declared unit of quantity (`No.`, `kg`, `X`).
    pub unit_of_quantity: Option<String>,
    pub chapter99_links: Option<Vec<String>>,
    pub footnotes: Option<Footnotes>,
    pub chapter99_applicable_countries: Option<Vec<String>>,
    pub non_ntr_applicable_countries: Option<Vec<String>>,
    pub rate_formula: Option<String>,
    pub rate_variables: Option<Vec<Variable>>,
    pub rate_origin: Option<FormulaOrigin>,
    pub other_rate_formula: Option<String>,
    pub other_rate_variables: Option<Vec<Variable>>,
    pub other_rate_origin: Option<FormulaOrigin>,
    pub adjusted_formula: Option<String>,
    pub adjusted_variables: Option<Vec<Variable>>,
    pub metadata: EntryMetadata,
}

impl ScheduleEntry {
    /// Whether this is a Chapter 99 additional-duty heading.
    pub fn is_additional_duty(&self) -> bool {
        self.chapter == ADDITIONAL_DUTY_CHAPTER || self.code.starts_with(ADDITIONAL_DUTY_CHAPTER)
    }

    pub fn rate_text(&self, column: RateColumn) -> Option<&str> {
        match column {
            RateColumn::General => self.general_rate_text.as_deref(),
            RateColumn::Other => self.other_rate_text.as_deref(),
        }
    }

    pub fn formula(&self, column: RateColumn) -> Option<&str> {
        match column {
            RateColumn::General => self.rate_formula.as_deref(),
            RateColumn::Other => self.other_rate_formula.as_deref(),
        }
    }

    /// Write a compiled formula and its provenance into a rate column.
    pub fn apply_formula(&mut self, update: &FormulaUpdate) {
        let f = &update.formula;
        let origin = Some(FormulaOrigin {
            method: f.method,
            confidence: f.confidence,
            generated_at: update.generated_at,
        });
        let variables = Some(f.variables.iter().copied().collect());
        match update.column {
            RateColumn::General => {
                self.rate_formula = Some(f.formula.clone());
                self.rate_variables = variables;
                self.rate_origin = origin;
            }
            RateColumn::Other => {
                self.other_rate_formula = Some(f.formula.clone());
                self.other_rate_variables = variables;
                self.other_rate_origin = origin;
            }
        }
    }

    /// Write the derived fields of a synthesis pass.
    pub fn apply_synthesis(&mut self, update: &EntryUpdate) {
        self.chapter99_links = Some(update.chapter99_links.clone());
        self.chapter99_applicable_countries = update.chapter99_applicable_countries.clone();
        self.non_ntr_applicable_countries = Some(update.non_ntr_applicable_countries.clone());
        self.adjusted_formula = update.adjusted_formula.clone();
        self.adjusted_variables = update
            .adjusted_formula
            .as_ref()
            .map(|_| update.adjusted_variables.clone());
        self.metadata.synthesis = Some(update.synthesis.clone());
    }
}

/// Which rate column of an entry a formula belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateColumn {
    /// Column 1 general (NTR) rate.
    General,
    /// Column 2 rate for non-NTR countries.
    Other,
}

impl RateColumn {
    pub const ALL: [RateColumn; 2] = [RateColumn::General, RateColumn::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Other => "other",
        }
    }
}

/// Footnote payload: plain text, or a list of footnote fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Footnotes {
    Fragments(Vec<FootnoteFragment>),
    /// Plain text, which may itself hold a JSON-encoded fragment list.
    Text(String),
}

/// One footnote fragment, as a bare string or `{ "value": ... }` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FootnoteFragment {
    Text(String),
    Value { value: String },
    Other(serde_json::Value),
}

impl FootnoteFragment {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Value { value: s } => Some(s),
            Self::Other(_) => None,
        }
    }
}

/// Append-friendly metadata carried alongside an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryMetadata {
    /// Footnotes carried over from the source document.
    pub source_footnotes: Option<Vec<FootnoteFragment>>,
    /// Outcome of the last synthesis pass.
    pub synthesis: Option<SynthesisProvenance>,
}

/// How a stored formula was generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaOrigin {
    pub method: GenerationMethod,
    pub confidence: f64,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Synthesis outcome persisted with an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisProvenance {
    pub status: AdjustmentStatus,
    pub selected_code: Option<String>,
    pub adjustment_rate: Option<f64>,
    pub pass_through_marker: bool,
    pub reason: Option<String>,
    /// Non-NTR countries came from the default list, not an explicit override.
    pub non_ntr_defaulted: bool,
    pub synthesized_at: Option<DateTime<Utc>>,
}

impl SynthesisProvenance {
    /// Equality ignoring the timestamp.
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.status == other.status
            && self.selected_code == other.selected_code
            && self.adjustment_rate == other.adjustment_rate
            && self.pass_through_marker == other.pass_through_marker
            && self.reason == other.reason
            && self.non_ntr_defaulted == other.non_ntr_defaulted
    }
}

/// A compiled rate formula to write onto an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaUpdate {
    pub code: String,
    pub column: RateColumn,
    pub formula: CompiledFormula,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Derived fields of one synthesis pass for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpdate {
    pub code: String,
    pub chapter99_links: Vec<String>,
    pub chapter99_applicable_countries: Option<Vec<String>>,
    pub non_ntr_applicable_countries: Vec<String>,
    pub adjusted_formula: Option<String>,
    pub adjusted_variables: Vec<Variable>,
    pub synthesis: SynthesisProvenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_json_roundtrip_camel_case() {
        let json = r#"{
            "code": "9903.88.03",
            "chapter": "99",
            "description": "Articles the product of China, as provided for in U.S. note 20(e)",
            "generalRateText": "The duty provided in the applicable subheading + 25%",
            "chapter99ApplicableCountries": ["CN"]
        }"#;
        let entry: ScheduleEntry = serde_json::from_str(json).unwrap();
        assert!(entry.is_additional_duty());
        assert_eq!(entry.chapter99_applicable_countries, Some(vec!["CN".into()]));
        assert!(entry.footnotes.is_none());

        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["generalRateText"], entry.general_rate_text.clone().unwrap());
    }

    #[test]
    fn footnotes_accept_text_and_fragments() {
        let text: Footnotes = serde_json::from_str(r#""See 9903.88.15""#).unwrap();
        assert_eq!(text, Footnotes::Text("See 9903.88.15".into()));

        let frags: Footnotes =
            serde_json::from_str(r#"[{"value": "See 9903.88.15", "columns": ["general"]}, "x"]"#)
                .unwrap();
        let Footnotes::Fragments(frags) = frags else {
            panic!("expected fragments");
        };
        assert_eq!(frags[0].text(), Some("See 9903.88.15"));
        assert_eq!(frags[1].text(), Some("x"));
    }

    #[test]
    fn unknown_fragment_shapes_are_tolerated() {
        let frags: Vec<FootnoteFragment> = serde_json::from_str(r#"[{"marker": 1}, 7]"#).unwrap();
        assert!(frags.iter().all(|f| f.text().is_none()));
    }

    #[test]
    fn apply_formula_sets_column_and_origin() {
        let mut entry = ScheduleEntry {
            code: "0101.21.00".into(),
            ..Default::default()
        };
        entry.apply_formula(&FormulaUpdate {
            code: entry.code.clone(),
            column: RateColumn::Other,
            formula: CompiledFormula::pattern("value * 0.2".into(), [Variable::Value], 1.0),
            generated_at: None,
        });
        assert_eq!(entry.other_rate_formula.as_deref(), Some("value * 0.2"));
        assert_eq!(entry.other_rate_variables, Some(vec![Variable::Value]));
        assert_eq!(
            entry.other_rate_origin.as_ref().map(|o| o.method),
            Some(GenerationMethod::Pattern)
        );
        assert!(entry.rate_formula.is_none());
    }

    #[test]
    fn same_outcome_ignores_timestamp() {
        let a = SynthesisProvenance {
            status: AdjustmentStatus::Linked,
            selected_code: Some("9903.88.03".into()),
            adjustment_rate: Some(0.25),
            pass_through_marker: true,
            reason: None,
            non_ntr_defaulted: true,
            synthesized_at: None,
        };
        let b = SynthesisProvenance {
            synthesized_at: Some(Utc::now()),
            ..a.clone()
        };
        assert!(a.same_outcome(&b));
        assert_ne!(a, b);
    }
}
