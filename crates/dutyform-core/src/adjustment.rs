//! Chapter 99 adjustment synthesis.
//!
//! Given an entry's base formula and its candidate additional-duty codes,
//! selects one Chapter 99 heading, composes the adjusted formula and infers
//! the countries the adjustment applies to.
//!
//! # Candidate selection
//!
//! - Pass 1: the first candidate whose rate text contains
//!   "duty provided in the applicable subheading" wins, regardless of link
//!   order or of larger explicit rates on other candidates.
//! - Pass 2: otherwise, the first candidate with a positive adjustment rate.
//! - Otherwise the link is unresolved.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compiler::{parse_number, parse_rate_shape};
use crate::entry::ScheduleEntry;
use crate::formula::format_number;
use crate::normalize::normalize_rate_text;
use crate::validator::validate_formula;

/// Phrase marking a heading whose duty stacks on the base subheading rate.
pub const PASS_THROUGH_PHRASE: &str = "duty provided in the applicable subheading";

/// Countries without normal trade relations, used when an entry has no list.
pub const DEFAULT_NON_NTR_COUNTRIES: &[&str] = &["BY", "CU", "KP", "RU"];

const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("china", "CN"),
    ("prc", "CN"),
    ("people's republic of china", "CN"),
    ("russia", "RU"),
    ("russian federation", "RU"),
    ("belarus", "BY"),
    ("north korea", "KP"),
    ("dprk", "KP"),
    ("democratic people's republic of korea", "KP"),
    ("cuba", "CU"),
];

static EXPLICIT_ADDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+|\bplus\b)\s*(\d+(?:\.\d+)?|\.\d+)\s*(?:%|percent)").unwrap()
});

static PRODUCT_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bproducts?\s+of\s+([^.;:()\[\]]+)").unwrap());

static COUNTRY_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),|\band\b|\bor\b").unwrap());

/// Outcome class of an adjustment synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentStatus {
    /// A Chapter 99 heading was selected.
    Linked,
    /// Candidate codes exist but none qualifies.
    Unresolved,
    /// The entry has no candidate codes.
    #[serde(rename = "NONE")]
    NoLinks,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linked => "LINKED",
            Self::Unresolved => "UNRESOLVED",
            Self::NoLinks => "NONE",
        }
    }
}

/// The Chapter 99 heading chosen for an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedReference {
    pub code: String,
    pub rate_text: String,
    /// Additional ad valorem rate as a decimal fraction.
    pub adjustment_rate: f64,
    pub is_pass_through_marker: bool,
}

/// Per-entry synthesis result. Only its derived fields are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentResult {
    pub status: AdjustmentStatus,
    pub selected_reference: Option<SelectedReference>,
    /// `None` means "not determined", distinct from an empty list.
    pub applicable_countries: Option<Vec<String>>,
    pub non_ntr_countries: Vec<String>,
    pub base_formula: Option<String>,
    pub adjusted_formula: Option<String>,
    pub reason: Option<String>,
}

/// Additional-duty entries indexed by code, built once per run.
///
/// Entries refer to each other only by code string through this index.
pub struct AdditionalDutyIndex<'a> {
    by_code: HashMap<&'a str, &'a ScheduleEntry>,
}

impl<'a> AdditionalDutyIndex<'a> {
    /// Index every additional-duty entry in a snapshot. First entry wins on
    /// duplicate codes.
    pub fn build(entries: &'a [ScheduleEntry]) -> Self {
        let mut by_code = HashMap::new();
        for entry in entries.iter().filter(|e| e.is_additional_duty()) {
            by_code.entry(entry.code.trim()).or_insert(entry);
        }
        Self { by_code }
    }

    pub fn get(&self, code: &str) -> Option<&'a ScheduleEntry> {
        self.by_code.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// Additional ad valorem rate of a Chapter 99 rate text.
///
/// An explicit `+ N%` / `plus N%` wins; otherwise the text must compile
/// deterministically to a `value`-only formula.
pub fn adjustment_rate(rate_text: &str) -> Option<f64> {
    let text = normalize_rate_text(rate_text);
    if let Some(caps) = EXPLICIT_ADDITION_RE.captures(&text) {
        return parse_number(&caps[1]).map(|n| n / 100.0);
    }
    parse_rate_shape(&text, None)?.value_only_rate()
}

fn is_pass_through(rate_text: &str) -> bool {
    normalize_rate_text(rate_text).contains(PASS_THROUGH_PHRASE)
}

/// Select the Chapter 99 heading for an entry from its candidate codes.
pub fn select_chapter99_entry<'a>(
    candidates: &[String],
    index: &AdditionalDutyIndex<'a>,
) -> Option<(SelectedReference, &'a ScheduleEntry)> {
    let resolved: Vec<(&str, &'a ScheduleEntry, &'a str)> = candidates
        .iter()
        .filter_map(|code| {
            let entry = index.get(code)?;
            Some((code.as_str(), entry, entry.general_rate_text.as_deref()?))
        })
        .collect();

    if let Some(&(code, entry, text)) = resolved.iter().find(|(_, _, text)| is_pass_through(text)) {
        let reference = SelectedReference {
            code: code.to_string(),
            rate_text: text.to_string(),
            adjustment_rate: adjustment_rate(text).unwrap_or(0.0),
            is_pass_through_marker: true,
        };
        return Some((reference, entry));
    }

    resolved.into_iter().find_map(|(code, entry, text)| {
        let rate = adjustment_rate(text).filter(|r| *r > 0.0)?;
        Some((
            SelectedReference {
                code: code.to_string(),
                rate_text: text.to_string(),
                adjustment_rate: rate,
                is_pass_through_marker: false,
            },
            entry,
        ))
    })
}

/// Compose the adjusted formula.
///
/// A non-positive rate returns `base` unchanged, pass-through marker or not.
pub fn build_adjusted_formula(base: &str, rate: f64, _is_pass_through_marker: bool) -> String {
    if rate <= 0.0 {
        return base.to_string();
    }
    format!("({base}) + (value * {})", format_number(rate))
}

/// Countries a Chapter 99 heading applies to.
///
/// Prefers the heading's stored list; otherwise parses "product of ..."
/// phrases in its description. `None` when nothing is found.
pub fn infer_applicable_countries(entry: &ScheduleEntry) -> Option<Vec<String>> {
    if let Some(list) = entry
        .chapter99_applicable_countries
        .as_ref()
        .filter(|l| !l.is_empty())
    {
        return Some(normalize_country_list(list));
    }

    let mut found = BTreeSet::new();
    for caps in PRODUCT_OF_RE.captures_iter(&entry.description) {
        for token in COUNTRY_SPLIT_RE.split(&caps[1]) {
            if let Some(iso) = country_alias(token) {
                found.insert(iso.to_string());
            }
        }
    }
    (!found.is_empty()).then(|| found.into_iter().collect())
}

fn country_alias(token: &str) -> Option<&'static str> {
    let token = token
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase();
    let token = token.strip_prefix("the ").unwrap_or(&token);
    COUNTRY_ALIASES
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, iso)| *iso)
}

/// Upper-case, trim, deduplicate and sort a country list.
pub fn normalize_country_list(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn default_non_ntr_countries() -> Vec<String> {
    DEFAULT_NON_NTR_COUNTRIES.iter().map(|c| c.to_string()).collect()
}

/// Synthesize the adjustment for one entry.
///
/// Never fails: absence of links and unresolved links are statuses. A base
/// formula that does not pass [`validate_formula`] leaves the entry
/// unresolved with no adjusted formula.
pub fn synthesize_adjustment(
    entry: &ScheduleEntry,
    candidates: &[String],
    index: &AdditionalDutyIndex<'_>,
) -> AdjustmentResult {
    let non_ntr_countries = entry
        .non_ntr_applicable_countries
        .as_ref()
        .filter(|l| !l.is_empty())
        .map(|l| normalize_country_list(l))
        .unwrap_or_else(default_non_ntr_countries);
    let base_formula = entry.rate_formula.clone();

    let mut result = AdjustmentResult {
        status: AdjustmentStatus::NoLinks,
        selected_reference: None,
        applicable_countries: None,
        non_ntr_countries,
        base_formula,
        adjusted_formula: None,
        reason: None,
    };

    if candidates.is_empty() {
        result.reason = Some("no Chapter 99 references".to_string());
        return result;
    }

    let Some((reference, heading)) = select_chapter99_entry(candidates, index) else {
        result.status = AdjustmentStatus::Unresolved;
        let missing: Vec<&str> = candidates
            .iter()
            .filter(|c| index.get(c).is_none())
            .map(String::as_str)
            .collect();
        result.reason = Some(if missing.len() == candidates.len() {
            format!("referenced headings not in schedule: {}", missing.join(", "))
        } else {
            format!(
                "no candidate carries a pass-through marker or positive rate: {}",
                candidates.join(", ")
            )
        });
        return result;
    };

    if let Some(base) = &result.base_formula {
        let check = validate_formula(base);
        if !check.valid {
            result.status = AdjustmentStatus::Unresolved;
            result.reason = Some(format!(
                "base formula failed validation: {}",
                check.error.unwrap_or_default()
            ));
            return result;
        }
    }

    result.status = AdjustmentStatus::Linked;
    result.applicable_countries = infer_applicable_countries(heading);
    match &result.base_formula {
        Some(base) => {
            let adjusted = build_adjusted_formula(
                base,
                reference.adjustment_rate,
                reference.is_pass_through_marker,
            );
            match validate_formula(&adjusted).error {
                None => result.adjusted_formula = Some(adjusted),
                Some(error) => {
                    result.status = AdjustmentStatus::Unresolved;
                    result.applicable_countries = None;
                    result.reason = Some(format!("adjusted formula failed validation: {error}"));
                    return result;
                }
            }
        }
        None => result.reason = Some("entry has no base formula".to_string()),
    }
    result.selected_reference = Some(reference);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(code: &str, rate: &str, description: &str) -> ScheduleEntry {
        ScheduleEntry {
            code: code.into(),
            chapter: "99".into(),
            description: description.into(),
            general_rate_text: Some(rate.into()),
            ..Default::default()
        }
    }

    fn base_entry(formula: &str) -> ScheduleEntry {
        ScheduleEntry {
            code: "8471.30.01".into(),
            chapter: "84".into(),
            rate_formula: Some(formula.into()),
            ..Default::default()
        }
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pass_through_marker_beats_explicit_rate_in_any_order() {
        let headings = vec![
            heading("9903.88.01", "+25%", ""),
            heading(
                "9903.88.03",
                "The duty provided in the applicable subheading + 7.5%",
                "",
            ),
        ];
        let index = AdditionalDutyIndex::build(&headings);

        for order in [
            codes(&["9903.88.01", "9903.88.03"]),
            codes(&["9903.88.03", "9903.88.01"]),
        ] {
            let (selected, _) = select_chapter99_entry(&order, &index).unwrap();
            assert_eq!(selected.code, "9903.88.03");
            assert!(selected.is_pass_through_marker);
            assert_eq!(selected.adjustment_rate, 0.075);
        }
    }

    #[test]
    fn second_pass_takes_first_positive_rate() {
        let headings = vec![
            heading("9903.01.01", "Free", ""),
            heading("9903.01.02", "25%", ""),
            heading("9903.01.03", "plus 50%", ""),
        ];
        let index = AdditionalDutyIndex::build(&headings);
        let (selected, _) = select_chapter99_entry(
            &codes(&["9903.01.01", "9903.01.02", "9903.01.03"]),
            &index,
        )
        .unwrap();
        assert_eq!(selected.code, "9903.01.02");
        assert_eq!(selected.adjustment_rate, 0.25);
        assert!(!selected.is_pass_through_marker);
    }

    #[test]
    fn nothing_qualifies_is_unresolved() {
        let headings = vec![heading("9903.01.01", "Free", ""), heading("9903.01.02", "25¢/kg", "")];
        let index = AdditionalDutyIndex::build(&headings);
        assert!(select_chapter99_entry(&codes(&["9903.01.01", "9903.01.02"]), &index).is_none());

        let result = synthesize_adjustment(
            &base_entry("value * 0.05"),
            &codes(&["9903.01.01", "9903.01.02"]),
            &index,
        );
        assert_eq!(result.status, AdjustmentStatus::Unresolved);
        assert!(result.adjusted_formula.is_none());
        assert!(result.reason.unwrap().contains("no candidate"));
    }

    #[test]
    fn missing_headings_are_unresolved() {
        let index = AdditionalDutyIndex::build(&[]);
        let result =
            synthesize_adjustment(&base_entry("value * 0.05"), &codes(&["9903.88.03"]), &index);
        assert_eq!(result.status, AdjustmentStatus::Unresolved);
        assert!(result.reason.unwrap().contains("not in schedule"));
    }

    #[test]
    fn no_candidates_is_none_status() {
        let index = AdditionalDutyIndex::build(&[]);
        let result = synthesize_adjustment(&base_entry("value * 0.05"), &[], &index);
        assert_eq!(result.status, AdjustmentStatus::NoLinks);
        assert_eq!(result.non_ntr_countries, vec!["BY", "CU", "KP", "RU"]);
        assert_eq!(result.base_formula.as_deref(), Some("value * 0.05"));
    }

    #[test]
    fn adjusted_formula_composition() {
        assert_eq!(
            build_adjusted_formula("value * 0.05", 0.25, false),
            "(value * 0.05) + (value * 0.25)"
        );
        assert_eq!(build_adjusted_formula("value * 0.05", 0.0, false), "value * 0.05");
        // Marker with zero rate still returns base unchanged.
        assert_eq!(build_adjusted_formula("value * 0.05", 0.0, true), "value * 0.05");
    }

    #[test]
    fn linked_result_composes_formula_and_countries() {
        let headings = vec![heading(
            "9903.88.15",
            "The duty provided in the applicable subheading + 7.5%",
            "Articles the product of China, as provided for in U.S. note 20(r)",
        )];
        let index = AdditionalDutyIndex::build(&headings);
        let result =
            synthesize_adjustment(&base_entry("value * 0.05"), &codes(&["9903.88.15"]), &index);
        assert_eq!(result.status, AdjustmentStatus::Linked);
        assert_eq!(
            result.adjusted_formula.as_deref(),
            Some("(value * 0.05) + (value * 0.075)")
        );
        assert_eq!(result.applicable_countries, Some(vec!["CN".to_string()]));
    }

    #[test]
    fn linked_without_base_formula() {
        let headings = vec![heading("9903.01.02", "25%", "")];
        let index = AdditionalDutyIndex::build(&headings);
        let entry = ScheduleEntry {
            rate_formula: None,
            ..base_entry("")
        };
        let result = synthesize_adjustment(&entry, &codes(&["9903.01.02"]), &index);
        assert_eq!(result.status, AdjustmentStatus::Linked);
        assert!(result.adjusted_formula.is_none());
        assert_eq!(result.reason.as_deref(), Some("entry has no base formula"));
    }

    #[test]
    fn invalid_base_formula_is_never_adjusted() {
        let headings = vec![heading("9903.01.02", "+25%", "Products of China")];
        let index = AdditionalDutyIndex::build(&headings);
        let result =
            synthesize_adjustment(&base_entry("process.exit(1)"), &codes(&["9903.01.02"]), &index);
        assert_eq!(result.status, AdjustmentStatus::Unresolved);
        assert!(result.adjusted_formula.is_none());
        assert!(result.selected_reference.is_none());
        assert!(result.reason.unwrap().starts_with("base formula failed validation"));
    }

    #[test]
    fn countries_prefer_stored_list() {
        let mut h = heading("9903.01.02", "25%", "Products of Russia");
        h.chapter99_applicable_countries = Some(vec!["cn".into(), " RU ".into(), "CN".into()]);
        assert_eq!(
            infer_applicable_countries(&h),
            Some(vec!["CN".to_string(), "RU".to_string()])
        );
    }

    #[test]
    fn countries_from_description_aliases() {
        let h = heading(
            "9903.01.02",
            "35%",
            "Articles the product of Russia, Belarus or North Korea; products of the PRC",
        );
        assert_eq!(
            infer_applicable_countries(&h),
            Some(codes(&["BY", "CN", "KP", "RU"]))
        );
    }

    #[test]
    fn countries_not_determined_is_none() {
        assert_eq!(infer_applicable_countries(&heading("9903.01.02", "25%", "Other")), None);
        assert_eq!(
            infer_applicable_countries(&heading("9903.01.02", "25%", "Products of Atlantis")),
            None
        );
    }

    #[test]
    fn explicit_non_ntr_override_respected() {
        let index = AdditionalDutyIndex::build(&[]);
        let mut entry = base_entry("value * 0.05");
        entry.non_ntr_applicable_countries = Some(vec!["cu".into()]);
        let result = synthesize_adjustment(&entry, &[], &index);
        assert_eq!(result.non_ntr_countries, vec!["CU"]);
    }

    #[test]
    fn adjustment_rate_sources() {
        assert_eq!(adjustment_rate("The duty provided in the applicable subheading + 25%"), Some(0.25));
        assert_eq!(adjustment_rate("25%"), Some(0.25));
        assert_eq!(adjustment_rate("The duty provided in the applicable subheading"), None);
        assert_eq!(adjustment_rate("25¢/kg"), None);
    }
}
