//! Deterministic rate compiler.
//!
//! Applies an ordered grammar of rate shapes to normalised rate text and
//! returns the first match. Rules, highest priority first:
//!
//! | # | Shape | Example | Formula | Confidence |
//! |---|-------|---------|---------|------------|
//! | 1 | free / zero | `Free`, `None`, `0%` | `0` | 1.0 |
//! | 2 | explicit ad valorem | `5 percent ad valorem` | `value * 0.05` | 1.0 |
//! | 3 | simple percent | `(5%)` | `value * 0.05` | 1.0 |
//! | 4 | compound | `5% + 25¢/kg` | `value * 0.05 + weight * 0.25` | 0.9 |
//! | 5 | specific | `$1.34/1000` | `quantity * 0.00134` | 0.9 |
//! | 6 | range | `5% - 10%` | `value * 0.05` (lower bound) | 0.7 |
//!
//! Text that matches no rule is not an error: it compiles to
//! [`CompileOutcome::NeedsFallback`] and goes to the generative compiler.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::formula::{CompiledFormula, RateSpecification, Variable, format_number};
use crate::normalize::normalize_rate_text;
use crate::units;

/// Exact-match confidence for free and ad valorem rules.
pub const EXACT_CONFIDENCE: f64 = 1.0;
/// Confidence for compound and specific rules.
pub const SPECIFIC_CONFIDENCE: f64 = 0.9;
/// Confidence for ranges, which are compiled to their lower bound.
pub const RANGE_CONFIDENCE: f64 = 0.7;

/// A decimal amount: `5`, `1.34`, `.5`, `1,000.25`.
const NUM: &str = r"(?:\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+)";

static FREE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:free|none|0%?)$").unwrap());

static AD_VALOREM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<rate>{NUM})\s*(?:%|percent)(?:\s+ad\s+valorem)?$"
    ))
    .unwrap()
});

static SIMPLE_PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^\(?\s*(?P<rate>{NUM})\s*%\s*\)?$")).unwrap());

static PERCENT_COMPONENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<rate>{NUM})\s*(?:%|percent)(?:\s+ad\s+valorem)?(?:\s+on\s+the\s+entire\s+(?:set|article|item))?$"
    ))
    .unwrap()
});

/// Nouns that mean `+` joins per-part rates of a composite article
/// (watch case + strap), not terms of one sum.
static AMBIGUOUS_CONTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:cases?|straps?|bands?|bracelets?|batter(?:y|ies)|movements?|jewels?|lead\s+content)\b",
    )
    .unwrap()
});

static EACH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<prefix>[$¢])?\s*(?P<amount>{NUM})\s*(?P<cents>¢|cents?|c)?\s*(?P<unit>each|units?|pieces?|pairs?|dozens?|gross|sets?|articles?|items?|head)$"
    ))
    .unwrap()
});

static PER_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<prefix>[$¢])?\s*(?P<amount>{NUM})\s*(?P<cents>¢|cents?|c)?\s*(?:/|\bper\b)\s*(?:(?P<count>{NUM})\s*)?(?P<unit>[a-z][a-z0-9²³.]*(?:\s[a-z][a-z0-9²³.]*)?)?(?:\s*(?:/|\bper\b)\s*(?P<denom>{NUM}))?$"
    ))
    .unwrap()
});

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<low>{NUM})\s*%?\s*(?:-|to)\s*(?P<high>{NUM})\s*%$"
    ))
    .unwrap()
});

/// One specific-duty term: `amount` per unit of `variable`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecificTerm {
    pub variable: Variable,
    /// Amount in dollars per unit, cents and denominators already applied.
    pub amount: f64,
}

impl SpecificTerm {
    fn formula(&self) -> String {
        format!("{} * {}", self.variable, format_number(self.amount))
    }
}

/// The grammar rule a rate text matched, with its parsed parameters.
///
/// Percent rates are stored as decimal fractions (`5%` → `0.05`).
#[derive(Debug, Clone, PartialEq)]
pub enum RateShape {
    Free,
    AdValorem { rate: f64 },
    Compound { rate: f64, terms: Vec<SpecificTerm> },
    Specific(SpecificTerm),
    Range { low: f64, high: f64 },
}

impl RateShape {
    pub fn formula(&self) -> String {
        match self {
            Self::Free => "0".to_string(),
            Self::AdValorem { rate } => format!("value * {}", format_number(*rate)),
            Self::Compound { rate, terms } => {
                let mut parts = vec![format!("value * {}", format_number(*rate))];
                parts.extend(terms.iter().map(SpecificTerm::formula));
                parts.join(" + ")
            }
            Self::Specific(term) => term.formula(),
            Self::Range { low, .. } => format!("value * {}", format_number(*low)),
        }
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        match self {
            Self::Free => BTreeSet::new(),
            Self::AdValorem { .. } | Self::Range { .. } => BTreeSet::from([Variable::Value]),
            Self::Compound { terms, .. } => std::iter::once(Variable::Value)
                .chain(terms.iter().map(|t| t.variable))
                .collect(),
            Self::Specific(term) => BTreeSet::from([term.variable]),
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Free | Self::AdValorem { .. } => EXACT_CONFIDENCE,
            Self::Compound { .. } | Self::Specific(_) => SPECIFIC_CONFIDENCE,
            Self::Range { .. } => RANGE_CONFIDENCE,
        }
    }

    /// The ad valorem rate when the shape depends on `value` alone.
    pub fn value_only_rate(&self) -> Option<f64> {
        match self {
            Self::AdValorem { rate } => Some(*rate),
            Self::Range { low, .. } => Some(*low),
            _ => None,
        }
    }

    pub fn into_compiled(self) -> CompiledFormula {
        CompiledFormula::pattern(self.formula(), self.variables(), self.confidence())
    }
}

/// Result of deterministic compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Compiled(CompiledFormula),
    /// No rule matched; carries the normalised text for the generative compiler.
    NeedsFallback { normalized: String },
}

/// Compile a rate specification deterministically.
pub fn compile_rate(spec: &RateSpecification) -> CompileOutcome {
    if spec.text.trim().is_empty() {
        return CompileOutcome::Compiled(CompiledFormula::zero());
    }
    let normalized = normalize_rate_text(&spec.text);
    match parse_rate_shape(&normalized, spec.unit_hint()) {
        Some(shape) => CompileOutcome::Compiled(shape.into_compiled()),
        None => {
            debug!(text = %normalized, "no rate rule matched");
            CompileOutcome::NeedsFallback { normalized }
        }
    }
}

/// Compile raw rate text, returning `None` when no rule matches.
pub fn compile_pattern(text: &str, unit_hint: Option<&str>) -> Option<CompiledFormula> {
    if text.trim().is_empty() {
        return Some(CompiledFormula::zero());
    }
    parse_rate_shape(&normalize_rate_text(text), unit_hint).map(RateShape::into_compiled)
}

/// Match already-normalised text against the grammar in priority order.
pub fn parse_rate_shape(text: &str, unit_hint: Option<&str>) -> Option<RateShape> {
    if FREE_RE.is_match(text) || text.starts_with("free") {
        return Some(RateShape::Free);
    }
    if let Some(rate) = percent_rate(&AD_VALOREM_RE, text) {
        return Some(RateShape::AdValorem { rate });
    }
    if let Some(rate) = percent_rate(&SIMPLE_PERCENT_RE, text) {
        return Some(RateShape::AdValorem { rate });
    }
    if let Some(shape) = parse_compound(text, unit_hint) {
        return Some(shape);
    }
    if let Some(term) = parse_specific(text, unit_hint) {
        return Some(RateShape::Specific(term));
    }
    parse_range(text)
}

fn percent_rate(re: &Regex, text: &str) -> Option<f64> {
    let caps = re.captures(text)?;
    Some(parse_number(&caps["rate"])? / 100.0)
}

/// `N% + specific [+ specific]`, with exactly one percent part.
fn parse_compound(text: &str, unit_hint: Option<&str>) -> Option<RateShape> {
    if !text.contains('+') || AMBIGUOUS_CONTEXT_RE.is_match(text) {
        return None;
    }
    let parts: Vec<&str> = text.split('+').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }

    let mut rate = None;
    let mut terms = Vec::with_capacity(parts.len() - 1);
    for part in parts {
        if let Some(r) = percent_rate(&PERCENT_COMPONENT_RE, part) {
            if rate.replace(r).is_some() {
                return None;
            }
        } else {
            terms.push(parse_specific(part, unit_hint)?);
        }
    }
    Some(RateShape::Compound { rate: rate?, terms })
}

/// Parse one specific-duty component (`25¢/kg`, `$1.50 each`, `$1.34/1000`).
pub fn parse_specific(text: &str, unit_hint: Option<&str>) -> Option<SpecificTerm> {
    if let Some(caps) = EACH_RE.captures(text) {
        let amount = dollar_amount(&caps)?;
        let variable = units::resolve_with_hint(&caps["unit"], unit_hint)?;
        return Some(SpecificTerm { variable, amount });
    }

    let caps = PER_UNIT_RE.captures(text)?;
    let mut amount = dollar_amount(&caps)?;
    let variable = match (caps.name("count"), caps.name("unit")) {
        (_, Some(unit)) => units::resolve_with_hint(unit.as_str(), unit_hint)?,
        (Some(_), None) => units::variable_for_numeric_unit(unit_hint),
        (None, None) => return None,
    };
    for divisor in [caps.name("count"), caps.name("denom")].into_iter().flatten() {
        let d = parse_number(divisor.as_str())?;
        if d <= 0.0 {
            return None;
        }
        amount /= d;
    }
    Some(SpecificTerm { variable, amount })
}

/// The captured amount in dollars. Any cents marker (leading `¢` or a
/// `¢`/`c`/`cents` suffix) divides by 100.
fn dollar_amount(caps: &Captures<'_>) -> Option<f64> {
    let amount = parse_number(&caps["amount"])?;
    let cents = caps.name("prefix").is_some_and(|m| m.as_str() == "¢") || caps.name("cents").is_some();
    Some(if cents { amount / 100.0 } else { amount })
}

fn parse_range(text: &str) -> Option<RateShape> {
    let caps = RANGE_RE.captures(text)?;
    let a = parse_number(&caps["low"])? / 100.0;
    let b = parse_number(&caps["high"])? / 100.0;
    Some(RateShape::Range {
        low: a.min(b),
        high: a.max(b),
    })
}

/// A finite decimal literal. Digit runs that overflow `f64` are rejected so
/// the text goes to the fallback instead of compiling to `inf`.
pub(crate) fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', "").parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use crate::formula::GenerationMethod;

    fn compiled(text: &str) -> CompiledFormula {
        compile_pattern(text, None).unwrap_or_else(|| panic!("{text:?} should compile"))
    }

    fn vars(names: &[Variable]) -> BTreeSet<Variable> {
        names.iter().copied().collect()
    }

    #[test]
    fn free_and_zero_rates() {
        for text in ["Free", "free", "0%", "None", "0", "Free (A, AU, BH)"] {
            let f = compiled(text);
            assert_eq!(f.formula, "0", "{text}");
            assert!(f.variables.is_empty());
            assert_eq!(f.confidence, 1.0);
            assert_eq!(f.method, GenerationMethod::Pattern);
        }
    }

    #[test]
    fn empty_text_is_zero_rate() {
        assert_eq!(compiled("   "), CompiledFormula::zero());
        assert_eq!(
            compile_rate(&RateSpecification::new("")),
            CompileOutcome::Compiled(CompiledFormula::zero())
        );
    }

    #[test]
    fn ad_valorem_forms() {
        for text in ["5%", "5 percent ad valorem", "5 per cent", "5% ad val.", "(5%)"] {
            let f = compiled(text);
            assert_eq!(f.formula, "value * 0.05", "{text}");
            assert_eq!(f.variables, vars(&[Variable::Value]));
            assert_eq!(f.confidence, 1.0);
        }
        assert_eq!(compiled("2.5%").formula, "value * 0.025");
        assert_eq!(compiled("100%").formula, "value * 1");
    }

    #[test]
    fn compound_percent_plus_cents_per_kg() {
        let f = compiled("5% + 25¢/kg");
        assert_eq!(f.formula, "value * 0.05 + weight * 0.25");
        assert_eq!(f.variables, vars(&[Variable::Value, Variable::Weight]));
        assert_eq!(f.confidence, 0.9);

        let duty = evaluate(&f.formula, 1000.0, 50.0, 0.0).unwrap();
        assert!((duty - 62.5).abs() < 1e-9);
    }

    #[test]
    fn compound_order_puts_percent_first() {
        let f = compiled("25¢/kg + 5%");
        assert_eq!(f.formula, "value * 0.05 + weight * 0.25");
    }

    #[test]
    fn compound_three_parts() {
        let f = compiled("3.9% + 1.5¢/kg + $1 each");
        assert_eq!(f.formula, "value * 0.039 + weight * 0.015 + quantity * 1");
        assert_eq!(
            f.variables,
            vars(&[Variable::Value, Variable::Weight, Variable::Quantity])
        );
    }

    #[test]
    fn compound_on_the_entire_article() {
        let f = compiled("$1.22 each + 4.8% on the entire article");
        assert_eq!(f.formula, "value * 0.048 + quantity * 1.22");
    }

    #[test]
    fn compound_rejects_two_percent_parts() {
        assert!(compile_pattern("5% + 10%", None).is_none());
    }

    #[test]
    fn compound_rejects_unresolvable_term() {
        assert!(compile_pattern("5% + 25¢/bottle", None).is_none());
    }

    #[test]
    fn ambiguous_nouns_disable_compound() {
        assert!(compile_pattern("5% on the case plus 10% on the strap", None).is_none());
        assert!(compile_pattern("5% on the case + 10% on the strap", None).is_none());
        assert!(compile_pattern("40¢ each + 5% on the battery", None).is_none());
    }

    #[test]
    fn specific_per_unit() {
        let f = compiled("25¢/kg");
        assert_eq!(f.formula, "weight * 0.25");
        assert_eq!(f.confidence, 0.9);

        assert_eq!(compiled("$2.50/kg").formula, "weight * 2.5");
        assert_eq!(compiled("3.5 cents per kg").formula, "weight * 0.035");
        assert_eq!(compiled("¢44/liter").formula, "quantity * 0.44");
        assert_eq!(compiled("$1.10/doz.").formula, "quantity * 1.1");
        assert_eq!(compiled("17.6¢/pf. liter").formula, "quantity * 0.176");
    }

    #[test]
    fn specific_each_style() {
        assert_eq!(compiled("$1.50 each").formula, "quantity * 1.5");
        assert_eq!(compiled("25¢ each").formula, "quantity * 0.25");
        assert_eq!(compiled("8¢ per pair").formula, "quantity * 0.08");
    }

    #[test]
    fn numeric_denominator_uses_unit_hint() {
        let f = compile_pattern("$1.34/1000", Some("No.")).unwrap();
        assert_eq!(f.formula, "quantity * 0.00134");
        assert_eq!(f.variables, vars(&[Variable::Quantity]));

        let f = compile_pattern("$1.34/1000", Some("kg")).unwrap();
        assert_eq!(f.formula, "weight * 0.00134");

        let f = compile_pattern("$1.34/1000", None).unwrap();
        assert_eq!(f.formula, "quantity * 0.00134");
    }

    #[test]
    fn overflowing_literals_are_not_compiled() {
        let huge = format!("1{}%", "0".repeat(400));
        assert!(compile_pattern(&huge, None).is_none());
        let huge_specific = format!("${}/kg", "9".repeat(400));
        assert!(compile_pattern(&huge_specific, None).is_none());
    }

    #[test]
    fn tiny_rates_keep_their_magnitude() {
        let f = compiled("0.0000000001%");
        assert_ne!(f.formula, "value * 0");
        let duty = evaluate(&f.formula, 1e12, 0.0, 0.0).unwrap();
        assert!((duty - 1.0).abs() < 1e-6);
    }

    #[test]
    fn trailing_denominator_divides_amount() {
        assert_eq!(compiled("$5/kg/100").formula, "weight * 0.05");
    }

    #[test]
    fn unknown_unit_falls_back_to_hint() {
        let f = compile_pattern("5¢/bottle", Some("No.")).unwrap();
        assert_eq!(f.formula, "quantity * 0.05");
        assert!(compile_pattern("5¢/bottle", None).is_none());
        assert!(compile_pattern("5¢/bottle", Some("X")).is_none());
    }

    #[test]
    fn range_uses_lower_bound() {
        for text in ["5% - 10%", "5% to 10%", "10% - 5%", "5 - 10%"] {
            let f = compiled(text);
            assert_eq!(f.formula, "value * 0.05", "{text}");
            assert_eq!(f.confidence, 0.7);
        }
    }

    #[test]
    fn unmatched_text_needs_fallback() {
        let spec = RateSpecification::new("4.4¢/kg on drained weight");
        assert_eq!(
            compile_rate(&spec),
            CompileOutcome::NeedsFallback {
                normalized: "4.4¢/kg on drained weight".into()
            }
        );
    }

    #[test]
    fn value_only_rate_for_ad_valorem_shapes() {
        assert_eq!(
            parse_rate_shape("25%", None).unwrap().value_only_rate(),
            Some(0.25)
        );
        assert_eq!(
            parse_rate_shape("25¢/kg", None).unwrap().value_only_rate(),
            None
        );
        assert_eq!(parse_rate_shape("free", None).unwrap().value_only_rate(), None);
    }

    #[test]
    fn amounts_with_thousands_separators() {
        assert_eq!(
            compile_pattern("$1.34/1,000", Some("No.")).unwrap().formula,
            "quantity * 0.00134"
        );
    }
}
