//! Unit-of-quantity resolution.
//!
//! Maps a unit token from rate text (`kg`, `doz.`, `pf. liter`) or an entry's
//! declared unit-of-quantity hint (`No.`, `kg`, `X`) onto one of the canonical
//! [`Variable`]s. Mass units become `weight`; every other physical unit
//! (count, volume, length, area, energy) collapses to `quantity`.

use crate::formula::Variable;

const WEIGHT_UNITS: &[&str] = &[
    "kg",
    "kilo",
    "kilogram",
    "g",
    "gm",
    "gram",
    "mg",
    "lb",
    "pound",
    "oz",
    "ounce",
    "ton",
    "tonne",
    "t",
    "mt",
    "metric ton",
    "cwt",
    "kg cmc",
    "clean kg",
    "kg tot sug",
    "gross kg",
];

const QUANTITY_UNITS: &[&str] = &[
    // Count
    "each",
    "ea",
    "unit",
    "piece",
    "pc",
    "pcs",
    "no",
    "number",
    "item",
    "article",
    "pair",
    "pr",
    "prs",
    "dozen",
    "doz",
    "dz",
    "dozen pair",
    "doz pr",
    "gross",
    "set",
    "head",
    "thousand",
    // Volume
    "liter",
    "litre",
    "l",
    "ml",
    "proof liter",
    "pf liter",
    "pfl",
    "gal",
    "gallon",
    "proof gallon",
    "m3",
    "cubic meter",
    "bbl",
    "barrel",
    // Length
    "m",
    "meter",
    "metre",
    "cm",
    "mm",
    "km",
    "ft",
    "foot",
    "linear meter",
    // Area
    "m2",
    "sq m",
    "square meter",
    "sq ft",
    "square foot",
    // Other
    "carat",
    "kwh",
    "mwh",
    "gbq",
    "component",
];

/// Canonicalise a unit token: lower-case, no periods, single spaces.
fn canonical(token: &str) -> String {
    token
        .to_lowercase()
        .replace(['.', ','], " ")
        .replace('²', "2")
        .replace('³', "3")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn lookup(unit: &str) -> Option<Variable> {
    if WEIGHT_UNITS.contains(&unit) {
        Some(Variable::Weight)
    } else if QUANTITY_UNITS.contains(&unit) {
        Some(Variable::Quantity)
    } else {
        None
    }
}

/// Resolve a unit token to its canonical variable, or `None` if unrecognised.
///
/// Plural forms (`kgs`, `pieces`, `dozens`, `feet`) resolve like the singular.
pub fn resolve_unit(token: &str) -> Option<Variable> {
    let unit = canonical(token);
    if unit.is_empty() {
        return None;
    }
    if let Some(v) = lookup(&unit) {
        return Some(v);
    }
    if unit == "feet" {
        return Some(Variable::Quantity);
    }
    let singular = unit
        .strip_suffix("es")
        .filter(|s| lookup(s).is_some())
        .or_else(|| unit.strip_suffix('s'))?;
    lookup(singular)
}

/// Resolve an entry's unit-of-quantity hint.
///
/// `X` (no unit) and empty hints resolve to `None`.
pub fn resolve_hint(hint: Option<&str>) -> Option<Variable> {
    let hint = hint?.trim();
    if hint.is_empty() || hint.eq_ignore_ascii_case("x") {
        return None;
    }
    resolve_unit(hint)
}

/// Resolve a word unit token, falling back to the entry's hint.
///
/// `None` means the specific-component match must be abandoned.
pub fn resolve_with_hint(token: &str, hint: Option<&str>) -> Option<Variable> {
    resolve_unit(token).or_else(|| resolve_hint(hint))
}

/// Variable for a numeric unit token such as the `1000` in `$1.34/1000`.
///
/// The token carries no unit, so the hint decides, defaulting to `quantity`.
pub fn variable_for_numeric_unit(hint: Option<&str>) -> Variable {
    resolve_hint(hint).unwrap_or(Variable::Quantity)
}
