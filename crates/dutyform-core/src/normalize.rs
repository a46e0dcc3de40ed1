//! Rate text normalisation.
//!
//! Canonicalises raw schedule rate text so the grammar in
//! [`compiler`](crate::compiler) only has to recognise one spelling of each
//! construct.
//!
//! # Schedule spelling variants
//!
//! - Case: `"Free"`, `"FREE"`, `"free"`
//! - Ad valorem: `"5% ad val."`, `"5% ad valorem"`
//! - Percent: `"5 per cent"`, `"5 percent"`, `"5%"`
//! - Kilograms: `"25¢/kgs"`, `"25¢/kg."`, `"25¢/kg"`
//! - Number: `"$1/no."`, `"$1/number"`

use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static AD_VALOREM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bad\s*val(?:orem|\.)?(?:\s|$)").unwrap());

static PER_CENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bper\s+cent\b").unwrap());

static KGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bkgs?\b\.?").unwrap());

static NUMBER_ABBREV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bno\.").unwrap());

/// Normalise raw rate text.
///
/// 1. Lower-case
/// 2. Unify dash variants to `-`
/// 3. Collapse runs of whitespace to one space and trim
/// 4. Rewrite abbreviations: `ad val.` → `ad valorem`, `per cent` → `percent`,
///    `kgs`/`kg.` → `kg`, `no.` → `number`
/// 5. Strip trailing `.`, `;` and `,`
pub fn normalize_rate_text(raw: &str) -> String {
    let lower = raw
        .to_lowercase()
        .replace(['\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}'], "-");
    let collapsed = WHITESPACE_RE.replace_all(lower.trim(), " ");

    let s = AD_VALOREM_RE.replace_all(&collapsed, "ad valorem ");
    let s = PER_CENT_RE.replace_all(&s, "percent");
    let s = KGS_RE.replace_all(&s, "kg");
    let s = NUMBER_ABBREV_RE.replace_all(&s, "number");

    s.trim()
        .trim_end_matches(['.', ';', ','])
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalize_rate_text("  FREE  "), "free");
        assert_eq!(normalize_rate_text("5%\t +\n 25¢/kg"), "5% + 25¢/kg");
    }

    #[test]
    fn ad_valorem_abbreviation() {
        assert_eq!(normalize_rate_text("5% ad val."), "5% ad valorem");
        assert_eq!(normalize_rate_text("5% Ad Valorem"), "5% ad valorem");
        assert_eq!(normalize_rate_text("5% ad val. + 3¢/kg"), "5% ad valorem + 3¢/kg");
    }

    #[test]
    fn per_cent_becomes_percent() {
        assert_eq!(normalize_rate_text("5 per cent"), "5 percent");
        assert_eq!(normalize_rate_text("5 Per  Cent ad valorem"), "5 percent ad valorem");
    }

    #[test]
    fn kilogram_spellings_unified() {
        assert_eq!(normalize_rate_text("25¢/kgs"), "25¢/kg");
        assert_eq!(normalize_rate_text("25¢/kg. + 5%"), "25¢/kg + 5%");
        assert_eq!(normalize_rate_text("25¢/KG"), "25¢/kg");
    }

    #[test]
    fn number_abbreviation() {
        assert_eq!(normalize_rate_text("$1.34/No."), "$1.34/number");
    }

    #[test]
    fn trailing_punctuation_stripped() {
        assert_eq!(normalize_rate_text("5%."), "5%");
        assert_eq!(normalize_rate_text("Free;"), "free");
    }

    #[test]
    fn dash_variants_unified() {
        assert_eq!(normalize_rate_text("5% \u{2013} 10%"), "5% - 10%");
    }
}
