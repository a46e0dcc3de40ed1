//! Formula safety gate.
//!
//! Every formula is checked here before it is persisted or trusted
//! downstream, whether it came from the deterministic compiler, the
//! generative provider, or a manual override. Failures are values, not errors.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::formula::Variable;

/// Identifiers that must never appear in a formula.
pub const FORBIDDEN_TOKENS: &[&str] = &[
    "function",
    "return",
    "eval",
    "new",
    "this",
    "constructor",
    "prototype",
    "__proto__",
    "import",
    "require",
    "process",
    "global",
    "globalthis",
    "window",
    "document",
    "while",
    "for",
    "if",
    "else",
    "class",
    "async",
    "await",
    "yield",
    "delete",
    "typeof",
    "instanceof",
    "var",
    "let",
    "const",
    "throw",
    "try",
    "catch",
    "exec",
    "system",
    "inf",
    "infinity",
    "nan",
];

static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:value|weight|quantity)\b").unwrap());

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z_]+").unwrap());

/// Outcome of [`validate_formula`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaValidation {
    pub valid: bool,
    pub error: Option<String>,
    /// Referenced variables; empty when invalid.
    pub variables: Vec<Variable>,
}

impl FormulaValidation {
    fn reject(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            variables: Vec::new(),
        }
    }
}

/// Variables referenced by a formula, matched on word boundaries.
pub fn extract_variables(formula: &str) -> BTreeSet<Variable> {
    VARIABLE_RE
        .find_iter(formula)
        .filter_map(|m| Variable::from_name(m.as_str()))
        .collect()
}

/// Validate a formula's characters and tokens, extracting its variables.
///
/// Allowed characters are `[0-9\s+\-*/().a-z_]`. Forbidden identifiers
/// (see [`FORBIDDEN_TOKENS`]) and unbalanced parentheses are rejected.
pub fn validate_formula(formula: &str) -> FormulaValidation {
    if formula.trim().is_empty() {
        return FormulaValidation::reject("formula is empty");
    }

    if let Some(c) = formula.chars().find(|c| !is_allowed_char(*c)) {
        return FormulaValidation::reject(format!("disallowed character {c:?}"));
    }

    if let Some(token) = IDENT_RE
        .find_iter(formula)
        .map(|m| m.as_str())
        .find(|t| FORBIDDEN_TOKENS.contains(t))
    {
        return FormulaValidation::reject(format!("forbidden token {token:?}"));
    }

    let mut depth = 0i32;
    for c in formula.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return FormulaValidation::reject("unbalanced parentheses");
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return FormulaValidation::reject("unbalanced parentheses");
    }

    FormulaValidation {
        valid: true,
        error: None,
        variables: extract_variables(formula).into_iter().collect(),
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_digit()
        || c.is_ascii_lowercase()
        || c.is_whitespace()
        || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.' | '_')
}
