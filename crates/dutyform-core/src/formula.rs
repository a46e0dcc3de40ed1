//! Compiled formula types shared by the deterministic and generative compilers.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three canonical variables a duty formula may reference.
///
/// Ordering is `value < weight < quantity`, which is also the order variables
/// are listed in serialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    /// Declared customs value.
    Value,
    /// Net weight.
    Weight,
    /// Count of units (pieces, pairs, dozens, litres, metres...).
    Quantity,
}

impl Variable {
    pub const ALL: [Variable; 3] = [Variable::Value, Variable::Weight, Variable::Quantity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Weight => "weight",
            Self::Quantity => "quantity",
        }
    }

    /// Parse an exact variable name. Case-sensitive: formulas are lower-case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "value" => Some(Self::Value),
            "weight" => Some(Self::Weight),
            "quantity" => Some(Self::Quantity),
            _ => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a formula was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    /// Matched a deterministic grammar rule.
    Pattern,
    /// Inferred by the generative provider.
    Ai,
}

impl GenerationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Ai => "ai",
        }
    }
}

/// Input to compilation: raw rate text plus the entry's unit-of-quantity hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSpecification {
    pub text: String,
    pub unit_of_quantity_hint: Option<String>,
}

impl RateSpecification {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            unit_of_quantity_hint: None,
        }
    }

    pub fn with_unit_hint(mut self, hint: impl Into<String>) -> Self {
        self.unit_of_quantity_hint = Some(hint.into());
        self
    }

    pub fn unit_hint(&self) -> Option<&str> {
        self.unit_of_quantity_hint.as_deref()
    }
}

/// A canonical arithmetic formula over `value`, `weight` and `quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledFormula {
    pub formula: String,
    pub variables: BTreeSet<Variable>,
    /// Heuristic certainty in `[0, 1]`.
    pub confidence: f64,
    pub method: GenerationMethod,
}

impl CompiledFormula {
    /// The zero-rate formula (`"Free"`, empty text).
    pub fn zero() -> Self {
        Self {
            formula: "0".to_string(),
            variables: BTreeSet::new(),
            confidence: 1.0,
            method: GenerationMethod::Pattern,
        }
    }

    pub fn pattern(
        formula: String,
        variables: impl IntoIterator<Item = Variable>,
        confidence: f64,
    ) -> Self {
        Self {
            formula,
            variables: variables.into_iter().collect(),
            confidence,
            method: GenerationMethod::Pattern,
        }
    }

    /// Variable names in canonical order.
    pub fn variable_names(&self) -> Vec<&'static str> {
        self.variables.iter().map(Variable::as_str).collect()
    }
}

/// Render a formula literal as a short decimal string.
///
/// At most ten fractional digits, trailing zeros removed, so binary
/// floating-point noise (`0.0013400000000000001`) never reaches a formula.
/// A non-zero value too small for ten digits falls back to its shortest
/// plain decimal form rather than collapsing to `0`.
///
/// Callers must pass a finite value.
pub fn format_number(x: f64) -> String {
    debug_assert!(x.is_finite(), "non-finite formula literal {x}");
    let s = format!("{x:.10}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "0" || s == "-0" {
        if x == 0.0 {
            "0".to_string()
        } else {
            x.to_string()
        }
    } else {
        s.to_string()
    }
}
