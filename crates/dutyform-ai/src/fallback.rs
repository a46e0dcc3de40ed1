//! Generative fallback compilation.
//!
//! Rate text the deterministic grammar cannot resolve is sent to a
//! [`CompletionProvider`] under a strict schema. Any deviation from the schema
//! is a hard failure for a single request. In batch mode, invalid rows are
//! dropped and [`FallbackCompiler::compile_all`] re-resolves every missing
//! index one item at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use dutyform_core::{CompiledFormula, GenerationMethod, Variable, validate_formula};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::FormulaGenerationError;
use crate::prompt::{
    BATCH_TOOL, SINGLE_TOOL, SYSTEM_PROMPT, batch_prompt, batch_schema, single_prompt,
    single_schema,
};
use crate::provider::{CompletionProvider, CompletionRequest};

/// Largest batch a single provider call may carry.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Subtracted from provider-reported confidence.
pub const CONFIDENCE_DISCOUNT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Deadline for each provider call.
    pub timeout: Duration,
    /// Items per batch call, at most [`MAX_BATCH_ITEMS`].
    pub batch_size: usize,
    /// Provider calls in flight at once.
    pub concurrency: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            batch_size: MAX_BATCH_ITEMS,
            concurrency: 4,
        }
    }
}

/// One rate text in a batch request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub rate_text: String,
    pub unit_hint: Option<String>,
}

pub struct FallbackCompiler<P> {
    provider: P,
    config: FallbackConfig,
}

impl<P: CompletionProvider> FallbackCompiler<P> {
    pub fn new(provider: P, config: FallbackConfig) -> Self {
        let config = FallbackConfig {
            batch_size: config.batch_size.clamp(1, MAX_BATCH_ITEMS),
            concurrency: config.concurrency.max(1),
            ..config
        };
        Self { provider, config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    async fn request(&self, request: CompletionRequest) -> Result<String, FormulaGenerationError> {
        match tokio::time::timeout(self.config.timeout, self.provider.complete(request)).await {
            Ok(Ok(raw)) if raw.trim().is_empty() => Err(FormulaGenerationError::EmptyResponse),
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FormulaGenerationError::Timeout(self.config.timeout)),
        }
    }

    /// Compile one normalised rate text.
    pub async fn compile_one(
        &self,
        rate_text: &str,
        unit_hint: Option<&str>,
    ) -> Result<CompiledFormula, FormulaGenerationError> {
        let raw = self
            .request(CompletionRequest {
                tool_name: SINGLE_TOOL.to_string(),
                system: SYSTEM_PROMPT.to_string(),
                prompt: single_prompt(rate_text, unit_hint),
                schema: single_schema(),
            })
            .await?;
        let compiled = parse_formula_response(&raw)?;
        debug!(text = rate_text, formula = %compiled.formula, "generated formula");
        Ok(compiled)
    }

    /// Compile up to [`MAX_BATCH_ITEMS`] texts in one call.
    ///
    /// The map only holds indices whose rows passed validation.
    pub async fn compile_batch(
        &self,
        items: &[BatchItem],
    ) -> Result<BTreeMap<usize, CompiledFormula>, FormulaGenerationError> {
        if items.len() > MAX_BATCH_ITEMS {
            return Err(FormulaGenerationError::BatchTooLarge {
                size: items.len(),
                limit: MAX_BATCH_ITEMS,
            });
        }
        if items.is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw = self
            .request(CompletionRequest {
                tool_name: BATCH_TOOL.to_string(),
                system: SYSTEM_PROMPT.to_string(),
                prompt: batch_prompt(items),
                schema: batch_schema(),
            })
            .await?;
        let expected: BTreeSet<usize> = items.iter().map(|i| i.index).collect();
        let compiled = parse_batch_response(&raw, &expected)?;
        if compiled.len() < items.len() {
            warn!(
                requested = items.len(),
                returned = compiled.len(),
                "batch response is missing items"
            );
        }
        Ok(compiled)
    }

    /// Compile any number of texts: batched with bounded concurrency, then
    /// single-item retries for every index the batches did not return.
    pub async fn compile_all(
        &self,
        items: &[BatchItem],
    ) -> BTreeMap<usize, Result<CompiledFormula, FormulaGenerationError>> {
        let mut results = BTreeMap::new();
        if items.is_empty() {
            return results;
        }

        let batches: Vec<_> = stream::iter(items.chunks(self.config.batch_size))
            .map(|chunk| self.compile_batch(chunk))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        for batch in batches {
            match batch {
                Ok(compiled) => results.extend(compiled.into_iter().map(|(i, f)| (i, Ok(f)))),
                Err(e) => warn!(error = %e, "batch request failed"),
            }
        }

        let missing: Vec<&BatchItem> = items
            .iter()
            .filter(|item| !results.contains_key(&item.index))
            .collect();
        if !missing.is_empty() {
            info!(count = missing.len(), "re-resolving missing items individually");
        }
        let retried: Vec<_> = stream::iter(missing)
            .map(|item| async move {
                let result = self
                    .compile_one(&item.rate_text, item.unit_hint.as_deref())
                    .await;
                (item.index, result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        for (index, result) in retried {
            if let Err(e) = &result {
                warn!(index, error = %e, "single-item fallback failed");
            }
            results.insert(index, result);
        }
        results
    }
}

/// Parse and validate a single-item answer.
pub fn parse_formula_response(raw: &str) -> Result<CompiledFormula, FormulaGenerationError> {
    let value = parse_json(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| schema_error("expected an object"))?;
    parse_formula_object(object)
}

/// Parse a batch answer, keeping valid rows for expected indices.
pub fn parse_batch_response(
    raw: &str,
    expected: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, CompiledFormula>, FormulaGenerationError> {
    let Value::Array(rows) = parse_json(raw)? else {
        return Err(schema_error("expected an array"));
    };
    let mut compiled = BTreeMap::new();
    for row in &rows {
        match parse_batch_row(row) {
            Ok((index, formula)) if expected.contains(&index) && !compiled.contains_key(&index) => {
                compiled.insert(index, formula);
            }
            Ok((index, _)) => warn!(index, "dropping unexpected or duplicate batch row"),
            Err(e) => warn!(error = %e, "dropping invalid batch row"),
        }
    }
    Ok(compiled)
}

fn parse_json(raw: &str) -> Result<Value, FormulaGenerationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FormulaGenerationError::EmptyResponse);
    }
    serde_json::from_str(raw).map_err(|e| FormulaGenerationError::Malformed(e.to_string()))
}

fn schema_error(detail: impl Into<String>) -> FormulaGenerationError {
    FormulaGenerationError::Schema(detail.into())
}

fn parse_batch_row(row: &Value) -> Result<(usize, CompiledFormula), FormulaGenerationError> {
    let object = row
        .as_object()
        .ok_or_else(|| schema_error("batch row is not an object"))?;
    let index = object
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| schema_error("missing or non-integer index"))?;
    let index = usize::try_from(index).map_err(|_| schema_error("index out of range"))?;
    Ok((index, parse_formula_object(object)?))
}

fn parse_formula_object(
    object: &Map<String, Value>,
) -> Result<CompiledFormula, FormulaGenerationError> {
    let formula = match object.get("formula") {
        Some(Value::String(s)) => s.trim(),
        Some(_) => return Err(schema_error("formula must be a string")),
        None => return Err(schema_error("missing formula")),
    };

    let declared = match object.get("variables") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                let name = v
                    .as_str()
                    .ok_or_else(|| schema_error("variables must be strings"))?;
                Variable::from_name(name)
                    .ok_or_else(|| schema_error(format!("unknown variable {name:?}")))
            })
            .collect::<Result<BTreeSet<_>, _>>()?,
        Some(_) => return Err(schema_error("variables must be an array")),
        None => return Err(schema_error("missing variables")),
    };

    let confidence = match object.get("confidence") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| schema_error("confidence is not a finite number"))?,
        Some(_) => return Err(schema_error("confidence must be a number")),
        None => return Err(schema_error("missing confidence")),
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(schema_error(format!("confidence {confidence} outside [0, 1]")));
    }

    match object.get("explanation") {
        None | Some(Value::String(_)) => {}
        Some(_) => return Err(schema_error("explanation must be a string")),
    }

    let check = validate_formula(formula);
    if !check.valid {
        return Err(FormulaGenerationError::UnsafeFormula {
            formula: formula.to_string(),
            reason: check.error.unwrap_or_default(),
        });
    }
    if let Some(word) = formula
        .split(|c: char| !(c.is_ascii_alphabetic() || c == '_'))
        .find(|w| !w.is_empty() && Variable::from_name(w).is_none())
    {
        return Err(FormulaGenerationError::UnsafeFormula {
            formula: formula.to_string(),
            reason: format!("unknown identifier {word:?}"),
        });
    }

    let variables: BTreeSet<Variable> = check.variables.into_iter().collect();
    if variables != declared {
        let names = |set: &BTreeSet<Variable>| set.iter().map(Variable::as_str).collect::<Vec<_>>();
        return Err(schema_error(format!(
            "declared variables {:?} do not match formula variables {:?}",
            names(&declared),
            names(&variables)
        )));
    }
    Ok(CompiledFormula {
        formula: formula.to_string(),
        variables,
        confidence: (confidence - CONFIDENCE_DISCOUNT).clamp(0.0, 1.0),
        method: GenerationMethod::Ai,
    })
}
