//! Rate compilation dispatch: grammar first, generative fallback second.

use std::collections::HashMap;

use chrono::Utc;
use dutyform_core::{
    CompileOutcome, CompiledFormula, FormulaUpdate, GenerationMethod, RateColumn,
    RateSpecification, ScheduleEntry, compile_rate, validate_formula,
};
use tracing::{info, warn};

use crate::error::FormulaGenerationError;
use crate::fallback::{BatchItem, FallbackCompiler};
use crate::provider::CompletionProvider;

/// Compiles rate text, using the generative fallback when one is configured.
pub struct RateCompiler<P> {
    fallback: Option<FallbackCompiler<P>>,
}

/// A rate column that could not be compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub code: String,
    pub column: RateColumn,
    pub rate_text: String,
    pub error: String,
}

/// Result of a bulk compile pass.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub updates: Vec<FormulaUpdate>,
    pub failures: Vec<CompileFailure>,
    /// Columns with no rate text.
    pub skipped: usize,
}

impl CompileReport {
    pub fn count(&self, method: GenerationMethod) -> usize {
        self.updates
            .iter()
            .filter(|u| u.formula.method == method)
            .count()
    }
}

struct Pending {
    code: String,
    column: RateColumn,
    rate_text: String,
    item: usize,
}

impl<P: CompletionProvider> RateCompiler<P> {
    pub fn deterministic_only() -> Self {
        Self { fallback: None }
    }

    pub fn with_fallback(fallback: FallbackCompiler<P>) -> Self {
        Self {
            fallback: Some(fallback),
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Compile one rate specification.
    pub async fn compile(
        &self,
        spec: &RateSpecification,
    ) -> Result<CompiledFormula, FormulaGenerationError> {
        match compile_rate(spec) {
            CompileOutcome::Compiled(formula) => validated(formula),
            CompileOutcome::NeedsFallback { normalized } => match &self.fallback {
                Some(fallback) => fallback.compile_one(&normalized, spec.unit_hint()).await,
                None => Err(FormulaGenerationError::NoProvider),
            },
        }
    }

    /// Compile both rate columns of every entry.
    ///
    /// Identical unresolved texts share one fallback item. Failures are
    /// reported per column and never abort the pass.
    pub async fn compile_entries(&self, entries: &[ScheduleEntry]) -> CompileReport {
        let generated_at = Some(Utc::now());
        let mut report = CompileReport::default();
        let mut items: Vec<BatchItem> = Vec::new();
        let mut item_by_key: HashMap<(String, Option<String>), usize> = HashMap::new();
        let mut pending: Vec<Pending> = Vec::new();

        for entry in entries {
            for column in RateColumn::ALL {
                let Some(text) = entry.rate_text(column) else {
                    report.skipped += 1;
                    continue;
                };
                let mut spec = RateSpecification::new(text);
                if let Some(unit) = &entry.unit_of_quantity {
                    spec = spec.with_unit_hint(unit.clone());
                }
                match compile_rate(&spec) {
                    CompileOutcome::Compiled(formula) => match validated(formula) {
                        Ok(formula) => report.updates.push(FormulaUpdate {
                            code: entry.code.clone(),
                            column,
                            formula,
                            generated_at,
                        }),
                        Err(e) => {
                            warn!(code = %entry.code, column = column.as_str(), error = %e, "compiled formula rejected");
                            report.failures.push(CompileFailure {
                                code: entry.code.clone(),
                                column,
                                rate_text: text.to_string(),
                                error: e.to_string(),
                            });
                        }
                    },
                    CompileOutcome::NeedsFallback { normalized } => {
                        let hint = spec.unit_hint().map(str::to_string);
                        let item = *item_by_key
                            .entry((normalized.clone(), hint.clone()))
                            .or_insert_with(|| {
                                items.push(BatchItem {
                                    index: items.len(),
                                    rate_text: normalized,
                                    unit_hint: hint,
                                });
                                items.len() - 1
                            });
                        pending.push(Pending {
                            code: entry.code.clone(),
                            column,
                            rate_text: text.to_string(),
                            item,
                        });
                    }
                }
            }
        }

        let pattern = report.updates.len();
        info!(
            compiled = pattern,
            unresolved = pending.len(),
            distinct = items.len(),
            "deterministic pass complete"
        );

        if pending.is_empty() {
            return report;
        }

        let Some(fallback) = &self.fallback else {
            for p in pending {
                report.failures.push(CompileFailure {
                    code: p.code,
                    column: p.column,
                    rate_text: p.rate_text,
                    error: FormulaGenerationError::NoProvider.to_string(),
                });
            }
            return report;
        };

        let results = fallback.compile_all(&items).await;
        for p in pending {
            let result = results.get(&p.item).map(|r| match r {
                Ok(formula) => validated(formula.clone()).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            });
            match result {
                Some(Ok(formula)) => report.updates.push(FormulaUpdate {
                    code: p.code,
                    column: p.column,
                    formula,
                    generated_at,
                }),
                Some(Err(error)) => {
                    warn!(code = %p.code, column = p.column.as_str(), %error, "rate not compiled");
                    report.failures.push(CompileFailure {
                        code: p.code,
                        column: p.column,
                        rate_text: p.rate_text,
                        error,
                    });
                }
                None => report.failures.push(CompileFailure {
                    code: p.code,
                    column: p.column,
                    rate_text: p.rate_text,
                    error: FormulaGenerationError::EmptyResponse.to_string(),
                }),
            }
        }
        info!(
            generated = report.updates.len() - pattern,
            failed = report.failures.len(),
            "fallback pass complete"
        );
        report
    }
}

/// Run the safety gate on a formula about to leave the compiler.
fn validated(formula: CompiledFormula) -> Result<CompiledFormula, FormulaGenerationError> {
    let check = validate_formula(&formula.formula);
    if check.valid {
        Ok(formula)
    } else {
        Err(FormulaGenerationError::UnsafeFormula {
            formula: formula.formula,
            reason: check.error.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dutyform_core::Variable;
    use serde_json::{Value, json};

    use super::*;
    use crate::error::ProviderError;
    use crate::fallback::FallbackConfig;
    use crate::prompt::BATCH_TOOL;
    use crate::provider::CompletionRequest;
    use crate::testing::{ScriptedProvider, batch_items};

    type Responder = fn(&CompletionRequest) -> Result<String, ProviderError>;

    fn entry(code: &str, general: &str, unit: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            code: code.into(),
            chapter: code[..2].into(),
            general_rate_text: Some(general.into()),
            unit_of_quantity: unit.map(Into::into),
            ..Default::default()
        }
    }

    fn never_called(_: &CompletionRequest) -> Result<String, ProviderError> {
        panic!("provider called")
    }

    fn answer_every_item(req: &CompletionRequest) -> Result<String, ProviderError> {
        assert_eq!(req.tool_name, BATCH_TOOL);
        let rows: Vec<Value> = batch_items(req)
            .iter()
            .map(|i| {
                json!({"index": i["index"], "formula": "value * 0.035",
                       "variables": ["value"], "confidence": 0.8})
            })
            .collect();
        Ok(Value::Array(rows).to_string())
    }

    #[tokio::test]
    async fn compiled_rates_never_reach_the_provider() {
        let provider = Arc::new(ScriptedProvider::new(never_called as Responder));
        let compiler = RateCompiler::with_fallback(FallbackCompiler::new(
            provider.clone(),
            FallbackConfig::default(),
        ));
        let f = compiler
            .compile(&RateSpecification::new("5% + 25¢/kg"))
            .await
            .unwrap();
        assert_eq!(f.formula, "value * 0.05 + weight * 0.25");
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolved_text_without_provider_fails() {
        let compiler = RateCompiler::<ScriptedProvider<Responder>>::deterministic_only();
        let err = compiler
            .compile(&RateSpecification::new("5% on the case plus 10% on the strap"))
            .await
            .unwrap_err();
        assert!(matches!(err, FormulaGenerationError::NoProvider));
    }

    #[tokio::test]
    async fn bulk_pass_mixes_pattern_and_generated_formulas() {
        let provider = Arc::new(ScriptedProvider::new(answer_every_item as Responder));
        let compiler = RateCompiler::with_fallback(FallbackCompiler::new(
            provider.clone(),
            FallbackConfig::default(),
        ));
        let mut other = entry("0101.21.00", "Free", None);
        other.other_rate_text = Some("20%".into());
        let entries = vec![
            other,
            entry("9102.11.10", "51¢ each + 6.25% on the case + 5.3% on the strap", Some("No.")),
            entry("9102.11.25", "51¢ each + 6.25% on the case + 5.3% on the strap", Some("No.")),
        ];

        let report = compiler.compile_entries(&entries).await;
        assert_eq!(report.updates.len(), 4);
        assert_eq!(report.count(GenerationMethod::Pattern), 2);
        assert_eq!(report.count(GenerationMethod::Ai), 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped, 2);

        // Identical text and unit are sent once.
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(batch_items(&calls[0]).len(), 1);
    }

    #[test]
    fn compiled_formulas_pass_the_safety_gate() {
        let ok = CompiledFormula::pattern("value * 0.05".into(), [Variable::Value], 1.0);
        assert_eq!(validated(ok.clone()).unwrap(), ok);

        let bad = CompiledFormula::pattern("value * inf".into(), [Variable::Value], 1.0);
        assert!(matches!(
            validated(bad),
            Err(FormulaGenerationError::UnsafeFormula { reason, .. }) if reason.contains("inf")
        ));
    }

    #[tokio::test]
    async fn overflowing_rate_is_a_failure_not_an_update() {
        let compiler = RateCompiler::<ScriptedProvider<Responder>>::deterministic_only();
        let huge = format!("1{}%", "0".repeat(400));
        let report = compiler.compile_entries(&[entry("0101.21.00", &huge, None)]).await;
        assert!(report.updates.is_empty());
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn bulk_pass_reports_failures_without_aborting() {
        let compiler = RateCompiler::<ScriptedProvider<Responder>>::deterministic_only();
        let entries = vec![
            entry("0101.21.00", "Free", None),
            entry("9102.11.10", "5% on the case plus 10% on the strap", None),
        ];
        let report = compiler.compile_entries(&entries).await;
        assert_eq!(report.updates.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code, "9102.11.10");
        assert!(report.failures[0].error.starts_with("formula generation failed"));
    }
}
