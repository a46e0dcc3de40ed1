//! Generative fallback layer: a narrow completion-provider capability, the
//! Anthropic Messages API client, strict schema validation of generated
//! formulas, and the grammar-then-fallback rate compiler.

mod compiler;
mod error;
mod fallback;
mod prompt;
mod provider;
#[cfg(test)]
mod testing;

pub use compiler::{CompileFailure, CompileReport, RateCompiler};
pub use error::{FormulaGenerationError, ProviderError};
pub use fallback::{
    BatchItem, CONFIDENCE_DISCOUNT, FallbackCompiler, FallbackConfig, MAX_BATCH_ITEMS,
    parse_batch_response, parse_formula_response,
};
pub use provider::{
    AnthropicProvider, CompletionProvider, CompletionRequest, DEFAULT_MODEL, ProviderConfig,
};
