//! Prompt templates and response schemas for generative rate compilation.

use serde_json::{Value, json};

use crate::fallback::BatchItem;

pub const SINGLE_TOOL: &str = "compile_rate";
pub const BATCH_TOOL: &str = "compile_rates";

/// Marker preceding the JSON item list in batch prompts.
pub const ITEMS_MARKER: &str = "Items:\n";

pub const SYSTEM_PROMPT: &str = "\
You convert tariff duty rate text into an arithmetic formula.

Rules:
- Use only the variables value (customs value in dollars), weight (kilograms) and quantity (units).
- Express percentages as decimals: 5% is value * 0.05.
- Express cents as dollars: 25 cents/kg is weight * 0.25.
- Compound rates are additive: 5% + 25 cents/kg is value * 0.05 + weight * 0.25.
- \"Free\" is 0.
- For a range, use the lower bound.
- Use only digits, + - * /, parentheses, decimal points and the three variable names.
- confidence is your certainty in [0, 1].";

pub fn single_prompt(rate_text: &str, unit_hint: Option<&str>) -> String {
    format!(
        "Compile this duty rate.\nRate text: {rate_text}\nUnit of quantity: {}",
        unit_hint.unwrap_or("none")
    )
}

/// Batch prompt; answers are correlated by `index`, not by position.
pub fn batch_prompt(items: &[BatchItem]) -> String {
    let items = serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Compile each duty rate below. Return one result per item, echoing its index.\n{ITEMS_MARKER}{items}"
    )
}

fn formula_properties() -> Value {
    json!({
        "formula": { "type": "string" },
        "variables": {
            "type": "array",
            "items": { "type": "string", "enum": ["value", "weight", "quantity"] }
        },
        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
        "explanation": { "type": "string" }
    })
}

pub fn single_schema() -> Value {
    json!({
        "type": "object",
        "properties": formula_properties(),
        "required": ["formula", "variables", "confidence"],
    })
}

pub fn batch_schema() -> Value {
    let mut properties = formula_properties();
    properties["index"] = json!({ "type": "integer", "minimum": 0 });
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": properties,
            "required": ["index", "formula", "variables", "confidence"],
        }
    })
}
