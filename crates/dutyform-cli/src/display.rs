//! Vertical card display for schedule entries and compiled formulas.

use dutyform_core::{CompiledFormula, FormulaOrigin, FormulaValidation, ScheduleEntry};

const MAX_LIST_ITEMS: usize = 10;

// ── Public API ──

/// Print one schedule entry as a vertical card grouped by section.
pub fn print_entry_card(entry: &ScheduleEntry) {
    println!("=== {} ===", entry.code);
    if !entry.description.is_empty() {
        println!("{}", entry.description);
    }
    println!();

    print_section(
        "Rates",
        &[
            ("general_rate_text", entry.general_rate_text.clone()),
            ("other_rate_text", entry.other_rate_text.clone()),
            ("unit_of_quantity", entry.unit_of_quantity.clone()),
        ],
    );
    print_section(
        "Formulas",
        &[
            ("rate_formula", entry.rate_formula.clone()),
            ("rate_origin", entry.rate_origin.as_ref().map(origin)),
            ("other_rate_formula", entry.other_rate_formula.clone()),
            ("other_rate_origin", entry.other_rate_origin.as_ref().map(origin)),
            ("adjusted_formula", entry.adjusted_formula.clone()),
        ],
    );
    print_section(
        "Chapter 99",
        &[
            ("chapter99_links", list(entry.chapter99_links.as_deref())),
            (
                "applicable_countries",
                list(entry.chapter99_applicable_countries.as_deref()),
            ),
            ("non_ntr_countries", list(entry.non_ntr_applicable_countries.as_deref())),
        ],
    );
    if let Some(s) = &entry.metadata.synthesis {
        print_section(
            "Synthesis",
            &[
                ("status", Some(s.status.as_str().to_string())),
                ("selected_code", s.selected_code.clone()),
                ("adjustment_rate", s.adjustment_rate.map(|r| r.to_string())),
                ("pass_through_marker", Some(yes_no(s.pass_through_marker))),
                ("non_ntr_defaulted", Some(yes_no(s.non_ntr_defaulted))),
                ("reason", s.reason.clone()),
                ("synthesized_at", s.synthesized_at.map(|t| t.to_rfc3339())),
            ],
        );
    }
}

/// Print a compiled formula.
pub fn print_formula(text: &str, formula: &CompiledFormula) {
    println!("  {:<26} {}", "rate_text", text);
    println!("  {:<26} {}", "formula", formula.formula);
    println!("  {:<26} {}", "variables", formula.variable_names().join(", "));
    println!("  {:<26} {:.2}", "confidence", formula.confidence);
    println!("  {:<26} {}", "method", formula.method.as_str());
}

pub fn print_validation(formula: &str, validation: &FormulaValidation) {
    println!("  {:<26} {}", "formula", formula);
    println!("  {:<26} {}", "valid", yes_no(validation.valid));
    if let Some(error) = &validation.error {
        println!("  {:<26} {}", "error", error);
    }
    if validation.valid {
        let names: Vec<&str> = validation.variables.iter().map(|v| v.as_str()).collect();
        println!("  {:<26} {}", "variables", names.join(", "));
    }
}

// ── Section rendering ──

fn print_section(header: &str, rows: &[(&str, Option<String>)]) {
    if rows.iter().all(|(_, v)| v.is_none()) {
        return;
    }
    println!("{header}");
    for (name, value) in rows {
        if let Some(value) = value {
            println!("  {:<26} {}", name, value);
        }
    }
    println!();
}

fn origin(o: &FormulaOrigin) -> String {
    format!("{} ({:.2})", o.method.as_str(), o.confidence)
}

fn list(items: Option<&[String]>) -> Option<String> {
    let items = items?;
    if items.is_empty() {
        return Some("(none)".to_string());
    }
    let shown: Vec<&str> = items.iter().take(MAX_LIST_ITEMS).map(String::as_str).collect();
    let mut out = shown.join(", ");
    if items.len() > MAX_LIST_ITEMS {
        out.push_str(&format!(" ... (+{} more)", items.len() - MAX_LIST_ITEMS));
    }
    Some(out)
}

fn yes_no(b: bool) -> String {
    let s = if b { "yes" } else { "no" };
    s.to_string()
}
