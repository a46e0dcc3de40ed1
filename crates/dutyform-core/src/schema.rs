/// Arrow schema definitions for compiled schedule exports.
pub mod export {
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use std::sync::Arc;

    fn utf8_list() -> DataType {
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
    }

    /// One row per schedule entry with its compiled and adjusted formulas.
    pub fn formula_export_schema() -> Schema {
        Schema::new(vec![
            Field::new("code", DataType::Utf8, false),
            Field::new("chapter", DataType::Utf8, false),
            Field::new("general_rate_text", DataType::Utf8, true),
            Field::new("rate_formula", DataType::Utf8, true),
            Field::new("rate_method", DataType::Utf8, true),
            Field::new("rate_confidence", DataType::Float64, true),
            Field::new("other_rate_text", DataType::Utf8, true),
            Field::new("other_rate_formula", DataType::Utf8, true),
            Field::new("adjusted_formula", DataType::Utf8, true),
            Field::new("chapter99_links", utf8_list(), true),
            Field::new("adjustment_status", DataType::Utf8, true),
            Field::new("selected_code", DataType::Utf8, true),
            Field::new("non_ntr_countries", utf8_list(), true),
            Field::new(
                "synthesized_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                true,
            ),
        ])
    }
}
