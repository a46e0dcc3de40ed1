pub mod adjustment;
pub mod compiler;
pub mod entry;
pub mod eval;
pub mod formula;
pub mod links;
pub mod normalize;
pub mod overrides;
pub mod schema;
pub mod synthesis;
pub mod units;
pub mod validator;

pub use adjustment::{
    AdditionalDutyIndex, AdjustmentResult, AdjustmentStatus, SelectedReference,
    build_adjusted_formula, infer_applicable_countries, select_chapter99_entry,
    synthesize_adjustment,
};
pub use compiler::{CompileOutcome, RateShape, compile_pattern, compile_rate};
pub use entry::{
    EntryMetadata, EntryUpdate, FootnoteFragment, Footnotes, FormulaOrigin, FormulaUpdate,
    RateColumn, ScheduleEntry, SynthesisProvenance,
};
pub use eval::{EvalError, evaluate};
pub use formula::{CompiledFormula, GenerationMethod, RateSpecification, Variable, format_number};
pub use links::{extract_chapter99_codes, resolve_chapter99_links};
pub use normalize::normalize_rate_text;
pub use overrides::{FormulaKind, FormulaOverride, OverrideSet};
pub use schema::export;
pub use synthesis::{BatchSynthesizer, SynthesisStats, UpdateSink, WRITE_BATCH_SIZE};
pub use units::resolve_unit;
pub use validator::{FormulaValidation, extract_variables, validate_formula};
