//! Parquet export of compiled formulas for the downstream calculation engine.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Array, ListBuilder, StringArray, StringBuilder, TimestampMicrosecondArray,
};
use arrow::record_batch::RecordBatch;
use dutyform_core::ScheduleEntry;
use dutyform_core::export::formula_export_schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::info;

use crate::StoreError;

fn string_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

fn list_column<'a>(values: impl Iterator<Item = Option<&'a [String]>>) -> ArrayRef {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for value in values {
        match value {
            Some(items) => {
                for item in items {
                    builder.values().append_value(item);
                }
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

/// One Arrow batch with a row per entry.
pub fn formula_batch(entries: &[ScheduleEntry]) -> Result<RecordBatch, StoreError> {
    let schema = Arc::new(formula_export_schema());
    let synthesis = || entries.iter().map(|e| e.metadata.synthesis.as_ref());

    let columns: Vec<ArrayRef> = vec![
        string_column(entries.iter().map(|e| Some(e.code.as_str()))),
        string_column(entries.iter().map(|e| Some(e.chapter.as_str()))),
        string_column(entries.iter().map(|e| e.general_rate_text.as_deref())),
        string_column(entries.iter().map(|e| e.rate_formula.as_deref())),
        string_column(
            entries
                .iter()
                .map(|e| e.rate_origin.as_ref().map(|o| o.method.as_str())),
        ),
        Arc::new(
            entries
                .iter()
                .map(|e| e.rate_origin.as_ref().map(|o| o.confidence))
                .collect::<Float64Array>(),
        ),
        string_column(entries.iter().map(|e| e.other_rate_text.as_deref())),
        string_column(entries.iter().map(|e| e.other_rate_formula.as_deref())),
        string_column(entries.iter().map(|e| e.adjusted_formula.as_deref())),
        list_column(entries.iter().map(|e| e.chapter99_links.as_deref())),
        string_column(synthesis().map(|s| s.map(|s| s.status.as_str()))),
        string_column(synthesis().map(|s| s.and_then(|s| s.selected_code.as_deref()))),
        list_column(entries.iter().map(|e| e.non_ntr_applicable_countries.as_deref())),
        Arc::new(
            synthesis()
                .map(|s| s.and_then(|s| s.synthesized_at).map(|t| t.timestamp_micros()))
                .collect::<TimestampMicrosecondArray>()
                .with_timezone("UTC"),
        ),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Write the formula columns of `entries` to a Snappy-compressed Parquet file.
pub fn write_formula_parquet(entries: &[ScheduleEntry], path: &Path) -> Result<usize, StoreError> {
    let batch = formula_batch(entries)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    info!(path = %path.display(), rows = batch.num_rows(), "wrote formula export");
    Ok(batch.num_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, ListArray};
    use chrono::{TimeZone, Utc};
    use dutyform_core::{
        AdjustmentStatus, FormulaOrigin, GenerationMethod, SynthesisProvenance,
    };
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn read_back(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn entries() -> Vec<ScheduleEntry> {
        let mut linked = ScheduleEntry {
            code: "8471.30.01".into(),
            chapter: "84".into(),
            general_rate_text: Some("Free".into()),
            rate_formula: Some("0".into()),
            rate_origin: Some(FormulaOrigin {
                method: GenerationMethod::Pattern,
                confidence: 1.0,
                generated_at: None,
            }),
            adjusted_formula: Some("(0) + (value * 0.25)".into()),
            chapter99_links: Some(vec!["9903.88.03".into()]),
            non_ntr_applicable_countries: Some(vec!["BY".into(), "CU".into()]),
            ..Default::default()
        };
        linked.metadata.synthesis = Some(SynthesisProvenance {
            status: AdjustmentStatus::Linked,
            selected_code: Some("9903.88.03".into()),
            adjustment_rate: Some(0.25),
            pass_through_marker: true,
            reason: None,
            non_ntr_defaulted: true,
            synthesized_at: Some(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()),
        });
        let bare = ScheduleEntry {
            code: "0101.21.00".into(),
            chapter: "01".into(),
            ..Default::default()
        };
        vec![linked, bare]
    }

    #[test]
    fn batch_has_one_row_per_entry() {
        let batch = formula_batch(&entries()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 14);

        let method = batch.column_by_name("rate_method").unwrap();
        let method = method.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(method.value(0), "pattern");
        assert!(method.is_null(1));

        let links = batch.column_by_name("chapter99_links").unwrap();
        let links = links.as_any().downcast_ref::<ListArray>().unwrap();
        assert_eq!(links.value_length(0), 1);
        assert!(links.is_null(1));
    }

    #[test]
    fn parquet_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("formulas.parquet");
        assert_eq!(write_formula_parquet(&entries(), &path).unwrap(), 2);

        let batches = read_back(&path);
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        let adjusted = batches[0].column_by_name("adjusted_formula").unwrap();
        let adjusted = adjusted.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(adjusted.value(0), "(0) + (value * 0.25)");
        assert!(adjusted.is_null(1));
    }

    #[test]
    fn write_into_missing_directory_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("formulas.parquet");
        assert!(matches!(
            write_formula_parquet(&entries(), &path),
            Err(StoreError::Io(_))
        ));
    }
}
