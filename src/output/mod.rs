//! Streaming-friendly writers for accumulated extraction results.

use crate::engine::ExtractionResult;
use crate::errors::Result;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn write_json<W: Write>(writer: W, results: &[ExtractionResult]) -> Result<()> {
    serde_json::to_writer_pretty(writer, results)?;
    Ok(())
}

pub fn write_json_file(path: impl AsRef<Path>, results: &[ExtractionResult]) -> Result<()> {
    let file = File::create(path)?;
    write_json(BufWriter::new(file), results)
}

/// Flatten results into one row per item. Columns are the union of base
/// field names plus `step_id.field` for workflow outputs, so partial rows
/// stay aligned.
pub fn write_csv<W: Write>(writer: W, results: &[ExtractionResult]) -> Result<()> {
    let mut base_columns = BTreeSet::new();
    let mut step_columns = BTreeSet::new();
    for result in results {
        base_columns.extend(result.base_fields.keys().cloned());
        for (step_id, fields) in &result.step_outputs {
            for field in fields.keys() {
                step_columns.insert(format!("{}.{}", step_id, field));
            }
        }
    }

    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec![
        "item_index".to_string(),
        "source_url".to_string(),
        "extracted_at".to_string(),
        "success".to_string(),
    ];
    header.extend(base_columns.iter().cloned());
    header.extend(step_columns.iter().cloned());
    header.push("errors".to_string());
    csv_writer.write_record(&header)?;

    for result in results {
        let mut row = vec![
            result.item_index.to_string(),
            result.source_url.clone(),
            result.extracted_at.to_rfc3339(),
            result.success.to_string(),
        ];
        for column in &base_columns {
            row.push(
                result
                    .base_fields
                    .get(column)
                    .and_then(|v| v.clone())
                    .unwrap_or_default(),
            );
        }
        for column in &step_columns {
            let value = column.split_once('.').and_then(|(step_id, field)| {
                result
                    .step_outputs
                    .get(step_id)
                    .and_then(|fields| fields.get(field))
                    .and_then(|v| v.clone())
            });
            row.push(value.unwrap_or_default());
        }
        row.push(
            result
                .errors
                .iter()
                .map(|e| format!("{}:{:?}", e.step_id, e.kind))
                .collect::<Vec<_>>()
                .join("; "),
        );
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn write_csv_file(path: impl AsRef<Path>, results: &[ExtractionResult]) -> Result<()> {
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::ErrorKind;

    fn sample_results() -> Vec<ExtractionResult> {
        let mut first = ExtractionResult::new(0, "https://site.test/list");
        first
            .base_fields
            .insert("title".to_string(), Some("Alpha".to_string()));
        first
            .step_output_mut("step1")
            .insert("description".to_string(), Some("Detail, with comma".to_string()));

        let mut second = ExtractionResult::new(1, "https://site.test/list");
        second.base_fields.insert("title".to_string(), None);
        second.success = false;
        second.record_error("step1", ErrorKind::SelectorNotFound, "no match");

        vec![first, second]
    }

    #[test]
    fn json_output_is_an_array_of_records() {
        let mut buffer = Vec::new();
        write_json(&mut buffer, &sample_results()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["base_fields"]["title"], "Alpha");
        assert_eq!(parsed[1]["success"], false);
    }

    #[test]
    fn csv_output_aligns_partial_rows() {
        let mut buffer = Vec::new();
        write_csv(&mut buffer, &sample_results()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert_eq!(
            header,
            "item_index,source_url,extracted_at,success,title,step1.description,errors"
        );

        let first = lines.next().unwrap();
        assert!(first.contains("Alpha"));
        assert!(first.contains("\"Detail, with comma\""));

        let second = lines.next().unwrap();
        assert!(second.contains("false"));
        assert!(second.contains("step1:SelectorNotFound"));
    }
}
