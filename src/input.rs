use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::pipeline::processing::clean::RawRow;

/// Read listing rows from a `.csv` file (first line is the header) or a
/// `.json` array of objects. Headers are passed through untouched; resolving
/// variants is the cleaner's job.
pub fn read_rows<P: AsRef<Path>>(path: P) -> Result<Vec<RawRow>> {
    let path = path.as_ref();
    let rows = match path.extension().and_then(|s| s.to_str()) {
        Some("csv") => read_csv(path)?,
        Some("json") => parse_json_rows(&fs::read_to_string(path)?)?,
        other => {
            return Err(PipelineError::UnsupportedFormat(format!(
                "input file {} has extension {:?}, expected .csv or .json",
                path.display(),
                other
            )))
        }
    };
    info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn read_csv(path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.to_string(), value.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Parse a JSON array of flat objects. Numbers and booleans become their text
/// form and nulls are left out.
pub fn parse_json_rows(content: &str) -> Result<Vec<RawRow>> {
    let objects: Vec<serde_json::Map<String, Value>> = serde_json::from_str(content)?;
    Ok(objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .filter_map(|(key, value)| {
                    let text = match value {
                        Value::Null => return None,
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    Some((key, text))
                })
                .collect()
        })
        .collect())
}
