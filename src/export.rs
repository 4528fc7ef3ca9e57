//! Delimited-text export of ranked tables.
//!
//! Layout: header `symbol,<columns...>,score`, one line per row in rank
//! order. Unavailable values are empty fields. Floats use the shortest
//! representation that parses back to the same value, so a written table
//! reads back identically.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::types::{MetricResult, MetricValue, RankedRow, RankedTable, ScanError};

pub const SYMBOL_HEADER: &str = "symbol";
pub const SCORE_HEADER: &str = "score";

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn quote(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render(value: Option<MetricValue>) -> String {
    match value.and_then(|v| v.value()) {
        Some(v) => format!("{v}"),
        None => String::new(),
    }
}

fn write_line<W: Write>(writer: &mut W, fields: &[String], delimiter: char) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|f| quote(f, delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string());
    writeln!(writer, "{line}")
}

/// Stream a table to any writer.
pub fn write_delimited<W: Write>(
    table: &RankedTable,
    delimiter: char,
    writer: &mut W,
) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(table.columns.len() + 2);
    header.push(SYMBOL_HEADER.to_string());
    header.extend(table.columns.iter().cloned());
    header.push(SCORE_HEADER.to_string());
    write_line(writer, &header, delimiter)?;

    for row in &table.rows {
        let mut fields = Vec::with_capacity(header.len());
        fields.push(row.symbol.clone());
        fields.extend(table.columns.iter().map(|c| render(row.fields.get(c))));
        fields.push(render(Some(row.score)));
        write_line(writer, &fields, delimiter)?;
    }
    Ok(())
}

pub fn to_delimited(table: &RankedTable, delimiter: char) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_delimited(table, delimiter, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Write a table to `path`.
pub fn save(table: &RankedTable, path: impl AsRef<Path>, delimiter: char) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_delimited(table, delimiter, &mut writer)
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to write export file {}", path.display()))?;

    info!(path = %path.display(), rows = table.len(), "Table exported");
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split text into records of fields, honouring quoted fields that contain
/// delimiters, doubled quotes or line breaks.
fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ScanError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ScanError::Export("unterminated quoted field".into()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

fn parse_value(raw: &str, line: usize) -> Result<MetricValue, ScanError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(MetricValue::Unavailable);
    }
    raw.parse::<f64>()
        .map(MetricValue::from_f64)
        .map_err(|_| ScanError::Export(format!("line {line}: not a number: {raw:?}")))
}

/// Read back a table written by `to_delimited`.
pub fn parse_delimited(text: &str, delimiter: char) -> Result<RankedTable, ScanError> {
    let mut records = split_records(text, delimiter)?.into_iter();

    let header = records
        .next()
        .ok_or_else(|| ScanError::Export("empty input".into()))?;
    if header.len() < 2
        || header.first().map(String::as_str) != Some(SYMBOL_HEADER)
        || header.last().map(String::as_str) != Some(SCORE_HEADER)
    {
        return Err(ScanError::Export(format!(
            "header must start with '{SYMBOL_HEADER}' and end with '{SCORE_HEADER}'"
        )));
    }
    let columns: Vec<String> = header[1..header.len() - 1].to_vec();

    let mut rows = Vec::new();
    for (idx, record) in records.enumerate() {
        let line = idx + 2;
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        if record.len() != header.len() {
            return Err(ScanError::Export(format!(
                "line {line}: expected {} fields, found {}",
                header.len(),
                record.len()
            )));
        }

        let mut fields = MetricResult::new();
        for (name, raw) in columns.iter().zip(&record[1..record.len() - 1]) {
            fields.insert(name.clone(), parse_value(raw, line)?);
        }

        rows.push(RankedRow {
            symbol: record[0].clone(),
            fields,
            score: parse_value(&record[record.len() - 1], line)?,
        });
    }

    Ok(RankedTable { columns, rows })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
