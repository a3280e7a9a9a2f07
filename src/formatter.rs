//! Result Formatter
//!
//! Renders query rows as a text table, CSV, JSON or a markdown table. The
//! engine core makes no assumption about representation; everything here is
//! presentation only.

use crate::error::{EngineError, Result};
use crate::executor::QueryRows;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
    Markdown,
}

pub fn render(rows: &QueryRows, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(to_table(rows)),
        OutputFormat::Csv => to_csv(rows),
        OutputFormat::Json => to_json(rows),
        OutputFormat::Markdown => Ok(to_markdown(rows)),
    }
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_table(rows: &QueryRows) -> String {
    if rows.rows.is_empty() {
        return "No results found.".to_string();
    }

    let mut widths: Vec<usize> = rows.columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();
    for row in &rendered {
        for (i, value) in row.iter().enumerate() {
            if value.len() > widths[i] {
                widths[i] = value.len();
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let format_row = |values: &[String]| -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| format!(" {:<width$} ", v, width = widths[i]))
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut lines = Vec::with_capacity(rendered.len() + 4);
    lines.push(format_row(&rows.columns));
    lines.push(separator);
    for row in &rendered {
        lines.push(format_row(row));
    }
    lines.push(String::new());
    let truncated = if rows.truncated { " (truncated)" } else { "" };
    lines.push(format!("{} row(s) returned{}", rows.row_count, truncated));
    lines.join("\n")
}

fn to_csv(rows: &QueryRows) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&rows.columns)
        .map_err(|e| EngineError::Execution(format!("csv encode: {}", e)))?;
    for row in &rows.rows {
        let record: Vec<String> = row.iter().map(cell).collect();
        writer
            .write_record(&record)
            .map_err(|e| EngineError::Execution(format!("csv encode: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::Execution(format!("csv encode: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| EngineError::Execution(format!("csv encode: {}", e)))
}

fn to_json(rows: &QueryRows) -> Result<String> {
    let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
        .rows
        .iter()
        .map(|row| {
            rows.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
        .collect();
    Ok(serde_json::to_string_pretty(&objects)?)
}

fn to_markdown(rows: &QueryRows) -> String {
    if rows.rows.is_empty() {
        return "*No results found.*".to_string();
    }
    let mut lines = Vec::with_capacity(rows.rows.len() + 2);
    lines.push(format!("| {} |", rows.columns.join(" | ")));
    lines.push(format!(
        "| {} |",
        vec!["---"; rows.columns.len()].join(" | ")
    ));
    for row in &rows.rows {
        let values: Vec<String> = row.iter().map(cell).collect();
        lines.push(format!("| {} |", values.join(" | ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueryRows {
        QueryRows {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![json!(1), json!("alice")],
                vec![json!(2), serde_json::Value::Null],
            ],
            row_count: 2,
            truncated: false,
        }
    }

    #[test]
    fn table_renders_nulls_and_footer() {
        let text = to_table(&sample());
        assert!(text.contains("alice"));
        assert!(text.contains("NULL"));
        assert!(text.contains("2 row(s) returned"));
    }

    #[test]
    fn table_reports_truncation() {
        let mut rows = sample();
        rows.truncated = true;
        assert!(to_table(&rows).contains("(truncated)"));
    }

    #[test]
    fn csv_has_header_and_rows() {
        let text = to_csv(&sample()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,name"));
        assert_eq!(lines.next(), Some("1,alice"));
        assert_eq!(lines.next(), Some("2,NULL"));
    }

    #[test]
    fn json_is_a_list_of_objects() {
        let text = to_json(&sample()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["name"], json!("alice"));
        assert_eq!(parsed[1]["name"], serde_json::Value::Null);
    }

    #[test]
    fn markdown_has_separator_row() {
        let text = to_markdown(&sample());
        assert!(text.starts_with("| id | name |"));
        assert!(text.contains("| --- | --- |"));
    }

    #[test]
    fn empty_results_say_so() {
        let rows = QueryRows {
            columns: vec!["id".to_string()],
            rows: vec![],
            row_count: 0,
            truncated: false,
        };
        assert_eq!(to_table(&rows), "No results found.");
        assert_eq!(to_markdown(&rows), "*No results found.*");
    }
}
