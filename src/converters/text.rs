//! Text-based formats: CSV tables and fenced HTML / JSON / XML.

use super::{display_name, read_source};
use crate::dispatch::Converter;
use crate::error::ConvertError;
use crate::format::FormatTag;
use async_trait::async_trait;
use std::path::Path;

/// Render rows as a GFM table; the first row is the header.
///
/// Short rows are padded, pipes are escaped and embedded newlines become
/// `<br>`. An empty slice renders as an empty string.
pub fn markdown_table(rows: &[Vec<String>]) -> String {
    let Some(width) = rows.iter().map(Vec::len).max().filter(|w| *w > 0) else {
        return String::new();
    };

    let render_row = |row: &Vec<String>| {
        let cells: Vec<String> = (0..width)
            .map(|i| row.get(i).map(|c| escape_cell(c)).unwrap_or_default())
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    let mut out = render_row(&rows[0]);
    out.push_str(&format!("|{}\n", " --- |".repeat(width)));
    for row in &rows[1..] {
        out.push_str(&render_row(row));
    }
    out
}

fn escape_cell(cell: &str) -> String {
    cell.trim()
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// CSV → GFM table.
pub struct CsvConverter;

#[async_trait]
impl Converter for CsvConverter {
    fn name(&self) -> &str {
        "csv"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let bytes = read_source(path).await?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(|e| ConvertError::invalid(FormatTag::Csv, e.to_string()))?;
            rows.push(
                record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect::<Vec<_>>(),
            );
        }

        if rows.is_empty() {
            return Err(ConvertError::invalid(FormatTag::Csv, "no rows"));
        }
        Ok(markdown_table(&rows))
    }
}

/// Wraps the file in a fenced code block tagged with its language.
///
/// JSON must parse and is pretty-printed; HTML and XML are passed through.
pub struct FencedTextConverter {
    tag: FormatTag,
    language: &'static str,
}

impl FencedTextConverter {
    pub fn html() -> Self {
        Self {
            tag: FormatTag::Html,
            language: "html",
        }
    }

    pub fn json() -> Self {
        Self {
            tag: FormatTag::Json,
            language: "json",
        }
    }

    pub fn xml() -> Self {
        Self {
            tag: FormatTag::Xml,
            language: "xml",
        }
    }
}

#[async_trait]
impl Converter for FencedTextConverter {
    fn name(&self) -> &str {
        self.language
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let bytes = read_source(path).await?;
        let body = if self.tag == FormatTag::Json {
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| ConvertError::invalid(FormatTag::Json, e.to_string()))?;
            serde_json::to_string_pretty(&value)
                .map_err(|e| ConvertError::invalid(FormatTag::Json, e.to_string()))?
        } else {
            let text = String::from_utf8_lossy(&bytes);
            text.trim_start_matches('\u{FEFF}').trim_end().to_string()
        };

        let fence = fence_for(&body);
        Ok(format!(
            "# {}\n\n{fence}{}\n{body}\n{fence}\n",
            display_name(path),
            self.language
        ))
    }
}

/// A backtick fence longer than any backtick run inside `body`.
fn fence_for(body: &str) -> String {
    let longest = body
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}
