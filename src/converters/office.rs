//! Office formats: Word, PowerPoint and Excel.
//!
//! OOXML files (`.docx`, `.pptx`) are zip containers; their part XML is
//! walked with a streaming `quick_xml` reader rather than a full DOM. That
//! covers paragraphs, headings, list items, tables and slide text.
//! Legacy binary files (`.doc`, `.ppt`) get a text-run scrape of the OLE
//! stream. Spreadsheets of either generation go through calamine.

use super::{display_name, markdown_table};
use crate::dispatch::Converter;
use crate::error::ConvertError;
use crate::format::FormatTag;
use async_trait::async_trait;
use calamine::{open_workbook_auto, Reader as _};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Run blocking parse work off the async executor.
async fn blocking<F>(path: &Path, work: F) -> Result<String, ConvertError>
where
    F: FnOnce(PathBuf) -> Result<String, ConvertError> + Send + 'static,
{
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || work(owned))
        .await
        .map_err(|e| ConvertError::Crashed(format!("parse task: {e}")))?
}

fn read_zip_part(path: &Path, part: &str, format: FormatTag) -> Result<String, ConvertError> {
    let file = File::open(path).map_err(|e| ConvertError::unreadable(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ConvertError::invalid(format, format!("not an OOXML container: {e}")))?;
    let mut entry = archive
        .by_name(part)
        .map_err(|_| ConvertError::invalid(format, format!("missing part '{part}'")))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ConvertError::invalid(format, format!("unreadable part '{part}': {e}")))?;
    Ok(xml)
}

// ── Word ─────────────────────────────────────────────────────────────────

/// `.docx` paragraphs, headings, lists and tables; `.doc` text scrape.
pub struct WordConverter;

#[async_trait]
impl Converter for WordConverter {
    fn name(&self) -> &str {
        "word"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        match extension(path).as_str() {
            "doc" => blocking(path, |p| legacy_text(&p, FormatTag::Word)).await,
            _ => blocking(path, |p| docx_to_markdown(&p)).await,
        }
    }
}

fn docx_to_markdown(path: &Path) -> Result<String, ConvertError> {
    let xml = read_zip_part(path, "word/document.xml", FormatTag::Word)?;
    let blocks = docx_blocks(&xml)?;
    if blocks.is_empty() {
        return Ok(format!("# {}\n\n_The document contains no text._\n", display_name(path)));
    }
    Ok(join_blocks(&blocks))
}

#[derive(Default)]
struct DocxParagraph {
    text: String,
    style: String,
    numbered: bool,
}

#[derive(Default)]
struct DocxTable {
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
}

/// Walks `word/document.xml` and returns one Markdown block per paragraph
/// or top-level table. Nested tables are flattened into their parent cell.
fn docx_blocks(xml: &str) -> Result<Vec<String>, ConvertError> {
    let mut reader = Reader::from_str(xml);
    // `xml:space="preserve"` runs carry meaningful edge whitespace.
    reader.trim_text(false);

    let mut blocks = Vec::new();
    let mut tables: Vec<DocxTable> = Vec::new();
    let mut para: Option<DocxParagraph> = None;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => para = Some(DocxParagraph::default()),
                b"w:t" => in_text = true,
                b"w:tbl" => tables.push(DocxTable::default()),
                b"w:tr" => {
                    if let Some(table) = tables.last_mut() {
                        table.row = Some(Vec::new());
                    }
                }
                b"w:tc" => {
                    if let Some(table) = tables.last_mut() {
                        table.cell = Some(String::new());
                    }
                }
                b"w:numPr" => {
                    if let Some(p) = para.as_mut() {
                        p.numbered = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:pStyle" => {
                    if let (Some(p), Some(val)) = (para.as_mut(), get_attr(&e, b"w:val")) {
                        p.style = val;
                    }
                }
                b"w:numPr" => {
                    if let Some(p) = para.as_mut() {
                        p.numbered = true;
                    }
                }
                b"w:tab" => {
                    if let Some(p) = para.as_mut() {
                        p.text.push('\t');
                    }
                }
                b"w:br" | b"w:cr" => {
                    if let Some(p) = para.as_mut() {
                        p.text.push(' ');
                    }
                }
                b"w:tc" => {
                    if let Some(row) = tables.last_mut().and_then(|t| t.row.as_mut()) {
                        row.push(String::new());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e
                    .unescape()
                    .map_err(|err| ConvertError::invalid(FormatTag::Word, format!("bad text run: {err}")))?;
                if let Some(p) = para.as_mut() {
                    p.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if let Some(p) = para.take().filter(|p| !p.text.trim().is_empty()) {
                        let text = p.text.trim();
                        let in_table = !tables.is_empty();
                        match tables.last_mut().and_then(|t| t.cell.as_mut()) {
                            Some(cell) => append_spaced(cell, text),
                            None if !in_table => {
                                blocks.push(paragraph_block(&p.style, p.numbered, text))
                            }
                            None => {}
                        }
                    }
                }
                b"w:tc" => {
                    if let Some(table) = tables.last_mut() {
                        let cell = table.cell.take().unwrap_or_default();
                        if let Some(row) = table.row.as_mut() {
                            row.push(cell);
                        }
                    }
                }
                b"w:tr" => {
                    if let Some(table) = tables.last_mut() {
                        if let Some(row) = table.row.take() {
                            table.rows.push(row);
                        }
                    }
                }
                b"w:tbl" => {
                    if let Some(table) = tables.pop() {
                        match tables.last_mut().and_then(|t| t.cell.as_mut()) {
                            Some(cell) => {
                                for row in &table.rows {
                                    append_spaced(cell, row.join(" ").trim());
                                }
                            }
                            None => {
                                let rendered = markdown_table(&table.rows);
                                if !rendered.is_empty() {
                                    blocks.push(rendered.trim_end().to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConvertError::invalid(
                    FormatTag::Word,
                    format!("malformed document.xml at byte {}: {e}", reader.buffer_position()),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(blocks)
}

fn paragraph_block(style: &str, numbered: bool, text: &str) -> String {
    match heading_level(style) {
        Some(level) => format!("{} {}", "#".repeat(level), text),
        None if numbered => format!("- {text}"),
        None => text.to_string(),
    }
}

fn append_spaced(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

fn get_attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `Title` → 1, `Heading1`..`Heading6` → 1..6.
fn heading_level(style: &str) -> Option<usize> {
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    let lower = style.to_ascii_lowercase();
    let n: usize = lower.strip_prefix("heading")?.trim().parse().ok()?;
    (1..=6).contains(&n).then_some(n)
}

/// Consecutive list items stay together; other blocks get a blank line.
fn join_blocks(blocks: &[String]) -> String {
    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            let tight = block.starts_with("- ") && blocks[i - 1].starts_with("- ");
            out.push_str(if tight { "\n" } else { "\n\n" });
        }
        out.push_str(block);
    }
    out.push('\n');
    out
}

// ── PowerPoint ───────────────────────────────────────────────────────────

/// `.pptx` slide text in slide order; `.ppt` text scrape.
pub struct PptConverter;

#[async_trait]
impl Converter for PptConverter {
    fn name(&self) -> &str {
        "ppt"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        match extension(path).as_str() {
            "ppt" => blocking(path, |p| legacy_text(&p, FormatTag::Ppt)).await,
            _ => blocking(path, |p| pptx_to_markdown(&p)).await,
        }
    }
}

static RE_SLIDE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

fn pptx_to_markdown(path: &Path) -> Result<String, ConvertError> {
    let file = File::open(path).map_err(|e| ConvertError::unreadable(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ConvertError::invalid(FormatTag::Ppt, format!("not an OOXML container: {e}")))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = RE_SLIDE_NAME.captures(name)?[1].parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(n, _)| *n);

    if slides.is_empty() {
        return Err(ConvertError::invalid(FormatTag::Ppt, "presentation has no slides"));
    }

    let mut doc = format!("# {}\n", display_name(path));
    for (n, part) in slides {
        let mut xml = String::new();
        archive
            .by_name(&part)
            .map_err(|e| ConvertError::invalid(FormatTag::Ppt, e.to_string()))?
            .read_to_string(&mut xml)
            .map_err(|e| ConvertError::invalid(FormatTag::Ppt, e.to_string()))?;

        doc.push_str(&format!("\n## Slide {n}\n\n"));
        let paragraphs = slide_paragraphs(&xml)?;
        if paragraphs.is_empty() {
            doc.push_str("_No text on this slide._\n");
        } else {
            doc.push_str(&paragraphs.join("\n\n"));
            doc.push('\n');
        }
    }
    Ok(doc)
}

/// Text of every `a:p` on a slide, one entry per non-blank paragraph.
fn slide_paragraphs(xml: &str) -> Result<Vec<String>, ConvertError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"a:p" => current = Some(String::new()),
                b"a:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"a:br" => {
                if let Some(p) = current.as_mut() {
                    p.push(' ');
                }
            }
            Ok(Event::Text(e)) if in_text => {
                let text = e
                    .unescape()
                    .map_err(|err| ConvertError::invalid(FormatTag::Ppt, format!("bad text run: {err}")))?;
                if let Some(p) = current.as_mut() {
                    p.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"a:t" => in_text = false,
                b"a:p" => {
                    if let Some(p) = current.take().filter(|p| !p.trim().is_empty()) {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConvertError::invalid(FormatTag::Ppt, format!("malformed slide XML: {e}")))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

// ── Legacy binary (OLE) ──────────────────────────────────────────────────

/// Minimum characters for a scraped run to count as text.
const MIN_RUN: usize = 4;

fn legacy_text(path: &Path, format: FormatTag) -> Result<String, ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::unreadable(path, e))?;
    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(ConvertError::invalid(format, "not an OLE compound document"));
    }

    let wide = utf16_runs(&bytes);
    let narrow = ascii_runs(&bytes);
    let runs = if wide.iter().map(String::len).sum::<usize>()
        >= narrow.iter().map(String::len).sum::<usize>()
    {
        wide
    } else {
        narrow
    };

    if runs.is_empty() {
        return Err(ConvertError::invalid(format, "no readable text found"));
    }
    Ok(format!(
        "# {}\n\n{}\n",
        display_name(path),
        runs.join("\n\n")
    ))
}

fn is_text_char(c: char) -> bool {
    !c.is_control() || c == '\t'
}

fn utf16_runs(bytes: &[u8]) -> Vec<String> {
    let units = bytes.chunks_exact(2).map(|p| u16::from_le_bytes([p[0], p[1]]));
    let mut runs = Vec::new();
    let mut current = String::new();
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(c) if is_text_char(c) && c != '\u{FFFD}' => current.push(c),
            _ => flush_run(&mut current, &mut runs),
        }
    }
    flush_run(&mut current, &mut runs);
    runs
}

fn ascii_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' || b == b'\t' {
            current.push(b as char);
        } else {
            flush_run(&mut current, &mut runs);
        }
    }
    flush_run(&mut current, &mut runs);
    runs
}

fn flush_run(current: &mut String, runs: &mut Vec<String>) {
    let trimmed = current.trim();
    if trimmed.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_RUN {
        runs.push(trimmed.to_string());
    }
    current.clear();
}

// ── Excel ────────────────────────────────────────────────────────────────

/// Every worksheet as a `##` section holding a GFM table.
pub struct ExcelConverter;

#[async_trait]
impl Converter for ExcelConverter {
    fn name(&self) -> &str {
        "excel"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        blocking(path, |p| workbook_to_markdown(&p)).await
    }
}

fn workbook_to_markdown(path: &Path) -> Result<String, ConvertError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ConvertError::invalid(FormatTag::Excel, e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(ConvertError::invalid(FormatTag::Excel, "workbook has no sheets"));
    }

    let mut doc = format!("# {}\n", display_name(path));
    for name in sheet_names {
        doc.push_str(&format!("\n## {name}\n\n"));
        let rows: Vec<Vec<String>> = match workbook.worksheet_range(&name) {
            Ok(range) => range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .filter(|row: &Vec<String>| row.iter().any(|c| !c.trim().is_empty()))
                .collect(),
            Err(e) => {
                doc.push_str(&format!("_Sheet could not be read: {e}_\n"));
                continue;
            }
        };
        if rows.is_empty() {
            doc.push_str("_Empty sheet._\n");
        } else {
            doc.push_str(&markdown_table(&rows));
        }
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_ooxml(path: &Path, parts: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    const DOCX_BODY: &str = r#"<?xml version="1.0"?><w:document><w:body>
<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Quarterly Report</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Revenue grew &amp; costs </w:t></w:r><w:r><w:t>fell.</w:t></w:r></w:p>
<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/></w:numPr></w:pPr><w:r><w:t>first</w:t></w:r></w:p>
<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/></w:numPr></w:pPr><w:r><w:t>second</w:t></w:r></w:p>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Q</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Total</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>Q1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>42</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
<w:p/>
</w:body></w:document>"#;

    #[tokio::test]
    async fn docx_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        write_ooxml(&path, &[("word/document.xml", DOCX_BODY)]);

        let md = WordConverter.convert(&path).await.unwrap();
        assert_eq!(
            md,
            "# Quarterly Report\n\n\
             Revenue grew & costs fell.\n\n\
             - first\n- second\n\n\
             | Q | Total |\n| --- | --- |\n| Q1 | 42 |\n"
        );
    }

    #[test]
    fn empty_paragraph_before_table_keeps_table_intact() {
        let xml = r#"<w:document><w:body>
<w:p w:rsidR="00A1"/>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>A1</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>B1</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>A2</w:t></w:r></w:p></w:tc><w:tc/></w:tr></w:tbl>
<w:p><w:r><w:t>It&#8217;s done &#x2014; really</w:t></w:r></w:p>
</w:body></w:document>"#;

        let blocks = docx_blocks(xml).unwrap();
        assert_eq!(
            blocks,
            vec![
                "| A1 | B1 |\n| --- | --- |\n| A2 |  |".to_string(),
                "It\u{2019}s done \u{2014} really".to_string(),
            ]
        );
    }

    #[test]
    fn multi_paragraph_cells_are_joined() {
        let xml = "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>one</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>two</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        assert_eq!(docx_blocks(xml).unwrap(), vec!["| one two |\n| --- |".to_string()]);
    }

    #[test]
    fn malformed_docx_xml_is_invalid_content() {
        let err = docx_blocks("<w:p><w:t>open</w:p>").unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { format: FormatTag::Word, .. }));
    }

    #[test]
    fn slide_text_decodes_entities() {
        let xml = "<p:sld><a:p><a:r><a:t>R&amp;D &#8212; Q&#x33;</a:t></a:r></a:p><a:p/></p:sld>";
        assert_eq!(slide_paragraphs(xml).unwrap(), vec!["R&D \u{2014} Q3".to_string()]);
    }

    #[tokio::test]
    async fn docx_that_is_not_a_zip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text pretending").unwrap();
        let err = WordConverter.convert(&path).await.unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { format: FormatTag::Word, .. }));
    }

    #[tokio::test]
    async fn pptx_slides_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        write_ooxml(
            &path,
            &[
                ("ppt/slides/slide10.xml", "<p:sld><a:p><a:r><a:t>Ten</a:t></a:r></a:p></p:sld>"),
                ("ppt/slides/slide2.xml", "<p:sld><a:p><a:r><a:t>Two</a:t></a:r></a:p></p:sld>"),
                (
                    "ppt/slides/slide1.xml",
                    "<p:sld><a:p><a:r><a:t>Hello </a:t></a:r><a:r><a:t>world</a:t></a:r></a:p></p:sld>",
                ),
                ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
            ],
        );

        let md = PptConverter.convert(&path).await.unwrap();
        let one = md.find("## Slide 1").unwrap();
        let two = md.find("## Slide 2").unwrap();
        let ten = md.find("## Slide 10").unwrap();
        assert!(one < two && two < ten);
        assert!(md.contains("Hello world"));
    }

    #[tokio::test]
    async fn legacy_doc_scrapes_utf16_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.doc");
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        for unit in "Meeting minutes for March".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, &bytes).unwrap();

        let md = WordConverter.convert(&path).await.unwrap();
        assert!(md.starts_with("# old.doc\n\n"));
        assert!(md.contains("Meeting minutes for March"));
    }

    #[tokio::test]
    async fn legacy_ppt_without_ole_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.ppt");
        std::fs::write(&path, b"nope").unwrap();
        let err = PptConverter.convert(&path).await.unwrap_err();
        assert!(err.to_string().contains("OLE"));
    }

    #[test]
    fn heading_levels() {
        assert_eq!(heading_level("Heading2"), Some(2));
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Heading9"), None);
        assert_eq!(heading_level("Normal"), None);
    }

    #[tokio::test]
    async fn excel_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();
        let err = ExcelConverter.convert(&path).await.unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { format: FormatTag::Excel, .. }));
    }
}
