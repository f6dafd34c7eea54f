//! Text extraction. Turns a saved upload into UTF-8 text, dispatched on the
//! file extension. Extractors are synchronous and run on the blocking pool.

use std::path::{Path, PathBuf};

use docx_rust::document::{
    BodyContent, ParagraphContent, RunContent, TableCellContent, TableRowContent,
};
use docx_rust::DocxFile;
use thiserror::Error;
use tracing::debug;

/// Prefix of the text forwarded into the prompt when extraction fails.
pub const EXTRACTION_ERROR_PREFIX: &str = "Error reading file:";

/// Extensions decoded as UTF-8 text without further parsing.
const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "html", "htm", "rtf", "log",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type '{0}'")]
    UnsupportedFormat(String),

    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is not valid UTF-8 text: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("could not parse PDF: {0}")]
    Pdf(String),

    #[error("could not parse DOCX: {0}")]
    Docx(String),

    #[error("extractor crashed: {0}")]
    Crashed(String),
}

impl ExtractionError {
    /// Short machine-readable name, used in the `x-extraction-warning` header.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::UnsupportedFormat(_) => "unsupported_format",
            ExtractionError::Io(_) => "io",
            ExtractionError::Decode(_) => "decode",
            ExtractionError::Pdf(_) => "pdf",
            ExtractionError::Docx(_) => "docx",
            ExtractionError::Crashed(_) => "crashed",
        }
    }

    /// The text that stands in for the document when extraction fails.
    pub fn placeholder(&self) -> String {
        format!("{EXTRACTION_ERROR_PREFIX} {self}")
    }
}

/// Extracts text from `path` without blocking the async runtime.
/// A panic inside an extractor is reported as [`ExtractionError::Crashed`].
pub async fn extract_text(path: &Path) -> Result<String, ExtractionError> {
    let owned: PathBuf = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extract_text_blocking(&owned))
        .await
        .map_err(|e| ExtractionError::Crashed(e.to_string()))??;

    debug!("Extracted {} chars from {}", text.len(), path.display());
    Ok(text)
}

fn extract_text_blocking(path: &Path) -> Result<String, ExtractionError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => pdf_extract::extract_text(path).map_err(|e| ExtractionError::Pdf(e.to_string())),
        "docx" => extract_docx(path),
        ext if PLAIN_TEXT_EXTENSIONS.contains(&ext) => {
            let bytes = std::fs::read(path)?;
            Ok(String::from_utf8(bytes)?)
        }
        "" => Err(ExtractionError::UnsupportedFormat("(none)".to_string())),
        other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_docx(path: &Path) -> Result<String, ExtractionError> {
    let file = DocxFile::from_file(path).map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let docx = file.parse().map_err(|e| ExtractionError::Docx(e.to_string()))?;

    let mut lines: Vec<String> = Vec::new();
    for content in &docx.document.body.content {
        collect_body_text(content, &mut lines);
    }
    Ok(lines.join("\n"))
}

fn collect_body_text(content: &BodyContent, lines: &mut Vec<String>) {
    match content {
        BodyContent::Paragraph(para) => {
            let text = paragraph_text(para);
            if !text.trim().is_empty() {
                lines.push(text);
            }
        }
        BodyContent::Table(table) => {
            for row in &table.rows {
                let mut cells: Vec<String> = Vec::new();
                for cell_content in &row.cells {
                    if let TableRowContent::TableCell(cell) = cell_content {
                        for tc in &cell.content {
                            let TableCellContent::Paragraph(para) = tc;
                            let text = paragraph_text(para);
                            if !text.trim().is_empty() {
                                cells.push(text.trim().to_string());
                            }
                        }
                    }
                }
                if !cells.is_empty() {
                    lines.push(cells.join(" | "));
                }
            }
        }
        BodyContent::Sdt(sdt) => {
            if let Some(ref sdt_content) = sdt.content {
                for item in &sdt_content.content {
                    collect_body_text(item, lines);
                }
            }
        }
        _ => {}
    }
}

fn paragraph_text(para: &docx_rust::document::Paragraph) -> String {
    let mut text = String::new();
    for pc in &para.content {
        let run = match pc {
            ParagraphContent::Run(run) => Some(run),
            ParagraphContent::Link(link) => link.content.as_ref(),
            _ => None,
        };
        let Some(run) = run else { continue };
        for rc in &run.content {
            match rc {
                RunContent::Text(t) => text.push_str(&t.text),
                RunContent::Break(_) => text.push('\n'),
                RunContent::Tab(_) => text.push('\t'),
                _ => {}
            }
        }
    }
    text
}
