//! Request-scoped types for proposal generation. Nothing here is persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which response shape the endpoint produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputContract {
    /// `[{"title", "content": [{"type", "data"}]}]` as JSON.
    #[default]
    StructuredJson,
    /// Whole HTML-tagged text, `text/plain`.
    HtmlText,
    /// `{"response": "..."}`.
    PlainText,
    /// HTML-tagged text delivered fragment by fragment, `text/plain`.
    StreamedText,
}

impl OutputContract {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputContract::StructuredJson => "structured_json",
            OutputContract::HtmlText => "html_text",
            OutputContract::PlainText => "plain_text",
            OutputContract::StreamedText => "streamed_text",
        }
    }

    /// Whether the completion API should be asked for a JSON object.
    pub fn wants_json(&self) -> bool {
        matches!(self, OutputContract::StructuredJson)
    }
}

impl fmt::Display for OutputContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputContract {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured_json" | "json" => Ok(OutputContract::StructuredJson),
            "html_text" | "html" => Ok(OutputContract::HtmlText),
            "plain_text" | "plain" | "text" => Ok(OutputContract::PlainText),
            "streamed_text" | "stream" => Ok(OutputContract::StreamedText),
            other => Err(format!(
                "unknown output contract '{other}' (expected structured_json, html_text, plain_text or streamed_text)"
            )),
        }
    }
}

/// What to do when text cannot be extracted from the upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractionFailurePolicy {
    /// Forward `Error reading file: <cause>` into the prompt and carry on.
    #[default]
    Embed,
    /// Abort the request with 422.
    Reject,
}

impl FromStr for ExtractionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embed" => Ok(ExtractionFailurePolicy::Embed),
            "reject" => Ok(ExtractionFailurePolicy::Reject),
            other => Err(format!(
                "unknown extraction failure policy '{other}' (expected embed or reject)"
            )),
        }
    }
}

/// One section of a structured proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSection {
    pub title: String,
    pub content: Vec<ContentBlock>,
}

/// A typed content block: `{"type": "paragraph", "data": "..."}` or
/// `{"type": "list", "data": ["...", "..."]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ContentBlock {
    Paragraph(String),
    List(Vec<String>),
}

/// Shapes the model may use for structured output. JSON-object mode forces an
/// object, so `{"sections": [...]}` is accepted alongside a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StructuredReply {
    Sections(Vec<ProposalSection>),
    Wrapped { sections: Vec<ProposalSection> },
}

impl StructuredReply {
    pub(crate) fn into_sections(self) -> Vec<ProposalSection> {
        match self {
            StructuredReply::Sections(sections) => sections,
            StructuredReply::Wrapped { sections } => sections,
        }
    }
}

/// `{"response": "..."}` body of the plain-text contract.
#[derive(Debug, Serialize)]
pub struct PlainResponse {
    pub response: String,
}
