// Prompt templates for proposal generation, one per output contract.
//
// The company description and the extracted document are inserted verbatim.
// Nothing guards against instructions hidden inside an uploaded RFP (prompt
// injection); the model sees the document as ordinary prompt text. Treat the
// output as untrusted.

use crate::llm_client::prompts::{fill_template, HTML_ONLY_INSTRUCTION, JSON_ONLY_INSTRUCTION};
use crate::proposal::models::OutputContract;

const WRITER_ROLE: &str = "You are a professional proposal writer.";

/// Sections every generated proposal must contain, in order.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "Executive Summary",
    "Project Approach",
    "Pricing and Deliverables",
    "Conclusion",
];

/// Structured proposal template. Replace `{description}`, `{sections}`, `{extracted_text}`.
pub const STRUCTURED_PROMPT_TEMPLATE: &str = r#"Company Description: {description}

You are a professional proposal writer. Your task is to generate a well-structured RFP (Request for Proposal) response tailored to the company's description and tone.

Return a JSON object with this EXACT schema (no extra fields):
{
  "sections": [
    {
      "title": "Executive Summary",
      "content": [
        { "type": "paragraph", "data": "Our company brings 10+ years of expertise in software development..." },
        { "type": "list", "data": ["Custom AI-driven solutions", "Proven track record in RFP responses"] }
      ]
    }
  ]
}

Rules:
- "type" is either "paragraph" (then "data" is a string) or "list" (then "data" is an array of strings).
- Include these sections, in this order: {sections}.

RFP content to respond to:
{extracted_text}

Keep the response well-organized, professional, and aligned with best practices for proposal writing."#;

/// HTML proposal template. Replace `{description}`, `{sections}`, `{extracted_text}`.
pub const HTML_PROMPT_TEMPLATE: &str = r#"Company Description: {description}

You are a professional proposal writer. Write an RFP (Request for Proposal) response tailored to the company's description and tone.

Format the response as an HTML fragment:
- one <h2> heading per section, followed by <p> paragraphs and <ul>/<li> lists;
- include these sections, in this order: {sections}.

RFP content to respond to:
{extracted_text}"#;

/// Plain-text proposal template. Replace `{description}`, `{extracted_text}`.
pub const PLAIN_PROMPT_TEMPLATE: &str = r#"Company Description: {description}

Write a professional response to the following RFP (Request for Proposal), tailored to the company above. Cover the executive summary, the project approach, pricing and deliverables, and a conclusion. Use plain prose without markup.

RFP content to respond to:
{extracted_text}"#;

/// A prompt ready to send: the fixed system instruction plus the user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalPrompt {
    pub system: String,
    pub user: String,
}

/// Builds the prompt for `contract`. Deterministic for equal inputs.
pub fn build_prompt(
    contract: OutputContract,
    description: &str,
    extracted_text: &str,
) -> ProposalPrompt {
    let sections = REQUIRED_SECTIONS.join(", ");
    let values = [
        ("description", description),
        ("sections", sections.as_str()),
        ("extracted_text", extracted_text),
    ];

    match contract {
        OutputContract::StructuredJson => ProposalPrompt {
            system: format!(
                "You are an expert at writing RFP responses in structured JSON format. {JSON_ONLY_INSTRUCTION}"
            ),
            user: fill_template(STRUCTURED_PROMPT_TEMPLATE, &values),
        },
        OutputContract::HtmlText | OutputContract::StreamedText => ProposalPrompt {
            system: format!("{WRITER_ROLE} {HTML_ONLY_INSTRUCTION}"),
            user: fill_template(HTML_PROMPT_TEMPLATE, &values),
        },
        OutputContract::PlainText => ProposalPrompt {
            system: WRITER_ROLE.to_string(),
            user: fill_template(PLAIN_PROMPT_TEMPLATE, &values),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = "Acme Builders, bridges since 1990, formal tone.";
    const RFP: &str = "The city seeks bids for a 200m pedestrian bridge.";

    #[test]
    fn test_structured_prompt_embeds_inputs_and_schema() {
        let prompt = build_prompt(OutputContract::StructuredJson, DESCRIPTION, RFP);

        assert!(prompt.user.starts_with(&format!("Company Description: {DESCRIPTION}")));
        assert!(prompt.user.contains(RFP));
        assert!(prompt.user.contains(r#""sections": ["#));
        assert!(prompt.user.contains(
            "Executive Summary, Project Approach, Pricing and Deliverables, Conclusion"
        ));
        assert!(prompt.system.contains("valid JSON only"));
        assert!(!prompt.user.contains("{extracted_text}"));
    }

    #[test]
    fn test_html_and_streamed_share_the_html_prompt() {
        let html = build_prompt(OutputContract::HtmlText, DESCRIPTION, RFP);
        let streamed = build_prompt(OutputContract::StreamedText, DESCRIPTION, RFP);

        assert_eq!(html, streamed);
        assert!(html.system.contains("<h2>"));
        assert!(html.user.contains(RFP));
    }

    #[test]
    fn test_plain_prompt_has_no_markup_instructions() {
        let prompt = build_prompt(OutputContract::PlainText, DESCRIPTION, RFP);

        assert!(!prompt.system.contains("JSON"));
        assert!(!prompt.system.contains("<h2>"));
        assert!(prompt.user.contains(DESCRIPTION));
        assert!(prompt.user.ends_with(RFP));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_prompt(OutputContract::StructuredJson, DESCRIPTION, RFP);
        let b = build_prompt(OutputContract::StructuredJson, DESCRIPTION, RFP);
        assert_eq!(a, b);
    }

    #[test]
    fn test_placeholder_text_in_description_is_not_expanded() {
        let prompt = build_prompt(OutputContract::PlainText, "{extracted_text}", RFP);
        assert!(prompt.user.starts_with("Company Description: {extracted_text}"));
        assert_eq!(prompt.user.matches(RFP).count(), 1);
    }
}
