//! Proposal generation: the request pipeline.
//!
//! Flow: receive upload → extract text → delete transient file →
//!       build prompt → completion call → shape result.
//!
//! One pipeline serves every output contract; only the prompt, the completion
//! mode and the result shape vary.

use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::llm_client::{strip_json_fences, CompletionClient, CompletionRequest, FragmentStream};
use crate::proposal::extract::{extract_text, ExtractionError};
use crate::proposal::models::{
    ExtractionFailurePolicy, OutputContract, ProposalSection, StructuredReply,
};
use crate::proposal::prompts::ProposalPrompt;
use crate::proposal::upload::TransientFile;

/// Text to put in the prompt, plus the extraction error it replaced, if any.
#[derive(Debug)]
pub struct PreparedDocument {
    pub text: String,
    pub extraction_error: Option<ExtractionError>,
}

/// The result of a completion call, already shaped for the chosen contract.
pub enum ProposalOutput {
    Sections(Vec<ProposalSection>),
    Html(String),
    Plain(String),
    Stream(FragmentStream),
}

/// Extracts text from the upload and deletes it, whatever the outcome.
///
/// Under [`ExtractionFailurePolicy::Embed`] a failure becomes the placeholder
/// text `Error reading file: <cause>`; under `Reject` it aborts with 422.
pub async fn prepare_document(
    upload: TransientFile,
    policy: ExtractionFailurePolicy,
) -> Result<PreparedDocument, AppError> {
    let extraction = extract_text(upload.path()).await;
    upload.remove().await;

    match extraction {
        Ok(text) => Ok(PreparedDocument {
            text,
            extraction_error: None,
        }),
        Err(e) => match policy {
            ExtractionFailurePolicy::Embed => {
                warn!("Text extraction failed, forwarding placeholder: {e}");
                Ok(PreparedDocument {
                    text: e.placeholder(),
                    extraction_error: Some(e),
                })
            }
            ExtractionFailurePolicy::Reject => {
                warn!("Text extraction failed, rejecting request: {e}");
                Err(AppError::Extraction(e.placeholder()))
            }
        },
    }
}

/// Calls the completion API in the mode `contract` needs and shapes the reply.
pub async fn generate_proposal(
    llm: &dyn CompletionClient,
    contract: OutputContract,
    prompt: &ProposalPrompt,
) -> Result<ProposalOutput, AppError> {
    let request = CompletionRequest {
        system: &prompt.system,
        prompt: &prompt.user,
        json_mode: contract.wants_json(),
    };
    info!(
        "Requesting {contract} proposal from {} ({} prompt chars)",
        llm.model(),
        prompt.user.len()
    );

    match contract {
        OutputContract::StructuredJson => {
            let text = llm.complete(request).await?;
            let sections = parse_sections(&text)?;
            info!("Proposal generated with {} sections", sections.len());
            Ok(ProposalOutput::Sections(sections))
        }
        OutputContract::HtmlText => Ok(ProposalOutput::Html(llm.complete(request).await?)),
        OutputContract::PlainText => Ok(ProposalOutput::Plain(llm.complete(request).await?)),
        OutputContract::StreamedText => Ok(ProposalOutput::Stream(llm.stream(request).await?)),
    }
}

/// Parses the model's structured output. Anything that is not a list of
/// well-formed sections is reported as [`AppError::InvalidAiResponse`].
pub fn parse_sections(text: &str) -> Result<Vec<ProposalSection>, AppError> {
    serde_json::from_str::<StructuredReply>(strip_json_fences(text))
        .map(StructuredReply::into_sections)
        .map_err(|e| {
            debug!("Structured proposal did not parse: {e}");
            AppError::InvalidAiResponse
        })
}
