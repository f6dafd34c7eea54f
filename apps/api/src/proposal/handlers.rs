//! Axum route handler for the proposal endpoint.

use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection,
        rejection::QueryRejection,
        Multipart, Query, State,
    },
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::proposal::generator::{generate_proposal, prepare_document, ProposalOutput};
use crate::proposal::models::{OutputContract, PlainResponse};
use crate::proposal::prompts::build_prompt;
use crate::proposal::upload::receive_upload;
use crate::state::AppState;

/// Set when extraction failed and a placeholder was sent to the model instead.
pub const EXTRACTION_WARNING_HEADER: &str = "x-extraction-warning";

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct ProcessRfpQuery {
    /// Overrides the configured output contract for this request.
    pub format: Option<String>,
}

/// POST /process_rfp/
///
/// Multipart form with `file` (the RFP document) and `description` (the
/// company). Responds with a proposal in the selected output contract.
/// Extractor rejections are reported through `AppError` like every other failure.
pub async fn handle_process_rfp(
    State(state): State<AppState>,
    query: Result<Query<ProcessRfpQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;
    let multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;

    let contract = match query.format.as_deref() {
        Some(raw) => raw.parse::<OutputContract>().map_err(AppError::Validation)?,
        None => state.config.output_contract,
    };

    let upload = receive_upload(multipart, &state.config.upload_dir).await?;
    info!(
        "Received RFP '{}' ({contract} requested)",
        upload.original_name
    );

    let document =
        prepare_document(upload.file, state.config.extraction_failure_policy).await?;
    let prompt = build_prompt(contract, &upload.description, &document.text);

    let output = generate_proposal(state.llm.as_ref(), contract, &prompt).await?;

    let mut response = match output {
        ProposalOutput::Sections(sections) => Json(sections).into_response(),
        ProposalOutput::Html(html) => {
            ([(header::CONTENT_TYPE, TEXT_PLAIN_UTF8)], html).into_response()
        }
        ProposalOutput::Plain(text) => Json(PlainResponse { response: text }).into_response(),
        ProposalOutput::Stream(fragments) => {
            let body = fragments
                .map_ok(Bytes::from)
                .inspect_err(|e| warn!("Completion stream failed mid-response: {e}"));
            (
                [(header::CONTENT_TYPE, TEXT_PLAIN_UTF8)],
                Body::from_stream(body),
            )
                .into_response()
        }
    };

    if let Some(err) = &document.extraction_error {
        response.headers_mut().insert(
            HeaderName::from_static(EXTRACTION_WARNING_HEADER),
            HeaderValue::from_static(err.kind()),
        );
    }

    Ok(response)
}
