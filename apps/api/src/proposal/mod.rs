// RFP proposal generation.
// Implements: upload ingestion, text extraction, prompt construction,
// completion call and response shaping for POST /process_rfp/.
// All completion calls go through llm_client.

pub mod extract;
pub mod generator;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod upload;
