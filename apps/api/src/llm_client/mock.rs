//! In-process `CompletionClient` for tests. Records every request it receives.

use std::sync::Mutex;

use async_trait::async_trait;

use super::stream::from_fragments;
use super::{CompletionClient, CompletionRequest, FragmentStream, LlmError};

#[derive(Debug, Clone)]
pub enum MockReply {
    /// `complete` returns this text; `stream` yields it as one fragment.
    Text(String),
    /// `stream` yields these fragments; `complete` returns them joined.
    Fragments(Vec<String>),
    /// Replies with the user prompt it was given.
    EchoPrompt,
    /// Every call fails with `LlmError::Api { status, .. }`.
    ApiFailure(u16),
    /// Every call fails with `LlmError::Timeout`.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub prompt: String,
    pub json_mode: bool,
    pub streamed: bool,
}

#[derive(Debug)]
pub struct MockCompletion {
    reply: MockReply,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockCompletion {
    pub fn new(reply: MockReply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn text(reply: &str) -> Self {
        Self::new(MockReply::Text(reply.to_string()))
    }

    pub fn fragments(fragments: &[&str]) -> Self {
        Self::new(MockReply::Fragments(
            fragments.iter().map(|f| f.to_string()).collect(),
        ))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: &CompletionRequest<'_>, streamed: bool) {
        self.requests.lock().unwrap().push(RecordedRequest {
            system: request.system.to_string(),
            prompt: request.prompt.to_string(),
            json_mode: request.json_mode,
            streamed,
        });
    }

    fn failure(&self) -> Option<LlmError> {
        match self.reply {
            MockReply::ApiFailure(status) => Some(LlmError::Api {
                status,
                message: "mock failure".to_string(),
            }),
            MockReply::Timeout => Some(LlmError::Timeout { secs: 1 }),
            _ => None,
        }
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        self.record(&request, false);
        if let Some(e) = self.failure() {
            return Err(e);
        }
        match &self.reply {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fragments(fragments) => Ok(fragments.concat()),
            MockReply::EchoPrompt => Ok(request.prompt.to_string()),
            _ => Err(LlmError::EmptyContent),
        }
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<FragmentStream, LlmError> {
        self.record(&request, true);
        if let Some(e) = self.failure() {
            return Err(e);
        }
        match &self.reply {
            MockReply::Text(text) => Ok(from_fragments(vec![text.clone()])),
            MockReply::Fragments(fragments) => Ok(from_fragments(fragments.clone())),
            MockReply::EchoPrompt => Ok(from_fragments(vec![request.prompt.to_string()])),
            _ => Err(LlmError::EmptyContent),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
