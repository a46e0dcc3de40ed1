//! In-process completion provider for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::prompt::ITEMS_MARKER;
use crate::provider::{CompletionProvider, CompletionRequest};

/// Answers each request with a closure and records what it was asked.
pub(crate) struct ScriptedProvider<F> {
    respond: F,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl<F> ScriptedProvider<F>
where
    F: Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync,
{
    pub(crate) fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> CompletionProvider for ScriptedProvider<F>
where
    F: Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync,
{
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let reply = (self.respond)(&request);
        self.calls.lock().unwrap().push(request);
        reply
    }
}

/// Items embedded in a batch prompt.
pub(crate) fn batch_items(request: &CompletionRequest) -> Vec<Value> {
    let (_, json) = request.prompt.split_once(ITEMS_MARKER).unwrap();
    serde_json::from_str(json).unwrap()
}

/// Rate text of a single-item prompt.
pub(crate) fn single_rate_text(request: &CompletionRequest) -> &str {
    request
        .prompt
        .lines()
        .find_map(|l| l.strip_prefix("Rate text: "))
        .unwrap()
}
