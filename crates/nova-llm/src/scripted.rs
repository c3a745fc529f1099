//! Scripted provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::error::{LlmError, LlmResult};
use crate::provider::{LlmProvider, StreamBox};
use crate::types::{Message, StreamEvent};

/// A provider that replays canned replies and records every prompt it saw.
///
/// Tests use the recording to assert that a code path did (or did not) reach
/// the model, e.g. the RAG empty-retrieval short-circuit.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl ScriptedProvider {
    /// Empty script; calls fail with [`LlmError::ScriptExhausted`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("replies lock poisoned")
            .push_back(reply.into());
    }

    /// Queue several replies in order.
    pub fn script(replies: &[&str]) -> Self {
        let provider = Self::new();
        for reply in replies {
            provider.push_reply(*reply);
        }
        provider
    }

    /// Make every subsequent call fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().expect("fail lock poisoned") = Some(message.into());
    }

    /// All prompts seen so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock poisoned").clone()
    }

    /// Number of completions requested.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock poisoned").len()
    }

    fn record(&self, messages: &[Message]) {
        let rendered = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts
            .lock()
            .expect("prompts lock poisoned")
            .push(rendered);
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("call_count", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, messages: &[Message]) -> LlmResult<String> {
        self.record(messages);
        if let Some(message) = self.fail_with.lock().expect("fail lock poisoned").clone() {
            return Err(LlmError::ApiRequestFailed(message));
        }
        self.replies
            .lock()
            .expect("replies lock poisoned")
            .pop_front()
            .ok_or_else(|| LlmError::ScriptExhausted(self.call_count()))
    }

    async fn stream(&self, messages: &[Message]) -> LlmResult<StreamBox> {
        // Same single-yield shape as the production path's final chunk.
        let reply = self.complete(messages).await?;
        let events = vec![Ok(StreamEvent::TextDelta(reply)), Ok(StreamEvent::Done)];
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_replies_in_order() {
        let provider = ScriptedProvider::script(&["첫 번째", "두 번째"]);
        assert_eq!(provider.complete_simple("a").await.unwrap(), "첫 번째");
        assert_eq!(provider.complete_simple("b").await.unwrap(), "두 번째");
        assert!(matches!(
            provider.complete_simple("c").await,
            Err(LlmError::ScriptExhausted(_))
        ));
    }

    #[tokio::test]
    async fn records_prompts() {
        let provider = ScriptedProvider::script(&["ok"]);
        provider.complete_simple("질문입니다").await.unwrap();
        assert_eq!(provider.call_count(), 1);
        assert!(provider.prompts()[0].contains("질문입니다"));
    }

    #[tokio::test]
    async fn failure_mode_reports_api_error() {
        let provider = ScriptedProvider::script(&["unused"]);
        provider.fail_with("quota exceeded");
        let err = provider.complete_simple("x").await.unwrap_err();
        assert!(matches!(err, LlmError::ApiRequestFailed(_)));
    }

    #[tokio::test]
    async fn stream_yields_text_then_done() {
        let provider = ScriptedProvider::script(&["전체 응답"]);
        let mut stream = provider.stream(&[Message::user("hi")]).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::TextDelta("전체 응답".into())
        );
        assert_eq!(stream.next().await.unwrap().unwrap(), StreamEvent::Done);
    }
}
