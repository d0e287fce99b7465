//! OpenAI stream lifecycle: one role envelope, content envelopes, one
//! terminal envelope, then the `[DONE]` sentinel.

use serde::Serialize;
use webbridge_protocol::{
    ChatCompletionChunk, ChatCompletionResponse, ChunkDelta, CompletionResponse, FinishReason,
    ResponseKind, Role, Usage,
};

use crate::delta::DeltaChunk;

/// SSE payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnvelope {
    Role,
    Content(String),
    Finish(FinishReason),
    Done,
}

/// Applies the envelope lifecycle to a chunk sequence and renders
/// envelopes in the chat or legacy completion shape.
#[derive(Debug)]
pub struct StreamFramer {
    kind: ResponseKind,
    model: String,
    role_sent: bool,
    finished: bool,
}

impl StreamFramer {
    pub fn new(kind: ResponseKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            role_sent: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Envelopes for one chunk. Empty deltas produce no content envelope,
    /// and nothing is produced once the stream has finished.
    pub fn frame(&mut self, chunk: DeltaChunk) -> Vec<StreamEnvelope> {
        if self.finished {
            return Vec::new();
        }

        let mut envelopes = Vec::with_capacity(4);
        if !self.role_sent {
            self.role_sent = true;
            envelopes.push(StreamEnvelope::Role);
        }
        if !chunk.text.is_empty() {
            envelopes.push(StreamEnvelope::Content(chunk.text));
        }
        if chunk.is_final {
            envelopes.extend(self.close(chunk.finish.unwrap_or(FinishReason::Stop)));
        }
        envelopes
    }

    /// Terminate the stream without a final chunk, e.g. after an upstream
    /// error mid-stream. Still honours the role-first rule.
    pub fn close(&mut self, finish: FinishReason) -> Vec<StreamEnvelope> {
        if self.finished {
            return Vec::new();
        }
        let mut envelopes = Vec::with_capacity(3);
        if !self.role_sent {
            self.role_sent = true;
            envelopes.push(StreamEnvelope::Role);
        }
        self.finished = true;
        envelopes.push(StreamEnvelope::Finish(finish));
        envelopes.push(StreamEnvelope::Done);
        envelopes
    }

    /// SSE `data:` payload for an envelope. Each call mints a fresh id and
    /// timestamp.
    pub fn render(&self, envelope: &StreamEnvelope) -> serde_json::Result<String> {
        match (self.kind, envelope) {
            (_, StreamEnvelope::Done) => Ok(DONE_SENTINEL.to_string()),
            (ResponseKind::Chat, StreamEnvelope::Role) => {
                let delta = ChunkDelta {
                    role: Some(Role::Assistant),
                    content: None,
                };
                serde_json::to_string(&ChatCompletionChunk::new(&self.model, delta, None))
            }
            (ResponseKind::Chat, StreamEnvelope::Content(text)) => {
                let delta = ChunkDelta {
                    role: None,
                    content: Some(text.clone()),
                };
                serde_json::to_string(&ChatCompletionChunk::new(&self.model, delta, None))
            }
            (ResponseKind::Chat, StreamEnvelope::Finish(reason)) => serde_json::to_string(
                &ChatCompletionChunk::new(&self.model, ChunkDelta::default(), Some(*reason)),
            ),
            (ResponseKind::Completion, StreamEnvelope::Role) => {
                serde_json::to_string(&CompletionResponse::new(&self.model, String::new(), None))
            }
            (ResponseKind::Completion, StreamEnvelope::Content(text)) => {
                serde_json::to_string(&CompletionResponse::new(&self.model, text.clone(), None))
            }
            (ResponseKind::Completion, StreamEnvelope::Finish(reason)) => serde_json::to_string(
                &CompletionResponse::new(&self.model, String::new(), Some(*reason)),
            ),
        }
    }

    /// Single non-streaming body carrying the full text.
    pub fn aggregate(&self, text: String, finish: FinishReason) -> AggregatedResponse {
        match self.kind {
            ResponseKind::Chat => {
                AggregatedResponse::Chat(ChatCompletionResponse::new(&self.model, text, finish))
            }
            ResponseKind::Completion => AggregatedResponse::Completion(
                CompletionResponse::new(&self.model, text, Some(finish)).with_usage(Usage::default()),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AggregatedResponse {
    Chat(ChatCompletionResponse),
    Completion(CompletionResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(framer: &mut StreamFramer, chunks: Vec<DeltaChunk>) -> Vec<StreamEnvelope> {
        chunks.into_iter().flat_map(|c| framer.frame(c)).collect()
    }

    #[test]
    fn test_lifecycle_order() {
        let mut framer = StreamFramer::new(ResponseKind::Chat, "web_claude");
        let envelopes = frame_all(
            &mut framer,
            vec![
                DeltaChunk::new("Hello", false),
                DeltaChunk::new(", wor", false),
                DeltaChunk::new("ld", true),
            ],
        );

        assert_eq!(
            envelopes,
            vec![
                StreamEnvelope::Role,
                StreamEnvelope::Content("Hello".into()),
                StreamEnvelope::Content(", wor".into()),
                StreamEnvelope::Content("ld".into()),
                StreamEnvelope::Finish(FinishReason::Stop),
                StreamEnvelope::Done,
            ]
        );
        assert!(framer.is_finished());
    }

    #[test]
    fn test_empty_deltas_produce_no_content() {
        let mut framer = StreamFramer::new(ResponseKind::Chat, "web_claude");
        let envelopes = frame_all(
            &mut framer,
            vec![
                DeltaChunk::new("", false),
                DeltaChunk::new("", false),
                DeltaChunk::new("", true),
            ],
        );

        assert_eq!(
            envelopes,
            vec![
                StreamEnvelope::Role,
                StreamEnvelope::Finish(FinishReason::Stop),
                StreamEnvelope::Done,
            ]
        );
    }

    #[test]
    fn test_nothing_after_finish() {
        let mut framer = StreamFramer::new(ResponseKind::Chat, "web_claude");
        framer.frame(DeltaChunk::new("a", true));
        assert!(framer.frame(DeltaChunk::new("b", false)).is_empty());
        assert!(framer.close(FinishReason::Stop).is_empty());
    }

    #[test]
    fn test_close_before_any_chunk_still_announces_role() {
        let mut framer = StreamFramer::new(ResponseKind::Chat, "web_claude");
        assert_eq!(
            framer.close(FinishReason::Timeout),
            vec![
                StreamEnvelope::Role,
                StreamEnvelope::Finish(FinishReason::Timeout),
                StreamEnvelope::Done,
            ]
        );
    }

    #[test]
    fn test_render_chat_envelopes() {
        let framer = StreamFramer::new(ResponseKind::Chat, "web_claude");

        let role: serde_json::Value =
            serde_json::from_str(&framer.render(&StreamEnvelope::Role).unwrap()).unwrap();
        assert_eq!(role["object"], "chat.completion.chunk");
        assert_eq!(role["choices"][0]["delta"]["role"], "assistant");
        assert!(role["choices"][0]["delta"].get("content").is_none());

        let finish: serde_json::Value = serde_json::from_str(
            &framer
                .render(&StreamEnvelope::Finish(FinishReason::Timeout))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(finish["choices"][0]["finish_reason"], "timeout");

        assert_eq!(framer.render(&StreamEnvelope::Done).unwrap(), "[DONE]");
    }

    #[test]
    fn test_render_legacy_envelopes() {
        let framer = StreamFramer::new(ResponseKind::Completion, "web_copilot");

        let opening: serde_json::Value =
            serde_json::from_str(&framer.render(&StreamEnvelope::Role).unwrap()).unwrap();
        assert_eq!(opening["object"], "text_completion");
        assert_eq!(opening["choices"][0]["text"], "");

        let content: serde_json::Value = serde_json::from_str(
            &framer
                .render(&StreamEnvelope::Content("x = 1".into()))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(content["choices"][0]["text"], "x = 1");
        assert!(content["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_aggregate_shapes() {
        let chat = StreamFramer::new(ResponseKind::Chat, "web_claude")
            .aggregate("done".into(), FinishReason::Stop);
        let value = serde_json::to_value(&chat).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["content"], "done");
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");

        let legacy = StreamFramer::new(ResponseKind::Completion, "web_copilot")
            .aggregate("code".into(), FinishReason::Timeout);
        let value = serde_json::to_value(&legacy).unwrap();
        assert_eq!(value["choices"][0]["text"], "code");
        assert_eq!(value["choices"][0]["finish_reason"], "timeout");
        assert_eq!(value["usage"]["total_tokens"], 0);
    }
}
