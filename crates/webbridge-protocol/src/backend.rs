//! Backend routing and the request model handed to the bridge.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::openai::{ChatCompletionRequest, CompletionRequest, ModelCard, ModelList};
use crate::prompt::{extract_code_context, format_chat_prompt, split_language_directive};

/// The web surface a request is driven against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Free-form chat on the Claude web app.
    ClaudeChat,
    /// Code completion in the GitHub Copilot editor.
    CopilotCode,
}

const CLAUDE_PREFIX: &str = "web_claude";
const COPILOT_PREFIX: &str = "web_copilot";

/// Model identifiers advertised on `/v1/models`.
pub const MODEL_IDS: &[(&str, Backend)] = &[
    ("web_claude", Backend::ClaudeChat),
    ("web_claude/chat", Backend::ClaudeChat),
    ("web_copilot", Backend::CopilotCode),
    ("web_copilot/github", Backend::CopilotCode),
];

impl Backend {
    /// Resolve a backend from an OpenAI `model` field by prefix.
    pub fn from_model(model: &str) -> Result<Self, ProtocolError> {
        if model.starts_with(CLAUDE_PREFIX) {
            Ok(Self::ClaudeChat)
        } else if model.starts_with(COPILOT_PREFIX) {
            Ok(Self::CopilotCode)
        } else {
            Err(ProtocolError::UnsupportedModel(model.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeChat => "claude_chat",
            Self::CopilotCode => "copilot_code",
        }
    }

    /// Vendor reported as `owned_by` on the model list.
    pub fn owner(&self) -> &'static str {
        match self {
            Self::ClaudeChat => "anthropic",
            Self::CopilotCode => "github",
        }
    }

    /// Service name understood by the interactive login command.
    pub fn login_service(&self) -> &'static str {
        match self {
            Self::ClaudeChat => "claude",
            Self::CopilotCode => "github",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static catalogue for `GET /v1/models`.
pub fn model_list(created: i64) -> ModelList {
    ModelList {
        object: "list".to_string(),
        data: MODEL_IDS
            .iter()
            .map(|(id, backend)| ModelCard {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: backend.owner().to_string(),
            })
            .collect(),
    }
}

/// One prompt to submit into a web surface.
///
/// Built per inbound HTTP call and discarded once the response completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub backend: Backend,
    /// Model identifier echoed back in responses.
    pub model: String,
    /// Flattened prompt text typed into the page.
    pub prompt: String,
    /// Editor language for code completion backends.
    pub language: Option<String>,
    pub stream: bool,
}

impl GenerationRequest {
    pub fn from_chat(request: &ChatCompletionRequest) -> Result<Self, ProtocolError> {
        let backend = Backend::from_model(&request.model)?;
        if request.messages.is_empty() {
            return Err(ProtocolError::EmptyMessages);
        }

        let (prompt, language) = match backend {
            Backend::ClaudeChat => (format_chat_prompt(&request.messages), None),
            Backend::CopilotCode => {
                let (context, language) = extract_code_context(&request.messages);
                (context, Some(language))
            }
        };
        if prompt.trim().is_empty() {
            return Err(ProtocolError::EmptyPrompt);
        }

        Ok(Self {
            backend,
            model: request.model.clone(),
            prompt,
            language,
            stream: request.stream,
        })
    }

    pub fn from_completion(request: &CompletionRequest) -> Result<Self, ProtocolError> {
        let backend = Backend::from_model(&request.model)?;
        let raw = request.prompt.to_plaintext();
        if raw.trim().is_empty() {
            return Err(ProtocolError::EmptyPrompt);
        }

        let (prompt, language) = match backend {
            Backend::ClaudeChat => (raw, None),
            Backend::CopilotCode => {
                let (context, language) = split_language_directive(&raw);
                (context, Some(language))
            }
        };

        Ok(Self {
            backend,
            model: request.model.clone(),
            prompt,
            language,
            stream: request.stream,
        })
    }
}
