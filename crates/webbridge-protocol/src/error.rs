use thiserror::Error;

/// Errors raised while turning an inbound request into a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("messages cannot be empty")]
    EmptyMessages,

    #[error("prompt cannot be empty")]
    EmptyPrompt,
}
