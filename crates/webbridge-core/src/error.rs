use thiserror::Error;
use webbridge_browser::BrowserError;
use webbridge_protocol::ProtocolError;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Session initialization failed: {0}")]
    Initialization(String),

    #[error("Prompt submission failed: {0}")]
    Submission(String),

    #[error("Login required: {0}")]
    Login(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Maximum sessions reached (limit: {0})")]
    MaxSessionsReached(usize),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for BridgeError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::UnsupportedModel(model) => Self::UnsupportedModel(model),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl BridgeError {
    /// Errors raised while bringing up a session.
    pub(crate) fn from_bootstrap(error: BrowserError) -> Self {
        match error {
            BrowserError::InvalidCredentials(message) => Self::InvalidCredentials(message),
            other => Self::Initialization(other.to_string()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
