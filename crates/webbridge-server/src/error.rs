use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{debug, error, warn};
use webbridge_browser::BrowserError;
use webbridge_core::BridgeError;
use webbridge_protocol::{ErrorBody, ProtocolError};

/// Nginx's "client closed request"; there is no standard code for it.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// A bridge failure on its way to the HTTP caller.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub BridgeError);

impl From<ProtocolError> for ApiError {
    fn from(error: ProtocolError) -> Self {
        Self(error.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BridgeError::InvalidRequest(rejection.body_text()))
    }
}

/// Only credential parsing reaches the handlers directly.
impl From<BrowserError> for ApiError {
    fn from(error: BrowserError) -> Self {
        match error {
            BrowserError::InvalidCredentials(message) => {
                Self(BridgeError::InvalidCredentials(message))
            }
            other => Self(BridgeError::Internal(other.to_string())),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::InvalidRequest(_) | BridgeError::UnsupportedModel(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::InvalidCredentials(_) | BridgeError::Login(_) => StatusCode::UNAUTHORIZED,
            BridgeError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::MaxSessionsReached(_) => StatusCode::TOO_MANY_REQUESTS,
            BridgeError::Initialization(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Submission(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI `error.type` and `error.code` for this failure.
    fn kind_and_code(&self) -> (&'static str, &'static str) {
        match &self.0 {
            BridgeError::InvalidRequest(_) => ("invalid_request_error", "invalid_request"),
            BridgeError::UnsupportedModel(_) => ("invalid_request_error", "model_not_found"),
            BridgeError::InvalidCredentials(_) => ("authentication_error", "invalid_credentials"),
            BridgeError::Login(_) => ("authentication_error", "login_required"),
            BridgeError::SessionNotFound(_) => ("invalid_request_error", "session_not_found"),
            BridgeError::MaxSessionsReached(_) => ("rate_limit_error", "max_sessions_reached"),
            BridgeError::Initialization(_) => ("server_error", "session_initialization_failed"),
            BridgeError::Submission(_) => ("server_error", "submission_failed"),
            BridgeError::Cancelled => ("server_error", "cancelled"),
            BridgeError::Internal(_) => ("server_error", "internal_error"),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (kind, code) = self.kind_and_code();
        ErrorBody::new(self.0.to_string(), kind, Some(code))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else if self.0.is_cancelled() {
            debug!("Request cancelled by caller");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
