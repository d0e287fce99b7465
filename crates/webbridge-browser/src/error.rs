use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Input dispatch failed: {0}")]
    Input(String),

    #[error("Failed to set cookies: {0}")]
    Cookie(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Not logged in: {0}")]
    NotLoggedIn(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Browser page is gone")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    /// True when the page or browser process behind a probe no longer exists,
    /// meaning the owning session cannot be reused.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
