//! Webbridge Server - OpenAI-compatible HTTP front for browser-driven backends
//!
//! Serves `/v1/chat/completions` and `/v1/completions` (JSON or SSE) by
//! typing prompts into the Claude and Copilot web apps and relaying what
//! appears on the page.

pub mod error;
pub mod server;
pub mod setup;

pub use error::ApiError;
pub use server::WebbridgeServer;
pub use setup::{build_bridge, build_bridge_with};
