//! Webbridge Protocol - OpenAI-compatible wire types and request routing
//!
//! This crate defines the shapes exchanged with HTTP callers and the
//! request model handed to the bridge:
//! - OpenAI chat/legacy completion requests, responses and stream chunks
//! - The closed set of browser backends and model-name resolution
//! - Prompt assembly from message lists (Claude chat, Copilot code context)

mod backend;
mod error;
mod openai;
mod prompt;

pub use backend::*;
pub use error::*;
pub use openai::*;
pub use prompt::*;
