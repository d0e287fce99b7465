//! Webbridge Core - turning a scraped web page into an OpenAI stream
//!
//! - [`GenerationMonitor`]: polls a page until the answer settles or times out
//! - [`DeltaEmitter`]: converts full-text snapshots into append-only deltas
//! - [`StreamFramer`]: OpenAI envelope lifecycle for chat and legacy completions
//! - [`SessionCoordinator`]: per-credential browser sessions with exclusive use
//! - [`Bridge`]: ties them together for one request

mod bridge;
mod delta;
mod error;
mod framer;
mod monitor;
mod session;

pub use bridge::{Bridge, BridgeSettings, Generation};
pub use delta::{DeltaChunk, DeltaEmitter};
pub use error::{BridgeError, BridgeResult};
pub use framer::{AggregatedResponse, StreamEnvelope, StreamFramer, DONE_SENTINEL};
pub use monitor::{GenerationMonitor, MonitorSettings, MonitorState, Observation, Settlement};
pub use session::{Session, SessionCoordinator, SessionInfo, SessionKey, SessionLease};
