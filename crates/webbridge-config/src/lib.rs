pub mod loader;
pub mod schema;

pub use loader::{
    find_config_file, load_config, load_config_from_file, resolve_config, ConfigFormat,
    ResolvedConfig,
};
pub use schema::{
    BackendSettings, BrowserConfig, ClaudeSettings, CopilotSettings, LoginConfig, ServerSettings,
    WebbridgeConfig,
};
