use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main webbridge configuration
///
/// Configuration is loaded from (in priority order):
/// 1. `webbridge.jsonc` - JSON with comments
/// 2. `webbridge.json` - Standard JSON
/// 3. `webbridge.yml` / `webbridge.yaml` - YAML format
///
/// Also checks hidden variants (`.webbridge.*`) and `~/.config/webbridge/`
/// for a global config. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebbridgeConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Browser launch settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Claude web chat backend
    #[serde(default)]
    pub claude: ClaudeSettings,

    /// GitHub Copilot editor backend
    #[serde(default)]
    pub copilot: CopilotSettings,

    /// Interactive login used when a request carries no cookies
    #[serde(default)]
    pub login: LoginConfig,
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP listener settings
///
/// # Example
///
/// ```yaml
/// server:
///   host: 0.0.0.0
///   port: 8080
///   max_sessions: 16
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port (default: 8080)
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Upper bound on live browser sessions (default: 16)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_max_sessions() -> usize {
    16
}

// ============================================================================
// Browser Configuration
// ============================================================================

/// Browser launch settings
///
/// # Example
///
/// ```yaml
/// browser:
///   headless: false
///   executable: /usr/bin/chromium
///   user_data_dir: ~/.webbridge/browser
///   debug_screenshots: true
///   screenshot_dir: ./screenshots
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run without a visible window (default: true)
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Chrome/Chromium binary; autodetected when unset
    #[serde(default)]
    pub executable: Option<String>,

    /// Root for per-session browser profiles
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: String,

    /// Save a screenshot when initialization or submission fails (default: false)
    #[serde(default)]
    pub debug_screenshots: bool,

    /// Where debug screenshots go (default: ./screenshots)
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            executable: None,
            user_data_dir: default_user_data_dir(),
            debug_screenshots: false,
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

impl BrowserConfig {
    pub fn user_data_path(&self) -> PathBuf {
        expand_home(&self.user_data_dir)
    }

    /// Screenshot directory, or `None` when debug screenshots are off.
    pub fn screenshot_path(&self) -> Option<PathBuf> {
        self.debug_screenshots
            .then(|| expand_home(&self.screenshot_dir))
    }
}

fn default_headless() -> bool {
    true
}

fn default_user_data_dir() -> String {
    "~/.webbridge/browser".to_string()
}

fn default_screenshot_dir() -> String {
    "./screenshots".to_string()
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Resolved per-backend page and polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub url: String,
    pub cookie_domain: String,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub start_grace: Duration,
    pub timeout: Duration,
}

/// Claude web chat settings
///
/// # Example
///
/// ```yaml
/// claude:
///   url: https://claude.ai/chat
///   timeout_secs: 180
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSettings {
    /// Page opened on session start (default: https://claude.ai/chat)
    #[serde(default = "default_claude_url")]
    pub url: String,

    /// Domain the caller's cookies are set on (default: .claude.ai)
    #[serde(default = "default_claude_cookie_domain")]
    pub cookie_domain: String,

    /// DOM sampling interval (default: 500)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait before confirming a not-busy reading (default: 1000)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Window after submit in which an empty idle page is not trusted (default: 5000)
    #[serde(default = "default_claude_start_grace_ms")]
    pub start_grace_ms: u64,

    /// Hard deadline per generation (default: 120)
    #[serde(default = "default_claude_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            url: default_claude_url(),
            cookie_domain: default_claude_cookie_domain(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            start_grace_ms: default_claude_start_grace_ms(),
            timeout_secs: default_claude_timeout(),
        }
    }
}

impl ClaudeSettings {
    pub fn resolve(&self) -> BackendSettings {
        BackendSettings {
            url: self.url.clone(),
            cookie_domain: self.cookie_domain.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            start_grace: Duration::from_millis(self.start_grace_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_claude_url() -> String {
    "https://claude.ai/chat".to_string()
}

fn default_claude_cookie_domain() -> String {
    ".claude.ai".to_string()
}

fn default_claude_start_grace_ms() -> u64 {
    5000
}

fn default_claude_timeout() -> u64 {
    120
}

/// GitHub Copilot editor settings
///
/// # Example
///
/// ```yaml
/// copilot:
///   timeout_secs: 45
///   poll_interval_ms: 250
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotSettings {
    /// Page opened on session start (default: https://github.com/features/copilot)
    #[serde(default = "default_copilot_url")]
    pub url: String,

    /// Domain the caller's cookies are set on (default: .github.com)
    #[serde(default = "default_copilot_cookie_domain")]
    pub cookie_domain: String,

    /// DOM sampling interval (default: 500)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait before confirming a not-busy reading (default: 1000)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Window after submit in which an empty idle page is not trusted (default: 3000)
    #[serde(default = "default_copilot_start_grace_ms")]
    pub start_grace_ms: u64,

    /// Hard deadline per generation (default: 30)
    #[serde(default = "default_copilot_timeout")]
    pub timeout_secs: u64,
}

impl Default for CopilotSettings {
    fn default() -> Self {
        Self {
            url: default_copilot_url(),
            cookie_domain: default_copilot_cookie_domain(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            start_grace_ms: default_copilot_start_grace_ms(),
            timeout_secs: default_copilot_timeout(),
        }
    }
}

impl CopilotSettings {
    pub fn resolve(&self) -> BackendSettings {
        BackendSettings {
            url: self.url.clone(),
            cookie_domain: self.cookie_domain.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            start_grace: Duration::from_millis(self.start_grace_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_copilot_url() -> String {
    "https://github.com/features/copilot".to_string()
}

fn default_copilot_cookie_domain() -> String {
    ".github.com".to_string()
}

fn default_copilot_start_grace_ms() -> u64 {
    3000
}

fn default_copilot_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    1000
}

// ============================================================================
// Login Configuration
// ============================================================================

/// Interactive login command
///
/// The command is run as `<command> <args...> -service <claude|github> -output <file>`
/// and must write the session cookies as JSON to `<file>`.
///
/// # Example
///
/// ```yaml
/// login:
///   command: python3
///   args: ["login.py"]
///   cookie_dir: ~/.webbridge/cookies
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Program to run; login is disabled when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments placed before `-service`
    #[serde(default)]
    pub args: Vec<String>,

    /// Where cookie files are written (default: .)
    #[serde(default = "default_cookie_dir")]
    pub cookie_dir: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cookie_dir: default_cookie_dir(),
        }
    }
}

impl LoginConfig {
    pub fn cookie_path(&self) -> PathBuf {
        expand_home(&self.cookie_dir)
    }
}

fn default_cookie_dir() -> String {
    ".".to_string()
}

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}
