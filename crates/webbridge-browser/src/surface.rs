//! Per-backend page adapters.
//!
//! A surface knows the selectors and key sequences of one web UI. It holds
//! no per-session state: anything that must survive between submit and poll
//! is kept in the page itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use webbridge_protocol::{Backend, GenerationRequest};

use crate::credentials::CredentialSet;
use crate::error::{BrowserError, BrowserResult};
use crate::probe::DomProbe;

const READY_POLL: Duration = Duration::from_millis(250);

/// Where a surface lives and how long to wait for it to render.
#[derive(Debug, Clone)]
pub struct SurfaceSettings {
    pub url: String,
    pub cookie_domain: String,
    pub ready_timeout: Duration,
}

impl SurfaceSettings {
    pub fn new(url: impl Into<String>, cookie_domain: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cookie_domain: cookie_domain.into(),
            ready_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

#[async_trait]
pub trait Surface: Send + Sync {
    fn backend(&self) -> Backend;

    /// Load cookies, open the page and verify the caller is logged in.
    async fn bootstrap(&self, probe: &dyn DomProbe, credentials: &CredentialSet)
        -> BrowserResult<()>;

    /// Type the prompt into the input surface and send it.
    async fn submit(&self, probe: &dyn DomProbe, request: &GenerationRequest) -> BrowserResult<()>;

    /// Accumulated answer text for the current submission.
    async fn read_text(&self, probe: &dyn DomProbe) -> BrowserResult<String>;

    /// Whether the page shows a generation-in-progress indicator.
    async fn is_busy(&self, probe: &dyn DomProbe) -> BrowserResult<bool>;
}

/// Poll until `selector` matches or `timeout` elapses.
pub async fn wait_for_selector(
    probe: &dyn DomProbe,
    selector: &str,
    timeout: Duration,
) -> BrowserResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        match probe.locator_count(selector).await {
            Ok(count) if count > 0 => return Ok(true),
            Ok(_) => {}
            Err(e) if e.is_disconnected() => return Err(e),
            Err(e) => debug!(selector, error = %e, "Selector probe failed"),
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

fn js_string(text: &str) -> BrowserResult<String> {
    serde_json::to_string(text).map_err(|e| BrowserError::Script(e.to_string()))
}

/// Focus `selector` and insert `text` as one input event, falling back to
/// per-key typing when the page rejects `insertText`. Typing newlines key by
/// key would press Enter and send early.
async fn insert_text(probe: &dyn DomProbe, selector: &str, text: &str) -> BrowserResult<()> {
    probe.click(selector).await?;
    let script = format!("document.execCommand('insertText', false, {})", js_string(text)?);
    match probe.evaluate(&script).await {
        Ok(Value::Bool(true)) => Ok(()),
        Err(e) if e.is_disconnected() => Err(e),
        _ => probe.type_text(selector, text).await,
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        _ => String::new(),
    }
}

// ============================================================================
// Claude chat
// ============================================================================

const CLAUDE_INPUT: &str = "textarea, div[contenteditable='true']";
const CLAUDE_BUSY: &str = ".typing-indicator, .animate-pulse, [data-is-streaming='true']";

const CLAUDE_LOGIN_PROMPT: &str = r#"Array.from(document.querySelectorAll('a, button'))
    .some(el => (el.innerText || '').trim() === 'Log in')"#;

const CLAUDE_MARK_BASELINE: &str = r#"(() => {
    window.__webbridgeBaseline = document.querySelectorAll("div[role='article']").length;
    return window.__webbridgeBaseline;
})()"#;

const CLAUDE_READ_RESPONSE: &str = r#"(() => {
    const nodes = document.querySelectorAll("div[role='article']");
    const base = window.__webbridgeBaseline || 0;
    if (nodes.length <= base) return '';
    return nodes[nodes.length - 1].innerText || '';
})()"#;

/// Free-form chat on claude.ai.
pub struct ClaudeChatSurface {
    settings: SurfaceSettings,
}

impl ClaudeChatSurface {
    pub fn new(settings: SurfaceSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Surface for ClaudeChatSurface {
    fn backend(&self) -> Backend {
        Backend::ClaudeChat
    }

    async fn bootstrap(
        &self,
        probe: &dyn DomProbe,
        credentials: &CredentialSet,
    ) -> BrowserResult<()> {
        if !credentials.is_empty() {
            probe
                .load_cookies(credentials, &self.settings.cookie_domain)
                .await?;
        }
        probe.navigate(&self.settings.url).await?;

        let has_input = wait_for_selector(probe, CLAUDE_INPUT, self.settings.ready_timeout).await?;
        let login_prompt = probe
            .evaluate(CLAUDE_LOGIN_PROMPT)
            .await?
            .as_bool()
            .unwrap_or(false);

        if login_prompt || !has_input {
            return Err(BrowserError::NotLoggedIn(
                "claude.ai is showing the login page".to_string(),
            ));
        }
        Ok(())
    }

    async fn submit(&self, probe: &dyn DomProbe, request: &GenerationRequest) -> BrowserResult<()> {
        // Earlier answers stay in the transcript; only nodes past the
        // baseline belong to this submission.
        probe.evaluate(CLAUDE_MARK_BASELINE).await?;
        insert_text(probe, CLAUDE_INPUT, &request.prompt).await?;
        probe.press_key("Enter").await
    }

    async fn read_text(&self, probe: &dyn DomProbe) -> BrowserResult<String> {
        Ok(as_text(probe.evaluate(CLAUDE_READ_RESPONSE).await?))
    }

    async fn is_busy(&self, probe: &dyn DomProbe) -> BrowserResult<bool> {
        Ok(probe.locator_count(CLAUDE_BUSY).await? > 0)
    }
}

// ============================================================================
// Copilot editor
// ============================================================================

const GITHUB_AVATAR: &str = ".avatar";
const COPILOT_EDITOR: &str = ".monaco-editor";
const COPILOT_EDITOR_INPUT: &str = ".monaco-editor textarea";

const COPILOT_OPEN_EDITOR: &str = r#"(() => {
    const link = Array.from(document.querySelectorAll('a'))
        .find(a => (a.innerText || '').includes('Try Copilot'));
    if (!link) return false;
    link.click();
    return true;
})()"#;

const COPILOT_READ_SUGGESTION: &str = r#"(() => {
    const rows = document.querySelectorAll('.suggest-widget .monaco-list-row');
    if (!rows.length) return '';
    const row = document.querySelector('.suggest-widget .monaco-list-row.focused') || rows[0];
    return row.innerText || '';
})()"#;

const COPILOT_BUSY: &str = r#"(() => {
    const widget = document.querySelector('.suggest-widget');
    if (!widget || getComputedStyle(widget).display === 'none') return false;
    return widget.classList.contains('loading')
        || widget.querySelectorAll('.monaco-list-row').length === 0;
})()"#;

/// Code completion in the GitHub Copilot editor.
pub struct CopilotCodeSurface {
    settings: SurfaceSettings,
}

impl CopilotCodeSurface {
    pub fn new(settings: SurfaceSettings) -> Self {
        Self { settings }
    }

    async fn set_language(&self, probe: &dyn DomProbe, language: &str) -> BrowserResult<bool> {
        let script = format!(
            r#"(() => {{
    try {{
        const model = window.monaco && monaco.editor.getModels()[0];
        if (!model) return false;
        monaco.editor.setModelLanguage(model, {});
        return true;
    }} catch (e) {{
        return false;
    }}
}})()"#,
            js_string(language)?
        );
        Ok(probe.evaluate(&script).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl Surface for CopilotCodeSurface {
    fn backend(&self) -> Backend {
        Backend::CopilotCode
    }

    async fn bootstrap(
        &self,
        probe: &dyn DomProbe,
        credentials: &CredentialSet,
    ) -> BrowserResult<()> {
        if !credentials.is_empty() {
            probe
                .load_cookies(credentials, &self.settings.cookie_domain)
                .await?;
        }
        probe.navigate(&self.settings.url).await?;

        if !wait_for_selector(probe, GITHUB_AVATAR, self.settings.ready_timeout).await? {
            return Err(BrowserError::NotLoggedIn(
                "github.com did not recognise the session".to_string(),
            ));
        }

        if probe.locator_count(COPILOT_EDITOR).await? == 0 {
            let clicked = probe
                .evaluate(COPILOT_OPEN_EDITOR)
                .await?
                .as_bool()
                .unwrap_or(false);
            debug!(clicked, "Opening Copilot editor");
        }

        if !wait_for_selector(probe, COPILOT_EDITOR, self.settings.ready_timeout).await? {
            return Err(BrowserError::NotLoggedIn(
                "Copilot editor is not available for this account".to_string(),
            ));
        }
        Ok(())
    }

    async fn submit(&self, probe: &dyn DomProbe, request: &GenerationRequest) -> BrowserResult<()> {
        if let Some(language) = request.language.as_deref() {
            match self.set_language(probe, language).await {
                Ok(true) => debug!(language, "Editor language set"),
                Ok(false) => debug!(language, "Editor language not applied"),
                Err(e) if e.is_disconnected() => return Err(e),
                Err(e) => warn!(language, error = %e, "Failed to set editor language"),
            }
        }

        probe.click(COPILOT_EDITOR).await?;
        probe.press_key("Control+a").await?;
        probe.press_key("Delete").await?;
        insert_text(probe, COPILOT_EDITOR_INPUT, &request.prompt).await?;
        probe.press_key("Control+Enter").await
    }

    async fn read_text(&self, probe: &dyn DomProbe) -> BrowserResult<String> {
        Ok(as_text(probe.evaluate(COPILOT_READ_SUGGESTION).await?))
    }

    async fn is_busy(&self, probe: &dyn DomProbe) -> BrowserResult<bool> {
        Ok(probe.evaluate(COPILOT_BUSY).await?.as_bool().unwrap_or(false))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Surfaces by backend.
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: HashMap<Backend, Arc<dyn Surface>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two production surfaces.
    pub fn standard(claude: SurfaceSettings, copilot: SurfaceSettings) -> Self {
        Self::new()
            .with(Arc::new(ClaudeChatSurface::new(claude)))
            .with(Arc::new(CopilotCodeSurface::new(copilot)))
    }

    pub fn with(mut self, surface: Arc<dyn Surface>) -> Self {
        self.surfaces.insert(surface.backend(), surface);
        self
    }

    pub fn get(&self, backend: Backend) -> Option<Arc<dyn Surface>> {
        self.surfaces.get(&backend).cloned()
    }
}
