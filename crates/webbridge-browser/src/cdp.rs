//! Chrome DevTools Protocol implementation of [`DomProbe`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::credentials::CredentialSet;
use crate::error::{BrowserError, BrowserResult};
use crate::probe::{DomProbe, KeyChord, ProbeFactory};

/// How browsers are launched for new sessions.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    /// Parent directory for per-identity profiles.
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            user_data_dir: None,
        }
    }
}

/// Launches one Chromium process per session.
pub struct CdpProbeFactory {
    settings: BrowserSettings,
}

impl CdpProbeFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, profile: &str) -> BrowserResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(1280, 900)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled");

        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.settings.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(root) = &self.settings.user_data_dir {
            builder = builder.user_data_dir(root.join(profile));
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl ProbeFactory for CdpProbeFactory {
    async fn open(&self, profile: &str) -> BrowserResult<Arc<dyn DomProbe>> {
        if let Some(root) = &self.settings.user_data_dir {
            tokio::fs::create_dir_all(root.join(profile)).await?;
        }
        let config = self.browser_config(profile)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let profile_name = profile.to_string();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(profile = %profile_name, error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(BrowserError::Launch(format!("failed to open page: {}", e)));
            }
        };

        debug!(profile = %profile, headless = self.settings.headless, "Launched browser");
        Ok(Arc::new(CdpProbe {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A single Chromium page plus the process that owns it.
pub struct CdpProbe {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
    closed: AtomicBool,
}

impl CdpProbe {
    /// Page-level failures turn into `Disconnected` once the CDP connection
    /// is gone, so callers can tell "selector missing" from "tab died".
    fn classify(&self, fallback: BrowserError) -> BrowserError {
        if self.closed.load(Ordering::SeqCst) || self.handler_task.is_finished() {
            BrowserError::Disconnected
        } else {
            fallback
        }
    }

    async fn dispatch_key(&self, chord: &KeyChord, kind: DispatchKeyEventType) -> BrowserResult<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .modifiers(chord.modifiers)
            .key(chord.key.clone());

        if !chord.code.is_empty() {
            builder = builder.code(chord.code.clone());
        }
        if let Some(vk) = chord.virtual_key {
            builder = builder.windows_virtual_key_code(vk);
        }
        if matches!(kind, DispatchKeyEventType::KeyDown) {
            if let Some(text) = &chord.text {
                builder = builder.text(text.clone()).unmodified_text(text.clone());
            }
        }

        let params = builder.build().map_err(BrowserError::Input)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| self.classify(BrowserError::Input(e.to_string())))?;
        Ok(())
    }
}

#[async_trait]
impl DomProbe for CdpProbe {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.page.goto(url).await.map_err(|e| {
            self.classify(BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(())
    }

    async fn load_cookies(&self, credentials: &CredentialSet, domain: &str) -> BrowserResult<()> {
        let mut params = Vec::with_capacity(credentials.len());
        for (name, value) in credentials.iter() {
            let cookie = CookieParam::builder()
                .name(name)
                .value(value)
                .domain(domain)
                .path("/")
                .secure(true)
                .build()
                .map_err(BrowserError::Cookie)?;
            params.push(cookie);
        }

        self.page
            .set_cookies(params)
            .await
            .map_err(|e| self.classify(BrowserError::Cookie(e.to_string())))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| self.classify(BrowserError::Script(e.to_string())))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn locator_count(&self, selector: &str) -> BrowserResult<usize> {
        let selector_json =
            serde_json::to_string(selector).map_err(|e| BrowserError::Script(e.to_string()))?;
        let script = format!("document.querySelectorAll({}).length", selector_json);
        let value = self.evaluate(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| self.classify(BrowserError::ElementNotFound(selector.to_string())))?;
        element
            .click()
            .await
            .map_err(|e| self.classify(BrowserError::Input(e.to_string())))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| self.classify(BrowserError::ElementNotFound(selector.to_string())))?;
        element
            .click()
            .await
            .map_err(|e| self.classify(BrowserError::Input(e.to_string())))?;
        element
            .type_str(text)
            .await
            .map_err(|e| self.classify(BrowserError::Input(e.to_string())))?;
        Ok(())
    }

    async fn press_key(&self, chord: &str) -> BrowserResult<()> {
        let chord = KeyChord::parse(chord)?;
        self.dispatch_key(&chord, DispatchKeyEventType::KeyDown).await?;
        self.dispatch_key(&chord, DispatchKeyEventType::KeyUp).await
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| self.classify(BrowserError::Screenshot(e.to_string())))
    }

    async fn close(&self) -> BrowserResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Browser did not close cleanly");
            }
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        Ok(())
    }
}

impl Drop for CdpProbe {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
