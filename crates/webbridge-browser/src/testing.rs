//! In-memory doubles for the browser collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use webbridge_protocol::{Backend, GenerationRequest};

use crate::credentials::CredentialSet;
use crate::error::{BrowserError, BrowserResult};
use crate::probe::{DomProbe, KeyChord, ProbeFactory};
use crate::surface::Surface;

/// PNG signature, enough for callers that only persist the bytes.
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

enum EvalRule {
    Value(Value),
    Fail,
}

/// A probe that records every call and answers from canned rules.
pub struct FakeProbe {
    calls: Mutex<Vec<String>>,
    locators: Mutex<HashMap<String, usize>>,
    evals: Mutex<Vec<(String, EvalRule)>>,
    missing: Mutex<HashSet<String>>,
    closed: AtomicBool,
    disconnected: AtomicBool,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProbe {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            locators: Mutex::new(HashMap::new()),
            evals: Mutex::new(Vec::new()),
            missing: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn with_locator(self, selector: &str, count: usize) -> Self {
        self.set_locator(selector, count);
        self
    }

    /// Scripts containing `fragment` evaluate to `value`. First match wins.
    pub fn with_eval(self, fragment: &str, value: Value) -> Self {
        self.evals
            .lock()
            .unwrap()
            .push((fragment.to_string(), EvalRule::Value(value)));
        self
    }

    /// Scripts containing `fragment` fail with a script error.
    pub fn with_failing_eval(self, fragment: &str) -> Self {
        self.evals
            .lock()
            .unwrap()
            .push((fragment.to_string(), EvalRule::Fail));
        self
    }

    /// Clicking or typing into `selector` fails with `ElementNotFound`.
    pub fn without_element(self, selector: &str) -> Self {
        self.missing.lock().unwrap().insert(selector.to_string());
        self
    }

    pub fn set_locator(&self, selector: &str, count: usize) {
        self.locators
            .lock()
            .unwrap()
            .insert(selector.to_string(), count);
    }

    /// Every later call fails with `Disconnected`.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) -> BrowserResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BrowserError::Disconnected);
        }
        Ok(())
    }

    fn check_element(&self, selector: &str) -> BrowserResult<()> {
        if self.missing.lock().unwrap().contains(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DomProbe for FakeProbe {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.record(format!("navigate {}", url))
    }

    async fn load_cookies(&self, credentials: &CredentialSet, domain: &str) -> BrowserResult<()> {
        self.record(format!("cookies {} {}", domain, credentials.len()))
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<Value> {
        self.record(format!("evaluate {}", script))?;
        let evals = self.evals.lock().unwrap();
        match evals.iter().find(|(fragment, _)| script.contains(fragment.as_str())) {
            Some((_, EvalRule::Value(value))) => Ok(value.clone()),
            Some((fragment, EvalRule::Fail)) => {
                Err(BrowserError::Script(format!("scripted failure for {}", fragment)))
            }
            None => Ok(Value::Null),
        }
    }

    async fn locator_count(&self, selector: &str) -> BrowserResult<usize> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BrowserError::Disconnected);
        }
        Ok(self
            .locators
            .lock()
            .unwrap()
            .get(selector)
            .copied()
            .unwrap_or(0))
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        self.record(format!("click {}", selector))?;
        self.check_element(selector)
    }

    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.record(format!("type {} {}", selector, text))?;
        self.check_element(selector)
    }

    async fn press_key(&self, chord: &str) -> BrowserResult<()> {
        self.record(format!("press {}", chord))?;
        KeyChord::parse(chord).map(|_| ())
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        self.record("screenshot".to_string())?;
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.calls.lock().unwrap().push("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`FakeProbe`]s and remembers them for inspection.
pub struct FakeProbeFactory {
    opened: Mutex<Vec<(String, Arc<FakeProbe>)>>,
    open_count: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Option<Duration>,
}

impl Default for FakeProbeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProbeFactory {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// The next `count` launches fail.
    pub fn with_failures(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> Vec<Arc<FakeProbe>> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(_, probe)| probe.clone())
            .collect()
    }

    pub fn profiles(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(profile, _)| profile.clone())
            .collect()
    }
}

#[async_trait]
impl ProbeFactory for FakeProbeFactory {
    async fn open(&self, profile: &str) -> BrowserResult<Arc<dyn DomProbe>> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrowserError::Launch("scripted launch failure".to_string()));
        }

        let probe = Arc::new(FakeProbe::new());
        self.opened
            .lock()
            .unwrap()
            .push((profile.to_string(), probe.clone()));
        Ok(probe)
    }
}

/// One scripted DOM reading. `None` fields fail as DOM errors.
#[derive(Debug, Clone)]
pub struct Frame {
    pub text: Option<String>,
    pub busy: Option<bool>,
}

impl Frame {
    pub fn new(text: &str, busy: bool) -> Self {
        Self {
            text: Some(text.to_string()),
            busy: Some(busy),
        }
    }

    pub fn text_error(busy: bool) -> Self {
        Self {
            text: None,
            busy: Some(busy),
        }
    }

    pub fn busy_error(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            busy: None,
        }
    }
}

/// A surface that replays a fixed sequence of frames for every submission.
///
/// Each `read_text` advances to the next frame (the last frame repeats);
/// `is_busy` answers from the frame most recently read.
pub struct ScriptedSurface {
    backend: Backend,
    frames: Vec<Frame>,
    cursor: Mutex<usize>,
    current_prompt: Mutex<Option<String>>,
    events: Mutex<Vec<String>>,
    bootstraps: AtomicUsize,
    bootstrap_failures: AtomicUsize,
    submit_failures: AtomicUsize,
    submit_delay: Option<Duration>,
}

impl ScriptedSurface {
    pub fn new(backend: Backend, frames: &[(&str, bool)]) -> Self {
        Self::with_frames(
            backend,
            frames
                .iter()
                .map(|(text, busy)| Frame::new(text, *busy))
                .collect(),
        )
    }

    pub fn with_frames(backend: Backend, frames: Vec<Frame>) -> Self {
        Self {
            backend,
            frames,
            cursor: Mutex::new(0),
            current_prompt: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            bootstraps: AtomicUsize::new(0),
            bootstrap_failures: AtomicUsize::new(0),
            submit_failures: AtomicUsize::new(0),
            submit_delay: None,
        }
    }

    pub fn with_bootstrap_failures(self, count: usize) -> Self {
        self.bootstrap_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_submit_failures(self, count: usize) -> Self {
        self.submit_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    /// `bootstrap`, `submit <prompt>` and `read <prompt>` entries in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    fn frame_at(&self, index: usize) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        Some(self.frames[index.min(self.frames.len() - 1)].clone())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Surface for ScriptedSurface {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn bootstrap(
        &self,
        probe: &dyn DomProbe,
        credentials: &CredentialSet,
    ) -> BrowserResult<()> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push("bootstrap".to_string());
        if Self::take_failure(&self.bootstrap_failures) {
            return Err(BrowserError::NotLoggedIn("scripted bootstrap failure".to_string()));
        }
        if !credentials.is_empty() {
            probe.load_cookies(credentials, "scripted.test").await?;
        }
        probe.navigate("https://scripted.test/").await
    }

    async fn submit(&self, probe: &dyn DomProbe, request: &GenerationRequest) -> BrowserResult<()> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("submit {}", request.prompt));
        if Self::take_failure(&self.submit_failures) {
            return Err(BrowserError::ElementNotFound("scripted input".to_string()));
        }

        probe.type_text("scripted-input", &request.prompt).await?;
        *self.cursor.lock().unwrap() = 0;
        *self.current_prompt.lock().unwrap() = Some(request.prompt.clone());
        Ok(())
    }

    async fn read_text(&self, _probe: &dyn DomProbe) -> BrowserResult<String> {
        let index = {
            let mut cursor = self.cursor.lock().unwrap();
            let index = *cursor;
            *cursor += 1;
            index
        };
        let prompt = self.current_prompt.lock().unwrap().clone().unwrap_or_default();
        self.events.lock().unwrap().push(format!("read {}", prompt));

        match self.frame_at(index) {
            None => Ok(String::new()),
            Some(Frame { text: Some(text), .. }) => Ok(text),
            Some(Frame { text: None, .. }) => {
                Err(BrowserError::Script("scripted text failure".to_string()))
            }
        }
    }

    async fn is_busy(&self, _probe: &dyn DomProbe) -> BrowserResult<bool> {
        let index = self.cursor.lock().unwrap().saturating_sub(1);
        match self.frame_at(index) {
            None => Ok(false),
            Some(Frame { busy: Some(busy), .. }) => Ok(busy),
            Some(Frame { busy: None, .. }) => {
                Err(BrowserError::Script("scripted busy failure".to_string()))
            }
        }
    }
}
