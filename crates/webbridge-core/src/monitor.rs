//! DOM polling until a generation settles.
//!
//! There is no event source on the scraped pages, so completion is inferred
//! from two signals sampled on a fixed interval: the accumulated answer text
//! and a busy indicator. The indicator flickers between tokens, so a
//! not-busy reading is only trusted after a second look.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webbridge_browser::{BrowserError, DomProbe, Surface};
use webbridge_protocol::{Backend, GenerationRequest};

use crate::error::{BridgeError, BridgeResult};

/// Polling cadence and limits for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Wait before re-checking a not-busy reading.
    pub settle_delay: Duration,
    /// Window after submission in which an idle page with no text is not
    /// taken as finished, since the busy indicator may not be up yet.
    pub start_grace: Duration,
    /// Overall budget from submission to settlement.
    pub deadline: Duration,
}

impl MonitorSettings {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::ClaudeChat => Self {
                poll_interval: Duration::from_millis(500),
                settle_delay: Duration::from_millis(1000),
                start_grace: Duration::from_millis(5000),
                deadline: Duration::from_secs(120),
            },
            Backend::CopilotCode => Self {
                poll_interval: Duration::from_millis(500),
                settle_delay: Duration::from_millis(1000),
                start_grace: Duration::from_millis(3000),
                deadline: Duration::from_secs(30),
            },
        }
    }
}

/// How a final observation came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Settled,
    TimedOut,
}

/// One sampled snapshot of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub text: String,
    /// Busy signal at sampling time.
    pub active: bool,
    pub observed_at: DateTime<Utc>,
    /// Set on the last observation of a generation.
    pub settlement: Option<Settlement>,
}

impl Observation {
    pub fn progress(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: true,
            observed_at: Utc::now(),
            settlement: None,
        }
    }

    pub fn terminal(text: impl Into<String>, active: bool, settlement: Settlement) -> Self {
        Self {
            text: text.into(),
            active,
            observed_at: Utc::now(),
            settlement: Some(settlement),
        }
    }

    pub fn is_final(&self) -> bool {
        self.settlement.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Submitting,
    Polling,
    Settling,
    Done,
    TimedOut,
}

/// Drives one submit-and-poll cycle against a session's page.
pub struct GenerationMonitor {
    surface: Arc<dyn Surface>,
    probe: Arc<dyn DomProbe>,
    settings: MonitorSettings,
    state: MonitorState,
    submitted_at: Option<Instant>,
}

struct Sample {
    text: Option<String>,
    busy: bool,
}

impl GenerationMonitor {
    pub fn new(surface: Arc<dyn Surface>, probe: Arc<dyn DomProbe>, settings: MonitorSettings) -> Self {
        Self {
            surface,
            probe,
            settings,
            state: MonitorState::Submitting,
            submitted_at: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Type and send the prompt. Fails the request, not the session.
    pub async fn submit(&mut self, request: &GenerationRequest) -> Result<(), BrowserError> {
        self.state = MonitorState::Submitting;
        self.surface.submit(&*self.probe, request).await?;
        self.submitted_at = Some(Instant::now());
        self.state = MonitorState::Polling;
        Ok(())
    }

    /// Sample the page. DOM failures are inconclusive: an unreadable text
    /// leaves `text` empty and an unreadable indicator counts as busy.
    async fn sample(&self) -> BridgeResult<Sample> {
        let text = match self.surface.read_text(&*self.probe).await {
            Ok(text) => Some(text),
            Err(e) if e.is_disconnected() => return Err(page_gone()),
            Err(e) => {
                debug!(error = %e, "Response text unreadable");
                None
            }
        };
        let busy = match self.surface.is_busy(&*self.probe).await {
            Ok(busy) => busy,
            Err(e) if e.is_disconnected() => return Err(page_gone()),
            Err(e) => {
                debug!(error = %e, "Busy indicator unreadable");
                true
            }
        };
        Ok(Sample { text, busy })
    }

    /// Sleep for `duration`, cut short by the deadline. Returns `false` once
    /// the deadline has passed.
    async fn pause(
        &self,
        duration: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BridgeResult<bool> {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        let wait = duration.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(Instant::now() < deadline),
        }
    }

    /// Poll until the page settles, the deadline passes or `cancel` fires.
    ///
    /// Progress observations are sent while the page is busy and the text
    /// has changed; exactly one final observation ends a successful run.
    pub async fn run(
        &mut self,
        tx: mpsc::Sender<Observation>,
        cancel: CancellationToken,
    ) -> BridgeResult<Settlement> {
        let started = self.submitted_at.unwrap_or_else(Instant::now);
        let deadline = started + self.settings.deadline;
        self.state = MonitorState::Polling;

        let mut last_sent = String::new();
        let mut last_known = String::new();
        let mut seen_busy = false;
        let mut last_busy = true;

        loop {
            if !self.pause(self.settings.poll_interval, deadline, &cancel).await? {
                return self.time_out(&tx, last_known, last_busy).await;
            }

            let sample = self.sample().await?;
            last_busy = sample.busy;
            seen_busy |= sample.busy;
            let Some(text) = sample.text else {
                continue;
            };
            last_known.clone_from(&text);

            let may_settle =
                seen_busy || !text.is_empty() || started.elapsed() >= self.settings.start_grace;

            if sample.busy || !may_settle {
                if sample.busy && text != last_sent {
                    send(&tx, Observation::progress(text.clone())).await?;
                    last_sent = text;
                }
                continue;
            }

            self.state = MonitorState::Settling;
            if !self.pause(self.settings.settle_delay, deadline, &cancel).await? {
                return self.time_out(&tx, last_known, false).await;
            }

            let confirm = self.sample().await?;
            if let Some(text) = &confirm.text {
                last_known.clone_from(text);
            }
            last_busy = confirm.busy;

            if !confirm.busy {
                self.state = MonitorState::Done;
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = last_known.len(),
                    "Generation settled"
                );
                send(&tx, Observation::terminal(last_known, false, Settlement::Settled)).await?;
                return Ok(Settlement::Settled);
            }

            debug!("Busy indicator flickered back on");
            seen_busy = true;
            self.state = MonitorState::Polling;
            if last_known != last_sent {
                send(&tx, Observation::progress(last_known.clone())).await?;
                last_sent.clone_from(&last_known);
            }
        }
    }

    async fn time_out(
        &mut self,
        tx: &mpsc::Sender<Observation>,
        mut text: String,
        active: bool,
    ) -> BridgeResult<Settlement> {
        self.state = MonitorState::TimedOut;
        match self.surface.read_text(&*self.probe).await {
            Ok(latest) => text = latest,
            Err(e) => debug!(error = %e, "Final read after timeout failed"),
        }
        warn!(
            deadline_secs = self.settings.deadline.as_secs(),
            chars = text.len(),
            "Generation timed out"
        );
        send(tx, Observation::terminal(text, active, Settlement::TimedOut)).await?;
        Ok(Settlement::TimedOut)
    }
}

fn page_gone() -> BridgeError {
    BridgeError::Internal(BrowserError::Disconnected.to_string())
}

/// A closed receiver means the caller went away.
async fn send(tx: &mpsc::Sender<Observation>, observation: Observation) -> BridgeResult<()> {
    tx.send(observation).await.map_err(|_| BridgeError::Cancelled)
}
