use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use webbridge_browser::{save_debug_screenshot, CredentialSet};
use webbridge_protocol::{Backend, FinishReason, GenerationRequest, ResponseKind};

use crate::delta::{DeltaChunk, DeltaEmitter};
use crate::error::{BridgeError, BridgeResult};
use crate::framer::{StreamEnvelope, StreamFramer};
use crate::monitor::{GenerationMonitor, MonitorSettings, Observation, Settlement};
use crate::session::SessionCoordinator;

/// Observations buffered between the monitor task and the response.
const OBSERVATION_BUFFER: usize = 32;

/// Per-backend polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub claude: MonitorSettings,
    pub copilot: MonitorSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            claude: MonitorSettings::for_backend(Backend::ClaudeChat),
            copilot: MonitorSettings::for_backend(Backend::CopilotCode),
        }
    }
}

impl BridgeSettings {
    pub fn monitor(&self, backend: Backend) -> MonitorSettings {
        match backend {
            Backend::ClaudeChat => self.claude,
            Backend::CopilotCode => self.copilot,
        }
    }
}

/// Submits requests into pooled sessions and hands back their output.
pub struct Bridge {
    coordinator: Arc<SessionCoordinator>,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(coordinator: Arc<SessionCoordinator>, settings: BridgeSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Acquire the session, wait for exclusive use, submit the prompt and
    /// start monitoring in the background.
    ///
    /// The session stays locked until the returned [`Generation`] finishes
    /// or is dropped.
    pub async fn start(
        &self,
        request: GenerationRequest,
        credentials: Option<CredentialSet>,
    ) -> BridgeResult<Generation> {
        let session = self.coordinator.acquire(request.backend, credentials).await?;
        let lease = session.lease().await;
        if !session.is_alive() {
            return Err(BridgeError::Internal(format!(
                "session {} was closed while waiting",
                session.key()
            )));
        }

        let mut monitor = GenerationMonitor::new(
            session.surface(),
            session.probe(),
            self.settings.monitor(request.backend),
        );

        if let Err(e) = monitor.submit(&request).await {
            warn!(session = %session.key(), error = %e, "Prompt submission failed");
            if let Some(dir) = self.coordinator.screenshot_dir() {
                let label = format!("submit_{}", session.key().profile_name());
                save_debug_screenshot(&*session.probe(), dir, &label).await;
            }
            if e.is_disconnected() {
                session.mark_dead();
            }
            return Err(BridgeError::Submission(e.to_string()));
        }
        debug!(session = %session.key(), chars = request.prompt.len(), "Prompt submitted");

        let (tx, rx) = mpsc::channel(OBSERVATION_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let lease = lease;
            let result = monitor.run(tx, token).await;
            match &result {
                Ok(settlement) => debug!(session = %lease.session().key(), ?settlement, "Monitor finished"),
                Err(BridgeError::Cancelled) => {
                    debug!(session = %lease.session().key(), "Stream cancelled by caller")
                }
                Err(e) => {
                    warn!(session = %lease.session().key(), error = %e, "Monitor failed");
                    if matches!(e, BridgeError::Internal(_)) {
                        lease.session().mark_dead();
                    }
                }
            }
            result
        });

        Ok(Generation {
            model: request.model,
            rx,
            task,
            cancel: cancel.drop_guard(),
        })
    }
}

/// A running generation. Dropping it stops the page polling and releases
/// the session.
pub struct Generation {
    model: String,
    rx: mpsc::Receiver<Observation>,
    task: JoinHandle<BridgeResult<Settlement>>,
    cancel: DropGuard,
}

impl Generation {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Append-only deltas ending with one final chunk, or an error.
    pub fn deltas(self) -> impl Stream<Item = BridgeResult<DeltaChunk>> + Send + 'static {
        let Generation {
            mut rx,
            mut task,
            cancel,
            ..
        } = self;

        async_stream::stream! {
            let _cancel = cancel;
            let mut emitter = DeltaEmitter::new();

            while let Some(observation) = rx.recv().await {
                let chunk = emitter.push(&observation);
                if chunk.is_final {
                    // The monitor returns right after its final send; once it
                    // has, the session is free for the next request.
                    if let Err(e) = (&mut task).await {
                        warn!(error = %e, "Monitor task did not finish cleanly");
                    }
                    yield Ok(chunk);
                    return;
                }
                yield Ok(chunk);
            }

            let error = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => BridgeError::Internal(
                    "monitor ended without a final observation".to_string(),
                ),
                Err(e) => BridgeError::Internal(format!("monitor task failed: {}", e)),
            };
            yield Err(error);
        }
    }

    /// The delta stream framed into OpenAI envelopes. An error ends the
    /// stream without a finish envelope.
    pub fn envelopes(
        self,
        kind: ResponseKind,
    ) -> impl Stream<Item = BridgeResult<StreamEnvelope>> + Send + 'static {
        let mut framer = StreamFramer::new(kind, self.model.clone());
        let deltas = self.deltas();

        async_stream::stream! {
            futures::pin_mut!(deltas);
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(chunk) => {
                        for envelope in framer.frame(chunk) {
                            yield Ok(envelope);
                        }
                        if framer.is_finished() {
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    }

    /// Wait for the whole response.
    pub async fn collect(self) -> BridgeResult<(String, FinishReason)> {
        let deltas = self.deltas();
        futures::pin_mut!(deltas);

        let mut text = String::new();
        while let Some(chunk) = deltas.next().await {
            let chunk = chunk?;
            if chunk.corrective {
                text = chunk.text;
            } else {
                text.push_str(&chunk.text);
            }
            if chunk.is_final {
                return Ok((text, chunk.finish.unwrap_or(FinishReason::Stop)));
            }
        }
        Err(BridgeError::Internal(
            "stream ended without a final chunk".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use webbridge_browser::testing::{FakeProbeFactory, ScriptedSurface};
    use webbridge_browser::SurfaceRegistry;

    fn fast() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(100),
            settle_delay: Duration::from_millis(200),
            start_grace: Duration::from_millis(300),
            deadline: Duration::from_secs(5),
        }
    }

    fn bridge_with(
        factory: Arc<FakeProbeFactory>,
        surface: Arc<ScriptedSurface>,
    ) -> Bridge {
        let coordinator = SessionCoordinator::new(factory, SurfaceRegistry::new().with(surface), 4);
        Bridge::new(
            Arc::new(coordinator),
            BridgeSettings {
                claude: fast(),
                copilot: fast(),
            },
        )
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            backend: Backend::ClaudeChat,
            model: "web_claude".to_string(),
            prompt: prompt.to_string(),
            language: None,
            stream: true,
        }
    }

    fn creds() -> Option<CredentialSet> {
        Some(CredentialSet::parse("sessionKey=abc").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_streams_full_text() {
        let surface = Arc::new(ScriptedSurface::new(
            Backend::ClaudeChat,
            &[("Hello", true), ("Hello, wor", true), ("Hello, world", false)],
        ));
        let bridge = bridge_with(Arc::new(FakeProbeFactory::new()), surface);

        let generation = bridge.start(request("hi"), creds()).await.unwrap();
        assert_eq!(generation.model(), "web_claude");
        let (text, finish) = generation.collect().await.unwrap();

        assert_eq!(text, "Hello, world");
        assert_eq!(finish, FinishReason::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelopes_follow_lifecycle() {
        let surface = Arc::new(ScriptedSurface::new(
            Backend::ClaudeChat,
            &[("Hello", true), ("Hello, world", false)],
        ));
        let bridge = bridge_with(Arc::new(FakeProbeFactory::new()), surface);

        let generation = bridge.start(request("hi"), creds()).await.unwrap();
        let envelopes: Vec<StreamEnvelope> = generation
            .envelopes(ResponseKind::Chat)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            envelopes,
            vec![
                StreamEnvelope::Role,
                StreamEnvelope::Content("Hello".into()),
                StreamEnvelope::Content(", world".into()),
                StreamEnvelope::Finish(FinishReason::Stop),
                StreamEnvelope::Done,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_with_timeout_envelope() {
        let surface = Arc::new(ScriptedSurface::new(Backend::ClaudeChat, &[("partial", true)]));
        let bridge = bridge_with(Arc::new(FakeProbeFactory::new()), surface);

        let generation = bridge.start(request("hi"), creds()).await.unwrap();
        let envelopes: Vec<StreamEnvelope> = generation
            .envelopes(ResponseKind::Chat)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            &envelopes[envelopes.len() - 2..],
            &[StreamEnvelope::Finish(FinishReason::Timeout), StreamEnvelope::Done]
        );
        assert!(envelopes.contains(&StreamEnvelope::Content("partial".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_divergent_text_is_corrected() {
        let surface = Arc::new(ScriptedSurface::new(
            Backend::ClaudeChat,
            &[("ABC", true), ("XY", false)],
        ));
        let bridge = bridge_with(Arc::new(FakeProbeFactory::new()), surface.clone());

        let chunks: Vec<DeltaChunk> = bridge
            .start(request("hi"), creds())
            .await
            .unwrap()
            .deltas()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks[0].text, "ABC");
        let last = chunks.last().unwrap();
        assert!(last.corrective);
        assert!(last.is_final);
        assert_eq!(last.text, "XY");

        let (text, _) = bridge
            .start(request("again"), creds())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(text, "XY");
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_requests_are_serialized() {
        let surface = Arc::new(ScriptedSurface::new(
            Backend::ClaudeChat,
            &[("one", true), ("one two", true), ("one two", false)],
        ));
        let bridge = Arc::new(bridge_with(Arc::new(FakeProbeFactory::new()), surface.clone()));

        let first = bridge.start(request("first"), creds()).await.unwrap();
        let second = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .start(request("second"), creds())
                    .await
                    .unwrap()
                    .collect()
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (first_text, _) = first.collect().await.unwrap();
        let (second_text, _) = second.await.unwrap();
        assert_eq!(first_text, "one two");
        assert_eq!(second_text, "one two");

        let events = surface.events();
        let second_submit = events.iter().position(|e| e == "submit second").unwrap();
        let last_first_read = events.iter().rposition(|e| e == "read first").unwrap();
        assert!(last_first_read < second_submit, "{:?}", events);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_generation_releases_session() {
        let surface = Arc::new(ScriptedSurface::new(Backend::ClaudeChat, &[("busy", true)]));
        let bridge = bridge_with(Arc::new(FakeProbeFactory::new()), surface.clone());

        let generation = bridge.start(request("first"), creds()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(generation);

        let next = tokio::time::timeout(
            Duration::from_secs(1),
            bridge.start(request("second"), creds()),
        )
        .await
        .expect("session still locked")
        .unwrap();
        drop(next);

        assert!(surface.events().contains(&"submit second".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_keeps_session() {
        let factory = Arc::new(FakeProbeFactory::new());
        let surface = Arc::new(
            ScriptedSurface::new(Backend::ClaudeChat, &[("ok", false)]).with_submit_failures(1),
        );
        let bridge = bridge_with(factory.clone(), surface);

        let err = bridge.start(request("hi"), creds()).await.err().unwrap();
        assert!(matches!(err, BridgeError::Submission(_)));

        let (text, _) = bridge
            .start(request("hi"), creds())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(factory.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_page_is_replaced() {
        let factory = Arc::new(FakeProbeFactory::new());
        let surface = Arc::new(ScriptedSurface::new(Backend::ClaudeChat, &[("ok", false)]));
        let bridge = bridge_with(factory.clone(), surface);

        bridge
            .start(request("warm"), creds())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        factory.probes()[0].disconnect();

        let err = bridge.start(request("hi"), creds()).await.err().unwrap();
        assert!(matches!(err, BridgeError::Submission(_)));

        bridge
            .start(request("hi"), creds())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(factory.open_count(), 2);
    }
}
