use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use webbridge_browser::{
    save_debug_screenshot, short_fingerprint, CredentialSet, DomProbe, LoginProvider,
    ProbeFactory, Surface, SurfaceRegistry,
};
use webbridge_protocol::Backend;

use crate::error::{BridgeError, BridgeResult};

/// Pool key: one browser per backend and credential set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub backend: Backend,
    pub fingerprint: String,
}

impl SessionKey {
    pub fn new(backend: Backend, credentials: &CredentialSet) -> Self {
        Self {
            backend,
            fingerprint: credentials.fingerprint(),
        }
    }

    pub fn short(&self) -> &str {
        short_fingerprint(&self.fingerprint)
    }

    /// Browser profile directory name for this identity.
    pub fn profile_name(&self) -> String {
        format!("{}-{}", self.backend, self.short())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backend, self.short())
    }
}

/// Snapshot of a live session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub backend: Backend,
    /// Loggable fingerprint prefix.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub busy: bool,
    pub alive: bool,
}

/// One browser page bound to one credential identity.
pub struct Session {
    key: SessionKey,
    probe: Arc<dyn DomProbe>,
    surface: Arc<dyn Surface>,
    lock: Arc<Mutex<()>>,
    created_at: DateTime<Utc>,
    alive: AtomicBool,
}

/// Exclusive use of a session; released on drop, including during unwinding.
pub struct SessionLease {
    session: Arc<Session>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Session {
    pub fn new(key: SessionKey, probe: Arc<dyn DomProbe>, surface: Arc<dyn Surface>) -> Self {
        Self {
            key,
            probe,
            surface,
            lock: Arc::new(Mutex::new(())),
            created_at: Utc::now(),
            alive: AtomicBool::new(true),
        }
    }

    /// Wait for exclusive use. Waiters are served in FIFO order.
    pub async fn lease(self: &Arc<Self>) -> SessionLease {
        let guard = self.lock.clone().lock_owned().await;
        SessionLease {
            session: self.clone(),
            _guard: guard,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn probe(&self) -> Arc<dyn DomProbe> {
        self.probe.clone()
    }

    pub fn surface(&self) -> Arc<dyn Surface> {
        self.surface.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The page is gone; the pool replaces this session on next acquire.
    pub fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!(session = %self.key, "Session marked dead");
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            backend: self.key.backend,
            fingerprint: self.key.short().to_string(),
            created_at: self.created_at,
            busy: self.is_busy(),
            alive: self.is_alive(),
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Err(e) = self.probe.close().await {
            debug!(session = %self.key, error = %e, "Probe close failed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish()
    }
}

type SessionSlot = Arc<OnceCell<Arc<Session>>>;
type LoginSlot = Arc<OnceCell<CredentialSet>>;

/// Pool of per-identity browser sessions.
///
/// Sessions are created lazily on first use. A slot is reserved in the pool
/// before the browser starts so concurrent first requests for the same
/// identity share one bootstrap; a failed bootstrap leaves nothing behind.
pub struct SessionCoordinator {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionSlot>>>,
    logins: Mutex<HashMap<Backend, LoginSlot>>,
    factory: Arc<dyn ProbeFactory>,
    surfaces: SurfaceRegistry,
    login: Option<Arc<dyn LoginProvider>>,
    max_sessions: usize,
    screenshot_dir: Option<PathBuf>,
}

impl SessionCoordinator {
    pub fn new(factory: Arc<dyn ProbeFactory>, surfaces: SurfaceRegistry, max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            logins: Mutex::new(HashMap::new()),
            factory,
            surfaces,
            login: None,
            max_sessions,
            screenshot_dir: None,
        }
    }

    pub fn with_login(mut self, login: Arc<dyn LoginProvider>) -> Self {
        self.login = Some(login);
        self
    }

    /// Save a screenshot here when a session fails to come up.
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    pub fn screenshot_dir(&self) -> Option<&PathBuf> {
        self.screenshot_dir.as_ref()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Look up or create the session for `credentials` on `backend`.
    ///
    /// Missing or empty credentials go through the login provider; the
    /// resulting cookies are remembered per backend.
    pub async fn acquire(
        &self,
        backend: Backend,
        credentials: Option<CredentialSet>,
    ) -> BridgeResult<Arc<Session>> {
        let surface = self
            .surfaces
            .get(backend)
            .ok_or_else(|| BridgeError::UnsupportedModel(backend.to_string()))?;

        let (credentials, from_login) = match credentials.filter(|c| !c.is_empty()) {
            Some(credentials) => (credentials, false),
            None => (self.login_credentials(backend).await?, true),
        };
        let key = SessionKey::new(backend, &credentials);

        // A dead or orphaned session is replaced once; failing again means
        // the replacement went away during bootstrap, which is reported as-is.
        for _ in 0..2 {
            let slot = self.reserve(&key).await?;
            let created = slot
                .get_or_try_init(|| self.create_session(&key, surface.clone(), &credentials))
                .await;

            match created {
                Ok(session) if session.is_alive() => {
                    let registered = {
                        let mut sessions = self.sessions.write().await;
                        let current = sessions.entry(key.clone()).or_insert_with(|| slot.clone());
                        Arc::ptr_eq(current, &slot)
                    };
                    if registered {
                        return Ok(session.clone());
                    }
                    // Our slot was evicted while we initialised it and a
                    // newer one took its place.
                    debug!(session = %key, "Closing orphaned session");
                    session.close().await;
                }
                Ok(session) => {
                    let session = session.clone();
                    self.evict(&key, &slot).await;
                    session.close().await;
                }
                Err(e) => {
                    self.evict(&key, &slot).await;
                    if from_login {
                        self.logins.lock().await.remove(&backend);
                    }
                    return Err(e);
                }
            }
        }

        Err(BridgeError::Initialization(format!(
            "session {} died during startup",
            key
        )))
    }

    /// Run `f` while holding the lock of the session identified by `key`.
    pub async fn with_exclusive_session<F, Fut, T>(&self, key: &SessionKey, f: F) -> BridgeResult<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| BridgeError::SessionNotFound(key.to_string()))?;
        let lease = session.lease().await;
        let result = f(lease.session().clone()).await;
        drop(lease);
        Ok(result)
    }

    /// The initialised session for `key`, if any.
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(key).and_then(|slot| slot.get().cloned())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .filter_map(|slot| slot.get().map(|session| session.info()))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|slot| slot.initialized()).count()
    }

    /// Close every session whose fingerprint starts with `fingerprint`.
    ///
    /// Accepts the full fingerprint or the short prefix shown in listings.
    /// In-flight generations on a closed session end with an error.
    pub async fn close(&self, fingerprint: &str) -> BridgeResult<Vec<SessionInfo>> {
        if fingerprint.is_empty() {
            return Err(BridgeError::SessionNotFound(String::new()));
        }

        let removed: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let keys: Vec<SessionKey> = sessions
                .iter()
                .filter(|(key, slot)| key.fingerprint.starts_with(fingerprint) && slot.initialized())
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| sessions.remove(key))
                .filter_map(|slot| slot.get().cloned())
                .collect()
        };

        if removed.is_empty() {
            return Err(BridgeError::SessionNotFound(fingerprint.to_string()));
        }

        let mut closed = Vec::with_capacity(removed.len());
        for session in removed {
            info!(session = %session.key(), "Closing session");
            session.close().await;
            closed.push(session.info());
        }
        Ok(closed)
    }

    /// Close all sessions. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<SessionSlot> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, slot)| slot).collect()
        };

        let mut count = 0;
        for slot in drained {
            if let Some(session) = slot.get() {
                session.close().await;
                count += 1;
            }
        }
        info!(count, "Closed all sessions");
        count
    }

    async fn reserve(&self, key: &SessionKey) -> BridgeResult<SessionSlot> {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get(key) {
            return Ok(slot.clone());
        }
        if sessions.len() >= self.max_sessions {
            return Err(BridgeError::MaxSessionsReached(self.max_sessions));
        }
        let slot: SessionSlot = Arc::new(OnceCell::new());
        sessions.insert(key.clone(), slot.clone());
        Ok(slot)
    }

    /// Drop `slot` from the pool if it is still the one registered for `key`.
    async fn evict(&self, key: &SessionKey, slot: &SessionSlot) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(key);
        }
    }

    async fn create_session(
        &self,
        key: &SessionKey,
        surface: Arc<dyn Surface>,
        credentials: &CredentialSet,
    ) -> BridgeResult<Arc<Session>> {
        info!(backend = %key.backend, fingerprint = %key.short(), "Starting browser session");

        let probe = self
            .factory
            .open(&key.profile_name())
            .await
            .map_err(|e| BridgeError::Initialization(e.to_string()))?;

        if let Err(e) = surface.bootstrap(&*probe, credentials).await {
            warn!(
                backend = %key.backend,
                fingerprint = %key.short(),
                error = %e,
                "Session bootstrap failed"
            );
            if let Some(dir) = &self.screenshot_dir {
                save_debug_screenshot(&*probe, dir, &format!("init_{}", key.profile_name())).await;
            }
            if let Err(close_err) = probe.close().await {
                debug!(error = %close_err, "Probe close after failed bootstrap failed");
            }
            return Err(BridgeError::from_bootstrap(e));
        }

        info!(backend = %key.backend, fingerprint = %key.short(), "Session ready");
        Ok(Arc::new(Session::new(key.clone(), probe, surface)))
    }

    /// Cookies from the login provider, fetched at most once per backend.
    /// Concurrent callers wait for the login already in progress.
    async fn login_credentials(&self, backend: Backend) -> BridgeResult<CredentialSet> {
        let slot = self.logins.lock().await.entry(backend).or_default().clone();
        let login = self.login.clone();

        let credentials = slot
            .get_or_try_init(|| async move {
                let provider = login.ok_or_else(|| {
                    BridgeError::Login(
                        "no credentials supplied and no login command configured".to_string(),
                    )
                })?;
                provider
                    .login(backend)
                    .await
                    .map_err(|e| BridgeError::Login(e.to_string()))
            })
            .await?;
        Ok(credentials.clone())
    }
}
