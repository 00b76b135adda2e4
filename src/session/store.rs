use super::{AddPointOutcome, MaskCache, MaskSession};
use crate::error::{LocatorError, Result};
use crate::render::OverlayStyle;
use crate::segmentation::{PointPrompt, PromptSegmenter};
use dashmap::DashMap;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Sessions untouched for longer than this are evicted
    pub idle_ttl: Duration,
    /// Root directory for per-session mask caches; `None` disables caching
    pub cache_root: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(30 * 60),
            cache_root: None,
        }
    }
}

/// One session plus the bookkeeping needed to serialize access to it
pub struct SessionHandle {
    id: Uuid,
    /// Bumped by every upload before it queues for the lock
    upload_epoch: Arc<AtomicU64>,
    last_used: Mutex<Instant>,
    session: Arc<AsyncMutex<MaskSession>>,
}

impl SessionHandle {
    fn new(id: Uuid, session: MaskSession) -> Self {
        Self {
            id,
            upload_epoch: Arc::new(AtomicU64::new(0)),
            last_used: Mutex::new(Instant::now()),
            session: Arc::new(AsyncMutex::new(session)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.last_used
            .lock()
            .map(|last_used| now.saturating_duration_since(*last_used))
            .unwrap_or_default()
    }

    /// Run `f` on the session on the blocking pool while holding its lock
    ///
    /// The lock is released when `f` returns, fails or panics.
    pub async fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut MaskSession) -> Result<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.session).lock_owned().await;
        self.touch();

        tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            f(&mut *guard)
        })
        .await
        .map_err(|e| LocatorError::Collaborator {
            collaborator: "session worker",
            message: e.to_string(),
        })?
    }

    /// Upload a new image, superseding any upload still waiting or priming
    pub async fn upload(&self, bytes: Vec<u8>) -> Result<RgbImage> {
        let epoch = self.upload_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.upload_epoch);
        let id = self.id;

        self.with_session(move |session| {
            if latest.load(Ordering::SeqCst) != epoch {
                tracing::debug!("Session {}: upload {} superseded before priming", id, epoch);
                return Err(LocatorError::Superseded);
            }
            let prepared = session.prepare_upload(&bytes)?;
            if latest.load(Ordering::SeqCst) != epoch {
                tracing::debug!("Session {}: upload {} superseded while priming", id, epoch);
                return Err(LocatorError::Superseded);
            }
            Ok(session.install(prepared))
        })
        .await
    }

    pub async fn add_point(&self, prompt: PointPrompt, multi_object: bool) -> Result<AddPointOutcome> {
        self.with_session(move |session| session.add_point(prompt, multi_object))
            .await
    }

    pub async fn undo(&self) -> Result<RgbImage> {
        self.with_session(|session| session.undo()).await
    }

    pub async fn composite(&self) -> Result<RgbImage> {
        self.with_session(|session| session.composite()).await
    }
}

/// Sessions keyed by id, each with its own lock
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
    segmenter: Arc<dyn PromptSegmenter>,
    style: OverlayStyle,
    settings: StoreSettings,
}

impl SessionStore {
    pub fn new(segmenter: Arc<dyn PromptSegmenter>, style: OverlayStyle, settings: StoreSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            segmenter,
            style,
            settings,
        }
    }

    pub fn create(&self) -> Result<Arc<SessionHandle>> {
        let id = Uuid::new_v4();
        let mut session = MaskSession::new(Arc::clone(&self.segmenter), self.style.clone());

        if let Some(root) = &self.settings.cache_root {
            let cache = MaskCache::new(root, &id.to_string())
                .map_err(|e| LocatorError::collaborator("mask cache", e))?;
            session = session.with_cache(cache);
        }

        let handle = Arc::new(SessionHandle::new(id, session));
        self.sessions.insert(id, Arc::clone(&handle));
        tracing::info!("Created session {} ({} active)", id, self.sessions.len());
        Ok(handle)
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<SessionHandle>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LocatorError::UnknownSession(id.to_string()))
    }

    /// Existing session when an id is given, a fresh one otherwise
    pub fn get_or_create(&self, id: Option<Uuid>) -> Result<Arc<SessionHandle>> {
        match id {
            Some(id) => self.get(&id),
            None => self.create(),
        }
    }

    pub fn evict(&self, id: &Uuid) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!("Evicted session {}", id);
        }
        removed
    }

    /// Drop every session idle longer than the TTL; returns how many went
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.settings.idle_ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| handle.idle_for(now) <= ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Periodically evict idle sessions until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.evict_idle();
                    }
                    None => break,
                }
            }
        })
    }
}
