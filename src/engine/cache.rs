//! Single-flight cache for the one live AR engine/session pair.
//!
//! Every mutation of the shared AR state funnels through this type. Callers
//! never hold engine handles directly; they ask the cache to apply a lens,
//! start playback, or hand out the render surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{watch, Mutex};

use crate::engine::adapter::{BoundSession, EngineAdapter};
use crate::engine::platform::{
    ArEngine, CameraFacing, EngineCredentials, EngineError, LensHandle, LensVariant, MediaStream,
    RenderSurface,
};

struct CacheInner {
    engine: Option<Box<dyn ArEngine>>,
    stream: Option<Box<dyn MediaStream>>,
    lenses: HashMap<LensVariant, LensHandle>,
    session: Option<BoundSession>,
    is_preloading: bool,
    is_preloaded: bool,
    session_ready: bool,
}

impl CacheInner {
    fn new() -> Self {
        Self {
            engine: None,
            stream: None,
            lenses: HashMap::new(),
            session: None,
            is_preloading: false,
            is_preloaded: false,
            session_ready: false,
        }
    }
}

/// Everything one successful preload produces, installed atomically.
struct ReadyParts {
    engine: Box<dyn ArEngine>,
    stream: Box<dyn MediaStream>,
    lenses: HashMap<LensVariant, LensHandle>,
    session: BoundSession,
}

pub struct SessionCache {
    adapter: EngineAdapter,
    viewport: (u32, u32),
    /// Bumped on every teardown; an in-flight preload that observes a bump
    /// discards its result instead of resurrecting the cache.
    generation: AtomicU64,
    inner: Mutex<CacheInner>,
    preload_done_tx: watch::Sender<u64>,
    // Kept so the watch channel stays open with no waiters around.
    _preload_done_rx: watch::Receiver<u64>,
}

impl SessionCache {
    pub fn new(adapter: EngineAdapter, viewport: (u32, u32)) -> Self {
        let (preload_done_tx, preload_done_rx) = watch::channel(0u64);
        Self {
            adapter,
            viewport,
            generation: AtomicU64::new(0),
            inner: Mutex::new(CacheInner::new()),
            preload_done_tx,
            _preload_done_rx: preload_done_rx,
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.lock().await.session_ready
    }

    pub async fn is_preloading(&self) -> bool {
        self.inner.lock().await.is_preloading
    }

    pub async fn is_preloaded(&self) -> bool {
        self.inner.lock().await.is_preloaded
    }

    /// The render surface, once the session is ready. The hosting layer owns
    /// attaching it to a display tree.
    pub async fn surface(&self) -> Option<std::sync::Arc<dyn RenderSurface>> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.surface())
    }

    pub async fn applied_lens(&self) -> Option<LensHandle> {
        self.inner
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|session| session.applied_lens().cloned())
    }

    /// Bring the cache to the ready state, or join an attempt already in
    /// flight. Exactly one bootstrap/camera/lens-load sequence runs no matter
    /// how many callers arrive concurrently.
    pub async fn ensure_ready(
        &self,
        variants: &[LensVariant],
        credentials: &EngineCredentials,
    ) -> Result<(), EngineError> {
        let generation = loop {
            let mut wait_rx = None;
            {
                let mut inner = self.inner.lock().await;
                if inner.session_ready {
                    return Ok(());
                }
                if inner.is_preloading {
                    wait_rx = Some(self.preload_done_tx.subscribe());
                } else {
                    inner.is_preloading = true;
                    break self.generation.load(Ordering::Acquire);
                }
            }

            if let Some(mut rx) = wait_rx {
                log::info!("Waiting for in-flight AR preload");
                let _ = rx.changed().await;
                let inner = self.inner.lock().await;
                if inner.session_ready {
                    return Ok(());
                }
                if !inner.is_preloading {
                    return Err(EngineError::Init(
                        "concurrent preload attempt failed".to_string(),
                    ));
                }
                // Another attempt took over; wait again.
            }
        };

        let result = self.preload(variants, credentials).await;

        let mut inner = self.inner.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            // Torn down while we were initializing. The teardown already
            // reset the flags (and a newer attempt may own them now), so only
            // discard what this attempt built.
            drop(inner);
            if let Ok(parts) = result {
                parts.stream.stop_tracks();
                let mut session = parts.session;
                session.destroy().await;
            }
            log::info!("Discarding AR preload result, cache was torn down mid-flight");
            return Err(EngineError::CacheInvalidated);
        }

        inner.is_preloading = false;
        let outcome = match result {
            Ok(parts) => {
                inner.engine = Some(parts.engine);
                inner.stream = Some(parts.stream);
                inner.lenses = parts.lenses;
                inner.session = Some(parts.session);
                inner.is_preloaded = true;
                inner.session_ready = true;
                log::info!("AR session cache ready");
                Ok(())
            }
            Err(e) => {
                log::error!("AR preload failed: {}", e);
                Err(e)
            }
        };
        drop(inner);

        self.preload_done_tx.send_modify(|v| *v += 1);
        outcome
    }

    async fn preload(
        &self,
        variants: &[LensVariant],
        credentials: &EngineCredentials,
    ) -> Result<ReadyParts, EngineError> {
        log::info!("AR preload step 1: bootstrapping engine");
        let engine = self.adapter.bootstrap(credentials).await?;

        log::info!("AR preload step 2: acquiring camera");
        let stream = self.adapter.acquire_camera(CameraFacing::Front).await?;

        log::info!("AR preload step 3: loading lens set");
        let lenses = match self.adapter.load_lens_set(engine.as_ref(), variants).await {
            Ok(lenses) => lenses,
            Err(e) => {
                stream.stop_tracks();
                return Err(e);
            }
        };

        log::info!("AR preload step 4: creating and binding session");
        let session = match self
            .adapter
            .create_and_bind_session(engine.as_ref(), stream.as_ref(), self.viewport)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                stream.stop_tracks();
                return Err(e);
            }
        };

        Ok(ReadyParts {
            engine,
            stream,
            lenses,
            session,
        })
    }

    /// Apply the lens for a variant. Gated on readiness: lens application
    /// must never run before the session is bound.
    pub async fn apply_variant(&self, variant: LensVariant) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if !inner.session_ready {
            return Err(EngineError::NotReady);
        }

        let lens = inner.lenses.get(&variant).cloned().ok_or_else(|| {
            EngineError::LensLoad(format!("no lens loaded for variant {:?}", variant))
        })?;
        let session = inner.session.as_mut().ok_or(EngineError::NotReady)?;
        session.apply_lens(&lens).await
    }

    /// Start rendering.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if !inner.session_ready {
            return Err(EngineError::NotReady);
        }
        let session = inner.session.as_mut().ok_or(EngineError::NotReady)?;
        session.play().await
    }

    /// Pause rendering.
    pub async fn pause(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let session = inner.session.as_mut().ok_or(EngineError::NotReady)?;
        session.pause().await
    }

    /// Release everything: stop media tracks, destroy the session, clear the
    /// lens set and flags. Idempotent, and safe to call while an
    /// `ensure_ready` is in flight; that attempt's result will be discarded.
    pub async fn teardown(&self, reason: &str) {
        log::info!("Tearing down AR session cache ({})", reason);
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut inner = self.inner.lock().await;
        // Tracks are stopped before any reference is dropped so the camera
        // never stays locked behind a dangling stream.
        if let Some(stream) = inner.stream.take() {
            stream.stop_tracks();
        }
        if let Some(mut session) = inner.session.take() {
            session.destroy().await;
        }
        let _ = inner.engine.take();
        inner.lenses.clear();
        inner.is_preloading = false;
        inner.is_preloaded = false;
        inner.session_ready = false;
        drop(inner);

        self.preload_done_tx.send_modify(|v| *v += 1);
    }
}
