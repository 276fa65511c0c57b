//! Adapter over the AR platform: bootstrap, camera, lenses, session binding.
//!
//! The adapter owns the invariants the SDK does not enforce for us: camera
//! liveness is verified after acquisition, lens sets load atomically, a
//! session is bound before any lens is applied, and the engine-handle state
//! machine never skips `Bound` on the way to `Playing`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config;
use crate::engine::platform::{
    ArEngine, ArPlatform, ArSession, CameraFacing, EngineCredentials, EngineError, EngineState,
    LensHandle, LensVariant, MediaStream, RenderSurface, SourceHandle, SourceTransform,
};

pub struct EngineAdapter {
    platform: Arc<dyn ArPlatform>,
}

impl EngineAdapter {
    pub fn new(platform: Arc<dyn ArPlatform>) -> Self {
        Self { platform }
    }

    /// Bootstrap the engine with credentials. At most one call per cache
    /// lifetime; the cache enforces that.
    pub async fn bootstrap(
        &self,
        credentials: &EngineCredentials,
    ) -> Result<Box<dyn ArEngine>, EngineError> {
        log::info!("Bootstrapping AR engine");
        self.platform.bootstrap(credentials).await
    }

    /// Acquire a camera stream and verify it is actually delivering frames.
    /// Some platforms hand back an inactive stream without erroring.
    pub async fn acquire_camera(
        &self,
        facing: CameraFacing,
    ) -> Result<Box<dyn MediaStream>, EngineError> {
        log::info!("Requesting camera access ({:?})", facing);
        let stream = self
            .platform
            .acquire_camera(facing, config::CAMERA_RESOLUTION)
            .await?;

        if !stream.is_active() {
            stream.stop_tracks();
            return Err(EngineError::CameraAccess(
                "media stream is not active after creation".to_string(),
            ));
        }

        log::info!("Camera stream active");
        Ok(stream)
    }

    /// Load every requested lens variant, or none. A partial set would let a
    /// later variant switch silently no-op, so any failure aborts the load.
    pub async fn load_lens_set(
        &self,
        engine: &dyn ArEngine,
        variants: &[LensVariant],
    ) -> Result<HashMap<LensVariant, LensHandle>, EngineError> {
        let mut lenses = HashMap::with_capacity(variants.len());
        for variant in variants {
            log::info!("Loading lens variant {:?}", variant);
            let lens = engine.load_lens(*variant).await?;
            lenses.insert(*variant, lens);
        }
        Ok(lenses)
    }

    /// Create a session and bind the camera stream to it: mirrored for the
    /// front camera, render size matching the viewport, frame rate capped.
    /// No lens is applied here; the variant choice comes later.
    pub async fn create_and_bind_session(
        &self,
        engine: &dyn ArEngine,
        stream: &dyn MediaStream,
        viewport: (u32, u32),
    ) -> Result<BoundSession, EngineError> {
        log::info!("Creating AR rendering session");
        let mut raw = engine.create_session().await?;

        if !stream.is_active() {
            return Err(EngineError::CameraAccess(
                "media stream became inactive before source creation".to_string(),
            ));
        }

        let source = raw
            .set_source(
                stream,
                SourceTransform::MirrorX,
                viewport,
                config::ENGINE_FPS_CAP,
            )
            .await?;

        let surface = raw.surface().ok_or(EngineError::NoSurface)?;
        log::info!("AR session bound, render surface available");

        Ok(BoundSession {
            raw,
            surface,
            source,
            applied: None,
            state: EngineState::Bound,
        })
    }
}

/// A session that has a source and a render surface. All lifecycle calls go
/// through here so the state machine is enforced in one place.
pub struct BoundSession {
    raw: Box<dyn ArSession>,
    surface: Arc<dyn RenderSurface>,
    source: SourceHandle,
    applied: Option<LensHandle>,
    state: EngineState,
}

impl BoundSession {
    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn surface(&self) -> Arc<dyn RenderSurface> {
        self.surface.clone()
    }

    pub fn source(&self) -> SourceHandle {
        self.source
    }

    pub fn applied_lens(&self) -> Option<&LensHandle> {
        self.applied.as_ref()
    }

    /// Apply a lens; a no-op when the same lens is already applied.
    pub async fn apply_lens(&mut self, lens: &LensHandle) -> Result<(), EngineError> {
        if self.state == EngineState::Destroyed {
            return Err(EngineError::Destroyed);
        }
        if self.applied.as_ref() == Some(lens) {
            log::debug!("Lens {:?} already applied", lens.variant);
            return Ok(());
        }

        log::info!("Applying lens variant {:?}", lens.variant);
        self.raw.apply_lens(lens).await?;
        self.applied = Some(lens.clone());
        Ok(())
    }

    pub async fn play(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Bound | EngineState::Paused => {
                self.raw.play().await?;
                self.state = EngineState::Playing;
                log::info!("AR session playing");
                Ok(())
            }
            EngineState::Playing => Ok(()),
            EngineState::Destroyed => Err(EngineError::Destroyed),
            from => Err(EngineError::InvalidTransition {
                from,
                to: EngineState::Playing,
            }),
        }
    }

    pub async fn pause(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Playing => {
                self.raw.pause().await?;
                self.state = EngineState::Paused;
                log::info!("AR session paused");
                Ok(())
            }
            EngineState::Paused => Ok(()),
            EngineState::Destroyed => Err(EngineError::Destroyed),
            from => Err(EngineError::InvalidTransition {
                from,
                to: EngineState::Paused,
            }),
        }
    }

    /// Tear the session down. Best-effort: a failed pause or destroy is
    /// logged and swallowed so teardown can always complete.
    pub async fn destroy(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }

        if self.state == EngineState::Playing {
            if let Err(e) = self.raw.pause().await {
                log::warn!("Pause before destroy failed: {}", e);
            }
        }
        if let Err(e) = self.raw.destroy().await {
            log::warn!("Engine destroy reported: {}", e);
        }
        if let Err(e) = self.surface.detach() {
            log::debug!("Surface detach during destroy: {}", e);
        }

        self.state = EngineState::Destroyed;
        log::info!("AR session destroyed");
    }
}
