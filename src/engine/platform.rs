//! Seam over the third-party AR rendering SDK.
//!
//! The SDK itself is a black box providing camera binding, lens application,
//! and a live render surface. Everything the booth core needs from it is
//! expressed here as a capability set so the rest of the crate never touches
//! vendor types.

use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine bootstrap failed: {0}")]
    Init(String),
    #[error("Camera access failed: {0}")]
    CameraAccess(String),
    #[error("Lens load failed: {0}")]
    LensLoad(String),
    #[error("Lens apply failed: {0}")]
    LensApply(String),
    #[error("No render surface after session bind")]
    NoSurface,
    #[error("AR session is not ready")]
    NotReady,
    #[error("Engine already destroyed")]
    Destroyed,
    #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition { from: EngineState, to: EngineState },
    #[error("Session cache was torn down during initialization")]
    CacheInvalidated,
}

/// Engine-handle lifecycle. `Playing` is only reachable through `Bound`, and
/// `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Bootstrapped,
    Sourced,
    Bound,
    Playing,
    Paused,
    Destroyed,
}

/// Credentials handed to the SDK bootstrap call.
#[derive(Debug, Clone)]
pub struct EngineCredentials {
    pub api_token: String,
}

/// User-facing group-size choice; each maps to one loadable lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LensVariant {
    Less,
    More,
}

impl LensVariant {
    pub const ALL: [LensVariant; 2] = [LensVariant::Less, LensVariant::More];

    pub fn as_str(&self) -> &'static str {
        match self {
            LensVariant::Less => "less",
            LensVariant::More => "more",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "less" => Some(LensVariant::Less),
            "more" => Some(LensVariant::More),
            _ => None,
        }
    }
}

/// A loaded lens asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LensHandle {
    pub id: String,
    pub variant: LensVariant,
}

/// Opaque handle to the media-to-engine source adapter; 1:1 with the stream
/// it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceHandle {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTransform {
    /// Horizontal mirror, the front-camera convention.
    MirrorX,
    None,
}

/// A live camera stream. Tracks must be stopped before the stream is dropped
/// or the platform may keep the camera locked.
pub trait MediaStream: Send + Sync {
    fn is_active(&self) -> bool;
    fn stop_tracks(&self);
}

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Surface detached from display tree")]
    Detached,
    #[error("Frame read failed: {0}")]
    Read(String),
}

/// The drawable output of an AR session.
///
/// The hosting layer owns where (and whether) the surface appears in a
/// display tree; attach/detach report their outcome structurally because a
/// detach race is an expected state, not an exception.
pub trait RenderSurface: Send + Sync {
    fn dimensions(&self) -> (u32, u32);
    /// Snapshot of the current frame contents.
    fn frame(&self) -> Result<RgbaImage, SurfaceError>;
    fn attach(&self) -> Result<(), SurfaceError>;
    fn detach(&self) -> Result<(), SurfaceError>;
}

/// SDK entry points available before any session exists.
#[async_trait]
pub trait ArPlatform: Send + Sync {
    async fn bootstrap(
        &self,
        credentials: &EngineCredentials,
    ) -> Result<Box<dyn ArEngine>, EngineError>;

    async fn acquire_camera(
        &self,
        facing: CameraFacing,
        resolution: (u32, u32),
    ) -> Result<Box<dyn MediaStream>, EngineError>;
}

/// A bootstrapped engine instance.
#[async_trait]
pub trait ArEngine: Send + Sync {
    async fn load_lens(&self, variant: LensVariant) -> Result<LensHandle, EngineError>;

    async fn create_session(&self) -> Result<Box<dyn ArSession>, EngineError>;
}

/// A created (not yet necessarily bound) rendering session.
#[async_trait]
pub trait ArSession: Send + Sync {
    async fn set_source(
        &mut self,
        stream: &dyn MediaStream,
        transform: SourceTransform,
        render_size: (u32, u32),
        fps_cap: u32,
    ) -> Result<SourceHandle, EngineError>;

    async fn apply_lens(&mut self, lens: &LensHandle) -> Result<(), EngineError>;

    async fn play(&mut self) -> Result<(), EngineError>;

    async fn pause(&mut self) -> Result<(), EngineError>;

    async fn destroy(&mut self) -> Result<(), EngineError>;

    /// Available once a source has been set.
    fn surface(&self) -> Option<std::sync::Arc<dyn RenderSurface>>;
}
