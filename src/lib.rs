//! Lensbooth - session core for a mobile AR photo booth experience.
//!
//! Architecture:
//! - `engine` module: seam over the third-party AR SDK, the adapter driving
//!   it, and the single-flight session cache
//! - `detect` module: pixel-sampling visual trigger detector
//! - `readiness` module: capture-readiness state machine and race driver
//! - `api` module: HTTP backend client and server-sent event listener
//! - `capture` module: crop/encode/upload pipeline
//! - `session` / `store` modules: session-identifier resolution and persisted
//!   key-value state
//! - `experience` module: bridges the pieces into one attempt lifecycle
//!
//! The hosting UI (screens, navigation, printing) lives outside this crate;
//! it drives an [`ArExperience`] and owns attaching the render surface to
//! whatever display tree the platform has.

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod engine;
pub mod experience;
pub mod readiness;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::events::{EndedSignal, EventChannel};
pub use api::http::{ApiClient, ApiError, BoothBackend};
pub use capture::{CaptureOutcome, CapturePipeline, CropRect, DeviceClass};
pub use config::{CropConfig, DetectorConfig, RedMarkerThresholds, TimingConfig};
pub use detect::{DetectorHandle, DetectorOutcome};
pub use engine::{
    ArEngine, ArPlatform, ArSession, CameraFacing, EngineAdapter, EngineCredentials, EngineError,
    EngineState, LensHandle, LensVariant, MediaStream, RenderSurface, SessionCache, SourceHandle,
    SourceTransform, SurfaceError,
};
pub use experience::{ArExperience, ExperienceConfig, ExperienceError};
pub use readiness::{ReadinessEvent, ReadinessMachine, ReadinessPhase, ReadyCause};
pub use session::{resolve_session_id, SessionId};
pub use store::{KeyValueStore, MemoryStore};
