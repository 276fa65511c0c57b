//! AR engine integration: the platform seam, the adapter that drives it, and
//! the single-flight session cache.

pub mod adapter;
pub mod cache;
pub mod platform;

pub use adapter::{BoundSession, EngineAdapter};
pub use cache::SessionCache;
pub use platform::{
    ArEngine, ArPlatform, ArSession, CameraFacing, EngineCredentials, EngineError, EngineState,
    LensHandle, LensVariant, MediaStream, RenderSurface, SourceHandle, SourceTransform,
    SurfaceError,
};
