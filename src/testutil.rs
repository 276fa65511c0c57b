//! Shared test doubles for the AR platform, render surface, and backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use crate::api::events::EndedSignal;
use crate::api::http::{ApiError, BoothBackend};
use crate::engine::platform::{
    ArEngine, ArPlatform, ArSession, CameraFacing, EngineCredentials, EngineError, LensHandle,
    LensVariant, MediaStream, RenderSurface, SourceHandle, SourceTransform, SurfaceError,
};

pub(crate) fn red_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]))
}

pub(crate) fn dark_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([20, 20, 30, 255]))
}

/// A render surface that serves a scripted sequence of frames, then a
/// fallback frame forever. `failing()` builds one that always errors.
pub(crate) struct ScriptedSurface {
    frames: Mutex<VecDeque<RgbaImage>>,
    fallback: Option<RgbaImage>,
    served: AtomicUsize,
    dimensions: (u32, u32),
}

impl ScriptedSurface {
    pub(crate) fn always(frame: RgbaImage) -> Self {
        let dimensions = frame.dimensions();
        Self {
            frames: Mutex::new(VecDeque::new()),
            fallback: Some(frame),
            served: AtomicUsize::new(0),
            dimensions,
        }
    }

    pub(crate) fn sequence(frames: Vec<RgbaImage>, fallback: RgbaImage) -> Self {
        let dimensions = fallback.dimensions();
        Self {
            frames: Mutex::new(frames.into()),
            fallback: Some(fallback),
            served: AtomicUsize::new(0),
            dimensions,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            fallback: None,
            served: AtomicUsize::new(0),
            dimensions: (400, 400),
        }
    }

    pub(crate) fn frames_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl RenderSurface for ScriptedSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn frame(&self) -> Result<RgbaImage, SurfaceError> {
        if let Some(frame) = self.frames.lock().unwrap().pop_front() {
            self.served.fetch_add(1, Ordering::SeqCst);
            return Ok(frame);
        }
        match &self.fallback {
            Some(frame) => {
                self.served.fetch_add(1, Ordering::SeqCst);
                Ok(frame.clone())
            }
            None => Err(SurfaceError::Detached),
        }
    }

    fn attach(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn detach(&self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockStream {
    pub(crate) stopped: AtomicBool,
}

impl MediaStream for Arc<MockStream> {
    fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    fn stop_tracks(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// AR platform double. Counts bootstraps, records created streams, and can
/// delay bootstrap to widen race windows in cache tests.
pub(crate) struct MockPlatform {
    pub(crate) bootstraps: AtomicUsize,
    pub(crate) streams: Mutex<Vec<Arc<MockStream>>>,
    bootstrap_delay: Duration,
    frame: RgbaImage,
}

impl MockPlatform {
    pub(crate) fn new() -> Self {
        Self {
            bootstraps: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
            bootstrap_delay: Duration::ZERO,
            frame: red_frame(400, 400),
        }
    }

    pub(crate) fn with_bootstrap_delay(mut self, delay: Duration) -> Self {
        self.bootstrap_delay = delay;
        self
    }
}

#[async_trait]
impl ArPlatform for MockPlatform {
    async fn bootstrap(
        &self,
        _credentials: &EngineCredentials,
    ) -> Result<Box<dyn ArEngine>, EngineError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if !self.bootstrap_delay.is_zero() {
            tokio::time::sleep(self.bootstrap_delay).await;
        }
        Ok(Box::new(MockEngine {
            frame: self.frame.clone(),
        }))
    }

    async fn acquire_camera(
        &self,
        _facing: CameraFacing,
        _resolution: (u32, u32),
    ) -> Result<Box<dyn MediaStream>, EngineError> {
        let stream = Arc::new(MockStream::default());
        self.streams.lock().unwrap().push(stream.clone());
        Ok(Box::new(stream))
    }
}

struct MockEngine {
    frame: RgbaImage,
}

#[async_trait]
impl ArEngine for MockEngine {
    async fn load_lens(&self, variant: LensVariant) -> Result<LensHandle, EngineError> {
        Ok(LensHandle {
            id: format!("lens-{}", variant.as_str()),
            variant,
        })
    }

    async fn create_session(&self) -> Result<Box<dyn ArSession>, EngineError> {
        Ok(Box::new(MockSession {
            surface: Arc::new(ScriptedSurface::always(self.frame.clone())),
            sourced: false,
        }))
    }
}

struct MockSession {
    surface: Arc<ScriptedSurface>,
    sourced: bool,
}

#[async_trait]
impl ArSession for MockSession {
    async fn set_source(
        &mut self,
        _stream: &dyn MediaStream,
        _transform: SourceTransform,
        _render_size: (u32, u32),
        _fps_cap: u32,
    ) -> Result<SourceHandle, EngineError> {
        self.sourced = true;
        Ok(SourceHandle { id: 1 })
    }

    async fn apply_lens(&mut self, _lens: &LensHandle) -> Result<(), EngineError> {
        Ok(())
    }

    async fn play(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn destroy(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn surface(&self) -> Option<Arc<dyn RenderSurface>> {
        self.sourced.then(|| self.surface.clone() as Arc<dyn RenderSurface>)
    }
}

/// Backend double with switchable failure modes and an optional gate that
/// parks uploads until released.
pub(crate) struct MockBackend {
    fail_upload: bool,
    fail_background_removal: bool,
    upload_gate: Option<EndedSignal>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            fail_upload: false,
            fail_background_removal: false,
            upload_gate: None,
        }
    }

    pub(crate) fn with_failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub(crate) fn with_failing_background_removal(mut self) -> Self {
        self.fail_background_removal = true;
        self
    }

    pub(crate) fn with_upload_gate(mut self) -> Self {
        self.upload_gate = Some(EndedSignal::new());
        self
    }

    pub(crate) fn upload_gate(&self) -> EndedSignal {
        self.upload_gate.clone().expect("gate configured")
    }
}

#[async_trait]
impl BoothBackend for MockBackend {
    async fn create_session(&self, _force_new: bool) -> Result<String, ApiError> {
        Ok("mock-session".to_string())
    }

    async fn reset_session(&self, _session_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn session_status(&self, _session_id: &str) -> Result<bool, ApiError> {
        Ok(false)
    }

    async fn upload_photo(
        &self,
        _photo: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        if let Some(gate) = &self.upload_gate {
            gate.wait().await;
        }
        if self.fail_upload {
            return Err(ApiError::Server("upload rejected".to_string()));
        }
        Ok(format!("http://cdn.test/{}_{}.png", session_id, counter))
    }

    async fn remove_background(
        &self,
        _image: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        if self.fail_background_removal {
            return Err(ApiError::Server("background removal down".to_string()));
        }
        Ok(format!("http://cdn.test/{}_bg_{}.png", session_id, counter))
    }
}
