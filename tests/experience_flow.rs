//! End-to-end flow: session resolution, engine preload, readiness race,
//! capture, and upload, against mock platform and backend implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use lensbooth::{
    ApiError, ArEngine, ArExperience, ArPlatform, ArSession, BoothBackend, CameraFacing,
    CropConfig, DetectorConfig, EngineCredentials, EngineError, ExperienceConfig, KeyValueStore,
    LensHandle, LensVariant, MediaStream, MemoryStore, ReadyCause, RenderSurface, SourceHandle,
    SourceTransform, SurfaceError, TimingConfig,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn red_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]))
}

struct StaticSurface {
    frame: RgbaImage,
}

impl RenderSurface for StaticSurface {
    fn dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn frame(&self) -> Result<RgbaImage, SurfaceError> {
        Ok(self.frame.clone())
    }

    fn attach(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn detach(&self) -> Result<(), SurfaceError> {
        Ok(())
    }
}

struct TestStream;

impl MediaStream for TestStream {
    fn is_active(&self) -> bool {
        true
    }

    fn stop_tracks(&self) {}
}

struct TestSession {
    surface: Arc<StaticSurface>,
    sourced: bool,
}

#[async_trait]
impl ArSession for TestSession {
    async fn set_source(
        &mut self,
        _stream: &dyn MediaStream,
        _transform: SourceTransform,
        _render_size: (u32, u32),
        _fps_cap: u32,
    ) -> Result<SourceHandle, EngineError> {
        self.sourced = true;
        Ok(SourceHandle { id: 7 })
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
        if self.sourced {
            Some(self.surface.clone())
        } else {
            None
        }
    }
}

struct TestEngine;

#[async_trait]
impl ArEngine for TestEngine {
    async fn load_lens(&self, variant: LensVariant) -> Result<LensHandle, EngineError> {
        Ok(LensHandle {
            id: format!("lens-{}", variant.as_str()),
            variant,
        })
    }

    async fn create_session(&self) -> Result<Box<dyn ArSession>, EngineError> {
        Ok(Box::new(TestSession {
            surface: Arc::new(StaticSurface {
                frame: red_frame(390, 844),
            }),
            sourced: false,
        }))
    }
}

struct TestPlatform {
    bootstraps: AtomicUsize,
}

#[async_trait]
impl ArPlatform for TestPlatform {
    async fn bootstrap(
        &self,
        _credentials: &EngineCredentials,
    ) -> Result<Box<dyn ArEngine>, EngineError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestEngine))
    }

    async fn acquire_camera(
        &self,
        _facing: CameraFacing,
        _resolution: (u32, u32),
    ) -> Result<Box<dyn MediaStream>, EngineError> {
        Ok(Box::new(TestStream))
    }
}

#[derive(Default)]
struct TestBackend {
    fail_background_removal: bool,
    resets: AtomicUsize,
    uploaded_counters: Mutex<Vec<String>>,
}

#[async_trait]
impl BoothBackend for TestBackend {
    async fn create_session(&self, _force_new: bool) -> Result<String, ApiError> {
        Ok("flow-session".to_string())
    }

    async fn reset_session(&self, _session_id: &str) -> Result<(), ApiError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn session_status(&self, _session_id: &str) -> Result<bool, ApiError> {
        Ok(false)
    }

    async fn upload_photo(
        &self,
        photo: Vec<u8>,
        session_id: &str,
        counter: &str,
    ) -> Result<String, ApiError> {
        assert!(!photo.is_empty());
        self.uploaded_counters.lock().unwrap().push(counter.to_string());
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

fn experience(
    platform: Arc<TestPlatform>,
    backend: Arc<TestBackend>,
    store: Arc<MemoryStore>,
) -> ArExperience {
    ArExperience::new(
        platform,
        backend,
        store,
        ExperienceConfig {
            viewport: (390, 844),
            credentials: EngineCredentials {
                api_token: "flow-token".to_string(),
            },
            detector: DetectorConfig::default(),
            timing: TimingConfig::default(),
            crop: CropConfig::default(),
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_detector_to_upload() {
    init_logs();
    let platform = Arc::new(TestPlatform {
        bootstraps: AtomicUsize::new(0),
    });
    let backend = Arc::new(TestBackend::default());
    let store = Arc::new(MemoryStore::new());

    let mut experience = experience(platform.clone(), backend.clone(), store.clone());
    experience.initialize(None, LensVariant::Less).await.unwrap();

    assert_eq!(
        experience.session_id().map(|id| id.as_str()),
        Some("flow-session")
    );
    assert_eq!(platform.bootstraps.load(Ordering::SeqCst), 1);

    // The mock surface shows the red marker from the first frame, so the
    // detector wins the race after three consecutive hits.
    let cause = experience.await_capture_ready().await.unwrap();
    assert_eq!(cause, ReadyCause::Detector);

    let outcome = experience.capture().await.expect("capture runs");
    assert!(outcome.success);
    assert_eq!(outcome.session_id, "flow-session");
    assert_eq!(outcome.variant, Some(LensVariant::Less));
    assert_eq!(
        outcome.photo_url.as_deref(),
        Some("http://cdn.test/flow-session_1.png")
    );
    assert!(outcome.background_removed);
    assert_eq!(
        outcome.background_removed_url.as_deref(),
        Some("http://cdn.test/flow-session_bg_1.png")
    );

    // Counter advanced and both URLs were persisted for the next screen.
    assert_eq!(
        *backend.uploaded_counters.lock().unwrap(),
        vec!["1".to_string()]
    );
    assert_eq!(store.get("photo_counter").as_deref(), Some("1"));
    assert_eq!(
        store.get("user_photo").as_deref(),
        Some("http://cdn.test/flow-session_1.png")
    );
    assert_eq!(
        store.get("user_photo_bg_removed").as_deref(),
        Some("http://cdn.test/flow-session_bg_1.png")
    );

    experience.teardown("test done").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_background_removal_degrades_gracefully() {
    init_logs();
    let platform = Arc::new(TestPlatform {
        bootstraps: AtomicUsize::new(0),
    });
    let backend = Arc::new(TestBackend {
        fail_background_removal: true,
        ..TestBackend::default()
    });
    let store = Arc::new(MemoryStore::new());

    let mut experience = experience(platform, backend.clone(), store.clone());
    experience.initialize(None, LensVariant::More).await.unwrap();

    let cause = experience.await_capture_ready().await.unwrap();
    assert_eq!(cause, ReadyCause::Detector);

    let outcome = experience.capture().await.expect("capture runs");
    assert!(outcome.success);
    assert!(!outcome.background_removed);
    assert!(outcome.background_removed_url.is_none());
    assert!(outcome.photo_url.is_some());
    assert!(store.get("user_photo_bg_removed").is_none());

    experience.teardown("test done").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_reuses_session_and_rebuilds_engine() {
    init_logs();
    let platform = Arc::new(TestPlatform {
        bootstraps: AtomicUsize::new(0),
    });
    let backend = Arc::new(TestBackend::default());
    let store = Arc::new(MemoryStore::new());

    let mut experience = experience(platform.clone(), backend.clone(), store.clone());
    experience.initialize(None, LensVariant::Less).await.unwrap();
    assert!(experience.cache().is_ready().await);

    experience.reset_for_retry().await;
    assert!(!experience.cache().is_ready().await);
    assert_eq!(backend.resets.load(Ordering::SeqCst), 1);

    // Second attempt: same persisted session id, fresh engine bootstrap.
    experience.initialize(None, LensVariant::Less).await.unwrap();
    assert_eq!(
        experience.session_id().map(|id| id.as_str()),
        Some("flow-session")
    );
    assert_eq!(platform.bootstraps.load(Ordering::SeqCst), 2);

    experience.teardown("test done").await;
}
