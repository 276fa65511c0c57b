//! One AR booth attempt, end to end.
//!
//! Bridges the session cache, event channel, readiness race, and capture
//! pipeline into the lifecycle a hosting screen drives: initialize, wait for
//! capture readiness, capture, tear down (or reset for a retry).

use std::sync::Arc;

use thiserror::Error;

use crate::api::events::EventChannel;
use crate::api::http::{ApiError, BoothBackend};
use crate::capture::{CaptureOutcome, CapturePipeline, DeviceClass};
use crate::config::{self, CropConfig, DetectorConfig, TimingConfig};
use crate::engine::adapter::EngineAdapter;
use crate::engine::cache::SessionCache;
use crate::engine::platform::{ArPlatform, EngineCredentials, EngineError, LensVariant};
use crate::readiness::{self, ReadyCause};
use crate::session::{resolve_session_id, SessionId};
use crate::store::{keys, KeyValueStore};

#[derive(Error, Debug)]
pub enum ExperienceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Experience is not initialized")]
    NotInitialized,
}

/// Static wiring for an [`ArExperience`].
#[derive(Debug, Clone)]
pub struct ExperienceConfig {
    /// Viewport dimensions, used for render sizing and crop-profile selection.
    pub viewport: (u32, u32),
    pub credentials: EngineCredentials,
    pub detector: DetectorConfig,
    pub timing: TimingConfig,
    pub crop: CropConfig,
}

pub struct ArExperience {
    cache: Arc<SessionCache>,
    backend: Arc<dyn BoothBackend>,
    store: Arc<dyn KeyValueStore>,
    pipeline: CapturePipeline,
    http: reqwest::Client,
    detector: DetectorConfig,
    timing: TimingConfig,
    viewport: (u32, u32),
    credentials: EngineCredentials,
    session_id: Option<SessionId>,
    channel: Option<Arc<EventChannel>>,
    variant: LensVariant,
}

impl ArExperience {
    pub fn new(
        platform: Arc<dyn ArPlatform>,
        backend: Arc<dyn BoothBackend>,
        store: Arc<dyn KeyValueStore>,
        config: ExperienceConfig,
    ) -> Self {
        let cache = Arc::new(SessionCache::new(
            EngineAdapter::new(platform),
            config.viewport,
        ));
        let pipeline = CapturePipeline::with_config(backend.clone(), store.clone(), config.crop);

        Self {
            cache,
            backend,
            store,
            pipeline,
            http: reqwest::Client::new(),
            detector: config.detector,
            timing: config.timing,
            viewport: config.viewport,
            credentials: config.credentials,
            session_id: None,
            channel: None,
            variant: LensVariant::Less,
        }
    }

    /// The shared cache, exposed so a hosting shell can warm it ahead of
    /// screen entry.
    pub fn cache(&self) -> Arc<SessionCache> {
        self.cache.clone()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Resolve the session, bring the engine up (or join a warm preload),
    /// apply the chosen lens variant, and start rendering. The event channel
    /// is created here and pre-seeded from the point-in-time status check.
    pub async fn initialize(
        &mut self,
        explicit_session: Option<&str>,
        variant: LensVariant,
    ) -> Result<(), ExperienceError> {
        let session_id =
            resolve_session_id(explicit_session, self.store.as_ref(), self.backend.as_ref())
                .await?;

        self.store.set(keys::GROUP_SIZE, variant.as_str());
        self.variant = variant;

        let channel = Arc::new(EventChannel::new(
            self.http.clone(),
            config::API_BASE_URL.clone(),
            session_id.as_str(),
        ));

        // The stream and the poll are complementary: the poll covers a
        // session that ended before we ever attached.
        match self.backend.session_status(session_id.as_str()).await {
            Ok(true) => {
                log::info!("Session already ended server-side");
                channel.signal().raise();
            }
            Ok(false) => {}
            Err(e) => log::warn!("Session status probe failed: {}", e),
        }

        self.cache
            .ensure_ready(&LensVariant::ALL, &self.credentials)
            .await?;
        self.cache.apply_variant(variant).await?;
        self.cache.start().await?;

        self.session_id = Some(session_id);
        self.channel = Some(channel);
        Ok(())
    }

    /// Race detector, remote signal, and fallback timer; resolves when the
    /// capture action should be revealed.
    pub async fn await_capture_ready(&self) -> Result<ReadyCause, ExperienceError> {
        let surface = self
            .cache
            .surface()
            .await
            .ok_or(EngineError::NotReady)?;
        let channel = self.channel.as_ref().ok_or(ExperienceError::NotInitialized)?;

        channel.start_supervisor(self.timing.reconnect_check);

        Ok(readiness::run(
            surface,
            channel.signal(),
            Some(channel.clone()),
            self.detector.clone(),
            self.timing.fallback_delay,
        )
        .await)
    }

    /// Run the capture pipeline against the live surface. `None` means a
    /// precondition failed or a capture was already in flight.
    pub async fn capture(&self) -> Option<CaptureOutcome> {
        let surface = self.cache.surface().await;
        let device = DeviceClass::from_viewport_width(self.viewport.0);

        self.pipeline
            .capture(
                surface,
                self.session_id.as_ref().map(|id| id.as_str()),
                device,
                Some(self.variant),
            )
            .await
    }

    /// Release the engine, camera, and event channel.
    pub async fn teardown(&mut self, reason: &str) {
        if let Some(channel) = self.channel.take() {
            channel.disconnect();
        }
        self.cache.teardown(reason).await;
    }

    /// Tear down and mark the server-side session reusable. The session id
    /// is kept so the retry reuses it.
    pub async fn reset_for_retry(&mut self) {
        self.teardown("retry").await;
        if let Some(id) = &self.session_id {
            if let Err(e) = self.backend.reset_session(id.as_str()).await {
                log::warn!("Session reset failed: {}", e);
            }
        }
    }
}
