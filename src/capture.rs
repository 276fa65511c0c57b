//! Capture and upload pipeline.
//!
//! On a confirmed capture: extract the device-appropriate sub-region of the
//! render surface, upscale it, encode PNG, optionally request background
//! removal (best-effort), and upload the result tagged with the session id
//! and the alternating photo counter. The caller always receives a terminal
//! [`CaptureOutcome`], success or not.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use thiserror::Error;

use crate::api::http::{ApiError, BoothBackend};
use crate::config::{self, CropConfig};
use crate::engine::platform::{LensVariant, RenderSurface, SurfaceError};
use crate::store::{self, keys, KeyValueStore};

/// Crop profile classification from the viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Tablet,
    NarrowPhone,
    Default,
}

impl DeviceClass {
    pub fn from_viewport_width(width: u32) -> Self {
        if width >= config::TABLET_MIN_WIDTH {
            DeviceClass::Tablet
        } else if config::NARROW_PHONE_WIDTHS.contains(&width) {
            DeviceClass::NarrowPhone
        } else {
            DeviceClass::Default
        }
    }
}

/// A concrete pixel rectangle on the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Resolve the percentage rectangle for a device class against an actual
/// canvas size.
pub fn crop_rect(device: DeviceClass, canvas: (u32, u32), config: &CropConfig) -> CropRect {
    let area = match device {
        DeviceClass::Tablet => config.tablet,
        DeviceClass::NarrowPhone => config.narrow_phone,
        DeviceClass::Default => config.default,
    };
    let (width, height) = canvas;

    CropRect {
        x: percent_of(width, area.x),
        y: percent_of(height, area.y),
        width: percent_of(width, area.width),
        height: percent_of(height, area.height),
    }
}

fn percent_of(length: u32, percent: f32) -> u32 {
    ((length as f32 * percent) / 100.0).floor() as u32
}

/// Terminal event for one capture attempt.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub success: bool,
    pub photo_url: Option<String>,
    pub background_removed_url: Option<String>,
    pub background_removed: bool,
    pub session_id: String,
    pub variant: Option<LensVariant>,
    pub error: Option<String>,
}

#[derive(Error, Debug)]
enum CaptureError {
    #[error("render surface read failed: {0}")]
    Surface(#[from] SurfaceError),
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("upload failed: {0}")]
    Upload(#[from] ApiError),
}

pub struct CapturePipeline {
    backend: Arc<dyn BoothBackend>,
    store: Arc<dyn KeyValueStore>,
    config: CropConfig,
    in_flight: AtomicBool,
}

impl CapturePipeline {
    pub fn new(backend: Arc<dyn BoothBackend>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(backend, store, CropConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn BoothBackend>,
        store: Arc<dyn KeyValueStore>,
        config: CropConfig,
    ) -> Self {
        Self {
            backend,
            store,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one capture attempt. Returns `None` when preconditions fail or a
    /// capture is already in flight; those are silent no-ops, not errors.
    pub async fn capture(
        &self,
        surface: Option<Arc<dyn RenderSurface>>,
        session_id: Option<&str>,
        device: DeviceClass,
        variant: Option<LensVariant>,
    ) -> Option<CaptureOutcome> {
        let Some(surface) = surface else {
            log::warn!("Capture requested without a render surface");
            return None;
        };
        let Some(session_id) = session_id else {
            log::warn!("Capture requested without a session id");
            return None;
        };
        if self.in_flight.swap(true, Ordering::AcqRel) {
            log::info!("Capture already in progress, ignoring");
            return None;
        }

        let outcome = self.run(surface, session_id, device, variant).await;
        self.in_flight.store(false, Ordering::Release);
        Some(outcome)
    }

    async fn run(
        &self,
        surface: Arc<dyn RenderSurface>,
        session_id: &str,
        device: DeviceClass,
        variant: Option<LensVariant>,
    ) -> CaptureOutcome {
        // The counter flips before the upload starts and is reverted only on
        // terminal failure, so retries reuse the value instead of skipping.
        let counter = store::toggle_photo_counter(self.store.as_ref());

        match self
            .extract_and_upload(surface, session_id, device, &counter, variant)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                store::revert_photo_counter(self.store.as_ref(), &counter);
                log::error!("Capture failed: {}", e);
                CaptureOutcome {
                    success: false,
                    photo_url: None,
                    background_removed_url: None,
                    background_removed: false,
                    session_id: session_id.to_string(),
                    variant,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn extract_and_upload(
        &self,
        surface: Arc<dyn RenderSurface>,
        session_id: &str,
        device: DeviceClass,
        counter: &str,
        variant: Option<LensVariant>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let frame = surface.frame()?;
        let rect = crop_rect(device, frame.dimensions(), &self.config);
        log::info!(
            "Extracting {}x{} region at ({}, {}) for {:?}",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            device
        );

        let cropped = imageops::crop_imm(&frame, rect.x, rect.y, rect.width, rect.height).to_image();
        let out_width = (rect.width as f32 * self.config.enlargement) as u32;
        let out_height = (rect.height as f32 * self.config.enlargement) as u32;
        let enlarged = imageops::resize(&cropped, out_width, out_height, FilterType::CatmullRom);

        let mut png = Vec::new();
        enlarged.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

        // Background removal is best-effort: on failure the original image
        // still ships.
        let (background_removed_url, background_removed) = match self
            .backend
            .remove_background(png.clone(), session_id, counter)
            .await
        {
            Ok(url) => (Some(url), true),
            Err(e) => {
                log::warn!("Background removal failed, using original: {}", e);
                (None, false)
            }
        };

        let photo_url = self.backend.upload_photo(png, session_id, counter).await?;

        self.store.set(keys::PHOTO_URL, &photo_url);
        if let Some(url) = &background_removed_url {
            self.store.set(keys::PHOTO_BG_REMOVED_URL, url);
        }
        log::info!("Capture uploaded for session {}", session_id);

        Ok(CaptureOutcome {
            success: true,
            photo_url: Some(photo_url),
            background_removed_url,
            background_removed,
            session_id: session_id.to_string(),
            variant,
            error: None,
        })
    }
}
