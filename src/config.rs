//! Configuration constants and tunable parameters for the booth core.

use std::time::Duration;

use once_cell::sync::Lazy;
use url::Url;

/// Base URL for the booth backend.
pub const API_BASE: &str = "http://localhost:8000";

/// Parsed form of [`API_BASE`], cloned by clients that join endpoint paths onto it.
pub static API_BASE_URL: Lazy<Url> =
    Lazy::new(|| Url::parse(API_BASE).expect("API_BASE is a valid URL"));

/// Session creation endpoint path.
pub const CREATE_SESSION_PATH: &str = "api/snap/create-session";

/// Session reset endpoint path.
pub const RESET_SESSION_PATH: &str = "api/snap/reset-session";

/// Photo upload endpoint path.
pub const UPLOAD_PHOTO_PATH: &str = "api/upload-photo-id";

/// Background removal endpoint path.
pub const REMOVE_BACKGROUND_PATH: &str = "api/remove-bg-id";

/// Build the point-in-time session status path.
pub fn session_status_path(session_id: &str) -> String {
    format!("api/snap/session-status/{}", session_id)
}

/// Build the server-sent event stream path for a session.
pub fn ar_events_path(session_id: &str) -> String {
    format!("api/ar-events/{}", session_id)
}

/// Preferred camera capture resolution.
pub const CAMERA_RESOLUTION: (u32, u32) = (1280, 720);

/// Frame-rate cap applied to the AR session.
pub const ENGINE_FPS_CAP: u32 = 60;

/// Tag sent with photo uploads identifying where the image came from.
pub const PHOTO_SOURCE_TAG: &str = "ar_screenshot";

/// Viewport width (px) at or above which a device uses the tablet crop profile.
pub const TABLET_MIN_WIDTH: u32 = 768;

/// Inclusive viewport width band (px) for the narrow-phone crop profile.
pub const NARROW_PHONE_WIDTHS: std::ops::RangeInclusive<u32> = 350..=414;

/// Color rule for classifying a sampled pixel as a trigger-marker pixel.
///
/// A pixel matches when red is high, green and blue are both low, the summed
/// channels clear a brightness floor, and red exceeds green+blue by a
/// multiplicative margin. The margin is what separates saturated red from
/// orange, pink, and dark tones.
#[derive(Debug, Clone)]
pub struct RedMarkerThresholds {
    pub min_red: u8,
    pub max_green: u8,
    pub max_blue: u8,
    pub min_intensity: u16,
    pub dominance: f32,
}

impl Default for RedMarkerThresholds {
    fn default() -> Self {
        Self {
            min_red: 150,
            max_green: 100,
            max_blue: 100,
            min_intensity: 200,
            dominance: 1.5,
        }
    }
}

/// Tunable parameters for the visual trigger detector.
///
/// The deployed experience has shipped with more than one parameterization of
/// `min_marker_pixels` and the outer fallback delay, so none of these are
/// hard-coded at call sites.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Interval between scan ticks.
    pub scan_interval: Duration,
    /// Fraction of the surface height, measured from the top, that is scanned.
    pub top_area_fraction: f32,
    /// Absolute cap on the scratch buffer width, regardless of device resolution.
    pub max_scan_width: u32,
    /// Absolute cap on the scratch buffer height.
    pub max_scan_height: u32,
    /// Sample every Nth pixel of the scratch buffer (50 is roughly 2% coverage).
    pub sample_stride: usize,
    pub thresholds: RedMarkerThresholds,
    /// Marker pixels required for a single tick to count as a hit.
    pub min_marker_pixels: usize,
    /// Consecutive hits required before the trigger is confirmed.
    pub required_hits: u32,
    /// Hard stop for the detector itself, independent of outer timers.
    pub max_scan: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(200),
            top_area_fraction: 0.25,
            max_scan_width: 400,
            max_scan_height: 100,
            sample_stride: 50,
            thresholds: RedMarkerThresholds::default(),
            min_marker_pixels: 7,
            required_hits: 3,
            max_scan: Duration::from_secs(30),
        }
    }
}

/// Timer durations owned by the readiness controller and event channel.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Outermost safety net; must exceed the detector's own `max_scan`.
    pub fallback_delay: Duration,
    /// How often the event-stream supervisor checks for a dead connection.
    pub reconnect_check: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fallback_delay: Duration::from_secs(40),
            reconnect_check: Duration::from_secs(3),
        }
    }
}

/// A capture rectangle expressed as percentages of the canvas dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPercent {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Per-device-class crop rectangles plus the output enlargement factor.
#[derive(Debug, Clone)]
pub struct CropConfig {
    pub tablet: CropPercent,
    pub narrow_phone: CropPercent,
    pub default: CropPercent,
    /// Extracted region is upscaled by this factor for output quality.
    pub enlargement: f32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            tablet: CropPercent {
                x: 18.0,
                y: 25.0,
                width: 65.0,
                height: 60.0,
            },
            narrow_phone: CropPercent {
                x: 0.0,
                y: 10.0,
                width: 100.0,
                height: 70.0,
            },
            default: CropPercent {
                x: 2.0,
                y: 10.0,
                width: 96.0,
                height: 72.0,
            },
            enlargement: 1.3,
        }
    }
}
