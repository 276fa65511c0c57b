//! Visual trigger detection.
//!
//! The in-experience cue is a saturated red figure appearing in the top
//! region of the render surface. Rather than reading full-resolution pixel
//! data every frame, the detector downsamples the top slice into a small
//! scratch buffer on a timer, samples it at a fixed stride, and counts pixels
//! matching the red-marker color rule. Confirmation requires consecutive
//! positive ticks so a transient flash never triggers it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::{DetectorConfig, RedMarkerThresholds};
use crate::engine::platform::RenderSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorOutcome {
    /// The marker was confirmed for `required_hits` consecutive ticks.
    Confirmed,
    /// `max_scan` elapsed without confirmation.
    TimedOut,
    /// Stopped from outside via [`DetectorHandle::stop`].
    Stopped,
}

/// Stop control for a running detector.
#[derive(Clone)]
pub struct DetectorHandle {
    running: Arc<AtomicBool>,
}

impl DetectorHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Spawn the detection loop against a render surface. The task resolves with
/// the outcome; the handle stops it early.
pub fn spawn(
    surface: Arc<dyn RenderSurface>,
    config: DetectorConfig,
) -> (DetectorHandle, JoinHandle<DetectorOutcome>) {
    let running = Arc::new(AtomicBool::new(true));
    let handle = DetectorHandle {
        running: running.clone(),
    };

    let task = tokio::spawn(async move {
        log::info!("Starting visual trigger detection");
        let started = Instant::now();
        let mut ticker = interval(config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive = 0u32;

        loop {
            ticker.tick().await;

            if !running.load(Ordering::Acquire) {
                log::info!("Visual trigger detection stopped");
                return DetectorOutcome::Stopped;
            }
            if started.elapsed() >= config.max_scan {
                log::info!("Visual trigger scan timed out");
                running.store(false, Ordering::Release);
                return DetectorOutcome::TimedOut;
            }

            // A failed frame read is a miss for this tick, never a crash; the
            // surface may be mid-reattach.
            let hit = match surface.frame() {
                Ok(frame) => frame_has_marker(&frame, &config),
                Err(e) => {
                    log::debug!("Trigger scan skipped: {}", e);
                    false
                }
            };

            if hit {
                consecutive += 1;
                log::debug!(
                    "Trigger marker hit ({}/{})",
                    consecutive,
                    config.required_hits
                );
                if consecutive >= config.required_hits {
                    log::info!("Visual trigger confirmed");
                    running.store(false, Ordering::Release);
                    return DetectorOutcome::Confirmed;
                }
            } else {
                consecutive = 0;
            }
        }
    });

    (handle, task)
}

/// Whether one frame currently shows the marker.
fn frame_has_marker(frame: &RgbaImage, config: &DetectorConfig) -> bool {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return false;
    }

    // Only the top slice matters, and the scratch buffer is capped in
    // absolute pixels so the cost stays flat on high-DPI devices.
    let top_height = ((height as f32 * config.top_area_fraction) as u32).clamp(1, height);
    let scan_width = width.min(config.max_scan_width).max(1);
    let scan_height = top_height.min(config.max_scan_height).max(1);

    let region = imageops::crop_imm(frame, 0, 0, width, top_height).to_image();
    let scratch = if (scan_width, scan_height) == (width, top_height) {
        region
    } else {
        imageops::resize(&region, scan_width, scan_height, FilterType::Nearest)
    };

    marker_pixel_count(&scratch, config) >= config.min_marker_pixels
}

/// Count marker pixels at the configured stride, stopping as soon as the
/// required count is reached.
fn marker_pixel_count(scratch: &RgbaImage, config: &DetectorConfig) -> usize {
    let stride = config.sample_stride.max(1);
    let mut found = 0usize;

    for pixel in scratch.pixels().step_by(stride) {
        let [r, g, b, _] = pixel.0;
        if is_marker_pixel(r, g, b, &config.thresholds) {
            found += 1;
            if found >= config.min_marker_pixels {
                break;
            }
        }
    }

    found
}

/// The red-marker color rule: strong red, low green and blue, bright enough
/// overall, and red dominating green+blue by a multiplicative margin.
pub fn is_marker_pixel(r: u8, g: u8, b: u8, thresholds: &RedMarkerThresholds) -> bool {
    let intensity = u16::from(r) + u16::from(g) + u16::from(b);
    r >= thresholds.min_red
        && g <= thresholds.max_green
        && b <= thresholds.max_blue
        && intensity >= thresholds.min_intensity
        && f32::from(r) > (f32::from(g) + f32::from(b)) * thresholds.dominance
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testutil::{dark_frame, red_frame, ScriptedSurface};

    fn thresholds() -> RedMarkerThresholds {
        RedMarkerThresholds::default()
    }

    #[test]
    fn test_saturated_red_matches() {
        assert!(is_marker_pixel(255, 0, 0, &thresholds()));
        assert!(is_marker_pixel(200, 30, 40, &thresholds()));
    }

    #[test]
    fn test_orange_fails_dominance() {
        // Bright orange: red high, but green too strong.
        assert!(!is_marker_pixel(255, 165, 0, &thresholds()));
        // Red barely above green+blue doesn't clear the 1.5x margin.
        assert!(!is_marker_pixel(160, 80, 30, &thresholds()));
    }

    #[test]
    fn test_dark_red_fails_intensity_floor() {
        assert!(!is_marker_pixel(150, 10, 10, &thresholds()));
    }

    #[test]
    fn test_magenta_fails_blue_cap() {
        assert!(!is_marker_pixel(255, 0, 180, &thresholds()));
    }

    #[test]
    fn test_marker_only_counts_in_top_region() {
        let config = DetectorConfig::default();

        // Red only in the bottom three quarters: no detection.
        let mut frame = dark_frame(400, 400);
        for y in 150..400 {
            for x in 0..400 {
                frame.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            }
        }
        assert!(!frame_has_marker(&frame, &config));

        // Red across the top quarter: detected.
        assert!(frame_has_marker(&red_frame(400, 400), &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_hits_required() {
        // [hit, hit, miss, hit, hit, hit] with required_hits = 3 must confirm
        // at the sixth sample, not the fifth.
        let surface = Arc::new(ScriptedSurface::sequence(
            vec![
                red_frame(400, 400),
                red_frame(400, 400),
                dark_frame(400, 400),
                red_frame(400, 400),
                red_frame(400, 400),
                red_frame(400, 400),
            ],
            dark_frame(400, 400),
        ));

        let (_, task) = spawn(surface.clone(), DetectorConfig::default());
        let outcome = task.await.unwrap();

        assert_eq!(outcome, DetectorOutcome::Confirmed);
        assert_eq!(surface.frames_served(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_marker() {
        let surface = Arc::new(ScriptedSurface::always(dark_frame(400, 400)));
        let config = DetectorConfig {
            max_scan: Duration::from_secs(2),
            ..DetectorConfig::default()
        };

        let (_, task) = spawn(surface, config);
        assert_eq!(task.await.unwrap(), DetectorOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_handle_ends_detection() {
        let surface = Arc::new(ScriptedSurface::always(dark_frame(400, 400)));
        let (handle, task) = spawn(surface, DetectorConfig::default());

        assert!(handle.is_running());
        handle.stop();

        assert_eq!(task.await.unwrap(), DetectorOutcome::Stopped);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_errors_are_misses() {
        // A surface that always fails to produce frames must time out rather
        // than crash or confirm.
        let surface = Arc::new(ScriptedSurface::failing());
        let config = DetectorConfig {
            max_scan: Duration::from_secs(1),
            ..DetectorConfig::default()
        };

        let (_, task) = spawn(surface, config);
        assert_eq!(task.await.unwrap(), DetectorOutcome::TimedOut);
    }
}
