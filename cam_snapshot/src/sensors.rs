//! Sensors module.
//!
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::Error;

/// How to open a video device.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    /// FourCC of the frame format, has to produce encoded images such as `MJPG`.
    pub format: String,
    /// Highest supported resolution if unset.
    pub resolution: Option<(u32, u32)>,
    /// Highest supported frame rate if unset.
    pub frame_rate: Option<(u32, u32)>,
    /// Frames to drop before a snapshot while exposure settles.
    pub warmup_frames: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_owned(),
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
            warmup_frames: 5,
        }
    }
}

/// Streaming camera on a Linux machine, stopped on [`SnapshotCamera::close`] or drop.
pub struct SnapshotCamera {
    cam: Camera,
    device: String,
    warmup_frames: u32,
    streaming: bool,
}

impl SnapshotCamera {
    /// Open the device and start streaming.
    pub fn open(settings: &CameraSettings) -> Result<Self, Error> {
        let mut cam = Camera::new(&settings.device)?;
        log_supported_formats(&cam, &settings.format);
        let format = settings.format.as_bytes();

        log::info!("Using camera {}", settings.device);

        let resolution = settings
            .resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = settings
            .frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        log::debug!("Resolution {resolution:?}, frame interval {frame_rate:?}");
        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        Ok(Self {
            cam,
            device: settings.device.clone(),
            warmup_frames: settings.warmup_frames,
            streaming: true,
        })
    }

    /// Capture a single encoded frame.
    pub fn snap(&mut self) -> Result<Vec<u8>, Error> {
        if !self.streaming {
            return Err(simple_error!("camera {} is closed", self.device).into());
        }
        for _ in 0..self.warmup_frames {
            self.cam.capture()?;
        }
        // Only the first snapshot needs to wait for the sensor
        self.warmup_frames = 0;

        let frame = self.cam.capture()?;
        log::debug!("Captured frame ({} bytes)", frame.len());
        Ok(frame[..].to_vec())
    }

    /// Stop streaming and release the device.
    pub fn close(mut self) -> Result<(), Error> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), Error> {
        if self.streaming {
            self.streaming = false;
            self.cam.stop()?;
            log::info!("Closed camera {}", self.device);
        }
        Ok(())
    }
}

impl Drop for SnapshotCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Failed to stop camera {}: {e}", self.device);
        }
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract width and height values
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
///
/// Intervals are `(numerator, denominator)` seconds per frame, so the highest frame rate is
/// the one with the largest `denominator / numerator`.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, _)| *numerator > 0)
            .max_by(|a, b| (a.1 as f32 / a.0 as f32).total_cmp(&(b.1 as f32 / b.0 as f32)))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(Result::ok).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn snapshot_if_camera_available() -> Result<(), Error> {
        let settings = CameraSettings::default();

        match SnapshotCamera::open(&settings) {
            Err(err) => println!("Could not open camera (maybe none available): {err}"),
            Ok(mut cam) => {
                let frame = cam.snap()?;
                assert!(!frame.is_empty());
                cam.close()?;
            }
        }

        Ok(())
    }
}
