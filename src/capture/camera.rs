// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Camera capture as an explicit, scoped resource

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::EncodedImage;
use crate::error::CaptureError;

/// One still grabbed from a camera stream
#[derive(Debug, Clone)]
pub enum Frame {
    /// Raw 8-bit RGB pixels at the stream's native resolution
    Rgb { width: u32, height: u32, pixels: Vec<u8> },
    /// A frame the device already encoded
    Encoded { mime: String, bytes: Vec<u8> },
}

/// A camera that can be opened into a live stream
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Request access and start streaming
    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// A live hardware stream. Must be stopped to free the device.
#[async_trait]
pub trait CameraStream: Send {
    async fn grab(&mut self) -> Result<Frame, CaptureError>;

    fn stop(&mut self);
}

/// Holds at most one open stream for a camera device
pub struct CameraSession {
    device: Arc<dyn CameraDevice>,
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraSession {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            stream: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the stream unless one is already open
    pub async fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            debug!("Camera {} already acquired", self.device.name());
            return Ok(());
        }
        let stream = self.device.open().await?;
        info!("Camera {} acquired", self.device.name());
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop the stream if one is open. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Camera {} released", self.device.name());
        }
    }

    /// Grab the current frame as a still image
    pub async fn capture_frame(&mut self) -> Result<EncodedImage, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::DeviceUnavailable)?;
        let frame = stream.grab().await?;
        encode_frame(frame, self.device.name())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Encode a frame for the wire without resizing it
pub fn encode_frame(frame: Frame, origin: &str) -> Result<EncodedImage, CaptureError> {
    match frame {
        Frame::Encoded { mime, bytes } => {
            if bytes.is_empty() {
                return Err(CaptureError::Encode("empty frame".to_string()));
            }
            Ok(EncodedImage::from_bytes(&bytes, &mime, origin))
        }
        Frame::Rgb { width, height, pixels } => {
            let img = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
                CaptureError::Encode(format!("pixel buffer does not match {}x{}", width, height))
            })?;

            let mut buffer = Vec::new();
            DynamicImage::ImageRgb8(img)
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;

            Ok(EncodedImage::from_bytes(&buffer, "image/png", origin))
        }
    }
}

/// Camera backed by an `ffmpeg` capture input (v4l2, avfoundation, dshow)
pub struct FfmpegCamera {
    device: String,
    input_format: String,
}

impl FfmpegCamera {
    pub fn new(device: &str, input_format: &str) -> Self {
        Self {
            device: device.to_string(),
            input_format: input_format.to_string(),
        }
    }

    async fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CameraDevice for FfmpegCamera {
    fn name(&self) -> &str {
        &self.device
    }

    async fn open(&self) -> Result<Box<dyn CameraStream>, CaptureError> {
        if self.input_format == "v4l2" {
            let path = Path::new(&self.device);
            if !path.exists() {
                warn!("Camera device {} does not exist", self.device);
                return Err(CaptureError::DeviceUnavailable);
            }
            if let Err(e) = std::fs::File::open(path) {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    return Err(CaptureError::PermissionDenied(self.device.clone()));
                }
                return Err(CaptureError::DeviceUnavailable);
            }
        }

        if !Self::ffmpeg_available().await {
            warn!("FFmpeg not available, camera capture disabled");
            return Err(CaptureError::DeviceUnavailable);
        }

        Ok(Box::new(FfmpegStream {
            device: self.device.clone(),
            input_format: self.input_format.clone(),
            stopped: false,
        }))
    }
}

struct FfmpegStream {
    device: String,
    input_format: String,
    stopped: bool,
}

#[async_trait]
impl CameraStream for FfmpegStream {
    async fn grab(&mut self) -> Result<Frame, CaptureError> {
        if self.stopped {
            return Err(CaptureError::DeviceUnavailable);
        }

        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-f", &self.input_format, "-i", &self.device])
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|_| CaptureError::DeviceUnavailable)?;

        if !output.status.success() || output.stdout.is_empty() {
            warn!(
                "Frame grab from {} failed: {}",
                self.device,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(CaptureError::DeviceUnavailable);
        }

        Ok(Frame::Encoded {
            mime: "image/png".to_string(),
            bytes: output.stdout,
        })
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
