// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image source adapter: turns files, folders and camera frames into
//! encoded image payloads

pub mod camera;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::CaptureError;
use crate::Result;

pub use camera::{CameraDevice, CameraSession, CameraStream, FfmpegCamera, Frame};

/// An image in wire encoding (base64 of the original bytes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedImage {
    /// MIME type, e.g. `image/jpeg`
    pub mime: String,
    /// Base64 (standard alphabet, padded) of the original bytes
    pub data: String,
    /// blake3 hex digest of the original bytes
    pub digest: String,
    /// Where the image came from: a path, or `camera`
    pub origin: String,
}

impl EncodedImage {
    /// Encode raw bytes without altering them
    pub fn from_bytes(bytes: &[u8], mime: &str, origin: impl Into<String>) -> Self {
        Self {
            mime: mime.to_string(),
            data: general_purpose::STANDARD.encode(bytes),
            digest: blake3::hash(bytes).to_hex().to_string(),
            origin: origin.into(),
        }
    }

    /// Recover the original bytes
    pub fn decode(&self) -> std::result::Result<Vec<u8>, CaptureError> {
        general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| CaptureError::Encode(e.to_string()))
    }

    /// `data:` URL form, as used by browser-style consumers
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }

    /// Short digest for log lines
    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

/// Something a batch item can be captured from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Already captured and encoded
    Encoded(EncodedImage),
    /// A single image file, picked directly or from a folder listing
    File(PathBuf),
    /// The current frame of the acquired camera stream
    Camera,
    /// A video file. Not supported yet; always fails the item.
    Video(PathBuf),
}

impl ImageSource {
    /// Human-readable label for progress and error lines
    pub fn label(&self) -> String {
        match self {
            ImageSource::Encoded(image) => image.origin.clone(),
            ImageSource::File(path) | ImageSource::Video(path) => path.display().to_string(),
            ImageSource::Camera => "camera".to_string(),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Which capture device the adapter is currently driving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Upload,
    Camera,
    Video,
}

/// Result of enumerating a folder of reference or query images
#[derive(Debug, Clone)]
pub struct FolderListing {
    /// Advisory display label, derived from the first file's path prefix
    pub label: String,
    pub files: Vec<PathBuf>,
}

/// Owns the capture mode and the camera resource.
///
/// Leaving camera mode always releases the camera stream.
pub struct ImageSourceAdapter {
    mode: CaptureMode,
    camera: CameraSession,
}

impl ImageSourceAdapter {
    pub fn new(camera: CameraSession) -> Self {
        Self {
            mode: CaptureMode::Upload,
            camera,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Switch capture mode, acquiring or releasing the camera as needed
    pub async fn switch_mode(&mut self, mode: CaptureMode) -> std::result::Result<(), CaptureError> {
        if self.mode == mode {
            return Ok(());
        }
        info!("Capture mode: {:?} -> {:?}", self.mode, mode);

        if self.mode == CaptureMode::Camera {
            self.camera.release();
        }
        self.mode = mode;

        if mode == CaptureMode::Camera {
            if let Err(e) = self.camera.acquire().await {
                self.mode = CaptureMode::Upload;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop any hardware stream and fall back to upload mode
    pub fn release(&mut self) {
        self.camera.release();
        self.mode = CaptureMode::Upload;
    }

    pub fn camera(&self) -> &CameraSession {
        &self.camera
    }

    /// Capture one source into an encoded image
    pub async fn capture(&mut self, source: &ImageSource) -> std::result::Result<EncodedImage, CaptureError> {
        match source {
            ImageSource::Encoded(image) => Ok(image.clone()),
            ImageSource::File(path) => read_image_file(path).await,
            ImageSource::Camera => {
                let result = self.camera.capture_frame().await;
                if result.is_err() {
                    // A failed grab never leaves the device open.
                    self.camera.release();
                    self.mode = CaptureMode::Upload;
                }
                result
            }
            ImageSource::Video(path) => Err(CaptureError::Unsupported(format!(
                "video capture ({})",
                path.display()
            ))),
        }
    }
}

/// Read an image file and encode it losslessly
pub async fn read_image_file(path: &Path) -> std::result::Result<EncodedImage, CaptureError> {
    let mime = mime_for_path(path)
        .ok_or_else(|| CaptureError::UnsupportedFormat(path.display().to_string()))?;

    let bytes = tokio::fs::read(path).await.map_err(|source| CaptureError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Read {} bytes from {:?}", bytes.len(), path);
    Ok(EncodedImage::from_bytes(&bytes, mime, path.display().to_string()))
}

/// MIME type for a supported image extension
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime)
}

/// Check if a file should be picked up from a folder
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip temporary files
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

fn has_format(path: &Path, formats: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| formats.iter().any(|f| f.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Enumerate the image files of a folder, in path order
pub fn enumerate_folder(
    dir: &Path,
    formats: &[String],
    recursive: bool,
    fallback_label: &str,
) -> std::result::Result<FolderListing, CaptureError> {
    let mut files = Vec::new();
    collect_files(dir, recursive, &mut files).map_err(|source| CaptureError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    files.retain(|p| should_process(p) && has_format(p, formats));
    files.sort();

    let label = folder_label(&files).unwrap_or_else(|| fallback_label.to_string());
    debug!("Enumerated {} images in {:?} (label {:?})", files.len(), dir, label);

    Ok(FolderListing { label, files })
}

fn collect_files(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, files)?;
            }
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Name of the directory holding the first file, if it has one
fn folder_label(files: &[PathBuf]) -> Option<String> {
    files
        .first()?
        .parent()?
        .file_name()?
        .to_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Expand CLI inputs (files, folders, glob patterns) into ordered sources
pub fn collect_sources(inputs: &[PathBuf], formats: &[String], recursive: bool) -> Result<Vec<ImageSource>> {
    let mut sources = Vec::new();

    for input in inputs {
        let text = input.to_string_lossy();
        if input.is_dir() {
            let listing = enumerate_folder(input, formats, recursive, "")?;
            sources.extend(listing.files.into_iter().map(ImageSource::File));
        } else if text.contains(['*', '?', '[']) {
            let mut matched: Vec<PathBuf> = glob::glob(&text)?
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_file() && should_process(p) && has_format(p, formats))
                .collect();
            matched.sort();
            sources.extend(matched.into_iter().map(ImageSource::File));
        } else if is_video(input) {
            sources.push(ImageSource::Video(input.clone()));
        } else {
            sources.push(ImageSource::File(input.clone()));
        }
    }

    Ok(sources)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            ["mp4", "mkv", "webm", "avi", "mov", "m4v"]
                .iter()
                .any(|v| v.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
