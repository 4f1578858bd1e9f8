// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Encoded camera frames and the sources that produce them

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, warn};

use crate::error::{PostureAgentError, Result};

/// One JPEG image ready for transmission
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    jpeg: Vec<u8>,
}

impl EncodedFrame {
    /// Wrap bytes that are already JPEG encoded
    pub fn from_jpeg(jpeg: Vec<u8>) -> Self {
        Self { jpeg }
    }

    /// Encode a packed RGB8 buffer
    pub fn from_rgb(width: u32, height: u32, pixels: &[u8], quality: u8) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(PostureAgentError::Encoding(format!(
                "{}x{} RGB frame needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| PostureAgentError::Encoding(e.to_string()))?;
        Ok(Self { jpeg })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    /// Standard-alphabet base64 without a data-URI prefix
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("bytes", &self.jpeg.len())
            .finish()
    }
}

/// Produces a frame on demand, or nothing when the source is not ready
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Option<EncodedFrame>;
}

impl<F> FrameSource for F
where
    F: Fn() -> Option<EncodedFrame> + Send + Sync,
{
    fn capture(&self) -> Option<EncodedFrame> {
        self()
    }
}

/// Cycles through the JPEG files of a directory in name order
pub struct DirectoryFrameSource {
    frames: Vec<PathBuf>,
    cursor: AtomicUsize,
}

impl DirectoryFrameSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| {
            PostureAgentError::InvalidConfig(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_jpeg(path))
            .collect();
        frames.sort();

        debug!("[FRAMES] {} frames found in {}", frames.len(), dir.display());
        Ok(Self {
            frames,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl FrameSource for DirectoryFrameSource {
    fn capture(&self) -> Option<EncodedFrame> {
        if self.frames.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        let path = &self.frames[index];
        match fs::read(path) {
            Ok(jpeg) => Some(EncodedFrame::from_jpeg(jpeg)),
            Err(e) => {
                warn!("[FRAMES] Skipping unreadable frame {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rgb_frame_encodes_to_jpeg() {
        let pixels = vec![128u8; 8 * 8 * 3];
        let frame = EncodedFrame::from_rgb(8, 8, &pixels, 70).unwrap();
        // JPEG SOI marker
        assert_eq!(&frame.as_bytes()[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_rgb_frame_rejects_wrong_length() {
        let result = EncodedFrame::from_rgb(4, 4, &[0u8; 10], 70);
        assert!(matches!(result, Err(PostureAgentError::Encoding(_))));
    }

    #[test]
    fn test_closure_is_a_frame_source() {
        let source = || Some(EncodedFrame::from_jpeg(vec![1, 2, 3]));
        assert_eq!(source.capture().unwrap().len(), 3);
    }

    #[test]
    fn test_directory_source_cycles_in_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), [2u8]).unwrap();
        fs::write(dir.path().join("a.JPEG"), [1u8]).unwrap();
        fs::write(dir.path().join("notes.txt"), [9u8]).unwrap();

        let source = DirectoryFrameSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let seen: Vec<u8> = (0..3)
            .map(|_| source.capture().unwrap().as_bytes()[0])
            .collect();
        assert_eq!(seen, vec![1, 2, 1]);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        let source = DirectoryFrameSource::open(dir.path()).unwrap();
        assert!(source.capture().is_none());
    }
}
