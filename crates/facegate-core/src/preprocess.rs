//! Face crop and orientation policy applied before embedding extraction.
//!
//! The embedding network expects a square face crop in the same orientation
//! at enrollment and at verification time. Front-facing captures are
//! mirrored, so they are flipped back before rescaling.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Side length of the square crop fed to the embedding network.
pub const FACE_INPUT_SIZE: u32 = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("bounding box has non-finite coordinates")]
    InvalidBox,
    #[error("bounding box lies outside the {width}x{height} image")]
    EmptyCrop { width: u32, height: u32 },
    #[error("output size must be non-zero")]
    InvalidSize,
    #[error("unknown camera facing {0:?} (expected \"front\" or \"back\")")]
    UnknownFacing(String),
}

/// Which sensor produced the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFacing {
    /// Mirrored selfie sensor.
    #[default]
    Front,
    Back,
}

impl CaptureFacing {
    pub fn is_mirrored(self) -> bool {
        matches!(self, CaptureFacing::Front)
    }
}

impl FromStr for CaptureFacing {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(CaptureFacing::Front),
            "back" => Ok(CaptureFacing::Back),
            _ => Err(PreprocessError::UnknownFacing(s.to_string())),
        }
    }
}

impl fmt::Display for CaptureFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFacing::Front => f.write_str("front"),
            CaptureFacing::Back => f.write_str("back"),
        }
    }
}

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Integer pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Clamp the box to the image: left/top to >= 0, right/bottom to the bounds.
    ///
    /// Detectors may report boxes partly off-frame; only the visible part is kept.
    pub fn clamp_to(&self, width: u32, height: u32) -> Result<CropRect, PreprocessError> {
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(PreprocessError::InvalidBox);
        }

        let left = self.x.max(0.0);
        let top = self.y.max(0.0);
        let right = (self.x + self.width).min(width as f32);
        let bottom = (self.y + self.height).min(height as f32);

        let crop_w = (right - left).max(0.0) as u32;
        let crop_h = (bottom - top).max(0.0) as u32;
        if crop_w == 0 || crop_h == 0 {
            return Err(PreprocessError::EmptyCrop { width, height });
        }

        Ok(CropRect {
            x: left as u32,
            y: top as u32,
            width: crop_w,
            height: crop_h,
        })
    }
}

/// Crop the image to the clamped bounding box.
pub fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> Result<DynamicImage, PreprocessError> {
    let rect = bbox.clamp_to(image.width(), image.height())?;
    tracing::debug!(
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        "crop face"
    );
    Ok(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

/// Undo the mirror of front-facing captures.
pub fn normalize_orientation(image: DynamicImage, facing: CaptureFacing) -> DynamicImage {
    if facing.is_mirrored() {
        image.fliph()
    } else {
        image
    }
}

/// Orientation fix and unfiltered rescale of a frame that is already a face crop.
pub fn prepare_capture(
    image: DynamicImage,
    facing: CaptureFacing,
    size: u32,
) -> Result<DynamicImage, PreprocessError> {
    if size == 0 {
        return Err(PreprocessError::InvalidSize);
    }
    let oriented = normalize_orientation(image, facing);
    Ok(oriented.resize_exact(size, size, FilterType::Nearest))
}

/// Full enrollment-side policy: crop, orientation fix, rescale to `size`×`size`.
pub fn prepare_face(
    image: &DynamicImage,
    bbox: &BoundingBox,
    facing: CaptureFacing,
    size: u32,
) -> Result<DynamicImage, PreprocessError> {
    let cropped = crop_face(image, bbox)?;
    prepare_capture(cropped, facing, size)
}
