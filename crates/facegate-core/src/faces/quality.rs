//! Pre-extraction screening of captured images.
//!
//! The gate runs its checks in a fixed order and stops at the first failure:
//! resolution, face count, face size, then sharpness. It never calls a
//! feature extractor; callers only extract from a [`ValidatedImage`].

use std::fmt;

use facegate_config::ResolvedConfig;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn width(&self) -> u64 {
        (self.right - self.left).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.bottom - self.top).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    /// Intersection with the image bounds, as `(x, y, width, height)`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.left.clamp(0, i64::from(width));
        let top = self.top.clamp(0, i64::from(height));
        let right = self.right.clamp(0, i64::from(width));
        let bottom = self.bottom.clamp(0, i64::from(height));
        if right <= left || bottom <= top {
            return None;
        }
        Some((
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// Locates face regions in an image.
pub trait FaceDetector {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>>;
}

/// Reports the whole frame as a single face region.
///
/// Suitable for deployments that receive pre-cropped face images.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            left: 0,
            top: 0,
            right: i64::from(image.width()),
            bottom: i64::from(image.height()),
        }])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QualityIssue {
    LowResolution {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    NoFace,
    MultipleFaces {
        count: usize,
    },
    FaceTooSmall {
        face_width: u64,
        face_height: u64,
        area_ratio: f64,
    },
    Blurry {
        sharpness: f64,
        threshold: f64,
    },
}

impl QualityIssue {
    /// Face-count problems describe the input rather than its quality.
    pub fn is_input_fault(&self) -> bool {
        matches!(self, QualityIssue::NoFace | QualityIssue::MultipleFaces { .. })
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityIssue::LowResolution { .. } => f.write_str("image resolution too low"),
            QualityIssue::NoFace => f.write_str("no face detected"),
            QualityIssue::MultipleFaces { .. } => f.write_str("multiple faces detected"),
            QualityIssue::FaceTooSmall { .. } => f.write_str("face too small"),
            QualityIssue::Blurry { .. } => f.write_str("image too blurry / not live"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityGateConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub min_face_side: u32,
    pub min_face_area_ratio: f64,
    pub blur_threshold: f64,
    pub liveness_check: bool,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self::from(&ResolvedConfig::default())
    }
}

impl From<&ResolvedConfig> for QualityGateConfig {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            min_width: config.min_image_width,
            min_height: config.min_image_height,
            min_face_side: config.min_face_side,
            min_face_area_ratio: config.min_face_area_ratio,
            blur_threshold: config.blur_threshold,
            liveness_check: config.liveness_check,
        }
    }
}

/// An image that passed every gate check, with the face region it was
/// judged on.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedImage<'a> {
    pub image: &'a RgbImage,
    pub face: BoundingBox,
    pub sharpness: Option<f64>,
}

#[derive(Debug)]
pub enum QualityVerdict<'a> {
    Accepted(ValidatedImage<'a>),
    Rejected(QualityIssue),
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityGateConfig,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityGateConfig {
        &self.config
    }

    pub fn validate<'a, D>(&self, image: &'a RgbImage, detector: &D) -> AppResult<QualityVerdict<'a>>
    where
        D: FaceDetector + ?Sized,
    {
        let (width, height) = image.dimensions();
        if width < self.config.min_width || height < self.config.min_height {
            return Ok(QualityVerdict::Rejected(QualityIssue::LowResolution {
                width,
                height,
                min_width: self.config.min_width,
                min_height: self.config.min_height,
            }));
        }

        let faces = detector.detect(image)?;
        debug!(faces = faces.len(), width, height, "face detection finished");
        let detected = match faces.as_slice() {
            [] => return Ok(QualityVerdict::Rejected(QualityIssue::NoFace)),
            [face] => *face,
            many => {
                return Ok(QualityVerdict::Rejected(QualityIssue::MultipleFaces {
                    count: many.len(),
                }))
            }
        };
        // Only the part of the box inside the frame counts.
        let Some((x, y, w, h)) = detected.clamp_to(width, height) else {
            return Ok(QualityVerdict::Rejected(QualityIssue::NoFace));
        };
        let face = BoundingBox {
            left: i64::from(x),
            top: i64::from(y),
            right: i64::from(x) + i64::from(w),
            bottom: i64::from(y) + i64::from(h),
        };

        let image_area = u64::from(width) * u64::from(height);
        let area_ratio = face.area() as f64 / image_area as f64;
        let min_side = u64::from(self.config.min_face_side);
        if face.width() < min_side
            || face.height() < min_side
            || area_ratio < self.config.min_face_area_ratio
        {
            return Ok(QualityVerdict::Rejected(QualityIssue::FaceTooSmall {
                face_width: face.width(),
                face_height: face.height(),
                area_ratio,
            }));
        }

        let sharpness = if self.config.liveness_check {
            let gray = image::imageops::grayscale(image);
            let sharpness = laplacian_variance(&gray);
            debug!(sharpness, threshold = self.config.blur_threshold, "sharpness measured");
            if sharpness <= self.config.blur_threshold {
                return Ok(QualityVerdict::Rejected(QualityIssue::Blurry {
                    sharpness,
                    threshold: self.config.blur_threshold,
                }));
            }
            Some(sharpness)
        } else {
            None
        };

        Ok(QualityVerdict::Accepted(ValidatedImage {
            image,
            face,
            sharpness,
        }))
    }
}

/// Variance of the 4-neighbour Laplacian response over interior pixels.
///
/// Flat or defocused images give values near zero; printed photos held to a
/// camera tend to score low as well.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = f64::from(gray.get_pixel(x, y)[0]);
            let response = f64::from(gray.get_pixel(x - 1, y)[0])
                + f64::from(gray.get_pixel(x + 1, y)[0])
                + f64::from(gray.get_pixel(x, y - 1)[0])
                + f64::from(gray.get_pixel(x, y + 1)[0])
                - 4.0 * center;
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let n = count as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}
