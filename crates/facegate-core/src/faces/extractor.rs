use std::env;
use std::fmt;
use std::path::PathBuf;

use facegate_config::{ResolvedConfig, Strategy};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::faces::quality::ValidatedImage;

const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

/// Why an extractor could not produce a signature for a validated image.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionFailure {
    NoFace,
    MultipleFaces { count: usize },
    Failed(String),
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionFailure::NoFace => f.write_str("no face detected"),
            ExtractionFailure::MultipleFaces { .. } => f.write_str("multiple faces detected"),
            ExtractionFailure::Failed(message) => write!(f, "feature extraction failed: {message}"),
        }
    }
}

/// Turns a gate-approved image into a fixed-length signature.
pub trait FeatureExtractor {
    fn strategy(&self) -> Strategy;

    /// Length of every vector this extractor produces.
    fn dimension(&self) -> usize;

    fn extract(&self, image: &ValidatedImage<'_>) -> Result<Vec<f64>, ExtractionFailure>;
}

#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

pub trait ModelPathResolver {
    fn resolve(&self, config: &ResolvedConfig) -> AppResult<FaceModelPaths>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(&self, config: &ResolvedConfig) -> AppResult<FaceModelPaths> {
        let landmark = config
            .landmark_model
            .clone()
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "landmark predictor",
                flag: "landmark_model",
                env: LANDMARK_ENV,
            })?;

        let encoder = config
            .encoder_model
            .clone()
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "face encoding network",
                flag: "encoder_model",
                env: ENCODER_ENV,
            })?;

        Ok(FaceModelPaths { landmark, encoder })
    }
}

/// Side length the face crop is resampled to before heuristic features are
/// measured.
pub const HEURISTIC_SIDE: u32 = 128;
pub const HISTOGRAM_BINS: usize = 8;
pub const COLOR_FEATURES: usize = 6;
pub const STRUCTURAL_FEATURES: usize = 5;
pub const HEURISTIC_DIMENSION: usize = COLOR_FEATURES + STRUCTURAL_FEATURES + 3 * HISTOGRAM_BINS;

/// Named colour, structure and histogram statistics of a face crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureBag {
    pub avg_r: f64,
    pub avg_g: f64,
    pub avg_b: f64,
    pub std_r: f64,
    pub std_g: f64,
    pub std_b: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub center_avg: f64,
    pub center_std: f64,
    pub edge_density: f64,
    pub hist_r: [f64; HISTOGRAM_BINS],
    pub hist_g: [f64; HISTOGRAM_BINS],
    pub hist_b: [f64; HISTOGRAM_BINS],
}

impl FeatureBag {
    /// Flattens the bag into the fixed layout stored as a template:
    /// colour statistics, structural statistics, then the three histograms.
    pub fn to_vector(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(HEURISTIC_DIMENSION);
        values.extend_from_slice(&[
            self.avg_r,
            self.avg_g,
            self.avg_b,
            self.std_r,
            self.std_g,
            self.std_b,
            self.brightness,
            self.contrast,
            self.center_avg,
            self.center_std,
            self.edge_density,
        ]);
        values.extend_from_slice(&self.hist_r);
        values.extend_from_slice(&self.hist_g);
        values.extend_from_slice(&self.hist_b);
        values
    }

    pub fn from_vector(values: &[f64]) -> AppResult<Self> {
        if values.len() != HEURISTIC_DIMENSION {
            return Err(AppError::DimensionMismatch {
                expected: HEURISTIC_DIMENSION,
                found: values.len(),
            });
        }
        let hist = |offset: usize| {
            let mut bins = [0.0; HISTOGRAM_BINS];
            bins.copy_from_slice(&values[offset..offset + HISTOGRAM_BINS]);
            bins
        };
        let base = COLOR_FEATURES + STRUCTURAL_FEATURES;
        Ok(Self {
            avg_r: values[0],
            avg_g: values[1],
            avg_b: values[2],
            std_r: values[3],
            std_g: values[4],
            std_b: values[5],
            brightness: values[6],
            contrast: values[7],
            center_avg: values[8],
            center_std: values[9],
            edge_density: values[10],
            hist_r: hist(base),
            hist_g: hist(base + HISTOGRAM_BINS),
            hist_b: hist(base + 2 * HISTOGRAM_BINS),
        })
    }

    pub fn from_image(face: &RgbImage) -> Self {
        let resized = if face.dimensions() == (HEURISTIC_SIDE, HEURISTIC_SIDE) {
            face.clone()
        } else {
            imageops::resize(face, HEURISTIC_SIDE, HEURISTIC_SIDE, FilterType::Triangle)
        };
        let side = HEURISTIC_SIDE as usize;

        let mut channels: [Vec<f64>; 3] = Default::default();
        let mut gray = vec![0.0; side * side];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            channels[0].push(f64::from(r));
            channels[1].push(f64::from(g));
            channels[2].push(f64::from(b));
            gray[y as usize * side + x as usize] = (f64::from(r) + f64::from(g) + f64::from(b)) / 3.0;
        }

        let quarter = side / 4;
        let mut center = Vec::with_capacity(4 * quarter * quarter * 3);
        for y in quarter..side - quarter {
            for x in quarter..side - quarter {
                let [r, g, b] = resized.get_pixel(x as u32, y as u32).0;
                center.extend_from_slice(&[f64::from(r), f64::from(g), f64::from(b)]);
            }
        }

        let mut edges = 0.0;
        for y in 0..side {
            for x in 0..side {
                let value = gray[y * side + x];
                if y + 1 < side {
                    edges += (gray[(y + 1) * side + x] - value).abs();
                }
                if x + 1 < side {
                    edges += (gray[y * side + x + 1] - value).abs();
                }
            }
        }

        let (avg_r, std_r) = mean_std(&channels[0]);
        let (avg_g, std_g) = mean_std(&channels[1]);
        let (avg_b, std_b) = mean_std(&channels[2]);
        let (brightness, contrast) = mean_std(&gray);
        let (center_avg, center_std) = mean_std(&center);

        Self {
            avg_r,
            avg_g,
            avg_b,
            std_r,
            std_g,
            std_b,
            brightness,
            contrast,
            center_avg,
            center_std,
            edge_density: edges / (side * side) as f64,
            hist_r: histogram(&channels[0]),
            hist_g: histogram(&channels[1]),
            hist_b: histogram(&channels[2]),
        }
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Equal-width histogram spanning the observed value range. A constant input
/// is binned over `[v - 0.5, v + 0.5]`.
fn histogram(values: &[f64]) -> [f64; HISTOGRAM_BINS] {
    let mut bins = [0.0; HISTOGRAM_BINS];
    if values.is_empty() {
        return bins;
    }
    let mut low = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if high <= low {
        low -= 0.5;
        high += 0.5;
    }
    let width = (high - low) / HISTOGRAM_BINS as f64;
    for value in values {
        let idx = (((value - low) / width).floor() as usize).min(HISTOGRAM_BINS - 1);
        bins[idx] += 1.0;
    }
    bins
}

/// Pure-Rust extractor producing [`FeatureBag`] vectors from the face crop.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn feature_bag(&self, image: &ValidatedImage<'_>) -> Result<FeatureBag, ExtractionFailure> {
        let (x, y, width, height) = image
            .face
            .clamp_to(image.image.width(), image.image.height())
            .ok_or(ExtractionFailure::NoFace)?;
        let crop = imageops::crop_imm(image.image, x, y, width, height).to_image();
        Ok(FeatureBag::from_image(&crop))
    }
}

impl FeatureExtractor for HeuristicExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Heuristic
    }

    fn dimension(&self) -> usize {
        HEURISTIC_DIMENSION
    }

    fn extract(&self, image: &ValidatedImage<'_>) -> Result<Vec<f64>, ExtractionFailure> {
        let bag = self.feature_bag(image)?;
        let values = bag.to_vector();
        if values.iter().any(|value| !value.is_finite()) {
            return Err(ExtractionFailure::Failed(
                "feature bag contains non-finite values".into(),
            ));
        }
        Ok(values)
    }
}

#[cfg(feature = "dlib")]
pub use dlib_backend::{EmbeddingExtractor, DLIB_EMBEDDING_DIMENSION};

#[cfg(feature = "dlib")]
mod dlib_backend {
    use dlib_face_recognition::{
        FaceDetector as DlibDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait,
        ImageMatrix, LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
    };
    use facegate_config::Strategy;
    use image::RgbImage;
    use tracing::debug;

    use super::{ExtractionFailure, FaceModelPaths, FeatureExtractor};
    use crate::errors::{AppError, AppResult};
    use crate::faces::quality::{BoundingBox, FaceDetector, ValidatedImage};

    pub const DLIB_EMBEDDING_DIMENSION: usize = 128;

    /// dlib HOG face detector plus ResNet face encoder producing 128-d
    /// embeddings.
    pub struct EmbeddingExtractor {
        detector: DlibDetector,
        predictor: LandmarkPredictor,
        encoder: FaceEncoderNetwork,
        jitters: u32,
    }

    impl EmbeddingExtractor {
        pub fn new(models: &FaceModelPaths, jitters: u32) -> AppResult<Self> {
            debug!(path = %models.landmark.display(), "loading landmark model");
            let predictor = LandmarkPredictor::open(&models.landmark).map_err(|message| {
                AppError::ModelLoad {
                    path: models.landmark.clone(),
                    message,
                }
            })?;
            debug!(path = %models.encoder.display(), "loading encoder model");
            let encoder = FaceEncoderNetwork::open(&models.encoder).map_err(|message| {
                AppError::ModelLoad {
                    path: models.encoder.clone(),
                    message,
                }
            })?;

            Ok(Self {
                detector: DlibDetector::new(),
                predictor,
                encoder,
                jitters,
            })
        }
    }

    impl FaceDetector for EmbeddingExtractor {
        fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
            let matrix = ImageMatrix::from_image(image);
            let locations = self.detector.face_locations(&matrix);
            Ok(locations
                .iter()
                .map(|rect| BoundingBox {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                })
                .collect())
        }
    }

    impl FeatureExtractor for EmbeddingExtractor {
        fn strategy(&self) -> Strategy {
            Strategy::Embedding
        }

        fn dimension(&self) -> usize {
            DLIB_EMBEDDING_DIMENSION
        }

        fn extract(&self, image: &ValidatedImage<'_>) -> Result<Vec<f64>, ExtractionFailure> {
            let matrix = ImageMatrix::from_image(image.image);
            let rect = Rectangle {
                left: image.face.left,
                top: image.face.top,
                right: image.face.right,
                bottom: image.face.bottom,
            };

            let landmarks = vec![self.predictor.face_landmarks(&matrix, &rect)];
            let encodings = self
                .encoder
                .get_face_encodings(&matrix, &landmarks, self.jitters);
            let encoding = encodings
                .first()
                .ok_or_else(|| ExtractionFailure::Failed("encoder returned no embedding".into()))?;
            let embedding = encoding.as_ref().to_vec();
            if embedding.len() != DLIB_EMBEDDING_DIMENSION {
                return Err(ExtractionFailure::Failed(format!(
                    "encoder returned {} values, expected {DLIB_EMBEDDING_DIMENSION}",
                    embedding.len()
                )));
            }
            Ok(embedding)
        }
    }
}
