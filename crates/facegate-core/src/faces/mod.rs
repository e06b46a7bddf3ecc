pub mod enrollment;
pub mod extractor;
pub mod matcher;
pub mod quality;
pub mod store;

pub use enrollment::{
    EnrollmentSession, SampleProgress, SessionRegistry, SessionState, SessionToken, Template,
};

pub use extractor::{
    EnvModelPathResolver, ExtractionFailure, FaceModelPaths, FeatureBag, FeatureExtractor,
    HeuristicExtractor, ModelPathResolver, HEURISTIC_DIMENSION,
};

#[cfg(feature = "dlib")]
pub use extractor::{EmbeddingExtractor, DLIB_EMBEDDING_DIMENSION};

pub use matcher::{
    confidence_from_distance, euclidean_distance, matcher_for, EuclideanDistance,
    LinearScanMatcher, MatchOutcome, MatchResult, Matcher, Metric, WeightedHeuristicSimilarity,
};

pub use quality::{
    laplacian_variance, BoundingBox, FaceDetector, FullFrameDetector, QualityGate,
    QualityGateConfig, QualityIssue, QualityVerdict, ValidatedImage,
};

pub use store::{
    EnrolledTemplate, EnvKeyProvider, FilesystemTemplateStore, InMemoryTemplateStore,
    KeyProvider, StoredTemplate, TemplateKey, TemplateStore, TemplateSummary,
};
