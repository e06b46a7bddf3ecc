use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use facegate_config::ConfigError;
use serde::Serialize;
use thiserror::Error;

use crate::faces::extractor::ExtractionFailure;
use crate::faces::quality::QualityIssue;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("feature backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to write template store {path}: {source}")]
    TemplateWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read template store {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template store {path} is invalid: {message}")]
    InvalidTemplateStore { path: PathBuf, message: String },

    #[error("template for identity '{identity}' is invalid: {message}")]
    InvalidTemplate { identity: String, message: String },

    #[error("vector length mismatch (expected {expected} values, found {found})")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("no template enrolled for identity '{identity}'")]
    TemplateNotFound { identity: String },

    #[error("failed to append to attempt log {path}: {source}")]
    AuditWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read attempt log {path}: {source}")]
    AuditRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid identity '{identity}': {message}")]
    InvalidIdentity { identity: String, message: String },

    #[error("enrollment session not found or expired")]
    SessionNotFound,

    #[error("enrollment session not ready ({collected} of {required} samples accepted)")]
    SessionNotReady { collected: usize, required: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("template store {path} is encrypted and requires a key")]
    EncryptedStoreRequiresKey { path: PathBuf },

    #[error("template encryption error: {0}")]
    Encryption(String),

    #[error("template store key invalid: {0}")]
    InvalidStoreKey(String),

    #[error("internal state lock poisoned: {0}")]
    StatePoisoned(&'static str),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::MissingInput { .. } => ExitCode::from(2),
            AppError::MissingModel { .. } => ExitCode::from(2),
            AppError::ModelLoad { .. } => ExitCode::from(2),
            AppError::BackendUnavailable(_) => ExitCode::from(2),
            AppError::TemplateRead { .. } => ExitCode::from(2),
            AppError::InvalidTemplateStore { .. } => ExitCode::from(2),
            AppError::InvalidTemplate { .. } => ExitCode::from(3),
            AppError::DimensionMismatch { .. } => ExitCode::from(3),
            AppError::TemplateNotFound { .. } => ExitCode::from(4),
            AppError::AuditRead { .. } => ExitCode::from(2),
            AppError::InvalidIdentity { .. } => ExitCode::from(2),
            AppError::SessionNotFound => ExitCode::from(4),
            AppError::SessionNotReady { .. } => ExitCode::from(3),
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::ConfigInvalid(_) => ExitCode::from(2),
            AppError::EncryptedStoreRequiresKey { .. } => ExitCode::from(2),
            AppError::Encryption(_) => ExitCode::from(2),
            AppError::InvalidStoreKey(_) => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
            ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
            ConfigError::Invalid(message) => AppError::ConfigInvalid(message),
        }
    }
}

/// Broad class of a user-facing negative outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    Input,
    Quality,
    Extraction,
    Enrollment,
    NoMatch,
}

/// A non-fatal reason a sample was refused or a login did not authenticate.
///
/// These never travel as [`AppError`]; they are part of the normal outcome
/// returned to callers and recorded in the attempt log.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    MalformedImage(String),
    Quality(QualityIssue),
    Extraction(ExtractionFailure),
    SessionComplete { required: usize },
    NoMatch,
}

impl Rejection {
    pub fn category(&self) -> RejectionCategory {
        match self {
            Rejection::MalformedImage(_) => RejectionCategory::Input,
            Rejection::Quality(issue) if issue.is_input_fault() => RejectionCategory::Input,
            Rejection::Quality(_) => RejectionCategory::Quality,
            Rejection::Extraction(_) => RejectionCategory::Extraction,
            Rejection::SessionComplete { .. } => RejectionCategory::Enrollment,
            Rejection::NoMatch => RejectionCategory::NoMatch,
        }
    }

    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MalformedImage(message) => write!(f, "malformed image: {message}"),
            Rejection::Quality(issue) => write!(f, "{issue}"),
            Rejection::Extraction(failure) => write!(f, "{failure}"),
            Rejection::SessionComplete { required } => {
                write!(f, "enrollment already has all {required} samples")
            }
            Rejection::NoMatch => f.write_str("no matching face"),
        }
    }
}

impl Serialize for Rejection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Rejection", 2)?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("reason", &self.reason())?;
        state.end()
    }
}

impl From<QualityIssue> for Rejection {
    fn from(issue: QualityIssue) -> Self {
        Rejection::Quality(issue)
    }
}

impl From<ExtractionFailure> for Rejection {
    fn from(failure: ExtractionFailure) -> Self {
        Rejection::Extraction(failure)
    }
}
