use std::env;
use std::io;
use std::path::PathBuf;

use facegate_config::{
    default_sources, load_from_paths, ResolvedConfig, ResolvedConfigWithSource, Strategy,
};
use facegate_core::audit::JsonlAttemptLog;
use facegate_core::auth::Authenticator;
use facegate_core::errors::{AppError, AppResult};
#[cfg(feature = "dlib")]
use facegate_core::faces::extractor::{EmbeddingExtractor, EnvModelPathResolver, ModelPathResolver};
use facegate_core::faces::extractor::{FeatureExtractor, HeuristicExtractor};
use facegate_core::faces::matcher::{matcher_for, Matcher};
use facegate_core::faces::quality::{FaceDetector, FullFrameDetector, QualityGate, QualityGateConfig};
use facegate_core::faces::store::{EnvKeyProvider, FilesystemTemplateStore, KeyProvider};
use tracing::debug;

use crate::cli::RuntimeArgs;

pub const TEMPLATE_STORE_ENV: &str = "FACEGATE_TEMPLATE_STORE";
pub const AUDIT_LOG_ENV: &str = "FACEGATE_AUDIT_LOG";

/// Resolves configuration with precedence flag > environment > file > default.
pub fn resolve_config(args: &RuntimeArgs) -> AppResult<ResolvedConfigWithSource> {
    resolve_config_with(args, &default_sources(), |name| env::var(name).ok())
}

pub fn resolve_config_with(
    args: &RuntimeArgs,
    default_paths: &[PathBuf],
    env_lookup: impl Fn(&str) -> Option<String>,
) -> AppResult<ResolvedConfigWithSource> {
    let loaded = match &args.config {
        Some(path) => {
            let loaded = load_from_paths(std::slice::from_ref(path))?;
            if loaded.is_none() {
                return Err(AppError::ConfigRead {
                    path: path.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "configuration file not found"),
                });
            }
            loaded
        }
        None => load_from_paths(default_paths)?,
    };

    let (mut raw, source) = match loaded {
        Some(entry) => (entry.contents, Some(entry.source)),
        None => Default::default(),
    };

    if let Some(strategy) = args.strategy {
        raw.strategy = Some(strategy.into());
    }
    if let Some(tolerance) = args.tolerance {
        raw.match_tolerance = Some(tolerance);
    }
    raw.template_store_path = args
        .store
        .clone()
        .or_else(|| env_lookup(TEMPLATE_STORE_ENV).map(PathBuf::from))
        .or(raw.template_store_path);
    raw.audit_log_path = args
        .audit_log
        .clone()
        .or_else(|| env_lookup(AUDIT_LOG_ENV).map(PathBuf::from))
        .or(raw.audit_log_path);

    let resolved = ResolvedConfig::from_raw(raw);
    resolved.validate()?;
    if let Some(path) = &source {
        debug!(config = %path.display(), "configuration loaded");
    }
    Ok(ResolvedConfigWithSource { resolved, source })
}

pub fn open_template_store(
    config: &ResolvedConfig,
    keys: &dyn KeyProvider,
) -> AppResult<FilesystemTemplateStore> {
    let key = keys.template_key()?;
    Ok(FilesystemTemplateStore::new(&config.template_store_path, config.strategy).with_key(key))
}

pub fn open_attempt_log(config: &ResolvedConfig) -> JsonlAttemptLog {
    JsonlAttemptLog::new(&config.audit_log_path).with_default_limit(config.audit_query_limit)
}

/// Detector and extractor pair for the configured strategy.
pub enum Backend {
    Heuristic {
        detector: FullFrameDetector,
        extractor: HeuristicExtractor,
    },
    #[cfg(feature = "dlib")]
    Embedding(Box<EmbeddingExtractor>),
}

impl Backend {
    pub fn load(config: &ResolvedConfig) -> AppResult<Self> {
        match config.strategy {
            Strategy::Heuristic => Ok(Backend::Heuristic {
                detector: FullFrameDetector,
                extractor: HeuristicExtractor,
            }),
            Strategy::Embedding => Self::load_embedding(config),
        }
    }

    #[cfg(feature = "dlib")]
    fn load_embedding(config: &ResolvedConfig) -> AppResult<Self> {
        let models = EnvModelPathResolver.resolve(config)?;
        let extractor = EmbeddingExtractor::new(&models, config.jitters)?;
        Ok(Backend::Embedding(Box::new(extractor)))
    }

    #[cfg(not(feature = "dlib"))]
    fn load_embedding(_config: &ResolvedConfig) -> AppResult<Self> {
        Err(AppError::BackendUnavailable(
            "the embedding strategy requires a build with the `dlib` feature; \
             use --strategy heuristic"
                .into(),
        ))
    }

    pub fn detector(&self) -> &dyn FaceDetector {
        match self {
            Backend::Heuristic { detector, .. } => detector,
            #[cfg(feature = "dlib")]
            Backend::Embedding(extractor) => extractor.as_ref(),
        }
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        match self {
            Backend::Heuristic { extractor, .. } => extractor,
            #[cfg(feature = "dlib")]
            Backend::Embedding(extractor) => extractor.as_ref(),
        }
    }
}

/// Everything a login or enrollment needs, built once per command.
pub struct Runtime {
    pub config: ResolvedConfig,
    pub config_source: Option<PathBuf>,
    pub gate: QualityGate,
    pub backend: Backend,
    pub matcher: Box<dyn Matcher>,
    pub templates: FilesystemTemplateStore,
    pub auditor: JsonlAttemptLog,
}

impl Runtime {
    pub fn from_args(args: &RuntimeArgs) -> AppResult<Self> {
        let ResolvedConfigWithSource { resolved, source } = resolve_config(args)?;
        Self::from_config(resolved, source, &EnvKeyProvider)
    }

    pub fn from_config(
        config: ResolvedConfig,
        config_source: Option<PathBuf>,
        keys: &dyn KeyProvider,
    ) -> AppResult<Self> {
        let backend = Backend::load(&config)?;
        let templates = open_template_store(&config, keys)?;
        let auditor = open_attempt_log(&config);
        debug!(
            strategy = %config.strategy,
            tolerance = config.match_tolerance,
            store = %config.template_store_path.display(),
            audit_log = %config.audit_log_path.display(),
            "runtime ready"
        );
        Ok(Self {
            gate: QualityGate::new(QualityGateConfig::from(&config)),
            matcher: matcher_for(config.strategy, config.match_tolerance),
            config,
            config_source,
            backend,
            templates,
            auditor,
        })
    }

    pub fn authenticator(&self) -> Authenticator<'_> {
        Authenticator::new(
            &self.gate,
            self.backend.detector(),
            self.backend.extractor(),
            self.matcher.as_ref(),
            &self.templates,
            &self.auditor,
        )
    }
}
