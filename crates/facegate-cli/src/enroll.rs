use std::fs;
use std::path::{Path, PathBuf};

use facegate_core::errors::{AppError, AppResult};
use facegate_core::faces::enrollment::SessionRegistry;
use facegate_core::identity::IdentityId;
use serde::Serialize;
use tracing::info;

use crate::cli::EnrollArgs;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub image: PathBuf,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollOutcome {
    pub user: IdentityId,
    pub store_path: PathBuf,
    pub samples: Vec<SampleReport>,
    pub samples_collected: usize,
    pub required: usize,
    pub template_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(skip)]
    pub logs: Vec<String>,
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<EnrollOutcome> {
    let runtime = Runtime::from_args(&args.runtime)?;
    enroll_with_runtime(&runtime, args)
}

/// Feeds every image through one session and stores the template once the
/// session is `Ready`. Too few accepted samples leave the store untouched.
pub fn enroll_with_runtime(runtime: &Runtime, args: &EnrollArgs) -> AppResult<EnrollOutcome> {
    let user = IdentityId::new(args.user.clone())?;
    let auth = runtime.authenticator();
    let sessions = SessionRegistry::from_config(&runtime.config);
    let token = sessions.begin()?;

    let mut samples = Vec::with_capacity(args.images.len());
    let mut logs = Vec::new();
    let mut collected = 0;
    for image in &args.images {
        let bytes = read_image(image)?;
        let response = auth.capture_sample_bytes(&sessions, &token, &bytes)?;
        collected = response.samples_collected;
        logs.extend(
            response
                .logs
                .iter()
                .map(|line| format!("{}: {line}", image.display())),
        );
        samples.push(SampleReport {
            image: image.clone(),
            accepted: response.accepted,
            reason: response.reason(),
        });
    }

    let finalized = auth.enroll(&sessions, &token, &user)?;
    if !finalized.template_ready {
        sessions.abandon(&token)?;
        logs.push(format!(
            "only {} of {} samples accepted; template not stored",
            finalized.samples_collected, finalized.required
        ));
    } else {
        info!(user = %user, samples = collected, "enrollment complete");
    }

    Ok(EnrollOutcome {
        user,
        store_path: runtime.templates.path().to_path_buf(),
        samples,
        samples_collected: finalized.samples_collected,
        required: finalized.required,
        template_ready: finalized.template_ready,
        dimension: finalized.template.as_ref().map(|template| template.dimension()),
        logs,
    })
}

pub fn read_image(path: &Path) -> AppResult<Vec<u8>> {
    fs::read(path).map_err(|_| AppError::MissingInput {
        path: path.to_path_buf(),
    })
}
