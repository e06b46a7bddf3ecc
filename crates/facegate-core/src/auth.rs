use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AttemptAuditor, AttemptQuery, AttemptRecord, AuthMethod};
use crate::errors::{AppError, AppResult, Rejection};
use crate::faces::enrollment::{SampleProgress, SessionRegistry, SessionToken, Template};
use crate::faces::extractor::FeatureExtractor;
use crate::faces::matcher::{MatchOutcome, Matcher};
use crate::faces::quality::{FaceDetector, QualityGate, QualityVerdict};
use crate::faces::store::TemplateStore;
use crate::identity::IdentityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStage {
    Idle,
    CapturingProbe,
    Extracting,
    Matching,
    Authenticated,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub matched: bool,
    pub identity: Option<IdentityId>,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub stages: Vec<LoginStage>,
    pub attempt_id: Uuid,
    #[serde(skip)]
    pub logs: Vec<String>,
}

impl LoginOutcome {
    pub fn reason(&self) -> Option<String> {
        self.rejection.as_ref().map(Rejection::reason)
    }

    pub fn final_stage(&self) -> LoginStage {
        self.stages.last().copied().unwrap_or(LoginStage::Idle)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub samples_collected: usize,
    pub required: usize,
    #[serde(skip)]
    pub logs: Vec<String>,
}

impl CaptureResponse {
    fn from_progress(progress: SampleProgress, rejection: Option<Rejection>, logs: Vec<String>) -> Self {
        Self {
            accepted: progress.accepted && rejection.is_none(),
            rejection,
            samples_collected: progress.collected,
            required: progress.required,
            logs,
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.rejection.as_ref().map(Rejection::reason)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResponse {
    pub template_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    pub samples_collected: usize,
    pub required: usize,
}

impl FinalizeResponse {
    fn ready(template: Template) -> Self {
        let count = template.sample_count();
        Self {
            template_ready: true,
            template: Some(template),
            samples_collected: count,
            required: count,
        }
    }

    fn not_ready(collected: usize, required: usize) -> Self {
        Self {
            template_ready: false,
            template: None,
            samples_collected: collected,
            required,
        }
    }
}

struct LoginTrace {
    stages: Vec<LoginStage>,
    logs: Vec<String>,
}

impl LoginTrace {
    fn new() -> Self {
        Self {
            stages: vec![LoginStage::Idle],
            logs: Vec::new(),
        }
    }

    fn enter(&mut self, stage: LoginStage) {
        debug!(?stage, "login stage");
        self.stages.push(stage);
    }
}

/// Login and enrollment pipelines over pluggable collaborators.
///
/// Every biometric login, accepted or not, is appended to the auditor before
/// the outcome is returned; an audit write failure fails the login.
pub struct Authenticator<'a> {
    gate: &'a QualityGate,
    detector: &'a dyn FaceDetector,
    extractor: &'a dyn FeatureExtractor,
    matcher: &'a dyn Matcher,
    templates: &'a dyn TemplateStore,
    auditor: &'a dyn AttemptAuditor,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        gate: &'a QualityGate,
        detector: &'a dyn FaceDetector,
        extractor: &'a dyn FeatureExtractor,
        matcher: &'a dyn Matcher,
        templates: &'a dyn TemplateStore,
        auditor: &'a dyn AttemptAuditor,
    ) -> Self {
        Self {
            gate,
            detector,
            extractor,
            matcher,
            templates,
            auditor,
        }
    }

    /// Decodes an encoded image and runs [`Authenticator::login`]; undecodable
    /// bytes are an audited input rejection.
    pub fn login_bytes(&self, bytes: &[u8], source: Option<&str>) -> AppResult<LoginOutcome> {
        match image::load_from_memory(bytes) {
            Ok(decoded) => self.login(&decoded.to_rgb8(), source),
            Err(err) => {
                let mut trace = LoginTrace::new();
                trace.enter(LoginStage::CapturingProbe);
                trace.logs.push(format!("probe could not be decoded: {err}"));
                self.reject(trace, Rejection::MalformedImage(err.to_string()), source)
            }
        }
    }

    pub fn login(&self, image: &RgbImage, source: Option<&str>) -> AppResult<LoginOutcome> {
        let mut trace = LoginTrace::new();

        trace.enter(LoginStage::CapturingProbe);
        let verdict = self
            .gate
            .validate(image, self.detector)
            .map_err(|err| self.fail(err, source))?;
        let validated = match verdict {
            QualityVerdict::Accepted(validated) => validated,
            QualityVerdict::Rejected(issue) => {
                trace.logs.push(format!("probe rejected by quality gate: {issue}"));
                return self.reject(trace, issue.into(), source);
            }
        };
        trace.logs.push(format!(
            "probe accepted ({}x{}, face {}x{})",
            image.width(),
            image.height(),
            validated.face.width(),
            validated.face.height()
        ));

        trace.enter(LoginStage::Extracting);
        let probe = match self.extractor.extract(&validated) {
            Ok(probe) => probe,
            Err(failure) => {
                trace.logs.push(format!("extraction failed: {failure}"));
                return self.reject(trace, failure.into(), source);
            }
        };

        trace.enter(LoginStage::Matching);
        let templates = self.templates.get_all().map_err(|err| self.fail(err, source))?;
        let outcome = self
            .matcher
            .best_match(&probe, &templates)
            .map_err(|err| self.fail(err, source))?;
        match outcome {
            MatchOutcome::Matched(result) => {
                trace.enter(LoginStage::Authenticated);
                trace.logs.push(format!(
                    "matched '{}' at distance {:.4} among {} templates",
                    result.identity,
                    result.distance,
                    templates.len()
                ));
                let record = AttemptRecord::new(AuthMethod::Biometric, true, result.confidence)
                    .with_identity(Some(result.identity.clone()))
                    .with_source(source.map(str::to_string));
                self.auditor.append(&record)?;
                info!(
                    identity = %result.identity,
                    confidence = result.confidence,
                    "biometric login authenticated"
                );
                Ok(LoginOutcome {
                    matched: true,
                    identity: Some(result.identity),
                    confidence: Some(record.confidence),
                    rejection: None,
                    stages: trace.stages,
                    attempt_id: record.id,
                    logs: trace.logs,
                })
            }
            MatchOutcome::NoMatch {
                closest_distance,
                compared,
            } => {
                match closest_distance {
                    Some(distance) => trace.logs.push(format!(
                        "no template within tolerance {:.4} (closest {distance:.4} of {compared})",
                        self.matcher.tolerance()
                    )),
                    None => trace.logs.push("no templates enrolled".to_string()),
                }
                self.reject(trace, Rejection::NoMatch, source)
            }
        }
    }

    /// Audits a login cut short by an internal error and hands the error
    /// back. If the audit write fails as well, the original error wins.
    fn fail(&self, err: AppError, source: Option<&str>) -> AppError {
        let record = AttemptRecord::new(AuthMethod::Biometric, false, 0.0)
            .with_source(source.map(str::to_string))
            .with_reason(format!("internal error: {err}"));
        if let Err(audit_err) = self.auditor.append(&record) {
            warn!(error = %audit_err, "failed to audit aborted login");
        }
        warn!(error = %err, "biometric login aborted");
        err
    }

    fn reject(
        &self,
        mut trace: LoginTrace,
        rejection: Rejection,
        source: Option<&str>,
    ) -> AppResult<LoginOutcome> {
        trace.enter(LoginStage::Rejected);
        let record = AttemptRecord::new(AuthMethod::Biometric, false, 0.0)
            .with_source(source.map(str::to_string))
            .with_reason(rejection.reason());
        self.auditor.append(&record)?;
        info!(
            category = ?rejection.category(),
            reason = %rejection,
            "biometric login rejected"
        );
        Ok(LoginOutcome {
            matched: false,
            identity: None,
            confidence: None,
            rejection: Some(rejection),
            stages: trace.stages,
            attempt_id: record.id,
            logs: trace.logs,
        })
    }

    /// Runs one enrollment sample through the gate and extractor and adds it
    /// to the session. Refused samples leave the session untouched.
    pub fn capture_sample(
        &self,
        sessions: &SessionRegistry,
        token: &SessionToken,
        image: &RgbImage,
    ) -> AppResult<CaptureResponse> {
        let mut logs = Vec::new();
        let progress = sessions.status(token)?;
        if progress.remaining == 0 {
            logs.push("session already holds every required sample".to_string());
            return Ok(CaptureResponse::from_progress(
                progress,
                Some(Rejection::SessionComplete {
                    required: progress.required,
                }),
                logs,
            ));
        }

        let validated = match self.gate.validate(image, self.detector)? {
            QualityVerdict::Accepted(validated) => validated,
            QualityVerdict::Rejected(issue) => {
                logs.push(format!("sample rejected by quality gate: {issue}"));
                debug!(reason = %issue, "enrollment sample rejected");
                return Ok(CaptureResponse::from_progress(progress, Some(issue.into()), logs));
            }
        };

        let signature = match self.extractor.extract(&validated) {
            Ok(signature) => signature,
            Err(failure) => {
                logs.push(format!("extraction failed: {failure}"));
                debug!(reason = %failure, "enrollment sample rejected");
                return Ok(CaptureResponse::from_progress(progress, Some(failure.into()), logs));
            }
        };

        let progress = sessions.accept(token, signature)?;
        logs.push(format!(
            "sample accepted ({} of {})",
            progress.collected, progress.required
        ));
        debug!(
            collected = progress.collected,
            required = progress.required,
            "enrollment sample accepted"
        );
        Ok(CaptureResponse::from_progress(progress, None, logs))
    }

    pub fn capture_sample_bytes(
        &self,
        sessions: &SessionRegistry,
        token: &SessionToken,
        bytes: &[u8],
    ) -> AppResult<CaptureResponse> {
        match image::load_from_memory(bytes) {
            Ok(decoded) => self.capture_sample(sessions, token, &decoded.to_rgb8()),
            Err(err) => {
                let progress = sessions.status(token)?;
                Ok(CaptureResponse::from_progress(
                    progress,
                    Some(Rejection::MalformedImage(err.to_string())),
                    vec![format!("sample could not be decoded: {err}")],
                ))
            }
        }
    }

    /// Computes the template without persisting it; the caller owns the
    /// upsert. An unfinished session reports `template_ready = false`.
    pub fn finalize(&self, sessions: &SessionRegistry, token: &SessionToken) -> AppResult<FinalizeResponse> {
        match sessions.finalize(token) {
            Ok(template) => Ok(FinalizeResponse::ready(template)),
            Err(AppError::SessionNotReady {
                collected,
                required,
            }) => Ok(FinalizeResponse::not_ready(collected, required)),
            Err(err) => Err(err),
        }
    }

    /// Finalizes and binds the template to `identity` in one step.
    ///
    /// On a store failure the session survives so the whole call can be
    /// retried.
    pub fn enroll(
        &self,
        sessions: &SessionRegistry,
        token: &SessionToken,
        identity: &IdentityId,
    ) -> AppResult<FinalizeResponse> {
        match sessions.finalize_into(token, identity, self.templates) {
            Ok(template) => Ok(FinalizeResponse::ready(template)),
            Err(AppError::SessionNotReady {
                collected,
                required,
            }) => Ok(FinalizeResponse::not_ready(collected, required)),
            Err(err) => {
                warn!(identity = %identity, error = %err, "enrollment finalize failed");
                Err(err)
            }
        }
    }

    /// Records a credential-path attempt decided by the host application.
    pub fn record_credential_attempt(
        &self,
        identity: Option<IdentityId>,
        success: bool,
        source: Option<&str>,
    ) -> AppResult<AttemptRecord> {
        record_credential_attempt(self.auditor, identity, success, source)
    }

    pub fn audit_history(&self, query: &AttemptQuery) -> AppResult<Vec<AttemptRecord>> {
        self.auditor.query(query)
    }
}

/// Credential attempts carry confidence 1.0 on success and 0.0 otherwise.
pub fn record_credential_attempt(
    auditor: &dyn AttemptAuditor,
    identity: Option<IdentityId>,
    success: bool,
    source: Option<&str>,
) -> AppResult<AttemptRecord> {
    let confidence = if success { 1.0 } else { 0.0 };
    let record = AttemptRecord::new(AuthMethod::Credential, success, confidence)
        .with_identity(identity)
        .with_source(source.map(str::to_string));
    auditor.append(&record)?;
    Ok(record)
}
