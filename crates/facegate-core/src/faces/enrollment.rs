use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use facegate_config::ResolvedConfig;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::faces::store::TemplateStore;
use crate::identity::IdentityId;

const TOKEN_BYTES: usize = 32;

/// Opaque handle for one in-flight enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finalized enrollment template: the element-wise mean of the accepted samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    values: Vec<f64>,
    sample_count: usize,
}

impl Template {
    pub fn new(values: Vec<f64>, sample_count: usize) -> Self {
        Self {
            values,
            sample_count,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Collecting { collected: usize },
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleProgress {
    pub accepted: bool,
    pub collected: usize,
    pub required: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    samples: Vec<Vec<f64>>,
    required: usize,
    expires_at: Instant,
}

impl EnrollmentSession {
    pub fn new(required: usize, ttl: Duration) -> Self {
        Self::started_at(required, ttl, Instant::now())
    }

    fn started_at(required: usize, ttl: Duration, now: Instant) -> Self {
        Self {
            samples: Vec::with_capacity(required),
            required: required.max(1),
            expires_at: now + ttl,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.samples.len() >= self.required {
            SessionState::Ready
        } else {
            SessionState::Collecting {
                collected: self.samples.len(),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn progress(&self, accepted: bool) -> SampleProgress {
        let collected = self.samples.len();
        SampleProgress {
            accepted,
            collected,
            required: self.required,
            remaining: self.required.saturating_sub(collected),
        }
    }

    /// Appends a sample unless the session is already `Ready`, in which case
    /// the current progress is returned untouched.
    pub fn accept(&mut self, sample: Vec<f64>) -> AppResult<SampleProgress> {
        if self.is_ready() {
            return Ok(self.progress(false));
        }
        if sample.is_empty() {
            return Err(AppError::DimensionMismatch {
                expected: self.samples.first().map_or(1, Vec::len),
                found: 0,
            });
        }
        if let Some(first) = self.samples.first() {
            if first.len() != sample.len() {
                return Err(AppError::DimensionMismatch {
                    expected: first.len(),
                    found: sample.len(),
                });
            }
        }
        self.samples.push(sample);
        Ok(self.progress(true))
    }

    /// Element-wise mean of the accepted samples; only available once `Ready`.
    pub fn template(&self) -> AppResult<Template> {
        if !self.is_ready() {
            return Err(AppError::SessionNotReady {
                collected: self.samples.len(),
                required: self.required,
            });
        }

        let dimension = self.samples[0].len();
        let count = self.samples.len() as f64;
        let mut values = vec![0.0; dimension];
        for sample in &self.samples {
            for (acc, value) in values.iter_mut().zip(sample.iter()) {
                *acc += value;
            }
        }
        for value in &mut values {
            *value /= count;
        }

        Ok(Template::new(values, self.samples.len()))
    }
}

/// Token-addressed table of in-flight enrollments.
///
/// Sessions never observe each other; a token is the only way to reach one.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionToken, EnrollmentSession>>,
    required: usize,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(required: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            required: required.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.required_samples, config.session_ttl)
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Opens a new session. Sessions that expired untouched are dropped
    /// here, so an idle host does not accumulate them.
    pub fn begin(&self) -> AppResult<SessionToken> {
        let mut sessions = self.lock()?;
        drop_expired(&mut sessions, Instant::now());
        let mut token = SessionToken::generate();
        while sessions.contains_key(&token) {
            token = SessionToken::generate();
        }
        sessions.insert(token.clone(), EnrollmentSession::new(self.required, self.ttl));
        debug!(required = self.required, "enrollment session started");
        Ok(token)
    }

    pub fn accept(&self, token: &SessionToken, sample: Vec<f64>) -> AppResult<SampleProgress> {
        let mut sessions = self.lock()?;
        let session = live_session(&mut sessions, token, Instant::now())?;
        session.accept(sample)
    }

    pub fn status(&self, token: &SessionToken) -> AppResult<SampleProgress> {
        let mut sessions = self.lock()?;
        let session = live_session(&mut sessions, token, Instant::now())?;
        Ok(session.progress(false))
    }

    /// Computes the template and discards the session.
    ///
    /// A session that is not yet `Ready` stays registered.
    pub fn finalize(&self, token: &SessionToken) -> AppResult<Template> {
        let mut sessions = self.lock()?;
        let template = live_session(&mut sessions, token, Instant::now())?.template()?;
        sessions.remove(token);
        Ok(template)
    }

    /// Finalizes straight into `store`. The session is discarded only after
    /// the upsert succeeds, so a failed write can be retried with the same
    /// token.
    pub fn finalize_into(
        &self,
        token: &SessionToken,
        identity: &IdentityId,
        store: &dyn TemplateStore,
    ) -> AppResult<Template> {
        let template = {
            let mut sessions = self.lock()?;
            live_session(&mut sessions, token, Instant::now())?.template()?
        };

        store.upsert(identity, &template)?;

        self.lock()?.remove(token);
        info!(
            identity = %identity,
            samples = template.sample_count(),
            "enrollment template stored"
        );
        Ok(template)
    }

    pub fn abandon(&self, token: &SessionToken) -> AppResult<bool> {
        Ok(self.lock()?.remove(token).is_some())
    }

    pub fn purge_expired(&self) -> AppResult<usize> {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> AppResult<usize> {
        let mut sessions = self.lock()?;
        Ok(drop_expired(&mut sessions, now))
    }

    pub fn len(&self) -> AppResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<SessionToken, EnrollmentSession>>> {
        self.sessions
            .lock()
            .map_err(|_| AppError::StatePoisoned("enrollment sessions"))
    }
}

fn drop_expired(sessions: &mut HashMap<SessionToken, EnrollmentSession>, now: Instant) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired_at(now));
    let purged = before - sessions.len();
    if purged > 0 {
        debug!(purged, "expired enrollment sessions removed");
    }
    purged
}

fn live_session<'a>(
    sessions: &'a mut HashMap<SessionToken, EnrollmentSession>,
    token: &SessionToken,
    now: Instant,
) -> AppResult<&'a mut EnrollmentSession> {
    let expired = match sessions.get(token) {
        Some(session) => session.is_expired_at(now),
        None => return Err(AppError::SessionNotFound),
    };
    if expired {
        sessions.remove(token);
        return Err(AppError::SessionNotFound);
    }
    sessions.get_mut(token).ok_or(AppError::SessionNotFound)
}
