use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use facegate_config::DEFAULT_AUDIT_QUERY_LIMIT;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::identity::IdentityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Credential,
    Biometric,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Credential => "credential",
            AuthMethod::Biometric => "biometric",
        }
    }
}

/// One authentication attempt. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub identity: Option<IdentityId>,
    pub method: AuthMethod,
    pub success: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AttemptRecord {
    pub fn new(method: AuthMethod, success: bool, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: None,
            method,
            success,
            confidence: clamp_confidence(confidence),
            timestamp: Utc::now(),
            source: None,
            reason: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<IdentityId>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

/// Dashboard-style filter; `limit` falls back to the auditor's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptQuery {
    pub identity: Option<IdentityId>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AttemptQuery {
    pub fn for_identity(identity: IdentityId) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }
}

pub trait AttemptAuditor {
    fn append(&self, record: &AttemptRecord) -> AppResult<()>;

    /// Matching records, most recent first.
    fn query(&self, query: &AttemptQuery) -> AppResult<Vec<AttemptRecord>>;
}

/// Applies `query` to records given in append order.
pub fn select_attempts(
    records: Vec<AttemptRecord>,
    query: &AttemptQuery,
    default_limit: usize,
) -> Vec<AttemptRecord> {
    let mut selected: Vec<AttemptRecord> = records
        .into_iter()
        .rev()
        .filter(|record| {
            query
                .identity
                .as_ref()
                .map_or(true, |identity| record.identity.as_ref() == Some(identity))
        })
        .filter(|record| query.since.map_or(true, |since| record.timestamp >= since))
        .collect();
    // Stable: equal timestamps keep the later append first.
    selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    selected.truncate(query.limit.unwrap_or(default_limit));
    selected
}

/// Append-only JSON Lines file.
#[derive(Debug)]
pub struct JsonlAttemptLog {
    path: PathBuf,
    default_limit: usize,
    lock: Mutex<()>,
}

impl JsonlAttemptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_limit: DEFAULT_AUDIT_QUERY_LIMIT,
            lock: Mutex::new(()),
        }
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> AppResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::StatePoisoned("attempt log"))
    }

    fn read_all(&self) -> AppResult<Vec<AttemptRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let read_err = |source| AppError::AuditRead {
            path: self.path.clone(),
            source,
        };
        let file = fs::File::open(&self.path).map_err(read_err)?;
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(read_err)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping unreadable attempt record"
                ),
            }
        }
        Ok(records)
    }
}

/// True when a previous write was cut off before its newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl AttemptAuditor for JsonlAttemptLog {
    fn append(&self, record: &AttemptRecord) -> AppResult<()> {
        let _guard = self.guard()?;
        let write_err = |source| AppError::AuditWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(write_err)?;
        if ends_mid_line(&mut file).map_err(write_err)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|source| {
                warn!(path = %self.path.display(), error = %source, "attempt log append failed");
                write_err(source)
            })?;

        debug!(
            method = record.method.as_str(),
            success = record.success,
            "attempt recorded"
        );
        Ok(())
    }

    fn query(&self, query: &AttemptQuery) -> AppResult<Vec<AttemptRecord>> {
        let _guard = self.guard()?;
        Ok(select_attempts(self.read_all()?, query, self.default_limit))
    }
}

#[derive(Debug)]
pub struct InMemoryAttemptLog {
    records: Mutex<Vec<AttemptRecord>>,
    default_limit: usize,
}

impl Default for InMemoryAttemptLog {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            default_limit: DEFAULT_AUDIT_QUERY_LIMIT,
        }
    }
}

impl InMemoryAttemptLog {
    /// Everything appended so far, in append order.
    pub fn records(&self) -> AppResult<Vec<AttemptRecord>> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Vec<AttemptRecord>>> {
        self.records
            .lock()
            .map_err(|_| AppError::StatePoisoned("attempt log"))
    }
}

impl AttemptAuditor for InMemoryAttemptLog {
    fn append(&self, record: &AttemptRecord) -> AppResult<()> {
        self.lock()?.push(record.clone());
        Ok(())
    }

    fn query(&self, query: &AttemptQuery) -> AppResult<Vec<AttemptRecord>> {
        Ok(select_attempts(self.lock()?.clone(), query, self.default_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(identity: Option<&str>, minutes: i64, success: bool) -> AttemptRecord {
        AttemptRecord::new(AuthMethod::Biometric, success, if success { 0.8 } else { 0.0 })
            .with_identity(identity.map(|name| IdentityId::new(name).unwrap()))
            .at(base_time() + Duration::minutes(minutes))
    }

    #[test]
    fn confidence_is_clamped_on_construction() {
        assert_eq!(AttemptRecord::new(AuthMethod::Biometric, true, 1.4).confidence, 1.0);
        assert_eq!(AttemptRecord::new(AuthMethod::Biometric, false, -0.3).confidence, 0.0);
        assert_eq!(AttemptRecord::new(AuthMethod::Biometric, false, f64::NAN).confidence, 0.0);
        assert!((AttemptRecord::new(AuthMethod::Credential, true, 0.42).confidence - 0.42).abs() < 1e-12);
    }

    #[test]
    fn query_orders_newest_first_and_limits() {
        let log = InMemoryAttemptLog::default();
        for minute in 0..15 {
            log.append(&record(Some("alice"), minute, true)).unwrap();
        }

        let results = log.query(&AttemptQuery::default()).unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].timestamp, base_time() + Duration::minutes(14));
        assert!(results.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let three = log
            .query(&AttemptQuery {
                limit: Some(3),
                ..AttemptQuery::default()
            })
            .unwrap();
        assert_eq!(three.len(), 3);
    }

    #[test]
    fn query_filters_identity_and_since() {
        let log = InMemoryAttemptLog::default();
        log.append(&record(Some("alice"), 0, true)).unwrap();
        log.append(&record(Some("bob"), 1, true)).unwrap();
        log.append(&record(None, 2, false)).unwrap();
        log.append(&record(Some("alice"), 3, false)).unwrap();

        let alice = log
            .query(&AttemptQuery::for_identity(IdentityId::new("alice").unwrap()))
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert!(!alice[0].success);

        let recent = log
            .query(&AttemptQuery {
                since: Some(base_time() + Duration::minutes(2)),
                ..AttemptQuery::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[1].identity.is_none());
    }

    #[test]
    fn equal_timestamps_list_later_appends_first() {
        let log = InMemoryAttemptLog::default();
        let first = record(Some("alice"), 0, true);
        let second = record(Some("bob"), 0, false);
        log.append(&first).unwrap();
        log.append(&second).unwrap();
        let results = log.query(&AttemptQuery::default()).unwrap();
        assert_eq!(results[0].id, second.id);
        assert_eq!(results[1].id, first.id);
    }

    #[test]
    fn jsonl_log_appends_one_line_per_attempt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("attempts.jsonl");
        let log = JsonlAttemptLog::new(&path);
        log.append(&record(Some("alice"), 0, true).with_source(Some("10.0.0.2".into())))
            .unwrap();
        log.append(&record(None, 1, false).with_reason("no matching face"))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let results = log.query(&AttemptQuery::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].reason.as_deref(), Some("no matching face"));
        assert_eq!(results[1].source.as_deref(), Some("10.0.0.2"));
        assert_eq!(results[1].method, AuthMethod::Biometric);
    }

    #[test]
    fn jsonl_log_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let log = JsonlAttemptLog::new(tmp.path().join("none.jsonl"));
        assert!(log.query(&AttemptQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn jsonl_log_skips_corrupt_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("attempts.jsonl");
        let log = JsonlAttemptLog::new(&path);
        log.append(&record(Some("alice"), 0, true)).unwrap();
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{broken\n");
        fs::write(&path, contents).unwrap();
        log.append(&record(Some("bob"), 1, false)).unwrap();

        let results = log.query(&AttemptQuery::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].identity.as_ref().unwrap().as_str(), "bob");
    }

    #[test]
    fn append_after_torn_write_starts_a_new_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("attempts.jsonl");
        fs::write(&path, "{\"id\":\"abc").unwrap();
        let log = JsonlAttemptLog::new(&path);
        log.append(&record(Some("alice"), 0, true)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));

        let results = log.query(&AttemptQuery::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identity.as_ref().unwrap().as_str(), "alice");
        assert!(results[0].success);
    }
}
