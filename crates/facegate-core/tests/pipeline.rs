use std::cell::{Cell, RefCell};
use std::time::Duration;

use facegate_core::audit::{AttemptAuditor, AttemptQuery, AuthMethod, JsonlAttemptLog};
use facegate_core::auth::{Authenticator, LoginStage};
use facegate_core::errors::{AppError, AppResult, RejectionCategory};
use facegate_core::faces::enrollment::SessionRegistry;
use facegate_core::faces::extractor::{ExtractionFailure, FeatureExtractor};
use facegate_core::faces::matcher::{EuclideanDistance, LinearScanMatcher};
use facegate_core::faces::quality::{
    BoundingBox, FaceDetector, QualityGate, QualityGateConfig, ValidatedImage,
};
use facegate_core::faces::store::{FilesystemTemplateStore, TemplateStore};
use facegate_core::identity::IdentityId;
use facegate_config::Strategy;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

/// Reports a fixed number of full-frame faces and counts calls.
struct CountingDetector {
    faces: Cell<usize>,
    calls: Cell<usize>,
}

impl CountingDetector {
    fn new(faces: usize) -> Self {
        Self {
            faces: Cell::new(faces),
            calls: Cell::new(0),
        }
    }
}

impl FaceDetector for CountingDetector {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
        self.calls.set(self.calls.get() + 1);
        let frame = BoundingBox {
            left: 0,
            top: 0,
            right: i64::from(image.width()),
            bottom: i64::from(image.height()),
        };
        Ok(vec![frame; self.faces.get()])
    }
}

/// Hands out queued vectors; panics if called without one queued.
#[derive(Default)]
struct QueuedExtractor {
    queue: RefCell<Vec<Vec<f64>>>,
    calls: Cell<usize>,
}

impl QueuedExtractor {
    fn queue(&self, vector: &[f64]) {
        self.queue.borrow_mut().push(vector.to_vec());
    }
}

impl FeatureExtractor for QueuedExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Embedding
    }

    fn dimension(&self) -> usize {
        2
    }

    fn extract(&self, _image: &ValidatedImage<'_>) -> Result<Vec<f64>, ExtractionFailure> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.queue.borrow_mut().remove(0))
    }
}

fn sharp() -> RgbImage {
    RgbImage::from_fn(128, 128, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([240, 240, 240])
        } else {
            Rgb([10, 10, 10])
        }
    })
}

struct Fixture {
    dir: TempDir,
    gate: QualityGate,
    detector: CountingDetector,
    extractor: QueuedExtractor,
    matcher: LinearScanMatcher<EuclideanDistance>,
    store: FilesystemTemplateStore,
    log: JsonlAttemptLog,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store =
            FilesystemTemplateStore::new(dir.path().join("templates.json"), Strategy::Embedding);
        let log = JsonlAttemptLog::new(dir.path().join("attempts.jsonl"));
        Self {
            dir,
            gate: QualityGate::new(QualityGateConfig::default()),
            detector: CountingDetector::new(1),
            extractor: QueuedExtractor::default(),
            matcher: LinearScanMatcher::new(EuclideanDistance, 0.6),
            store,
            log,
        }
    }

    fn auth(&self) -> Authenticator<'_> {
        Authenticator::new(
            &self.gate,
            &self.detector,
            &self.extractor,
            &self.matcher,
            &self.store,
            &self.log,
        )
    }

    fn enroll(&self, name: &str, samples: &[&[f64]]) {
        let sessions = SessionRegistry::new(samples.len(), Duration::from_secs(60));
        let token = sessions.begin().unwrap();
        for sample in samples {
            self.extractor.queue(sample);
            assert!(self
                .auth()
                .capture_sample(&sessions, &token, &sharp())
                .unwrap()
                .accepted);
        }
        let identity = IdentityId::new(name).unwrap();
        assert!(self.auth().enroll(&sessions, &token, &identity).unwrap().template_ready);
    }

    fn login(&self, probe: &[f64]) -> facegate_core::auth::LoginOutcome {
        self.extractor.queue(probe);
        self.auth().login(&sharp(), Some("127.0.0.1")).unwrap()
    }
}

#[test]
fn toy_scenario_matches_and_rejects() {
    let fx = Fixture::new();
    fx.enroll("alice", &[&[1.0, 0.0], &[1.0, 0.0], &[1.0, 0.0]]);

    let stored = fx.store.get_all().unwrap();
    assert_eq!(stored[0].template, vec![1.0, 0.0]);

    let hit = fx.login(&[1.0, 0.0]);
    assert!(hit.matched);
    assert_eq!(hit.identity.unwrap().as_str(), "alice");
    assert_eq!(hit.confidence, Some(1.0));

    let miss = fx.login(&[0.0, 1.0]);
    assert!(!miss.matched);
    assert_eq!(miss.rejection.unwrap().category(), RejectionCategory::NoMatch);

    let history = fx.log.query(&AttemptQuery::default()).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|record| record.method == AuthMethod::Biometric));
    assert_eq!(history.iter().filter(|record| record.success).count(), 1);
}

#[test]
fn exact_tie_goes_to_first_enrolled_identity() {
    let fx = Fixture::new();
    fx.enroll("a", &[&[0.0, 0.0]]);
    fx.enroll("b", &[&[0.0, 0.1]]);

    let outcome = fx.login(&[0.0, 0.05]);
    assert!(outcome.matched);
    assert_eq!(outcome.identity.unwrap().as_str(), "a");
}

#[test]
fn re_enrollment_overwrites_without_reordering() {
    let fx = Fixture::new();
    fx.enroll("a", &[&[0.0, 0.0]]);
    fx.enroll("b", &[&[0.0, 0.1]]);
    fx.enroll("a", &[&[0.0, 0.2], &[0.0, 0.4]]);

    let stored = fx.store.get_all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].identity.as_str(), "a");
    assert!((stored[0].template[1] - 0.3).abs() < 1e-12);

    let outcome = fx.login(&[0.0, 0.05]);
    assert_eq!(outcome.identity.unwrap().as_str(), "b");
}

#[test]
fn face_count_rejections_never_reach_the_extractor() {
    let fx = Fixture::new();
    fx.enroll("alice", &[&[1.0, 0.0]]);
    let calls_before = fx.extractor.calls.get();

    fx.detector.faces.set(0);
    let none = fx.auth().login(&sharp(), None).unwrap();
    assert_eq!(none.reason().as_deref(), Some("no face detected"));
    assert_eq!(none.rejection.unwrap().category(), RejectionCategory::Input);

    fx.detector.faces.set(2);
    let many = fx.auth().login(&sharp(), None).unwrap();
    assert_eq!(many.reason().as_deref(), Some("multiple faces detected"));
    assert_eq!(
        many.stages,
        vec![LoginStage::Idle, LoginStage::CapturingProbe, LoginStage::Rejected]
    );

    assert_eq!(fx.extractor.calls.get(), calls_before);
    assert_eq!(fx.log.query(&AttemptQuery::default()).unwrap().len(), 2);
}

#[test]
fn low_resolution_skips_detection() {
    let fx = Fixture::new();
    let tiny = RgbImage::from_pixel(64, 64, Rgb([10, 10, 10]));
    let outcome = fx.auth().login(&tiny, None).unwrap();
    assert_eq!(outcome.reason().as_deref(), Some("image resolution too low"));
    assert_eq!(fx.detector.calls.get(), 0);
}

#[test]
fn empty_store_is_no_match() {
    let fx = Fixture::new();
    let outcome = fx.login(&[0.3, 0.3]);
    assert!(!outcome.matched);
    assert_eq!(outcome.reason().as_deref(), Some("no matching face"));
}

#[test]
fn failed_store_write_keeps_the_session_for_a_retry() {
    let fx = Fixture::new();
    let blocked_dir = fx.dir.path().join("state");
    std::fs::write(&blocked_dir, b"not a directory").unwrap();
    let store = FilesystemTemplateStore::new(blocked_dir.join("templates.json"), Strategy::Embedding);
    let auth = Authenticator::new(
        &fx.gate,
        &fx.detector,
        &fx.extractor,
        &fx.matcher,
        &store,
        &fx.log,
    );

    let sessions = SessionRegistry::new(2, Duration::from_secs(60));
    let token = sessions.begin().unwrap();
    for sample in [[1.0, 0.0], [0.0, 1.0]] {
        fx.extractor.queue(&sample);
        auth.capture_sample(&sessions, &token, &sharp()).unwrap();
    }
    let alice = IdentityId::new("alice").unwrap();

    let err = auth.enroll(&sessions, &token, &alice).unwrap_err();
    assert!(matches!(err, AppError::TemplateWrite { .. }));
    assert_eq!(sessions.status(&token).unwrap().remaining, 0);

    std::fs::remove_file(&blocked_dir).unwrap();
    let finalized = auth.enroll(&sessions, &token, &alice).unwrap();
    assert!(finalized.template_ready);
    assert!(sessions.is_empty().unwrap());
    assert_eq!(store.get_all().unwrap()[0].template, vec![0.5, 0.5]);
}
