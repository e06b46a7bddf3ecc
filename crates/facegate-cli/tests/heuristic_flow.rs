use std::fs;
use std::path::{Path, PathBuf};

use facegate_cli::cli::{
    AuditArgs, EnrollArgs, LoginArgs, RuntimeArgs, StrategyArg, TemplateListArgs,
    TemplateRemoveArgs,
};
use facegate_cli::enroll::run_enroll;
use facegate_cli::errors::AppError;
use facegate_cli::history::run_audit;
use facegate_cli::login::run_login;
use facegate_cli::templates::{run_template_list, run_template_remove};
use facegate_config::Strategy;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    runtime: RuntimeArgs,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        fs::write(&config, "required_samples = 3\n").unwrap();
        let runtime = RuntimeArgs {
            config: Some(config),
            store: Some(dir.path().join("store").join("templates.json")),
            audit_log: Some(dir.path().join("attempts.jsonl")),
            tolerance: None,
            strategy: Some(StrategyArg::Heuristic),
        };
        Self { dir, runtime }
    }

    fn image(&self, name: &str, image: &RgbImage) -> PathBuf {
        let path = self.dir.path().join(name);
        image.save(&path).unwrap();
        path
    }
}

fn textured_face() -> RgbImage {
    RgbImage::from_fn(120, 120, |x, y| {
        if (x / 2 + y / 2) % 2 == 0 {
            Rgb([200, 150, 100])
        } else {
            Rgb([40, 60, 80])
        }
    })
}

fn flat_photo() -> RgbImage {
    RgbImage::from_pixel(120, 120, Rgb([128, 128, 128]))
}

fn enroll_args(ws: &Workspace, images: Vec<PathBuf>) -> EnrollArgs {
    EnrollArgs {
        user: "alice".into(),
        images,
        runtime: ws.runtime.clone(),
    }
}

fn login_args(ws: &Workspace, image: &Path) -> LoginArgs {
    LoginArgs {
        image: image.to_path_buf(),
        source: Some("192.0.2.10".into()),
        runtime: ws.runtime.clone(),
    }
}

#[test]
fn enroll_login_audit_and_remove() {
    let ws = Workspace::new();
    let face = ws.image("face.png", &textured_face());
    let flat = ws.image("flat.png", &flat_photo());

    let enrolled = run_enroll(&enroll_args(
        &ws,
        vec![face.clone(), flat.clone(), face.clone(), face.clone()],
    ))
    .unwrap();
    assert!(enrolled.template_ready);
    assert_eq!(enrolled.samples_collected, 3);
    assert_eq!(enrolled.dimension, Some(35));
    assert!(!enrolled.samples[1].accepted);
    assert_eq!(
        enrolled.samples[1].reason.as_deref(),
        Some("image too blurry / not live")
    );

    let matched = run_login(&login_args(&ws, &face)).unwrap();
    assert!(matched.outcome.matched);
    assert_eq!(matched.outcome.identity.as_ref().unwrap().as_str(), "alice");
    assert!(matched.outcome.confidence.unwrap() > 0.99);

    let rejected = run_login(&login_args(&ws, &flat)).unwrap();
    assert!(!rejected.outcome.matched);
    assert_eq!(
        rejected.outcome.reason().as_deref(),
        Some("image too blurry / not live")
    );

    let history = run_audit(&AuditArgs {
        user: None,
        since: None,
        limit: None,
        runtime: ws.runtime.clone(),
    })
    .unwrap();
    assert_eq!(history.attempts.len(), 2);
    assert!(history.attempts.iter().any(|attempt| attempt.success));
    assert!(history
        .attempts
        .iter()
        .all(|attempt| attempt.source.as_deref() == Some("192.0.2.10")));

    let listed = run_template_list(&TemplateListArgs {
        runtime: ws.runtime.clone(),
    })
    .unwrap();
    assert_eq!(listed.templates.len(), 1);
    assert_eq!(listed.templates[0].strategy, Strategy::Heuristic);
    assert_eq!(listed.templates[0].sample_count, 3);

    let removed = run_template_remove(&TemplateRemoveArgs {
        user: "alice".into(),
        runtime: ws.runtime.clone(),
    })
    .unwrap();
    assert_eq!(removed.remaining, 0);

    let after = run_login(&login_args(&ws, &face)).unwrap();
    assert!(!after.outcome.matched);
}

#[test]
fn too_few_accepted_samples_store_nothing() {
    let ws = Workspace::new();
    let face = ws.image("face.png", &textured_face());
    let flat = ws.image("flat.png", &flat_photo());

    let outcome = run_enroll(&enroll_args(&ws, vec![face.clone(), flat, face])).unwrap();
    assert!(!outcome.template_ready);
    assert_eq!(outcome.samples_collected, 2);
    assert_eq!(outcome.required, 3);

    let listed = run_template_list(&TemplateListArgs {
        runtime: ws.runtime.clone(),
    })
    .unwrap();
    assert!(listed.templates.is_empty());
}

#[test]
fn undecodable_probe_is_rejected_not_fatal() {
    let ws = Workspace::new();
    let garbage = ws.dir.path().join("garbage.png");
    fs::write(&garbage, b"not an image at all").unwrap();

    let report = run_login(&login_args(&ws, &garbage)).unwrap();
    assert!(!report.outcome.matched);
    assert!(report.outcome.reason().unwrap().starts_with("malformed image"));
}

#[test]
fn missing_probe_file_is_an_error() {
    let ws = Workspace::new();
    let err = run_login(&login_args(&ws, &ws.dir.path().join("absent.png"))).unwrap_err();
    assert!(matches!(err, AppError::MissingInput { .. }));
}
