use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facegate_cli::cli::{LoginArgs, OutputMode, RuntimeArgs};
use facegate_cli::commands::{CommandHandler, LoginHandler};
use facegate_cli::errors::{AppError, Rejection};
use facegate_cli::login::LoginReport;
use facegate_core::auth::{LoginOutcome, LoginStage};
use facegate_core::identity::IdentityId;
use uuid::Uuid;

fn sample_args() -> LoginArgs {
    LoginArgs {
        image: PathBuf::from("probe.png"),
        source: Some("10.1.2.3".into()),
        runtime: RuntimeArgs::default(),
    }
}

fn report(matched: bool) -> LoginReport {
    LoginReport {
        image: PathBuf::from("probe.png"),
        outcome: LoginOutcome {
            matched,
            identity: matched.then(|| IdentityId::new("alice").unwrap()),
            confidence: matched.then_some(0.93),
            rejection: (!matched).then_some(Rejection::NoMatch),
            stages: vec![LoginStage::Idle, LoginStage::CapturingProbe],
            attempt_id: Uuid::nil(),
            logs: vec!["trace".into()],
        },
    }
}

#[test]
fn matched_login_exits_successfully() {
    let render_calls = Arc::new(Mutex::new(Vec::new()));
    let handler = LoginHandler::with_dependencies(sample_args(), |_args| Ok(report(true)), {
        let render_calls = Arc::clone(&render_calls);
        move |report, mode, verbose| {
            render_calls
                .lock()
                .unwrap()
                .push((report.outcome.matched, mode, verbose));
            Ok(())
        }
    });

    let exit = handler.execute(OutputMode::Json, true).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    assert_eq!(
        render_calls.lock().unwrap().as_slice(),
        &[(true, OutputMode::Json, true)]
    );
}

#[test]
fn rejected_login_exits_with_failure() {
    let handler = LoginHandler::with_dependencies(
        sample_args(),
        |_args| Ok(report(false)),
        |_report, _mode, _verbose| Ok(()),
    );
    let exit = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(exit, ExitCode::from(1));
}

#[test]
fn login_errors_skip_rendering() {
    let handler = LoginHandler::with_dependencies(
        sample_args(),
        |args| {
            Err(AppError::MissingInput {
                path: args.image.clone(),
            })
        },
        |_report, _mode, _verbose| panic!("render should not run"),
    );
    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::MissingInput { .. }));
}

#[test]
fn login_report_json_flattens_outcome() {
    let payload = serde_json::to_value(report(false)).unwrap();
    assert_eq!(payload["image"], "probe.png");
    assert_eq!(payload["matched"], false);
    assert_eq!(payload["rejection"]["category"], "no_match");
    assert!(payload.get("logs").is_none());
}
