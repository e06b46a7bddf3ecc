use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facegate_cli::cli::{EnrollArgs, OutputMode, RuntimeArgs};
use facegate_cli::commands::{CommandHandler, EnrollHandler};
use facegate_cli::enroll::{EnrollOutcome, SampleReport};
use facegate_cli::errors::AppError;
use facegate_core::identity::IdentityId;

fn sample_args() -> EnrollArgs {
    EnrollArgs {
        user: "alice".into(),
        images: vec![PathBuf::from("a.png"), PathBuf::from("b.png")],
        runtime: RuntimeArgs::default(),
    }
}

fn outcome(ready: bool) -> EnrollOutcome {
    EnrollOutcome {
        user: IdentityId::new("alice").unwrap(),
        store_path: PathBuf::from("/var/lib/facegate/templates.json"),
        samples: vec![
            SampleReport {
                image: PathBuf::from("a.png"),
                accepted: true,
                reason: None,
            },
            SampleReport {
                image: PathBuf::from("b.png"),
                accepted: ready,
                reason: (!ready).then(|| "face too small".to_string()),
            },
        ],
        samples_collected: if ready { 2 } else { 1 },
        required: 2,
        template_ready: ready,
        dimension: ready.then_some(35),
        logs: vec!["a.png: sample accepted".into()],
    }
}

#[test]
fn complete_enrollment_renders_and_succeeds() {
    let run_calls = Arc::new(Mutex::new(Vec::new()));
    let render_calls = Arc::new(Mutex::new(Vec::new()));
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        {
            let run_calls = Arc::clone(&run_calls);
            move |args: &EnrollArgs| {
                run_calls
                    .lock()
                    .unwrap()
                    .push((args.user.clone(), args.images.len()));
                Ok(outcome(true))
            }
        },
        {
            let render_calls = Arc::clone(&render_calls);
            move |outcome: &EnrollOutcome, mode, verbose| {
                render_calls
                    .lock()
                    .unwrap()
                    .push((outcome.user.to_string(), outcome.template_ready, mode, verbose));
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Human, true).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    assert_eq!(run_calls.lock().unwrap().as_slice(), &[("alice".to_string(), 2)]);
    assert_eq!(
        render_calls.lock().unwrap().as_slice(),
        &[("alice".to_string(), true, OutputMode::Human, true)]
    );
}

#[test]
fn incomplete_enrollment_still_renders_but_exits_with_failure() {
    let rendered = Arc::new(Mutex::new(0usize));
    let handler = EnrollHandler::with_dependencies(sample_args(), |_args| Ok(outcome(false)), {
        let rendered = Arc::clone(&rendered);
        move |outcome, _mode, _verbose| {
            assert_eq!(outcome.samples[1].reason.as_deref(), Some("face too small"));
            *rendered.lock().unwrap() += 1;
            Ok(())
        }
    });

    let exit = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(exit, ExitCode::from(1));
    assert_eq!(*rendered.lock().unwrap(), 1);
}

#[test]
fn enroll_errors_skip_rendering() {
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        |args| {
            Err(AppError::MissingInput {
                path: args.images[0].clone(),
            })
        },
        |_outcome, _mode, _verbose| panic!("render should not run"),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::MissingInput { path } if path == PathBuf::from("a.png")));
}
