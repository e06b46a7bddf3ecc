use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::enroll::EnrollOutcome;
use crate::errors::{AppError, AppResult};
use crate::history::AuditOutcome;
use crate::login::LoginReport;
use crate::templates::{TemplateListOutcome, TemplateRemovalOutcome};

fn write_json<T: Serialize + ?Sized>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

fn print_logs(logs: &[String], verbose: bool) {
    if verbose {
        for line in logs {
            tracing::info!("{line}");
        }
    }
}

pub fn render_enroll(outcome: &EnrollOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            print_logs(&outcome.logs, verbose);
            for sample in &outcome.samples {
                match &sample.reason {
                    None => println!("accepted  {}", sample.image.display()),
                    Some(reason) => println!("rejected  {} ({reason})", sample.image.display()),
                }
            }
            if outcome.template_ready {
                println!(
                    "Enrollment successful: template for '{}' stored in {} ({} samples)",
                    outcome.user,
                    outcome.store_path.display(),
                    outcome.samples_collected
                );
            } else {
                println!(
                    "Enrollment incomplete: {} of {} samples accepted for '{}'; nothing stored",
                    outcome.samples_collected, outcome.required, outcome.user
                );
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_login(report: &LoginReport, mode: OutputMode, verbose: bool) -> AppResult<()> {
    let outcome = &report.outcome;
    match mode {
        OutputMode::Human => {
            print_logs(&outcome.logs, verbose);
            match (&outcome.identity, outcome.confidence) {
                (Some(identity), Some(confidence)) if outcome.matched => {
                    println!("Authenticated as '{identity}' (confidence {confidence:.3})");
                }
                _ => println!(
                    "Login rejected: {}",
                    outcome.reason().unwrap_or_else(|| "no matching face".into())
                ),
            }
        }
        OutputMode::Json => write_json(report)?,
    }
    Ok(())
}

pub fn render_audit(outcome: &AuditOutcome, mode: OutputMode, _verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.attempts.is_empty() {
                println!("No attempts recorded");
            }
            for attempt in &outcome.attempts {
                let who = attempt
                    .identity
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".into());
                let status = if attempt.success { "ok" } else { "failed" };
                let mut line = format!(
                    "{}  {:<10}  {:<6}  {:.3}  {}",
                    attempt.timestamp.to_rfc3339(),
                    attempt.method.as_str(),
                    status,
                    attempt.confidence,
                    who
                );
                if let Some(source) = &attempt.source {
                    line.push_str(&format!("  from {source}"));
                }
                if let Some(reason) = &attempt.reason {
                    line.push_str(&format!("  ({reason})"));
                }
                println!("{line}");
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_template_list(outcome: &TemplateListOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if outcome.templates.is_empty() {
                println!("No templates in {}", outcome.store_path.display());
            }
            for template in &outcome.templates {
                println!(
                    "{}  {}  dim={}  samples={}  enrolled {}",
                    template.identity,
                    template.strategy,
                    template.dimension,
                    template.sample_count,
                    template.enrolled_at.to_rfc3339()
                );
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_template_remove(outcome: &TemplateRemovalOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Removed template for '{}'; {} remaining in {}",
                outcome.user,
                outcome.remaining,
                outcome.store_path.display()
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enroll::SampleReport;
    use facegate_core::identity::IdentityId;
    use std::path::PathBuf;

    #[test]
    fn enroll_json_skips_logs_and_reports_samples() {
        let outcome = EnrollOutcome {
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
                    accepted: false,
                    reason: Some("no face detected".into()),
                },
            ],
            samples_collected: 1,
            required: 3,
            template_ready: false,
            dimension: None,
            logs: vec!["internal".into()],
        };

        let payload = serde_json::to_value(&outcome).unwrap();
        assert_eq!(payload["user"], "alice");
        assert_eq!(payload["template_ready"], false);
        assert_eq!(payload["samples"][1]["reason"], "no face detected");
        assert!(payload.get("logs").is_none());
        assert!(payload.get("dimension").is_none());
    }
}
