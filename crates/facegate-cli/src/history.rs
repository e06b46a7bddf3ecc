use facegate_core::audit::{AttemptAuditor, AttemptQuery, AttemptRecord};
use facegate_core::errors::AppResult;
use facegate_core::identity::IdentityId;
use serde::Serialize;

use crate::cli::AuditArgs;
use crate::runtime::{open_attempt_log, resolve_config};

#[derive(Debug, Serialize)]
pub struct AuditOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IdentityId>,
    pub attempts: Vec<AttemptRecord>,
}

pub fn run_audit(args: &AuditArgs) -> AppResult<AuditOutcome> {
    let config = resolve_config(&args.runtime)?.resolved;
    let log = open_attempt_log(&config);
    audit_with(&log, args)
}

pub fn audit_with(auditor: &dyn AttemptAuditor, args: &AuditArgs) -> AppResult<AuditOutcome> {
    let user = args.user.as_deref().map(IdentityId::new).transpose()?;
    let query = AttemptQuery {
        identity: user.clone(),
        since: args.since,
        limit: args.limit,
    };
    Ok(AuditOutcome {
        user,
        attempts: auditor.query(&query)?,
    })
}
