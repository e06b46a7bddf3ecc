use std::path::PathBuf;

use facegate_core::auth::LoginOutcome;
use facegate_core::errors::AppResult;
use serde::Serialize;

use crate::cli::LoginArgs;
use crate::enroll::read_image;
use crate::runtime::Runtime;

#[derive(Debug, Serialize)]
pub struct LoginReport {
    pub image: PathBuf,
    #[serde(flatten)]
    pub outcome: LoginOutcome,
}

pub fn run_login(args: &LoginArgs) -> AppResult<LoginReport> {
    let runtime = Runtime::from_args(&args.runtime)?;
    login_with_runtime(&runtime, args)
}

pub fn login_with_runtime(runtime: &Runtime, args: &LoginArgs) -> AppResult<LoginReport> {
    let bytes = read_image(&args.image)?;
    let outcome = runtime
        .authenticator()
        .login_bytes(&bytes, args.source.as_deref())?;
    Ok(LoginReport {
        image: args.image.clone(),
        outcome,
    })
}
