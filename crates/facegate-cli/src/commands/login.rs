use std::any::Any;
use std::process::ExitCode;

use crate::cli::{LoginArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::login::{self, LoginReport};
use crate::output::render_login;

pub struct LoginHandler {
    args: LoginArgs,
    run: Box<dyn Fn(&LoginArgs) -> AppResult<LoginReport> + Send + Sync>,
    render: Box<dyn Fn(&LoginReport, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl LoginHandler {
    pub fn new(args: LoginArgs) -> Self {
        Self::with_dependencies(args, login::run_login, render_login)
    }

    pub fn with_dependencies(
        args: LoginArgs,
        run: impl Fn(&LoginArgs) -> AppResult<LoginReport> + Send + Sync + 'static,
        render: impl Fn(&LoginReport, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for LoginHandler {
    /// Exit status 0 only when the probe matched an enrolled identity.
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let report = (self.run)(&self.args)?;
        (self.render)(&report, mode, verbose)?;
        if report.outcome.matched {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(1))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
