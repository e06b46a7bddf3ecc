use std::any::Any;
use std::process::ExitCode;

use crate::cli::{AuditArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::history::{self, AuditOutcome};
use crate::output::render_audit;

pub struct AuditHandler {
    args: AuditArgs,
    run: Box<dyn Fn(&AuditArgs) -> AppResult<AuditOutcome> + Send + Sync>,
    render: Box<dyn Fn(&AuditOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl AuditHandler {
    pub fn new(args: AuditArgs) -> Self {
        Self::with_dependencies(args, history::run_audit, render_audit)
    }

    pub fn with_dependencies(
        args: AuditArgs,
        run: impl Fn(&AuditArgs) -> AppResult<AuditOutcome> + Send + Sync + 'static,
        render: impl Fn(&AuditOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for AuditHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
