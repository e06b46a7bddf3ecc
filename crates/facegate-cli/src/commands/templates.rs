use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, TemplateListArgs, TemplateRemoveArgs, TemplatesCommands};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::{render_template_list, render_template_remove};
use crate::templates::{self, TemplateListOutcome, TemplateRemovalOutcome};

pub struct TemplatesHandler {
    command: TemplatesCommands,
    deps: TemplatesHandlerDeps,
}

pub struct TemplatesHandlerDeps {
    pub list: Box<dyn Fn(&TemplateListArgs) -> AppResult<TemplateListOutcome> + Send + Sync>,
    pub remove:
        Box<dyn Fn(&TemplateRemoveArgs) -> AppResult<TemplateRemovalOutcome> + Send + Sync>,
    pub render_list:
        Box<dyn Fn(&TemplateListOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_remove:
        Box<dyn Fn(&TemplateRemovalOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl TemplatesHandlerDeps {
    pub fn new(
        list: impl Fn(&TemplateListArgs) -> AppResult<TemplateListOutcome> + Send + Sync + 'static,
        remove: impl Fn(&TemplateRemoveArgs) -> AppResult<TemplateRemovalOutcome>
            + Send
            + Sync
            + 'static,
        render_list: impl Fn(&TemplateListOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
        render_remove: impl Fn(&TemplateRemovalOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            list: Box::new(list),
            remove: Box::new(remove),
            render_list: Box::new(render_list),
            render_remove: Box::new(render_remove),
        }
    }
}

impl Default for TemplatesHandlerDeps {
    fn default() -> Self {
        Self::new(
            templates::run_template_list,
            templates::run_template_remove,
            render_template_list,
            render_template_remove,
        )
    }
}

impl TemplatesHandler {
    pub fn new(command: TemplatesCommands) -> Self {
        Self {
            command,
            deps: TemplatesHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: TemplatesCommands, deps: TemplatesHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for TemplatesHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            TemplatesCommands::List(args) => {
                let outcome = (self.deps.list)(args)?;
                (self.deps.render_list)(&outcome, mode)?;
            }
            TemplatesCommands::Remove(args) => {
                let outcome = (self.deps.remove)(args)?;
                (self.deps.render_remove)(&outcome, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
