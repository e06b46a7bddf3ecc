use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod audit;
mod enroll;
mod login;
mod templates;

pub use audit::AuditHandler;
pub use enroll::EnrollHandler;
pub use login::LoginHandler;
pub use templates::{TemplatesHandler, TemplatesHandlerDeps};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Login(args) => Box::new(LoginHandler::new(args)),
            Commands::Audit(args) => Box::new(AuditHandler::new(args)),
            Commands::Templates(cmd) => Box::new(TemplatesHandler::new(cmd)),
        }
    }
}
