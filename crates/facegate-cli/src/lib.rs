pub mod cli;
pub mod commands;
pub mod enroll;
pub mod history;
pub mod login;
pub mod output;
pub mod runtime;
pub mod templates;

pub use facegate_core::errors;
