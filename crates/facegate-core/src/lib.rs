//! Biometric enrollment and matching engine: quality gate, feature
//! extraction, session-scoped enrollment, template storage, matching and the
//! attempt log.

pub mod audit;
pub mod auth;
pub mod errors;
pub mod faces;
pub mod identity;

pub use auth::{Authenticator, CaptureResponse, FinalizeResponse, LoginOutcome, LoginStage};
pub use errors::{AppError, AppResult, Rejection, RejectionCategory};
pub use identity::IdentityId;
