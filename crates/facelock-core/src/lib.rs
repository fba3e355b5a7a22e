//! Face verification engine: profile store, matcher, resilient capture and
//! exclusive verification sessions.

pub mod cancel;
pub mod capture;
pub mod errors;
pub mod faces;
pub mod pipeline;
pub mod session;
pub mod verify;

pub use cancel::CancellationToken;
pub use errors::{AppError, AppResult};
pub use pipeline::FacePipeline;
pub use session::{
    status_channel, SessionController, SessionState, StatusSink, VerificationStatus,
};
pub use verify::{
    run_verification, verify_once, VerificationOutcome, VerificationRequest,
    DEFAULT_SIMILARITY_THRESHOLD,
};
