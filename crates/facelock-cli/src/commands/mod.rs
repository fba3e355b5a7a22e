use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod enroll;
mod profiles;
mod verify;
mod watch;

pub use enroll::EnrollHandler;
pub use profiles::{ProfilesHandler, ProfilesHandlerDeps};
pub use verify::VerifyHandler;
pub use watch::{StatusCallback, WatchHandler};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Verify(args) => Box::new(VerifyHandler::new(args)),
            Commands::Profiles(cmd) => Box::new(ProfilesHandler::new(cmd)),
            Commands::Watch(args) => Box::new(WatchHandler::new(args)),
        }
    }
}
