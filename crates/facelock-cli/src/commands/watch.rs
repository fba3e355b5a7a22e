use std::any::Any;
use std::process::ExitCode;

use facelock_core::VerificationStatus;

use crate::cli::{OutputMode, WatchArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_status;
use crate::runtime;

pub type StatusCallback<'a> = &'a mut dyn FnMut(&VerificationStatus) -> AppResult<()>;

type WatchRun =
    dyn Fn(&WatchArgs, StatusCallback<'_>) -> AppResult<VerificationStatus> + Send + Sync;

/// Streams session status events as they arrive; exits 0 only on a match.
pub struct WatchHandler {
    args: WatchArgs,
    run: Box<WatchRun>,
    render: Box<dyn Fn(&VerificationStatus, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl WatchHandler {
    pub fn new(args: WatchArgs) -> Self {
        Self::with_dependencies(args, runtime::run_watch, render_status)
    }

    pub fn with_dependencies(
        args: WatchArgs,
        run: impl Fn(&WatchArgs, StatusCallback<'_>) -> AppResult<VerificationStatus>
            + Send
            + Sync
            + 'static,
        render: impl Fn(&VerificationStatus, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for WatchHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let mut on_status = |status: &VerificationStatus| (self.render)(status, mode);
        let last = (self.run)(&self.args, &mut on_status)?;
        match last {
            VerificationStatus::Matched { .. } => Ok(ExitCode::SUCCESS),
            _ => Ok(ExitCode::from(1)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
