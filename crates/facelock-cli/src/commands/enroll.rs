use std::any::Any;
use std::process::ExitCode;

use facelock_core::faces::EnrollmentOutcome;

use crate::cli::{EnrollArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_enroll;
use crate::runtime;

pub struct EnrollHandler {
    args: EnrollArgs,
    run: Box<dyn Fn(&EnrollArgs) -> AppResult<EnrollmentOutcome> + Send + Sync>,
    render: Box<dyn Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl EnrollHandler {
    pub fn new(args: EnrollArgs) -> Self {
        Self::with_dependencies(args, runtime::run_enroll, render_enroll)
    }

    pub fn with_dependencies(
        args: EnrollArgs,
        run: impl Fn(&EnrollArgs) -> AppResult<EnrollmentOutcome> + Send + Sync + 'static,
        render: impl Fn(&EnrollmentOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for EnrollHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
