use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, VerifyArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_verify;
use crate::runtime::{self, VerifySummary};

/// One-shot verification; exits 0 on a match and 1 otherwise.
pub struct VerifyHandler {
    args: VerifyArgs,
    run: Box<dyn Fn(&VerifyArgs) -> AppResult<VerifySummary> + Send + Sync>,
    render: Box<dyn Fn(&VerifySummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl VerifyHandler {
    pub fn new(args: VerifyArgs) -> Self {
        Self::with_dependencies(args, runtime::run_verify, render_verify)
    }

    pub fn with_dependencies(
        args: VerifyArgs,
        run: impl Fn(&VerifyArgs) -> AppResult<VerifySummary> + Send + Sync + 'static,
        render: impl Fn(&VerifySummary, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for VerifyHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.args)?;
        (self.render)(&summary, mode)?;
        if summary.result.is_match() {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(1))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
