use std::any::Any;
use std::process::ExitCode;

use facelock_core::faces::ProfileSummary;

use crate::cli::{ClearArgs, OutputMode, ProfilesCommands, RemoveArgs, StoreArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::{render_profiles_cleared, render_profiles_list, render_profile_removed};
use crate::runtime::{self, ProfileRemoval, ProfilesCleared};

pub struct ProfilesHandler {
    command: ProfilesCommands,
    deps: ProfilesHandlerDeps,
}

pub struct ProfilesHandlerDeps {
    pub list: Box<dyn Fn(&StoreArgs) -> AppResult<Vec<ProfileSummary>> + Send + Sync>,
    pub remove: Box<dyn Fn(&RemoveArgs) -> AppResult<ProfileRemoval> + Send + Sync>,
    pub clear: Box<dyn Fn(&ClearArgs) -> AppResult<ProfilesCleared> + Send + Sync>,
    pub render_list: Box<dyn Fn(&[ProfileSummary], OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_remove: Box<dyn Fn(&ProfileRemoval, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_clear: Box<dyn Fn(&ProfilesCleared, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl ProfilesHandlerDeps {
    pub fn new(
        list: impl Fn(&StoreArgs) -> AppResult<Vec<ProfileSummary>> + Send + Sync + 'static,
        remove: impl Fn(&RemoveArgs) -> AppResult<ProfileRemoval> + Send + Sync + 'static,
        clear: impl Fn(&ClearArgs) -> AppResult<ProfilesCleared> + Send + Sync + 'static,
        render_list: impl Fn(&[ProfileSummary], OutputMode) -> AppResult<()> + Send + Sync + 'static,
        render_remove: impl Fn(&ProfileRemoval, OutputMode) -> AppResult<()> + Send + Sync + 'static,
        render_clear: impl Fn(&ProfilesCleared, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            list: Box::new(list),
            remove: Box::new(remove),
            clear: Box::new(clear),
            render_list: Box::new(render_list),
            render_remove: Box::new(render_remove),
            render_clear: Box::new(render_clear),
        }
    }
}

impl Default for ProfilesHandlerDeps {
    fn default() -> Self {
        Self::new(
            runtime::run_profiles_list,
            runtime::run_profile_remove,
            runtime::run_profiles_clear,
            render_profiles_list,
            render_profile_removed,
            render_profiles_cleared,
        )
    }
}

impl ProfilesHandler {
    pub fn new(command: ProfilesCommands) -> Self {
        Self {
            command,
            deps: ProfilesHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: ProfilesCommands, deps: ProfilesHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for ProfilesHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            ProfilesCommands::List(args) => {
                let profiles = (self.deps.list)(args)?;
                (self.deps.render_list)(profiles.as_slice(), mode)?;
            }
            ProfilesCommands::Remove(args) => {
                let removal = (self.deps.remove)(args)?;
                (self.deps.render_remove)(&removal, mode)?;
            }
            ProfilesCommands::Clear(args) => {
                let cleared = (self.deps.clear)(args)?;
                (self.deps.render_clear)(&cleared, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
