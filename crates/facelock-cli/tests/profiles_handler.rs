use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facelock_cli::cli::{ClearArgs, OutputMode, ProfilesCommands, RemoveArgs, StoreArgs};
use facelock_cli::commands::{CommandHandler, ProfilesHandler, ProfilesHandlerDeps};
use facelock_cli::errors::AppError;
use facelock_cli::runtime::{ProfileRemoval, ProfilesCleared};
use facelock_core::faces::ProfileSummary;

#[derive(Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn deps(&self) -> ProfilesHandlerDeps {
        let list_calls = Arc::clone(&self.calls);
        let remove_calls = Arc::clone(&self.calls);
        let clear_calls = Arc::clone(&self.calls);
        let render_list_calls = Arc::clone(&self.calls);
        let render_remove_calls = Arc::clone(&self.calls);
        let render_clear_calls = Arc::clone(&self.calls);
        ProfilesHandlerDeps::new(
            move |_args: &StoreArgs| {
                list_calls.lock().unwrap().push("list".into());
                Ok(vec![ProfileSummary {
                    name: "alice".into(),
                    samples: 3,
                    dimension: 128,
                }])
            },
            move |args: &RemoveArgs| {
                remove_calls
                    .lock()
                    .unwrap()
                    .push(format!("remove:{}", args.name));
                if args.name == "ghost" {
                    return Err(AppError::ProfileNotFound {
                        name: args.name.clone(),
                    });
                }
                Ok(ProfileRemoval {
                    name: args.name.clone(),
                    store_path: "/tmp/profiles.redb".into(),
                })
            },
            move |_args: &ClearArgs| {
                clear_calls.lock().unwrap().push("clear".into());
                Ok(ProfilesCleared {
                    removed: 2,
                    store_path: "/tmp/profiles.redb".into(),
                })
            },
            move |profiles: &[ProfileSummary], _mode| {
                render_list_calls
                    .lock()
                    .unwrap()
                    .push(format!("render_list:{}", profiles.len()));
                Ok(())
            },
            move |removal: &ProfileRemoval, _mode| {
                render_remove_calls
                    .lock()
                    .unwrap()
                    .push(format!("render_remove:{}", removal.name));
                Ok(())
            },
            move |cleared: &ProfilesCleared, _mode| {
                render_clear_calls
                    .lock()
                    .unwrap()
                    .push(format!("render_clear:{}", cleared.removed));
                Ok(())
            },
        )
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[test]
fn list_renders_store_summaries() {
    let recorder = Recorder::default();
    let handler = ProfilesHandler::with_dependencies(
        ProfilesCommands::List(StoreArgs::default()),
        recorder.deps(),
    );

    let exit = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    assert_eq!(recorder.calls(), vec!["list", "render_list:1"]);
}

#[test]
fn remove_renders_removal() {
    let recorder = Recorder::default();
    let handler = ProfilesHandler::with_dependencies(
        ProfilesCommands::Remove(RemoveArgs {
            name: "alice".into(),
            store: StoreArgs::default(),
        }),
        recorder.deps(),
    );

    handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(recorder.calls(), vec!["remove:alice", "render_remove:alice"]);
}

#[test]
fn remove_of_unknown_profile_skips_rendering() {
    let recorder = Recorder::default();
    let handler = ProfilesHandler::with_dependencies(
        ProfilesCommands::Remove(RemoveArgs {
            name: "ghost".into(),
            store: StoreArgs::default(),
        }),
        recorder.deps(),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::ProfileNotFound { ref name } if name == "ghost"));
    assert_eq!(err.exit_code(), ExitCode::from(3));
    assert_eq!(recorder.calls(), vec!["remove:ghost"]);
}

#[test]
fn clear_renders_removed_count() {
    let recorder = Recorder::default();
    let handler = ProfilesHandler::with_dependencies(
        ProfilesCommands::Clear(ClearArgs {
            yes: true,
            store: StoreArgs::default(),
        }),
        recorder.deps(),
    );

    handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(recorder.calls(), vec!["clear", "render_clear:2"]);
}
