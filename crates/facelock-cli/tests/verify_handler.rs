use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facelock_cli::cli::{CaptureArgs, ModelArgs, OutputMode, StoreArgs, VerifyArgs};
use facelock_cli::commands::{CommandHandler, VerifyHandler};
use facelock_cli::errors::AppError;
use facelock_cli::runtime::VerifySummary;
use facelock_core::faces::MatchResult;

fn sample_args() -> VerifyArgs {
    VerifyArgs {
        name: Some("alice".into()),
        any: false,
        threshold: Some(0.85),
        capture: CaptureArgs::default(),
        store: StoreArgs::default(),
        models: ModelArgs::default(),
    }
}

fn summary(profile: Option<&str>, score: f32) -> VerifySummary {
    VerifySummary {
        target: Some("alice".into()),
        threshold: 0.85,
        result: MatchResult {
            profile: profile.map(str::to_string),
            candidate: Some("alice".into()),
            aggregate_score: score,
            best_pair_score: score,
            samples_considered: 3,
        },
    }
}

#[test]
fn verify_handler_exits_zero_on_match() {
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let handler = VerifyHandler::with_dependencies(
        sample_args(),
        |_args| Ok(summary(Some("alice"), 0.93)),
        {
            let rendered = Arc::clone(&rendered);
            move |summary: &VerifySummary, mode| {
                rendered
                    .lock()
                    .unwrap()
                    .push((summary.result.profile.clone(), mode));
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    let rendered = rendered.lock().unwrap();
    assert_eq!(rendered.as_slice(), &[(Some("alice".to_string()), OutputMode::Human)]);
}

#[test]
fn verify_handler_exits_one_below_threshold() {
    let handler = VerifyHandler::with_dependencies(
        sample_args(),
        |_args| Ok(summary(None, 0.61)),
        |_summary, _mode| Ok(()),
    );

    let exit = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(exit, ExitCode::from(1));
}

#[test]
fn verify_handler_surfaces_threshold_errors() {
    let handler = VerifyHandler::with_dependencies(
        sample_args(),
        |_args| Err(AppError::InvalidThreshold(1.5)),
        |_summary, _mode| Ok(()),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::InvalidThreshold(value) if value == 1.5));
    assert_eq!(err.exit_code(), ExitCode::from(2));
}
