use std::error::Error;
use std::io::{self, Write};

use facelock_core::faces::{EnrollmentOutcome, ProfileSummary};
use facelock_core::VerificationStatus;
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputMode;
use crate::errors::{AppError, AppResult};
use crate::runtime::{ProfileRemoval, ProfilesCleared, VerifySummary};

fn write_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(value)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_enroll(outcome: &EnrollmentOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    tracing::info!("{line}");
                }
            }
            println!(
                "Enrollment successful: {} sample(s) added to '{}' ({} total)",
                outcome.added, outcome.name, outcome.total_samples
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_verify(summary: &VerifySummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let result = &summary.result;
            match (&result.profile, &result.candidate) {
                (Some(profile), _) => println!(
                    "Match: {profile} (score {:.4} >= threshold {:.2})",
                    result.aggregate_score, summary.threshold
                ),
                (None, Some(candidate)) => println!(
                    "No match: best candidate {candidate} scored {:.4} (threshold {:.2})",
                    result.aggregate_score, summary.threshold
                ),
                (None, None) if result.samples_considered == 0 => {
                    println!("No match: no usable face captured")
                }
                (None, None) => match &summary.target {
                    Some(target) => println!("No match: profile '{target}' is not enrolled"),
                    None => println!("No match: no profiles enrolled"),
                },
            }
        }
        OutputMode::Json => write_json(&json!({
            "matched": summary.result.is_match(),
            "target": summary.target,
            "threshold": summary.threshold,
            "result": summary.result,
        }))?,
    }
    Ok(())
}

pub fn render_profiles_list(profiles: &[ProfileSummary], mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if profiles.is_empty() {
                println!("No profiles enrolled");
            }
            for profile in profiles {
                println!(
                    "{}\t{} sample(s)\tdimension {}",
                    profile.name, profile.samples, profile.dimension
                );
            }
        }
        OutputMode::Json => write_json(profiles)?,
    }
    Ok(())
}

pub fn render_profile_removed(removal: &ProfileRemoval, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => println!(
            "Removed profile '{}' from {}",
            removal.name, removal.store_path
        ),
        OutputMode::Json => write_json(removal)?,
    }
    Ok(())
}

pub fn render_profiles_cleared(cleared: &ProfilesCleared, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => println!(
            "Removed {} profile(s) from {}",
            cleared.removed, cleared.store_path
        ),
        OutputMode::Json => write_json(cleared)?,
    }
    Ok(())
}

/// One line per session event: `<code> <message>` or a JSON object.
pub fn render_status(status: &VerificationStatus, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let message = status.message();
            if message.is_empty() {
                println!("{}", status.code());
            } else {
                println!("{} {message}", status.code());
            }
        }
        OutputMode::Json => write_json(&json!({
            "status": status.code(),
            "message": status.message(),
            "detail": status,
        }))?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}
