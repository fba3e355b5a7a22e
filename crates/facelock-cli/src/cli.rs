use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "facelock", version, about = "Face enrollment and verification")]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Capture faces and append them to a profile
    Enroll(EnrollArgs),
    /// Run a single verification and exit with its verdict
    Verify(VerifyArgs),
    /// Inspect or delete enrolled profiles
    #[command(subcommand)]
    Profiles(ProfilesCommands),
    /// Drive a verification session and print each status event
    Watch(WatchArgs),
}

#[derive(Debug, Subcommand)]
pub enum ProfilesCommands {
    /// List enrolled profiles with sample counts
    List(StoreArgs),
    /// Remove one profile
    Remove(RemoveArgs),
    /// Remove every profile
    Clear(ClearArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Profile database (defaults to config store_path)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CaptureArgs {
    /// Video device index, device path, or an image file
    #[arg(long)]
    pub device: Option<String>,

    /// Seconds of frames discarded before capture starts
    #[arg(long)]
    pub warmup_secs: Option<f64>,

    /// Capture window in seconds; 0 takes a single frame
    #[arg(long)]
    pub window_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ModelArgs {
    /// dlib landmark predictor model
    #[arg(long)]
    pub landmark_model: Option<PathBuf>,

    /// dlib face encoder model
    #[arg(long)]
    pub encoder_model: Option<PathBuf>,

    /// Number of jitters used when encoding faces
    #[arg(long)]
    pub jitters: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Profile to create or extend
    pub name: String,

    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// Only accept this profile
    #[arg(long, conflicts_with = "any")]
    pub name: Option<String>,

    /// Accept any enrolled profile
    #[arg(long)]
    pub any: bool,

    /// Similarity threshold in (0, 1]
    #[arg(long)]
    pub threshold: Option<f32>,

    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RemoveArgs {
    /// Profile to remove
    pub name: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Args)]
pub struct ClearArgs {
    /// Confirm removal of every profile
    #[arg(long)]
    pub yes: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Profile name, or "any"
    #[arg(long)]
    pub mode: Option<String>,

    /// Similarity threshold in (0, 1]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Verifications to run before releasing the device; stops at the first match
    #[arg(long, default_value_t = 1)]
    pub attempts: u32,

    /// Cancel a verification still running after this many seconds
    #[arg(long)]
    pub cancel_after_secs: Option<f64>,

    #[command(flatten)]
    pub capture: CaptureArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_name_conflicts_with_any() {
        let err = Cli::try_parse_from(["facelock", "verify", "--name", "alice", "--any"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn json_flag_is_global() {
        let cli = Cli::try_parse_from(["facelock", "profiles", "list", "--json"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn enroll_parses_capture_overrides() {
        let cli = Cli::try_parse_from([
            "facelock",
            "enroll",
            "alice",
            "--device",
            "face.png",
            "--window-secs",
            "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll(args) => {
                assert_eq!(args.name, "alice");
                assert_eq!(args.capture.device.as_deref(), Some("face.png"));
                assert_eq!(args.capture.window_secs, Some(0.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
