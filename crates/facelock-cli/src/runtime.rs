//! Wires configuration, flags and the core crate into runnable commands.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use facelock_config::{load_resolved_config, ResolvedConfig};
use facelock_core::faces::{
    enroll, EnrollmentOutcome, EnrollmentRequest, MatchPolicy, MatchResult, ProfileStore,
    ProfileSummary,
};
use facelock_core::{
    status_channel, verify_once, AppError, AppResult, CancellationToken, FacePipeline,
    SessionController, VerificationRequest, VerificationStatus,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::{
    CaptureArgs, ClearArgs, EnrollArgs, ModelArgs, RemoveArgs, StoreArgs, VerifyArgs, WatchArgs,
};

#[derive(Debug, Clone, Serialize)]
pub struct VerifySummary {
    /// Required profile, or `None` for any profile.
    pub target: Option<String>,
    pub threshold: f32,
    pub result: MatchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRemoval {
    pub name: String,
    pub store_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilesCleared {
    pub removed: usize,
    pub store_path: String,
}

pub fn load_config() -> AppResult<ResolvedConfig> {
    let loaded = load_resolved_config()?;
    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "configuration loaded"),
        None => debug!("no configuration file found; using defaults"),
    }
    Ok(loaded.resolved)
}

fn seconds_flag(flag: &str, value: f64) -> AppResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        AppError::InvalidArgument(format!(
            "{flag} must be a non-negative number of seconds, got {value}"
        ))
    })
}

pub fn apply_capture_args(config: &mut ResolvedConfig, args: &CaptureArgs) -> AppResult<()> {
    if let Some(device) = &args.device {
        config.video_device = device.clone();
    }
    if let Some(warmup) = args.warmup_secs {
        config.warmup = seconds_flag("--warmup-secs", warmup)?;
    }
    if let Some(window) = args.window_secs {
        config.capture_window = seconds_flag("--window-secs", window)?;
    }
    Ok(())
}

pub fn apply_store_args(config: &mut ResolvedConfig, args: &StoreArgs) {
    if let Some(store) = &args.store {
        config.store_path = store.clone();
    }
}

pub fn apply_model_args(config: &mut ResolvedConfig, args: &ModelArgs) {
    if let Some(landmark) = &args.landmark_model {
        config.landmark_model = Some(landmark.clone());
    }
    if let Some(encoder) = &args.encoder_model {
        config.encoder_model = Some(encoder.clone());
    }
    if let Some(jitters) = args.jitters {
        config.jitters = jitters;
    }
}

fn resolve_config(
    capture: &CaptureArgs,
    store: &StoreArgs,
    models: &ModelArgs,
) -> AppResult<ResolvedConfig> {
    let mut config = load_config()?;
    apply_capture_args(&mut config, capture)?;
    apply_store_args(&mut config, store);
    apply_model_args(&mut config, models);
    Ok(config)
}

pub fn open_store(config: &ResolvedConfig) -> AppResult<ProfileStore> {
    debug!(path = %config.store_path.display(), "opening profile store");
    ProfileStore::open(&config.store_path)
}

#[cfg(feature = "dlib")]
pub fn build_pipeline(config: &ResolvedConfig, store: ProfileStore) -> AppResult<FacePipeline> {
    use std::sync::Arc;

    use facelock_core::capture::SystemFrameSource;
    use facelock_core::faces::{DlibFaceBackend, EnvModelPathResolver, ModelPathResolver};

    let paths = EnvModelPathResolver.resolve(&config.model_overrides())?;
    let backend = Arc::new(DlibFaceBackend::new(&paths, config.jitters)?);
    Ok(FacePipeline::new(
        Arc::new(SystemFrameSource::new(config.pixel_format.clone())),
        backend.clone(),
        backend,
        store,
    ))
}

#[cfg(not(feature = "dlib"))]
pub fn build_pipeline(_config: &ResolvedConfig, _store: ProfileStore) -> AppResult<FacePipeline> {
    Err(AppError::BackendUnavailable(
        "facelock was built without the `dlib` feature".into(),
    ))
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<EnrollmentOutcome> {
    let config = resolve_config(&args.capture, &args.store, &args.models)?;
    let store = open_store(&config)?;
    let pipeline = build_pipeline(&config, store)?;
    let request = enrollment_request(&config, &args.name);
    enroll(&pipeline, &request, &CancellationToken::new())
}

/// An image file is enrolled as exactly one sample; cameras use the
/// configured window.
pub fn enrollment_request(config: &ResolvedConfig, name: &str) -> EnrollmentRequest {
    let device = config.device_locator();
    let capture = if device.is_still_image() {
        config.capture_policy().single_shot()
    } else {
        config.capture_policy()
    };
    EnrollmentRequest {
        name: name.to_string(),
        device,
        capture,
    }
}

/// `--any` wins, then `--name`, then the configured target.
pub fn verify_policy(args: &VerifyArgs, config: &ResolvedConfig) -> MatchPolicy {
    if args.any {
        return MatchPolicy::AnyProfile;
    }
    match &args.name {
        Some(name) => MatchPolicy::Required(name.clone()),
        None => config.default_match_policy(),
    }
}

pub fn run_verify(args: &VerifyArgs) -> AppResult<VerifySummary> {
    let mut config = resolve_config(&args.capture, &args.store, &args.models)?;
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    let policy = verify_policy(args, &config);
    let request = config.verification_request(policy)?;
    let store = open_store(&config)?;
    let pipeline = build_pipeline(&config, store)?;

    let result = verify_once(&pipeline, &request)?;
    Ok(VerifySummary {
        target: request.policy.target().map(str::to_string),
        threshold: request.threshold,
        result,
    })
}

fn store_for(args: &StoreArgs) -> AppResult<(ProfileStore, String)> {
    let mut config = load_config()?;
    apply_store_args(&mut config, args);
    let store = open_store(&config)?;
    Ok((store, config.store_path.display().to_string()))
}

pub fn run_profiles_list(args: &StoreArgs) -> AppResult<Vec<ProfileSummary>> {
    let (store, _) = store_for(args)?;
    store.profiles()
}

pub fn run_profile_remove(args: &RemoveArgs) -> AppResult<ProfileRemoval> {
    let (store, store_path) = store_for(&args.store)?;
    if !store.remove(&args.name)? {
        return Err(AppError::ProfileNotFound {
            name: args.name.clone(),
        });
    }
    Ok(ProfileRemoval {
        name: args.name.clone(),
        store_path,
    })
}

pub fn run_profiles_clear(args: &ClearArgs) -> AppResult<ProfilesCleared> {
    if !args.yes {
        return Err(AppError::InvalidArgument(
            "refusing to clear every profile without --yes".into(),
        ));
    }
    let (store, store_path) = store_for(&args.store)?;
    let removed = store.count()?;
    store.clear()?;
    info!(removed, "profile store cleared");
    Ok(ProfilesCleared {
        removed,
        store_path,
    })
}

pub fn run_watch(
    args: &WatchArgs,
    on_status: &mut dyn FnMut(&VerificationStatus) -> AppResult<()>,
) -> AppResult<VerificationStatus> {
    let mut config = resolve_config(&args.capture, &args.store, &args.models)?;
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    let policy = match args.mode.as_deref() {
        Some(mode) => MatchPolicy::from_mode(mode),
        None => config.default_match_policy(),
    };
    let request = config.verification_request(policy)?;
    let cancel_after = args
        .cancel_after_secs
        .map(|secs| seconds_flag("--cancel-after-secs", secs))
        .transpose()?;
    let store = open_store(&config)?;
    let pipeline = build_pipeline(&config, store)?;

    watch_session(pipeline, request, args.attempts, cancel_after, on_status)
}

/// Claim a session, run up to `attempts` verifications and release it.
///
/// Stops early on the first match. Every status event, `Started` included,
/// is passed to `on_status` in the order the worker emitted it. Returns the
/// last terminal status.
pub fn watch_session(
    pipeline: FacePipeline,
    request: VerificationRequest,
    attempts: u32,
    cancel_after: Option<Duration>,
    on_status: &mut dyn FnMut(&VerificationStatus) -> AppResult<()>,
) -> AppResult<VerificationStatus> {
    let (sink, receiver) = status_channel();
    let session = SessionController::new(pipeline, sink);
    session.claim()?;

    let outcome = drive_attempts(
        &session,
        &receiver,
        &request,
        attempts.max(1),
        cancel_after,
        on_status,
    );
    let released = session.release();
    let last = outcome?;
    released?;
    Ok(last)
}

fn drive_attempts(
    session: &SessionController,
    receiver: &Receiver<VerificationStatus>,
    request: &VerificationRequest,
    attempts: u32,
    cancel_after: Option<Duration>,
    on_status: &mut dyn FnMut(&VerificationStatus) -> AppResult<()>,
) -> AppResult<VerificationStatus> {
    let mut attempt = 1;
    loop {
        debug!(attempt, attempts, "starting verification");
        session.verify_start(request.clone())?;
        let status = await_terminal(session, receiver, cancel_after, on_status)?;
        if matches!(status, VerificationStatus::Matched { .. }) || attempt >= attempts {
            return Ok(status);
        }
        attempt += 1;
    }
}

fn await_terminal(
    session: &SessionController,
    receiver: &Receiver<VerificationStatus>,
    cancel_after: Option<Duration>,
    on_status: &mut dyn FnMut(&VerificationStatus) -> AppResult<()>,
) -> AppResult<VerificationStatus> {
    let started = Instant::now();
    let mut deadline = cancel_after;
    loop {
        let next = match deadline {
            Some(limit) => receiver.recv_timeout(limit.saturating_sub(started.elapsed())),
            None => receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(status) => {
                on_status(&status)?;
                if status.is_terminal() {
                    return Ok(status);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                info!("cancel deadline reached; stopping verification");
                session.verify_stop()?;
                deadline = None;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(AppError::WorkerPanicked("status channel closed".into()))
            }
        }
    }
}
