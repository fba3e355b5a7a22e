//! Exclusive verification sessions.
//!
//! A [`SessionController`] arbitrates one camera between callers. The control
//! methods run synchronously on the caller's thread; capture, embedding and
//! matching run on a single worker thread that reports through a
//! [`StatusSink`]. Every started verification emits exactly one
//! [`VerificationStatus::Started`] followed by exactly one terminal status.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::cancel::CancellationToken;
use crate::errors::{AppError, AppResult};
use crate::pipeline::FacePipeline;
use crate::verify::{run_verification, VerificationOutcome, VerificationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Claimed,
    Verifying,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VerificationStatus {
    Started,
    Matched { profile: String, score: f32 },
    NoMatch { profile: Option<String>, score: f32 },
    NoFace,
    Error { reason: String },
    Cancelled,
}

impl VerificationStatus {
    /// Status string as published on the session bus.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationStatus::Started => "verify-started",
            VerificationStatus::Matched { .. } => "verify-match",
            VerificationStatus::NoMatch { .. } => "verify-no-match",
            VerificationStatus::NoFace => "verify-no-face",
            VerificationStatus::Error { .. } => "verify-error",
            VerificationStatus::Cancelled => "verify-cancelled",
        }
    }

    /// Payload accompanying [`VerificationStatus::code`].
    pub fn message(&self) -> String {
        match self {
            VerificationStatus::Started | VerificationStatus::Cancelled => String::new(),
            VerificationStatus::Matched { profile, score } => format!("{profile}:{score:.4}"),
            VerificationStatus::NoMatch {
                profile: Some(profile),
                score,
            } => format!("{profile}:{score:.4}"),
            VerificationStatus::NoMatch { profile: None, .. } => "no-enrollment".into(),
            VerificationStatus::NoFace => "no-valid-frames".into(),
            VerificationStatus::Error { reason } => reason.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Started)
    }

    fn from_outcome(outcome: AppResult<VerificationOutcome>) -> Self {
        match outcome {
            Ok(VerificationOutcome::Decided { result, .. }) => match result.profile {
                Some(profile) => VerificationStatus::Matched {
                    profile,
                    score: result.aggregate_score,
                },
                None => VerificationStatus::NoMatch {
                    profile: result.candidate,
                    score: result.aggregate_score,
                },
            },
            Ok(VerificationOutcome::NoFace { .. }) => VerificationStatus::NoFace,
            Ok(VerificationOutcome::Cancelled) => VerificationStatus::Cancelled,
            Err(err) => VerificationStatus::Error {
                reason: err.to_string(),
            },
        }
    }
}

/// Receives status notifications from verification workers.
///
/// `emit` runs on the worker thread. It may query
/// [`SessionController::state`] but must not call the control methods,
/// which wait for that same worker.
pub trait StatusSink: Send + Sync {
    fn emit(&self, status: VerificationStatus);
}

impl StatusSink for Sender<VerificationStatus> {
    fn emit(&self, status: VerificationStatus) {
        if self.send(status).is_err() {
            debug!("status receiver dropped; discarding notification");
        }
    }
}

/// Sink backed by an mpsc channel, plus the receiving end.
pub fn status_channel() -> (Arc<dyn StatusSink>, Receiver<VerificationStatus>) {
    let (sender, receiver) = mpsc::channel();
    (Arc::new(sender), receiver)
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn stop(self) {
        self.cancel.cancel();
        if self.handle.join().is_err() {
            error!("verification worker panicked outside the verification pipeline");
        }
    }
}

#[derive(Default)]
struct SessionInner {
    claimed: bool,
    worker: Option<Worker>,
}

pub struct SessionController {
    pipeline: FacePipeline,
    sink: Arc<dyn StatusSink>,
    /// Serializes claim, release, start and stop. Held while joining a worker.
    control: Mutex<()>,
    /// Claim flag and worker slot. Never held across a join, so a sink may
    /// call [`SessionController::state`] from the worker thread.
    inner: Mutex<SessionInner>,
}

impl SessionController {
    pub fn new(pipeline: FacePipeline, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            pipeline,
            sink,
            control: Mutex::new(()),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, SessionInner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::WorkerPanicked("session state lock poisoned".into()))
    }

    fn control(&self) -> AppResult<MutexGuard<'_, ()>> {
        self.control
            .lock()
            .map_err(|_| AppError::WorkerPanicked("session control lock poisoned".into()))
    }

    fn take_worker(&self) -> AppResult<Option<Worker>> {
        Ok(self.lock()?.worker.take())
    }

    pub fn state(&self) -> AppResult<SessionState> {
        let inner = self.lock()?;
        Ok(match (inner.claimed, inner.worker.as_ref()) {
            (false, _) => SessionState::Idle,
            (true, Some(worker)) if !worker.is_finished() => SessionState::Verifying,
            (true, _) => SessionState::Claimed,
        })
    }

    pub fn claim(&self) -> AppResult<()> {
        let _control = self.control()?;
        let mut inner = self.lock()?;
        if inner.claimed {
            return Err(AppError::AlreadyClaimed);
        }
        inner.claimed = true;
        info!("verification device claimed");
        Ok(())
    }

    /// Stop any running verification and return to idle.
    pub fn release(&self) -> AppResult<()> {
        let _control = self.control()?;
        if let Some(worker) = self.take_worker()? {
            worker.stop();
        }
        let mut inner = self.lock()?;
        if inner.claimed {
            inner.claimed = false;
            info!("verification device released");
        }
        Ok(())
    }

    pub fn verify_start(&self, request: VerificationRequest) -> AppResult<()> {
        let _control = self.control()?;
        let previous = {
            let mut inner = self.lock()?;
            if !inner.claimed {
                return Err(AppError::NotClaimed);
            }
            if inner
                .worker
                .as_ref()
                .is_some_and(|worker| !worker.is_finished())
            {
                return Err(AppError::AlreadyVerifying);
            }
            inner.worker.take()
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let handle = {
            let pipeline = self.pipeline.clone();
            let sink = Arc::clone(&self.sink);
            let cancel = cancel.clone();
            let finished = Arc::clone(&finished);
            thread::Builder::new()
                .name("facelock-verify".into())
                .spawn(move || {
                    sink.emit(VerificationStatus::Started);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_verification(&pipeline, &request, &cancel)
                    }))
                    .unwrap_or_else(|_| {
                        Err(AppError::WorkerPanicked("verification pipeline panicked".into()))
                    });
                    let status = VerificationStatus::from_outcome(outcome);
                    match &status {
                        VerificationStatus::Error { reason } => {
                            error!(reason = %reason, "verification failed")
                        }
                        other => info!(status = other.code(), message = %other.message(), "verification finished"),
                    }
                    // Mark completion first so a caller reacting to the terminal
                    // status can start the next verification immediately.
                    finished.store(true, Ordering::SeqCst);
                    sink.emit(status);
                })?
        };

        self.lock()?.worker = Some(Worker {
            handle,
            cancel,
            finished,
        });
        info!("verification started");
        Ok(())
    }

    /// Cancel the running verification and wait for it. No-op when idle.
    pub fn verify_stop(&self) -> AppResult<()> {
        let _control = self.control()?;
        if let Some(worker) = self.take_worker()? {
            worker.stop();
            debug!("verification worker joined");
        }
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let worker = match self.inner.get_mut() {
            Ok(inner) => inner.worker.take(),
            Err(poisoned) => poisoned.into_inner().worker.take(),
        };
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}
