pub mod convert;
pub mod device;
#[cfg(feature = "v4l")]
pub mod v4l;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::errors::{AppError, AppResult};
use crate::faces::FaceDetector;

pub use convert::convert_frame_to_image;
pub use device::{
    DeviceLocator, Frame, FrameSource, FrameStream, ImageFileSource, SystemFrameSource,
};
#[cfg(feature = "v4l")]
pub use self::v4l::V4lFrameSource;

pub const DEFAULT_WARMUP_FRAMES: u32 = 3;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;
pub const DEFAULT_MAX_REOPEN_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_SAMPLES: usize = 30;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(30);

/// Timing and retry bounds for one capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePolicy {
    pub warmup: Duration,
    /// Frames discarded when `warmup` is zero.
    pub warmup_frames: u32,
    /// Zero means "stop after the first frame read".
    pub window: Duration,
    pub frame_interval: Duration,
    pub max_samples: usize,
    pub max_consecutive_failures: u32,
    pub max_reopen_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(1),
            warmup_frames: DEFAULT_WARMUP_FRAMES,
            window: Duration::from_secs(2),
            frame_interval: Duration::from_millis(100),
            max_samples: DEFAULT_MAX_SAMPLES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_reopen_attempts: DEFAULT_MAX_REOPEN_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl CapturePolicy {
    pub fn new(warmup: Duration, window: Duration, frame_interval: Duration) -> Self {
        Self {
            warmup,
            window,
            frame_interval,
            ..Self::default()
        }
    }

    /// Same policy, but stop after the first frame.
    pub fn single_shot(mut self) -> Self {
        self.window = Duration::ZERO;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub total_frames: usize,
    pub frames_with_face: usize,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct CapturedFaces {
    pub faces: Vec<Frame>,
    pub stats: CaptureStats,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Captured(CapturedFaces),
    Cancelled,
}

/// Holds the open stream and releases it on every exit path.
struct OpenDevice<'a> {
    source: &'a dyn FrameSource,
    locator: &'a DeviceLocator,
    stream: Option<Box<dyn FrameStream>>,
}

impl<'a> OpenDevice<'a> {
    fn open(source: &'a dyn FrameSource, locator: &'a DeviceLocator) -> AppResult<Self> {
        let stream = source.open(locator)?;
        debug!(device = %locator, "opened capture device");
        Ok(Self {
            source,
            locator,
            stream: Some(stream),
        })
    }

    fn read(&mut self) -> AppResult<Frame> {
        match self.stream.as_mut() {
            Some(stream) => stream.read_frame(),
            None => Err(AppError::FrameProcessing("device is not open".into())),
        }
    }

    fn reopen(&mut self) -> AppResult<()> {
        self.release();
        self.stream = Some(self.source.open(self.locator)?);
        debug!(device = %self.locator, "reopened capture device");
        Ok(())
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!(device = %self.locator, "released capture device");
        }
    }
}

impl Drop for OpenDevice<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read frames from `device` and collect face crops.
///
/// Read failures are retried; after `max_consecutive_failures` in a row the
/// device is reopened, at most `max_reopen_attempts` times per run, before
/// giving up with [`AppError::CameraStalled`]. When no frame showed a face,
/// the last faceless frame is offered to the detector once more and kept as
/// the only sample.
pub fn capture_faces(
    source: &dyn FrameSource,
    device: &DeviceLocator,
    policy: &CapturePolicy,
    cancel: &CancellationToken,
    detector: &dyn FaceDetector,
) -> AppResult<CaptureOutcome> {
    let mut open = OpenDevice::open(source, device)?;

    warm_up(&mut open, policy, cancel);
    if cancel.is_cancelled() {
        return Ok(CaptureOutcome::Cancelled);
    }

    let started = Instant::now();
    let mut faces = Vec::new();
    let mut fallback: Option<Frame> = None;
    let mut stats = CaptureStats::default();
    let mut consecutive_failures = 0u32;
    let mut reopen_attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(CaptureOutcome::Cancelled);
        }
        let window_done = if policy.window.is_zero() {
            stats.total_frames > 0
        } else {
            started.elapsed() >= policy.window
        };
        if window_done {
            break;
        }

        let frame = match open.read() {
            Ok(frame) => frame,
            Err(err) => {
                consecutive_failures += 1;
                debug!(device = %device, failures = consecutive_failures, error = %err, "frame read failed");
                if consecutive_failures < policy.max_consecutive_failures {
                    cancel.sleep(policy.retry_delay);
                    continue;
                }
                if let Err(err) = reopen_until_open(&mut open, policy, cancel, &mut reopen_attempts)
                {
                    if cancel.is_cancelled() {
                        return Ok(CaptureOutcome::Cancelled);
                    }
                    warn!(device = %device, error = %err, "giving up on capture device");
                    return Err(AppError::CameraStalled {
                        device: device.to_string(),
                        failures: consecutive_failures,
                        reopen_attempts,
                    });
                }
                consecutive_failures = 0;
                continue;
            }
        };

        consecutive_failures = 0;
        stats.total_frames += 1;
        match detector.detect_and_crop(&frame) {
            Some(face) => {
                faces.push(face);
                stats.frames_with_face += 1;
                debug!(device = %device, frames = stats.total_frames, faces = faces.len(), "face detected");
                if faces.len() >= policy.max_samples {
                    break;
                }
            }
            None => {
                if faces.is_empty() {
                    fallback = Some(frame);
                }
            }
        }

        if !policy.window.is_zero() && !policy.frame_interval.is_zero() {
            cancel.sleep(policy.frame_interval);
        }
    }

    open.release();

    if faces.is_empty() {
        if let Some(frame) = fallback {
            let sample = detector.detect_and_crop(&frame).unwrap_or(frame);
            faces.push(sample);
            stats.used_fallback = true;
            debug!(device = %device, "using fallback frame as the only sample");
        }
    }

    info!(
        device = %device,
        frames = stats.total_frames,
        faces = stats.frames_with_face,
        samples = faces.len(),
        "capture finished"
    );
    Ok(CaptureOutcome::Captured(CapturedFaces { faces, stats }))
}

/// Discard frames while exposure settles. Every read, good or bad, is
/// followed by `retry_delay` so non-blocking sources are not polled hot.
fn warm_up(open: &mut OpenDevice<'_>, policy: &CapturePolicy, cancel: &CancellationToken) {
    if policy.warmup.is_zero() {
        for _ in 0..policy.warmup_frames {
            if cancel.is_cancelled() {
                return;
            }
            discard_frame(open, policy, cancel);
        }
        return;
    }

    let deadline = Instant::now() + policy.warmup;
    while Instant::now() < deadline && !cancel.is_cancelled() {
        discard_frame(open, policy, cancel);
    }
}

fn discard_frame(open: &mut OpenDevice<'_>, policy: &CapturePolicy, cancel: &CancellationToken) {
    if let Err(err) = open.read() {
        debug!(device = %open.locator, error = %err, "warm-up read failed");
    }
    cancel.sleep(policy.retry_delay);
}

fn reopen_until_open(
    open: &mut OpenDevice<'_>,
    policy: &CapturePolicy,
    cancel: &CancellationToken,
    reopen_attempts: &mut u32,
) -> AppResult<()> {
    let mut last_error = None;
    while *reopen_attempts < policy.max_reopen_attempts && !cancel.is_cancelled() {
        *reopen_attempts += 1;
        warn!(device = %open.locator, attempt = *reopen_attempts, "reopening stalled capture device");
        match open.reopen() {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(device = %open.locator, error = %err, "reopen failed");
                last_error = Some(err);
                cancel.sleep(policy.retry_delay);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| AppError::FrameProcessing("reopen budget exhausted".into())))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use image::{GrayImage, Luma};

    use super::*;
    use crate::faces::{Embedding, FaceEmbedder};

    pub fn frame(value: u8) -> Frame {
        GrayImage::from_pixel(4, 4, Luma([value]))
    }

    /// Frames brighter than 127 "contain" a face; the crop is the frame itself.
    pub struct BrightFaceDetector;

    impl FaceDetector for BrightFaceDetector {
        fn detect_and_crop(&self, image: &Frame) -> Option<Frame> {
            (image.get_pixel(0, 0).0[0] > 127).then(|| image.clone())
        }
    }

    /// Embeds every face as the same vector.
    pub struct FixedEmbedder(pub Embedding);

    impl FaceEmbedder for FixedEmbedder {
        fn embed(&self, _face: &Frame) -> Option<Embedding> {
            Some(self.0.clone())
        }
    }

    #[derive(Clone)]
    pub enum Script {
        Frame(u8),
        Fail,
    }

    /// Replays a script of frames and failures; once exhausted, repeats `tail`.
    #[derive(Clone)]
    pub struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Script>>>,
        tail: Script,
        read_delay: Duration,
        fail_open: bool,
        pub opens: Arc<AtomicUsize>,
        pub releases: Arc<AtomicUsize>,
        pub reads: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Script>, tail: Script) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                tail,
                read_delay: Duration::ZERO,
                fail_open: false,
                opens: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn always(step: Script) -> Self {
            Self::new(Vec::new(), step)
        }

        pub fn with_read_delay(mut self, delay: Duration) -> Self {
            self.read_delay = delay;
            self
        }

        pub fn failing_open() -> Self {
            let mut source = Self::always(Script::Fail);
            source.fail_open = true;
            source
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for ScriptedSource {
        fn open(&self, device: &DeviceLocator) -> AppResult<Box<dyn FrameStream>> {
            if self.fail_open {
                return Err(AppError::DeviceUnavailable {
                    device: device.to_string(),
                    message: "no such device".into(),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                source: self.clone(),
            }))
        }
    }

    struct ScriptedStream {
        source: ScriptedSource,
    }

    impl FrameStream for ScriptedStream {
        fn read_frame(&mut self) -> AppResult<Frame> {
            self.source.reads.fetch_add(1, Ordering::SeqCst);
            if !self.source.read_delay.is_zero() {
                thread::sleep(self.source.read_delay);
            }
            let step = self
                .source
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.source.tail.clone());
            match step {
                Script::Frame(value) => Ok(frame(value)),
                Script::Fail => Err(AppError::FrameProcessing("scripted failure".into())),
            }
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.source.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Policy without warm-up or sleeps, suitable for scripted sources.
    pub fn fast_policy(window: Duration) -> CapturePolicy {
        CapturePolicy {
            warmup: Duration::ZERO,
            warmup_frames: 0,
            window,
            frame_interval: Duration::ZERO,
            max_samples: DEFAULT_MAX_SAMPLES,
            max_consecutive_failures: 4,
            max_reopen_attempts: 2,
            retry_delay: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::*;
    use super::*;

    fn run(source: &ScriptedSource, policy: &CapturePolicy) -> AppResult<CaptureOutcome> {
        capture_faces(
            source,
            &DeviceLocator::Index(0),
            policy,
            &CancellationToken::new(),
            &BrightFaceDetector,
        )
    }

    fn captured(outcome: CaptureOutcome) -> CapturedFaces {
        match outcome {
            CaptureOutcome::Captured(faces) => faces,
            CaptureOutcome::Cancelled => panic!("capture unexpectedly cancelled"),
        }
    }

    #[test]
    fn collects_faces_until_the_sample_cap() {
        let source = ScriptedSource::always(Script::Frame(200));
        let mut policy = fast_policy(Duration::from_secs(10));
        policy.max_samples = 5;

        let faces = captured(run(&source, &policy).unwrap());
        assert_eq!(faces.faces.len(), 5);
        assert_eq!(faces.stats.frames_with_face, 5);
        assert!(!faces.stats.used_fallback);
        assert_eq!(source.releases(), source.opens());
    }

    #[test]
    fn zero_window_reads_exactly_one_frame() {
        let source = ScriptedSource::new(vec![Script::Frame(200)], Script::Frame(10));
        let faces = captured(run(&source, &fast_policy(Duration::ZERO)).unwrap());
        assert_eq!(faces.stats.total_frames, 1);
        assert_eq!(faces.faces.len(), 1);
    }

    #[test]
    fn faceless_frames_yield_one_fallback_sample() {
        let source = ScriptedSource::new(
            vec![Script::Frame(10), Script::Frame(20), Script::Frame(30)],
            Script::Fail,
        );
        let mut policy = fast_policy(Duration::from_millis(200));
        policy.max_consecutive_failures = 1_000;

        let faces = captured(run(&source, &policy).unwrap());
        assert_eq!(faces.faces.len(), 1);
        assert_eq!(faces.faces[0].get_pixel(0, 0).0[0], 30);
        assert_eq!(faces.stats.total_frames, 3);
        assert_eq!(faces.stats.frames_with_face, 0);
        assert!(faces.stats.used_fallback);
    }

    #[test]
    fn fallback_is_ignored_once_a_face_was_seen() {
        let source = ScriptedSource::new(
            vec![Script::Frame(10), Script::Frame(220), Script::Frame(15)],
            Script::Frame(15),
        );
        let mut policy = fast_policy(Duration::from_millis(50));
        policy.frame_interval = Duration::from_millis(5);

        let faces = captured(run(&source, &policy).unwrap());
        assert_eq!(faces.faces.len(), 1);
        assert_eq!(faces.faces[0].get_pixel(0, 0).0[0], 220);
        assert!(!faces.stats.used_fallback);
    }

    #[test]
    fn always_failing_device_stalls_after_bounded_retries() {
        let source = ScriptedSource::always(Script::Fail);
        let policy = fast_policy(Duration::from_secs(60));

        let started = std::time::Instant::now();
        let err = run(&source, &policy).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            AppError::CameraStalled {
                reopen_attempts, ..
            } => assert_eq!(reopen_attempts, policy.max_reopen_attempts),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(source.opens(), 1 + policy.max_reopen_attempts as usize);
        assert_eq!(source.releases(), source.opens());
    }

    #[test]
    fn reopen_recovers_a_transiently_stalled_device() {
        let mut script = vec![Script::Fail; 4];
        script.push(Script::Frame(200));
        let source = ScriptedSource::new(script, Script::Frame(200));

        let faces = captured(run(&source, &fast_policy(Duration::ZERO)).unwrap());
        assert_eq!(faces.faces.len(), 1);
        assert_eq!(source.opens(), 2);
        assert_eq!(source.releases(), 2);
    }

    #[test]
    fn open_failure_is_device_unavailable() {
        let source = ScriptedSource::failing_open();
        let err = run(&source, &fast_policy(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, AppError::DeviceUnavailable { .. }));
    }

    #[test]
    fn warmup_tolerates_read_failures() {
        let source = ScriptedSource::new(
            vec![Script::Fail, Script::Fail, Script::Frame(10)],
            Script::Frame(200),
        );
        let mut policy = fast_policy(Duration::ZERO);
        policy.warmup_frames = 3;

        let faces = captured(run(&source, &policy).unwrap());
        assert_eq!(faces.stats.total_frames, 1);
        assert_eq!(faces.faces[0].get_pixel(0, 0).0[0], 200);
    }

    #[test]
    fn cancellation_returns_cancelled_not_partial_results() {
        let source =
            ScriptedSource::always(Script::Frame(200)).with_read_delay(Duration::from_millis(2));
        let mut policy = fast_policy(Duration::from_secs(30));
        policy.max_samples = usize::MAX;
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let outcome = capture_faces(
            &source,
            &DeviceLocator::Index(0),
            &policy,
            &cancel,
            &BrightFaceDetector,
        )
        .unwrap();
        handle.join().unwrap();
        assert!(matches!(outcome, CaptureOutcome::Cancelled));
        assert_eq!(source.releases(), source.opens());
    }

    #[test]
    fn timed_warmup_paces_reads_from_non_blocking_sources() {
        let source = ScriptedSource::always(Script::Frame(200));
        let mut policy = fast_policy(Duration::ZERO);
        policy.warmup = Duration::from_millis(100);
        policy.retry_delay = Duration::from_millis(10);

        let faces = captured(run(&source, &policy).unwrap());
        assert_eq!(faces.stats.total_frames, 1);
        // At most one warm-up read per 10ms slice, plus the capture read.
        assert!(source.reads() <= 12, "read {} frames", source.reads());
        assert!(source.reads() >= 2);
    }
}
