use punchclock_core::orchestrator::{self, SessionError, SessionParams};
use punchclock_core::perception::{extract_single, FaceExtraction, FacePerception, OnnxPerception, PerceptionError};
use punchclock_core::{
    CancelReason, CancelToken, FaceDescriptor, IdentityTemplate, SessionOutcome, SessionThresholds, TracingStatusSink,
};
use punchclock_hw::{Camera, Frame, FrameSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

/// Largest image file accepted for enrollment.
pub const MAX_ENROLL_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
/// Smallest accepted enrollment image side, pixels.
pub const MIN_ENROLL_IMAGE_SIDE: u32 = 200;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] punchclock_hw::CameraError),
    #[error("model error: {0}")]
    Perception(#[from] PerceptionError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("image file error: {0}")]
    ImageIo(#[from] std::io::Error),
    #[error("image file is {bytes} bytes, limit is {}", MAX_ENROLL_IMAGE_BYTES)]
    ImageTooLarge { bytes: u64 },
    #[error("image is {width}x{height}, minimum is {min}x{min}", min = MIN_ENROLL_IMAGE_SIDE)]
    ImageTooSmall { width: u32, height: u32 },
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected ({0})")]
    MultipleFaces(usize),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Camera parameters for one session.
#[derive(Debug, Clone)]
struct CaptureConfig {
    device: String,
    width: u32,
    height: u32,
    warmup_frames: usize,
    frame_timeout: Duration,
    session_timeout: Duration,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    RunSession {
        template: IdentityTemplate,
        thresholds: SessionThresholds,
        reply: oneshot::Sender<Result<SessionOutcome, EngineError>>,
    },
    EnrollFromImage {
        path: PathBuf,
        reply: oneshot::Sender<Result<FaceDescriptor, EngineError>>,
    },
}

/// Cancel token of the session the engine thread is running, if any.
///
/// Every session gets a fresh token when the engine thread starts it, so a
/// cancel only ever reaches the session that was running at the time.
#[derive(Clone, Default)]
struct ActiveSession(Arc<Mutex<Option<CancelToken>>>);

impl ActiveSession {
    fn slot(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    fn end(&self) {
        *self.slot() = None;
    }

    fn cancel(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    active: ActiveSession,
    busy: Arc<AtomicBool>,
    descriptor_dim: usize,
}

impl EngineHandle {
    /// Run one verification session against `template` on the camera.
    ///
    /// Requests are served one at a time; this waits behind any session
    /// already running.
    pub async fn run_session(
        &self,
        template: IdentityTemplate,
        thresholds: SessionThresholds,
    ) -> Result<SessionOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RunSession {
                template,
                thresholds,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Compute the descriptor of the single face in an image file.
    pub async fn enroll_from_image(&self, path: &Path) -> Result<FaceDescriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EnrollFromImage {
                path: path.to_path_buf(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Stop the running session at its next frame boundary. Queued requests
    /// are not affected. Returns whether a session was running.
    pub fn cancel(&self) -> bool {
        self.active.cancel()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn descriptor_dim(&self) -> usize {
        self.descriptor_dim
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads all ONNX models up front and fails fast if any is missing. The
/// camera is not opened here: each session opens it and releases it when
/// the session ends.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let paths = config.model_paths();
    let perception = OnnxPerception::load(&paths, config.descriptor_dim, config.detector_min_score)?;
    tracing::info!(dir = %config.model_dir.display(), "models loaded");

    let session_timeout = Duration::from_secs(config.session_timeout_secs);
    let capture = CaptureConfig {
        device: config.camera_device.clone(),
        width: config.camera_width,
        height: config.camera_height,
        warmup_frames: config.warmup_frames,
        frame_timeout: Duration::from_millis(config.frame_timeout_ms).min(session_timeout),
        session_timeout,
    };

    spawn_worker(perception, config.descriptor_dim, move |perception, template, thresholds, cancel| {
        run_camera_session(&capture, perception, template, thresholds, cancel)
    })
}

/// Start the request loop. `run` executes one session with that session's
/// cancel token.
fn spawn_worker<P, F>(mut perception: P, descriptor_dim: usize, mut run: F) -> Result<EngineHandle, EngineError>
where
    P: FacePerception + Send + 'static,
    F: FnMut(&mut P, &IdentityTemplate, SessionThresholds, &CancelToken) -> Result<SessionOutcome, EngineError>
        + Send
        + 'static,
{
    let active = ActiveSession::default();
    let busy = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    let thread_active = active.clone();
    let thread_busy = busy.clone();
    std::thread::Builder::new()
        .name("punchclock-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                thread_busy.store(true, Ordering::SeqCst);
                match req {
                    EngineRequest::RunSession {
                        template,
                        thresholds,
                        reply,
                    } => {
                        let cancel = thread_active.begin();
                        let result = run(&mut perception, &template, thresholds, &cancel);
                        thread_active.end();
                        let _ = reply.send(result);
                    }
                    EngineRequest::EnrollFromImage { path, reply } => {
                        let result = enroll_from_image(&mut perception, &path);
                        let _ = reply.send(result);
                    }
                }
                thread_busy.store(false, Ordering::SeqCst);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        active,
        busy,
        descriptor_dim,
    })
}

/// Open the camera, discard warmup frames and run the orchestrated session.
/// The device is released on every return path.
fn run_camera_session<P: FacePerception>(
    capture: &CaptureConfig,
    perception: &mut P,
    template: &IdentityTemplate,
    thresholds: SessionThresholds,
    cancel: &CancelToken,
) -> Result<SessionOutcome, EngineError> {
    let camera = Camera::open(&capture.device, capture.width, capture.height)?;
    let mut stream = camera.stream(capture.frame_timeout)?;

    if capture.warmup_frames > 0 {
        tracing::debug!(count = capture.warmup_frames, "discarding warmup frames");
        for _ in 0..capture.warmup_frames {
            if cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled(CancelReason::Operator));
            }
            stream.next_frame()?;
        }
    }

    let params = SessionParams {
        template,
        thresholds,
        cancel: cancel.clone(),
        deadline: Some(Instant::now() + capture.session_timeout),
    };
    let mut sink = TracingStatusSink::default();
    let outcome = orchestrator::run_session(&mut stream, perception, &params, &mut sink)?;
    Ok(outcome)
}

/// Size and resolution limits for enrollment images.
fn check_enroll_image(bytes: u64, width: u32, height: u32) -> Result<(), EngineError> {
    if bytes > MAX_ENROLL_IMAGE_BYTES {
        return Err(EngineError::ImageTooLarge { bytes });
    }
    if width < MIN_ENROLL_IMAGE_SIDE || height < MIN_ENROLL_IMAGE_SIDE {
        return Err(EngineError::ImageTooSmall { width, height });
    }
    Ok(())
}

/// Decode the image and describe its only face.
fn enroll_from_image<P: FacePerception>(perception: &mut P, path: &Path) -> Result<FaceDescriptor, EngineError> {
    let bytes = std::fs::metadata(path)?.len();
    if bytes > MAX_ENROLL_IMAGE_BYTES {
        return Err(EngineError::ImageTooLarge { bytes });
    }
    let img = image::open(path)?;
    check_enroll_image(bytes, img.width(), img.height())?;

    let frame = Frame::from_image(&img, 0);
    match extract_single(perception, &frame)? {
        FaceExtraction::Single { face, descriptor } => {
            tracing::info!(confidence = face.confidence, path = %path.display(), "enroll: face extracted");
            Ok(descriptor)
        }
        FaceExtraction::NoFace => Err(EngineError::NoFaceDetected),
        FaceExtraction::MultipleFaces(n) => Err(EngineError::MultipleFaces(n)),
    }
}
