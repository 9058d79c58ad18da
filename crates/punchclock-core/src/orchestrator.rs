//! Frame orchestrator: the per-session verification loop.
//!
//! Each frame moves an explicit [`SessionState`] through
//!
//! ```text
//! AwaitingFace -> MatchedUncheckedMask -> MaskBlocked <-> MatchedUncheckedMask
//!              -> AwaitingBlink -> Confirmed
//!              \-> Unrecognized (back to AwaitingFace on the next frame)
//! ```
//!
//! Perception misses (no face, several faces, no match, eyes still open,
//! face covered) are [`FrameStatus`] values and drive the loop to the next
//! frame. Only faults in the frame source or the models are errors.
//!
//! The obstruction check passes at most once per session. Covering the face
//! after it has passed is not detected.

use crate::liveness::BlinkTracker;
use crate::matcher::{DistanceMatcher, MatchResult, Matcher};
use crate::perception::{extract_single, FaceExtraction, FacePerception, PerceptionError};
use crate::settings::VerificationSettings;
use crate::types::IdentityTemplate;
use punchclock_hw::{CameraError, Frame, FrameSource};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame source: {0}")]
    Camera(#[from] CameraError),
    #[error("perception: {0}")]
    Perception(#[from] PerceptionError),
    #[error("descriptor dimension mismatch: template has {expected}, live face has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Where the session stands after the last processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingFace,
    MatchedUncheckedMask,
    MaskBlocked,
    AwaitingBlink,
    Confirmed,
    Unrecognized,
}

/// Operator-facing status of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    LookingForFace,
    NoFace,
    MultipleFaces(usize),
    NotRecognized,
    Covered { name: String },
    AwaitingBlink { name: String },
    Confirmed { name: String },
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStatus::LookingForFace => f.write_str("Looking for a face..."),
            FrameStatus::NoFace => f.write_str("No face detected."),
            FrameStatus::MultipleFaces(_) => f.write_str("Multiple faces detected."),
            FrameStatus::NotRecognized => f.write_str("Face not recognized."),
            FrameStatus::Covered { name } => write!(f, "{name}, please uncover your face!"),
            FrameStatus::AwaitingBlink { name } => {
                write!(f, "Welcome {}! Please blink.", name.to_uppercase())
            }
            FrameStatus::Confirmed { name } => write!(f, "Blink detected. Thank you, {name}."),
        }
    }
}

/// Receives status changes. Rendering is a side effect only.
pub trait StatusSink {
    fn status(&mut self, status: &FrameStatus);
}

/// Logs each change of status message once.
#[derive(Debug, Default)]
pub struct TracingStatusSink {
    last: Option<String>,
}

impl StatusSink for TracingStatusSink {
    fn status(&mut self, status: &FrameStatus) {
        let message = status.to_string();
        if self.last.as_deref() != Some(message.as_str()) {
            tracing::info!(status = %message, "session status");
            self.last = Some(message);
        }
    }
}

/// Cooperative cancellation flag shared between a session and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The thresholds a session decides with, fixed for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionThresholds {
    pub match_threshold: f32,
    pub blink_threshold: f32,
    pub blink_consecutive_frames: u32,
}

impl From<&VerificationSettings> for SessionThresholds {
    fn from(s: &VerificationSettings) -> Self {
        Self {
            match_threshold: s.match_threshold,
            blink_threshold: s.blink_threshold,
            blink_consecutive_frames: s.blink_consecutive_frames,
        }
    }
}

/// Mutable state carried across frames of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub obstruction_checked: bool,
    pub liveness_confirmed: bool,
    pub last_status: Option<FrameStatus>,
    pub last_match: Option<MatchResult>,
    pub last_blink_ratio: Option<f32>,
    /// Frames processed so far (dark frames excluded).
    pub frames: u64,
    /// Set on the frame that confirmed the subject.
    pub confirmation: Option<Confirmation>,
    blink: BlinkTracker,
}

impl SessionState {
    pub fn new(thresholds: &SessionThresholds) -> Self {
        Self {
            phase: SessionPhase::AwaitingFace,
            obstruction_checked: false,
            liveness_confirmed: false,
            last_status: None,
            last_match: None,
            last_blink_ratio: None,
            frames: 0,
            confirmation: None,
            blink: BlinkTracker::new(thresholds.blink_threshold, thresholds.blink_consecutive_frames),
        }
    }

    fn lose_face(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.blink.reset();
    }
}

/// Advance the session by one frame.
pub fn step<P: FacePerception + ?Sized>(
    state: &mut SessionState,
    perception: &mut P,
    frame: &Frame,
    template: &IdentityTemplate,
    thresholds: &SessionThresholds,
) -> Result<FrameStatus, SessionError> {
    state.frames = state.frames.saturating_add(1);
    let status = advance(state, perception, frame, template, thresholds)?;
    state.last_status = Some(status.clone());
    Ok(status)
}

fn advance<P: FacePerception + ?Sized>(
    state: &mut SessionState,
    perception: &mut P,
    frame: &Frame,
    template: &IdentityTemplate,
    thresholds: &SessionThresholds,
) -> Result<FrameStatus, SessionError> {
    let (face, descriptor) = match extract_single(perception, frame)? {
        FaceExtraction::Single { face, descriptor } => (face, descriptor),
        FaceExtraction::NoFace => {
            state.lose_face(SessionPhase::AwaitingFace);
            return Ok(FrameStatus::NoFace);
        }
        FaceExtraction::MultipleFaces(n) => {
            state.lose_face(SessionPhase::AwaitingFace);
            return Ok(FrameStatus::MultipleFaces(n));
        }
    };

    if descriptor.dim() != template.descriptor.dim() {
        return Err(SessionError::DimensionMismatch {
            expected: template.descriptor.dim(),
            actual: descriptor.dim(),
        });
    }

    let result = DistanceMatcher.compare(&template.descriptor, &descriptor, thresholds.match_threshold);
    state.last_match = Some(result);
    if !result.matched {
        tracing::debug!(distance = result.distance, "face not recognized");
        state.lose_face(SessionPhase::Unrecognized);
        return Ok(FrameStatus::NotRecognized);
    }

    let name = template.display_name.clone();

    if !state.obstruction_checked {
        state.phase = SessionPhase::MatchedUncheckedMask;
        if perception.is_covered(frame, &face)? {
            state.phase = SessionPhase::MaskBlocked;
            return Ok(FrameStatus::Covered { name });
        }
        state.obstruction_checked = true;
        tracing::debug!(user = %template.identity_key, "obstruction check passed");
    }

    state.phase = SessionPhase::AwaitingBlink;
    let eyes = perception.eye_landmarks(frame, &face)?;
    let reading = state.blink.observe(&eyes.left, &eyes.right);
    state.last_blink_ratio = Some(reading.ratio);

    if reading.confirmed {
        state.phase = SessionPhase::Confirmed;
        state.liveness_confirmed = true;
        state.confirmation = Some(Confirmation {
            distance: result.distance,
            confidence: result.confidence,
            blink_ratio: reading.ratio,
            frames: state.frames,
        });
        return Ok(FrameStatus::Confirmed { name });
    }
    Ok(FrameStatus::AwaitingBlink { name })
}

/// Why a session ended without confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Operator,
    Timeout,
    EndOfStream,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Operator => "cancelled by operator",
            CancelReason::Timeout => "session timed out",
            CancelReason::EndOfStream => "frame source ended",
        })
    }
}

/// Evidence of a confirmed session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confirmation {
    pub distance: f32,
    pub confidence: f32,
    pub blink_ratio: f32,
    pub frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionOutcome {
    Confirmed(Confirmation),
    Cancelled(CancelReason),
}

/// Everything fixed for one session.
#[derive(Debug, Clone)]
pub struct SessionParams<'a> {
    pub template: &'a IdentityTemplate,
    pub thresholds: SessionThresholds,
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
}

/// Pull frames until the subject is confirmed, the session is cancelled,
/// the deadline passes or the source runs dry.
///
/// Dark frames are skipped. Cancellation and the deadline are checked
/// before every frame.
pub fn run_session<S, P, K>(
    source: &mut S,
    perception: &mut P,
    params: &SessionParams<'_>,
    sink: &mut K,
) -> Result<SessionOutcome, SessionError>
where
    S: FrameSource + ?Sized,
    P: FacePerception + ?Sized,
    K: StatusSink + ?Sized,
{
    let mut state = SessionState::new(&params.thresholds);
    let past_deadline = || params.deadline.is_some_and(|d| Instant::now() >= d);
    sink.status(&FrameStatus::LookingForFace);

    loop {
        if params.cancel.is_cancelled() {
            return Ok(SessionOutcome::Cancelled(CancelReason::Operator));
        }
        if past_deadline() {
            return Ok(SessionOutcome::Cancelled(CancelReason::Timeout));
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(SessionOutcome::Cancelled(CancelReason::EndOfStream)),
            // A stalled read may have outlasted a cancel or the deadline; those win.
            Err(CameraError::Stalled(_)) if params.cancel.is_cancelled() => {
                return Ok(SessionOutcome::Cancelled(CancelReason::Operator));
            }
            Err(CameraError::Stalled(_)) if past_deadline() => {
                return Ok(SessionOutcome::Cancelled(CancelReason::Timeout));
            }
            Err(e) => return Err(e.into()),
        };
        if frame.is_dark {
            tracing::trace!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let status = step(&mut state, perception, &frame, params.template, &params.thresholds)?;
        sink.status(&status);

        if let Some(confirmation) = state.confirmation {
            tracing::info!(
                user = %params.template.identity_key,
                distance = confirmation.distance,
                confidence = confirmation.confidence,
                blink_ratio = confirmation.blink_ratio,
                frames = confirmation.frames,
                "verification confirmed"
            );
            return Ok(SessionOutcome::Confirmed(confirmation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, EyeLandmarks, FaceDescriptor};
    use punchclock_hw::ReplaySource;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// What the fake perception "sees" in one frame.
    #[derive(Clone)]
    enum Scene {
        Empty,
        Crowd(usize),
        Face { distance: f32, covered: bool, ear: f32 },
    }

    /// Scripted perception: one scene per frame, consumed by `locate_faces`.
    struct ScriptedPerception {
        scenes: VecDeque<Scene>,
        current: Option<Scene>,
        cover_checks: usize,
    }

    impl ScriptedPerception {
        fn new(scenes: impl IntoIterator<Item = Scene>) -> Self {
            Self { scenes: scenes.into_iter().collect(), current: None, cover_checks: 0 }
        }
    }

    fn face_box() -> BoundingBox {
        BoundingBox { x: 10.0, y: 10.0, width: 50.0, height: 50.0, confidence: 0.9, landmarks: None }
    }

    /// Six-point eye 30 px wide whose aspect ratio is `ear`.
    fn eye(ear: f32) -> [(f32, f32); 6] {
        let half = ear * 30.0 / 2.0;
        [(0.0, 0.0), (10.0, -half), (20.0, -half), (30.0, 0.0), (20.0, half), (10.0, half)]
    }

    impl FacePerception for ScriptedPerception {
        fn locate_faces(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, PerceptionError> {
            let scene = self.scenes.pop_front().unwrap_or(Scene::Empty);
            let faces = match scene {
                Scene::Empty => vec![],
                Scene::Crowd(n) => vec![face_box(); n],
                Scene::Face { .. } => vec![face_box()],
            };
            self.current = Some(scene);
            Ok(faces)
        }

        fn describe(&mut self, _frame: &Frame, _face: &BoundingBox) -> Result<FaceDescriptor, PerceptionError> {
            let distance = match self.current {
                Some(Scene::Face { distance, .. }) => distance,
                _ => 10.0,
            };
            Ok(FaceDescriptor::new(vec![distance, 0.0, 0.0]))
        }

        fn eye_landmarks(&mut self, _frame: &Frame, _face: &BoundingBox) -> Result<EyeLandmarks, PerceptionError> {
            let ear = match self.current {
                Some(Scene::Face { ear, .. }) => ear,
                _ => 0.3,
            };
            Ok(EyeLandmarks { left: eye(ear), right: eye(ear) })
        }

        fn is_covered(&mut self, _frame: &Frame, _face: &BoundingBox) -> Result<bool, PerceptionError> {
            self.cover_checks += 1;
            Ok(matches!(self.current, Some(Scene::Face { covered: true, .. })))
        }

        fn descriptor_dim(&self) -> usize {
            3
        }
    }

    fn template() -> IdentityTemplate {
        IdentityTemplate {
            identity_key: "emp-7".into(),
            display_name: "Asha".into(),
            descriptor: FaceDescriptor::new(vec![0.0, 0.0, 0.0]),
        }
    }

    fn thresholds(frames: u32) -> SessionThresholds {
        SessionThresholds { match_threshold: 0.45, blink_threshold: 0.21, blink_consecutive_frames: frames }
    }

    fn frames(n: usize) -> ReplaySource {
        ReplaySource::new((0..n).map(|i| Frame::from_gray(vec![128u8; 64], 8, 8, i as u32).unwrap()))
    }

    fn open(distance: f32) -> Scene {
        Scene::Face { distance, covered: false, ear: 0.30 }
    }

    fn closed(distance: f32) -> Scene {
        Scene::Face { distance, covered: false, ear: 0.15 }
    }

    fn params(t: &IdentityTemplate, frames: u32) -> SessionParams<'_> {
        SessionParams { template: t, thresholds: thresholds(frames), cancel: CancelToken::new(), deadline: None }
    }

    impl StatusSink for Vec<String> {
        fn status(&mut self, status: &FrameStatus) {
            self.push(status.to_string());
        }
    }

    #[test]
    fn test_end_to_end_match_and_blink_confirms() {
        let t = template();
        let mut perception = ScriptedPerception::new([open(0.3), closed(0.3)]);
        let mut sink = Vec::new();
        let outcome = run_session(&mut frames(5), &mut perception, &params(&t, 1), &mut sink).unwrap();

        match outcome {
            SessionOutcome::Confirmed(c) => {
                assert!((c.distance - 0.3).abs() < 1e-6);
                assert!((c.blink_ratio - 0.15).abs() < 1e-4);
                assert_eq!(c.frames, 2);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(sink[0], "Looking for a face...");
        assert_eq!(sink[1], "Welcome ASHA! Please blink.");
        assert_eq!(sink[2], "Blink detected. Thank you, Asha.");
    }

    #[test]
    fn test_unrecognized_loops_until_source_ends() {
        let t = template();
        let mut perception = ScriptedPerception::new([closed(0.6), closed(0.45), closed(0.9)]);
        let mut sink = Vec::new();
        let outcome = run_session(&mut frames(3), &mut perception, &params(&t, 1), &mut sink).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::EndOfStream));
        assert!(sink[1..].iter().all(|m| m == "Face not recognized."));
        assert_eq!(perception.cover_checks, 0);
    }

    #[test]
    fn test_no_face_and_crowd_are_not_errors() {
        let t = template();
        let mut perception = ScriptedPerception::new([Scene::Empty, Scene::Crowd(2), open(0.2), closed(0.2)]);
        let mut sink = Vec::new();
        let outcome = run_session(&mut frames(4), &mut perception, &params(&t, 1), &mut sink).unwrap();
        assert!(matches!(outcome, SessionOutcome::Confirmed(_)));
        assert_eq!(sink[1], "No face detected.");
        assert_eq!(sink[2], "Multiple faces detected.");
    }

    #[test]
    fn test_covered_face_blocks_until_uncovered_then_checked_once() {
        let t = template();
        let covered = Scene::Face { distance: 0.2, covered: true, ear: 0.15 };
        let mut perception = ScriptedPerception::new([
            covered.clone(),
            covered,
            open(0.2),
            // Covered again after passing: not re-checked.
            Scene::Face { distance: 0.2, covered: true, ear: 0.15 },
        ]);
        let mut sink = Vec::new();
        let outcome = run_session(&mut frames(4), &mut perception, &params(&t, 1), &mut sink).unwrap();

        assert!(matches!(outcome, SessionOutcome::Confirmed(_)));
        assert_eq!(sink[1], "Asha, please uncover your face!");
        assert_eq!(sink[2], "Asha, please uncover your face!");
        assert_eq!(perception.cover_checks, 3);
    }

    #[test]
    fn test_blocked_frame_skips_blink_logic() {
        let t = template();
        let th = thresholds(1);
        let mut state = SessionState::new(&th);
        let frame = Frame::from_gray(vec![128u8; 64], 8, 8, 0).unwrap();
        let mut perception = ScriptedPerception::new([Scene::Face { distance: 0.1, covered: true, ear: 0.1 }]);

        let status = step(&mut state, &mut perception, &frame, &t, &th).unwrap();
        assert_eq!(status, FrameStatus::Covered { name: "Asha".into() });
        assert_eq!(state.phase, SessionPhase::MaskBlocked);
        assert!(!state.obstruction_checked);
        assert!(!state.liveness_confirmed);
        assert_eq!(state.last_blink_ratio, None);
    }

    #[test]
    fn test_consecutive_frames_required_and_reset_on_face_loss() {
        let t = template();
        let mut perception = ScriptedPerception::new([
            closed(0.2),
            Scene::Empty,
            closed(0.2),
            closed(0.6),
            closed(0.2),
        ]);
        let outcome = run_session(&mut frames(5), &mut perception, &params(&t, 2), &mut Vec::new()).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::EndOfStream));

        let mut perception = ScriptedPerception::new([open(0.2), closed(0.2), closed(0.2)]);
        let outcome = run_session(&mut frames(3), &mut perception, &params(&t, 2), &mut Vec::new()).unwrap();
        assert!(matches!(outcome, SessionOutcome::Confirmed(c) if c.frames == 3));
    }

    #[test]
    fn test_phase_transitions() {
        let t = template();
        let th = thresholds(2);
        let mut state = SessionState::new(&th);
        let frame = Frame::from_gray(vec![128u8; 64], 8, 8, 0).unwrap();
        let mut perception = ScriptedPerception::new([Scene::Empty, closed(0.9), closed(0.1), closed(0.1)]);

        assert_eq!(state.phase, SessionPhase::AwaitingFace);
        step(&mut state, &mut perception, &frame, &t, &th).unwrap();
        assert_eq!(state.phase, SessionPhase::AwaitingFace);
        step(&mut state, &mut perception, &frame, &t, &th).unwrap();
        assert_eq!(state.phase, SessionPhase::Unrecognized);
        step(&mut state, &mut perception, &frame, &t, &th).unwrap();
        assert_eq!(state.phase, SessionPhase::AwaitingBlink);
        assert!(state.obstruction_checked);
        assert!(state.confirmation.is_none());
        step(&mut state, &mut perception, &frame, &t, &th).unwrap();
        assert_eq!(state.phase, SessionPhase::Confirmed);
        assert!(state.liveness_confirmed);
        assert_eq!(state.last_status, Some(FrameStatus::Confirmed { name: "Asha".into() }));

        let c = state.confirmation.unwrap();
        assert_eq!(c.frames, 4);
        assert!((c.distance - 0.1).abs() < 1e-6);
        assert!((c.blink_ratio - 0.15).abs() < 1e-4);
        assert_eq!(Some(c.confidence), state.last_match.map(|m| m.confidence));
    }

    /// Never yields a frame: every read times out. Optionally cancels the
    /// session or sleeps while "blocked".
    struct StalledSource {
        cancel_while_blocked: Option<CancelToken>,
        block_for: Duration,
    }

    impl FrameSource for StalledSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            std::thread::sleep(self.block_for);
            if let Some(token) = &self.cancel_while_blocked {
                token.cancel();
            }
            Err(CameraError::Stalled(self.block_for))
        }
    }

    #[test]
    fn test_cancel_during_stalled_read_is_operator_cancel() {
        let t = template();
        let p = params(&t, 1);
        let mut source = StalledSource { cancel_while_blocked: Some(p.cancel.clone()), block_for: Duration::ZERO };
        let mut perception = ScriptedPerception::new(Vec::new());
        let outcome = run_session(&mut source, &mut perception, &p, &mut Vec::new()).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::Operator));
    }

    #[test]
    fn test_deadline_during_stalled_read_is_timeout() {
        let t = template();
        let mut p = params(&t, 1);
        p.deadline = Some(Instant::now() + Duration::from_millis(20));
        let mut source = StalledSource { cancel_while_blocked: None, block_for: Duration::from_millis(40) };
        let mut perception = ScriptedPerception::new(Vec::new());
        let outcome = run_session(&mut source, &mut perception, &p, &mut Vec::new()).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::Timeout));
    }

    #[test]
    fn test_stalled_camera_is_fault() {
        let t = template();
        let mut source = StalledSource { cancel_while_blocked: None, block_for: Duration::ZERO };
        let mut perception = ScriptedPerception::new(Vec::new());
        let err = run_session(&mut source, &mut perception, &params(&t, 1), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::Stalled(_))));
    }

    #[test]
    fn test_cancel_token_stops_session() {
        let t = template();
        let p = params(&t, 1);
        p.cancel.cancel();
        let mut perception = ScriptedPerception::new([open(0.1)]);
        let outcome = run_session(&mut frames(3), &mut perception, &p, &mut Vec::new()).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::Operator));
    }

    #[test]
    fn test_deadline_stops_session() {
        let t = template();
        let mut p = params(&t, 1);
        p.deadline = Some(Instant::now() - Duration::from_millis(1));
        let mut perception = ScriptedPerception::new([open(0.1)]);
        let outcome = run_session(&mut frames(3), &mut perception, &p, &mut Vec::new()).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled(CancelReason::Timeout));
    }

    #[test]
    fn test_dark_frames_skipped() {
        let t = template();
        let mut dark = Frame::from_gray(vec![0u8; 64], 8, 8, 0).unwrap();
        dark.is_dark = true;
        let lit = Frame::from_gray(vec![128u8; 64], 8, 8, 1).unwrap();
        let mut source = ReplaySource::new([dark.clone(), dark, lit.clone(), lit]);
        let mut perception = ScriptedPerception::new([open(0.1), closed(0.1)]);
        let outcome = run_session(&mut source, &mut perception, &params(&t, 1), &mut Vec::new()).unwrap();
        assert!(matches!(outcome, SessionOutcome::Confirmed(c) if c.frames == 2));
    }

    #[test]
    fn test_dimension_mismatch_is_fault() {
        let mut t = template();
        t.descriptor = FaceDescriptor::new(vec![0.0; 128]);
        let mut perception = ScriptedPerception::new([open(0.1)]);
        let err = run_session(&mut frames(1), &mut perception, &params(&t, 1), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, SessionError::DimensionMismatch { expected: 128, actual: 3 }));
    }

    #[test]
    fn test_tracing_sink_dedups() {
        let mut sink = TracingStatusSink::default();
        sink.status(&FrameStatus::NoFace);
        sink.status(&FrameStatus::NoFace);
        assert_eq!(sink.last.as_deref(), Some("No face detected."));
        sink.status(&FrameStatus::NotRecognized);
        assert_eq!(sink.last.as_deref(), Some("Face not recognized."));
    }
}
