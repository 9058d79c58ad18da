//! punchclock-core: the verification-and-commit engine.
//!
//! Geofence gate, face matcher, blink liveness and obstruction check, driven
//! frame by frame by the orchestrator, plus the attendance record state
//! machine that turns a confirmed session into a punch. Face perception runs
//! on ONNX Runtime (SCRFD detector, ArcFace-style descriptor, 68-point
//! landmarks, two-class obstruction model).

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod geofence;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod obstruction;
pub mod orchestrator;
pub mod perception;
pub mod recognizer;
pub mod settings;
pub mod types;

pub use attendance::{apply_punch, AttendanceError, AttendanceRecord, AttendanceStatus, DayState, PunchEvent, PunchKind, Transition};
pub use geofence::{great_circle_distance_m, is_within_range};
pub use matcher::{DistanceMatcher, MatchResult, Matcher};
pub use orchestrator::{
    run_session, CancelReason, CancelToken, Confirmation, FrameStatus, SessionError, SessionOutcome, SessionParams,
    SessionThresholds, StatusSink, TracingStatusSink,
};
pub use perception::{extract_single, FaceExtraction, FacePerception, ModelPaths, OnnxPerception, PerceptionError};
pub use settings::{SettingsError, VerificationSettings};
pub use types::{BoundingBox, Coordinates, EyeLandmarks, FaceDescriptor, IdentityTemplate};
