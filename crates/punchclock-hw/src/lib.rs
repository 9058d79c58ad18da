//! punchclock-hw: capture hardware and frame sources.
//!
//! Provides V4L2 camera access with scoped streaming, the [`FrameSource`]
//! capability the verification loop pulls from, and a replay source for
//! recorded sequences.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, LiveStream, PixelFormat, DEFAULT_FRAME_TIMEOUT};
pub use frame::Frame;
pub use source::{FrameSource, ReplaySource};
