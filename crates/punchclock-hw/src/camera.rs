//! V4L2 camera capture via the `v4l` crate.
//!
//! A [`Camera`] is the exclusively-owned capture device of one verification
//! session. Opening it acquires the device node; dropping it releases it.
//! Frames are pulled through a [`LiveStream`] that borrows the camera, so the
//! stream can never outlive the device.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

/// Longest wait for one frame before the stream counts as stalled.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound accepted by the v4l poll timeout (milliseconds as `i32`).
const MAX_FRAME_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("replay source: {0}")]
    Replay(String),
    #[error("no frame within {0:?}")]
    Stalled(Duration),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel kept).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera by path (e.g. "/dev/video0") and negotiate
    /// a YUYV or GREY format close to `width` x `height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "camera acquired"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. The returned stream borrows the camera.
    ///
    /// Each read waits at most `frame_timeout` (clamped to at least 1 ms) and
    /// then fails with [`CameraError::Stalled`]. A stalled stream is not
    /// reusable.
    pub fn stream(&self, frame_timeout: Duration) -> Result<LiveStream<'_>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        let frame_timeout = frame_timeout.clamp(Duration::from_millis(1), MAX_FRAME_TIMEOUT);
        stream.set_timeout(frame_timeout);
        Ok(LiveStream {
            camera: self,
            stream,
            frame_timeout,
        })
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        match self.pixel_format {
            PixelFormat::Grey => {
                let pixels = (self.width * self.height) as usize;
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                    bus: caps.bus.clone(),
                })
            })
            .collect()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

/// A running capture stream on an open [`Camera`].
pub struct LiveStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    frame_timeout: Duration,
}

fn dequeue_error(e: std::io::Error, frame_timeout: Duration) -> CameraError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        CameraError::Stalled(frame_timeout)
    } else {
        CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
    }
}

impl FrameSource for LiveStream<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let timeout = self.frame_timeout;
        let (buf, meta) = self.stream.next().map_err(|e| dequeue_error(e, timeout))?;
        let sequence = meta.sequence;
        let gray = self.camera.buf_to_grayscale(buf)?;
        let frame = Frame::from_gray(gray, self.camera.width, self.camera.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        Ok(Some(frame))
    }
}
