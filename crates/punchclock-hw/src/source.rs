//! Frame sources: the capability the orchestrator pulls frames from.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::collections::VecDeque;
use std::path::Path;

/// Image file extensions accepted by [`ReplaySource::from_dir`].
const REPLAY_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "pgm", "bmp"];

/// Anything that yields frames one at a time.
///
/// `Ok(None)` is end of stream. Errors are device faults and end the session.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        (**self).next_frame()
    }
}

/// A recorded frame sequence, replayed in order.
pub struct ReplaySource {
    frames: VecDeque<Frame>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Load every image in `dir`, ordered by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Replay(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| REPLAY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = VecDeque::with_capacity(paths.len());
        for (seq, path) in paths.iter().enumerate() {
            let img = image::open(path)
                .map_err(|e| CameraError::Replay(format!("{}: {e}", path.display())))?;
            frames.push_back(Frame::from_image(&img, seq as u32));
        }
        tracing::debug!(dir = %dir.display(), frames = frames.len(), "loaded replay sequence");
        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        Ok(self.frames.pop_front())
    }
}
