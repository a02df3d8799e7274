use crate::types::Seconds;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Time reference anchored to the first sample handed to the audio device.
/// Monotonic for the lifetime of one playback.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> Seconds;
}

/// Encoded song as it sits in the beatmap package.
#[derive(Clone, Debug)]
pub struct SongFile {
    pub filename: String,
    pub bytes: Arc<Vec<u8>>,
}

pub trait PlaybackHandle: Send {
    fn clock(&self) -> Arc<dyn PlaybackClock>;
    fn is_finished(&self) -> bool;
    fn stop(self: Box<Self>);
}

pub trait AudioPlaybackPort: Send + Sync {
    fn start(&self, song: &SongFile) -> Result<Box<dyn PlaybackHandle>, AudioError>;
}
