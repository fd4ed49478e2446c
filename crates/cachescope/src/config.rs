//! Inspector configuration.

use std::path::PathBuf;

use cachescope_sync::FrameCodec;

/// Default bound on queued dashboard actions.
pub const DEFAULT_ACTION_BUFFER: usize = 64;

/// Default cap on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the [`Inspector`](crate::Inspector).
#[derive(Debug, Clone)]
pub struct InspectorConfig {
    /// SQLite file holding category preferences. `None` keeps them in memory.
    pub preferences_path: Option<PathBuf>,
    /// Encoding of incoming and outgoing frames.
    pub frame_codec: FrameCodec,
    /// Capacity of the dashboard action channel.
    pub action_buffer: usize,
    /// Frames larger than this are rejected unread.
    pub max_frame_bytes: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            preferences_path: None,
            frame_codec: FrameCodec::Json,
            action_buffer: DEFAULT_ACTION_BUFFER,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl InspectorConfig {
    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = Some(path.into());
        self
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.frame_codec = codec;
        self
    }
}
