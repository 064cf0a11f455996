mod raw_file;
mod snapshot;

pub use raw_file::RawFileSink;
pub use snapshot::{frame_to_rgb, SnapshotSink};

use anyhow::Result;

use crate::types::FrameData;

/// Consumer of delivered frames.
pub trait OutputSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &FrameData) -> Result<()>;

    /// Flush anything buffered. Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
