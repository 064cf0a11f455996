use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::OutputSink;
use crate::types::FrameData;

/// Appends every delivered buffer to a file, back to back.
///
/// Raw frames produce a headerless video file; coded units produce a
/// playable elementary or transport stream.
pub struct RawFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
}

impl RawFileSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        tracing::info!("Writing captured data to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            frames: 0,
            bytes: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl OutputSink for RawFileSink {
    fn write_frame(&mut self, frame: &FrameData) -> Result<()> {
        self.writer
            .write_all(&frame.data)
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.frames += 1;
        self.bytes += frame.data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        tracing::info!(
            "Wrote {} frames ({} bytes) to {}",
            self.frames,
            self.bytes,
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Codec, FrameFormat};
    use bytes::Bytes;

    #[test]
    fn appends_buffers_in_order() {
        let path = std::env::temp_dir().join(format!("vidcap-raw-{}.bin", std::process::id()));
        let mut sink = RawFileSink::create(&path).unwrap();
        for chunk in [&b"\x00\x00\x00\x01\x67"[..], &b"\x00\x00\x00\x01\x65\xaa"[..]] {
            let frame = FrameData {
                data: Bytes::copy_from_slice(chunk),
                timestamp_us: 0,
                format: FrameFormat::Encoded(Codec::H264),
                width: 640,
                height: 480,
                keyframe: Some(false),
            };
            sink.write_frame(&frame).unwrap();
        }
        sink.finish().unwrap();

        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.bytes(), 11);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"\x00\x00\x00\x01\x67\x00\x00\x00\x01\x65\xaa"
        );
        std::fs::remove_file(&path).unwrap();
    }
}
