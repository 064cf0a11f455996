//! Start-code delimited bitstream scanning
//!
//! Splits an Annex B byte stream into coded units:
//! - units are delimited by the 4-byte start code `00 00 00 01`
//! - each emitted unit keeps its leading start code
//! - bytes after the last start code are retained until the next chunk
//!   (or [`UnitScanner::flush`]) so start codes split across reads are found

use bytes::{Buf, Bytes, BytesMut};

use crate::types::Codec;

/// Annex B start code.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// H.264 instantaneous decoder refresh slice.
const H264_NAL_IDR: u8 = 5;

/// HEVC IRAP range (BLA_W_LP ..= CRA_NUT).
const HEVC_IRAP: std::ops::RangeInclusive<u8> = 16..=21;

/// Upper bound on retained bytes before the scanner gives up and resyncs.
const MAX_UNIT_BUFFER: usize = 8 * 1024 * 1024;

/// One coded unit, start code included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedUnit {
    pub data: Bytes,
    pub keyframe: bool,
}

/// Whether `unit` (start code included) is a keyframe for `codec`.
pub fn is_keyframe(codec: Codec, unit: &[u8]) -> bool {
    let Some(&header) = unit.get(START_CODE.len()) else {
        return false;
    };
    match codec {
        Codec::H264 => header & 0x1F == H264_NAL_IDR,
        Codec::Hevc => HEVC_IRAP.contains(&((header >> 1) & 0x3F)),
        Codec::Raw => false,
    }
}

fn find_start_code(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(START_CODE.len())
        .position(|w| w == START_CODE)
        .map(|pos| pos + from)
}

/// Incremental start-code scanner.
#[derive(Debug)]
pub struct UnitScanner {
    codec: Codec,
    buffer: BytesMut,
    /// Buffer begins with a start code.
    synced: bool,
    /// Where the next start-code search resumes.
    scan_from: usize,
}

impl UnitScanner {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            synced: false,
            scan_from: START_CODE.len(),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Bytes held back waiting for the next start code.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every unit that is now complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<CodedUnit> {
        self.buffer.extend_from_slice(chunk);
        let mut units = Vec::new();

        if !self.synced {
            match find_start_code(&self.buffer, 0) {
                Some(pos) => {
                    if pos > 0 {
                        tracing::debug!("skipping {} bytes before first start code", pos);
                    }
                    self.buffer.advance(pos);
                    self.synced = true;
                    self.scan_from = START_CODE.len();
                }
                None => {
                    // Keep a possible partial start code at the tail.
                    let keep = self.buffer.len().min(START_CODE.len() - 1);
                    let drop = self.buffer.len() - keep;
                    self.buffer.advance(drop);
                    return units;
                }
            }
        }

        while let Some(next) = find_start_code(&self.buffer, self.scan_from) {
            let data = self.buffer.split_to(next).freeze();
            units.push(self.unit(data));
            self.scan_from = START_CODE.len();
        }

        // Only the unterminated tail counts against the cap.
        if self.buffer.len() > MAX_UNIT_BUFFER {
            tracing::warn!(
                "coded unit exceeded {} bytes without a start code, resetting",
                MAX_UNIT_BUFFER
            );
            self.reset();
            return units;
        }

        self.scan_from = self
            .buffer
            .len()
            .saturating_sub(START_CODE.len() - 1)
            .max(START_CODE.len());
        units
    }

    /// Emit the trailing unit at end of stream.
    pub fn flush(&mut self) -> Option<CodedUnit> {
        let unit = if self.synced && self.buffer.len() > START_CODE.len() {
            let data = self.buffer.split().freeze();
            Some(self.unit(data))
        } else {
            None
        };
        self.reset();
        unit
    }

    fn unit(&self, data: Bytes) -> CodedUnit {
        CodedUnit {
            keyframe: is_keyframe(self.codec, &data),
            data,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.synced = false;
        self.scan_from = START_CODE.len();
    }
}
