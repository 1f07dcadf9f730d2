//! Binary trajectory segments.
//!
//! One segment packs several frames of a deposition cycle. All integers and
//! floats are little endian, no padding:
//! - {segment_id: u32}
//! - {frame_count: u32}
//! - {particle_count: u32}
//! - [particle_count x {species: u8}]
//! - [frame_count x [particle_count x {x: f32}{y: f32}{z: f32}]]
//!
//! Positions are stored in simulation axes. Decoding rotates them into
//! renderer axes, `(sx, sy, sz) -> (sy, sz, sx)`, so that y is up.

use thiserror::Error;

use crate::config::Configuration;
use crate::storage::{f32_at, u32_at};
use crate::trajectory::{Frame, Position};

pub const SEGMENT_HEADER_LEN: usize = 12;
/// Bytes per particle per frame.
pub const POSITION_STRIDE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("segment buffer holds {len} bytes, header needs {SEGMENT_HEADER_LEN}")]
    TruncatedHeader { len: usize },
    #[error("segment {segment_id} needs {expected} bytes, buffer holds {actual}")]
    TruncatedPayload {
        segment_id: u32,
        expected: usize,
        actual: usize,
    },
    #[error("segment {segment_id} declares a payload too large to address")]
    Overflow { segment_id: u32 },
    #[error("segment {segment_id} declares {frame_count} frames of zero particles")]
    EmptyFrames { segment_id: u32, frame_count: u32 },
}

/// A decoded segment: the job's species and this segment's frames, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub segment_id: u32,
    pub species: Vec<u8>,
    pub frames: Vec<Frame>,
}

impl Segment {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn particle_count(&self) -> usize {
        self.species.len()
    }
}

/// Fixed header of a segment buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_id: u32,
    pub frame_count: u32,
    pub particle_count: u32,
}

impl SegmentHeader {
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let truncated = || CodecError::TruncatedHeader { len: buf.len() };
        Ok(Self {
            segment_id: u32_at(buf, 0).ok_or_else(truncated)?,
            frame_count: u32_at(buf, 4).ok_or_else(truncated)?,
            particle_count: u32_at(buf, 8).ok_or_else(truncated)?,
        })
    }

    /// Total bytes the header declares, header included.
    pub fn encoded_len(&self) -> Option<usize> {
        let particles = self.particle_count as usize;
        let positions = (self.frame_count as usize)
            .checked_mul(particles)?
            .checked_mul(POSITION_STRIDE)?;
        SEGMENT_HEADER_LEN
            .checked_add(particles)?
            .checked_add(positions)
    }
}

/// Decode one segment buffer.
///
/// Bytes past the declared payload are ignored.
pub fn decode_segment(buf: &[u8]) -> Result<Segment, CodecError> {
    let header = SegmentHeader::read(buf)?;
    let segment_id = header.segment_id;
    if header.particle_count == 0 && header.frame_count > 0 {
        return Err(CodecError::EmptyFrames {
            segment_id,
            frame_count: header.frame_count,
        });
    }
    let expected = header
        .encoded_len()
        .ok_or(CodecError::Overflow { segment_id })?;
    if buf.len() < expected {
        return Err(CodecError::TruncatedPayload {
            segment_id,
            expected,
            actual: buf.len(),
        });
    }

    let particles = header.particle_count as usize;
    let species = buf[SEGMENT_HEADER_LEN..SEGMENT_HEADER_LEN + particles].to_vec();

    let mut offset = SEGMENT_HEADER_LEN + particles;
    // Never reserve more frames than the buffer can actually hold.
    let present = (buf.len() - offset) / (particles * POSITION_STRIDE).max(1);
    let mut frames = Vec::with_capacity((header.frame_count as usize).min(present));
    for _ in 0..header.frame_count {
        let mut positions = Vec::with_capacity(particles);
        for p in 0..particles {
            let at = offset + p * POSITION_STRIDE;
            // Length was checked above, so every read is in range.
            let sx = f32_at(buf, at).unwrap_or_default();
            let sy = f32_at(buf, at + 4).unwrap_or_default();
            let sz = f32_at(buf, at + 8).unwrap_or_default();
            positions.push(Position::new(sy, sz, sx));
        }
        frames.push(Frame::new(positions));
        offset += particles * POSITION_STRIDE;
    }

    Ok(Segment {
        segment_id,
        species,
        frames,
    })
}

/// Encode frames given in renderer axes back into the wire layout.
///
/// Inverse of [`decode_segment`]: `(x, y, z)` is stored as `(z, x, y)`.
/// Frames with fewer positions than `species` are padded with the origin.
pub fn encode_segment<F: AsRef<Frame>>(segment_id: u32, species: &[u8], frames: &[F]) -> Vec<u8> {
    let particles = species.len();
    let mut out = Vec::with_capacity(
        SEGMENT_HEADER_LEN + particles + frames.len() * particles * POSITION_STRIDE,
    );
    out.extend_from_slice(&segment_id.to_le_bytes());
    out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    out.extend_from_slice(&(particles as u32).to_le_bytes());
    out.extend_from_slice(species);
    for frame in frames {
        let positions = frame.as_ref().positions();
        for p in 0..particles {
            let pos = positions.get(p).copied().unwrap_or_default();
            out.extend_from_slice(&pos.z.to_le_bytes());
            out.extend_from_slice(&pos.x.to_le_bytes());
            out.extend_from_slice(&pos.y.to_le_bytes());
        }
    }
    out
}

/// Serialise a submission for the server. Text only; no binary framing on this direction.
pub fn encode_submission(config: &Configuration) -> Result<String, serde_json::Error> {
    serde_json::to_string(&config.submission())
}

impl AsRef<Frame> for Frame {
    fn as_ref(&self) -> &Frame {
        self
    }
}
