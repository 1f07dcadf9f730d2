//! On-disk trajectory archive.
//!
//! Layout:
//! - magic `DEPOTRJ1`
//! - version: u32
//! - one LZ4 chunk (see [`storage::write_chunk_lz4`]) per segment, tag `SEGM`,
//!   holding the segment exactly as it came off the wire
//!
//! Unknown chunk tags are skipped. A file that ends between chunks is complete;
//! one that ends inside a chunk is truncated and reported as an error.

use std::io::{self, Read, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::codec::{decode_segment, encode_segment, CodecError, Segment};
use crate::storage;
use crate::trajectory::{Frame, Trajectory, TrajectoryError};

pub const MAGIC: &[u8; 8] = b"DEPOTRJ1";
pub const VERSION: u32 = 1;
const SEGMENT_TAG: [u8; 4] = *b"SEGM";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a trajectory archive")]
    BadMagic,
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),
    #[error("archive I/O: {0}")]
    Io(#[from] io::Error),
    #[error("chunk {chunk}: {source}")]
    Codec {
        chunk: usize,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}

pub struct ArchiveWriter<W: Write> {
    inner: W,
    segments: usize,
}

impl<W: Write> ArchiveWriter<W> {
    /// Write the archive header and return a writer positioned for the first segment.
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(MAGIC)?;
        storage::write_u32_le(&mut inner, VERSION)?;
        Ok(Self { inner, segments: 0 })
    }

    /// Append one segment buffer in wire layout.
    pub fn write_raw(&mut self, segment: &[u8]) -> io::Result<()> {
        storage::write_chunk_lz4(&mut self.inner, SEGMENT_TAG, segment)?;
        self.segments += 1;
        Ok(())
    }

    pub fn write_frames(
        &mut self,
        segment_id: u32,
        species: &[u8],
        frames: &[Arc<Frame>],
    ) -> io::Result<()> {
        self.write_raw(&encode_segment(segment_id, species, frames))
    }

    pub fn segments_written(&self) -> usize {
        self.segments
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads segments back in the order they were written.
pub struct ArchiveReader<R: Read> {
    inner: R,
    chunk: usize,
    done: bool,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(mut inner: R) -> Result<Self, ArchiveError> {
        let magic = storage::read_exact::<8, _>(&mut inner)?;
        if &magic != MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let version = storage::read_u32_le(&mut inner)?;
        if version != VERSION {
            return Err(ArchiveError::UnsupportedVersion(version));
        }
        Ok(Self {
            inner,
            chunk: 0,
            done: false,
        })
    }

    fn next_chunk_header(&mut self) -> Result<Option<([u8; 4], u32)>, ArchiveError> {
        let mut first = [0u8; 1];
        loop {
            match self.inner.read(&mut first) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let rest = storage::read_exact::<3, _>(&mut self.inner)?;
        let len = storage::read_u32_le(&mut self.inner)?;
        Ok(Some(([first[0], rest[0], rest[1], rest[2]], len)))
    }

    fn next_segment(&mut self) -> Result<Option<Segment>, ArchiveError> {
        while let Some((tag, len)) = self.next_chunk_header()? {
            let chunk = self.chunk;
            self.chunk += 1;
            if tag != SEGMENT_TAG {
                io::copy(&mut (&mut self.inner).take(len as u64), &mut io::sink())?;
                continue;
            }
            let body = storage::read_chunk_body_lz4(&mut self.inner, len)?;
            let segment =
                decode_segment(&body).map_err(|source| ArchiveError::Codec { chunk, source })?;
            return Ok(Some(segment));
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for ArchiveReader<R> {
    type Item = Result<Segment, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_segment() {
            Ok(Some(segment)) => Some(Ok(segment)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Rebuild a trajectory from an archive.
pub fn load_trajectory<R: Read>(r: R) -> Result<Trajectory, ArchiveError> {
    let mut trajectory = Trajectory::new();
    for segment in ArchiveReader::new(r)? {
        trajectory.append_segment(segment?)?;
    }
    Ok(trajectory)
}
