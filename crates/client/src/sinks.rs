//! File sinks fed by the trajectory as segments arrive.
//!
//! Sinks cannot fail the download. A write error is logged once and the sink
//! stops writing.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use depoview::archive::ArchiveWriter;
use depoview::species;
use depoview::trajectory::{Frame, FrameSink};
use tracing::{debug, warn};

/// Plain XYZ text, one block per frame, coordinates in Å. The comment line
/// names the frame and its segment.
pub struct XyzSink<W: Write + Send> {
    out: Option<W>,
    frames: usize,
}

impl XyzSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> XyzSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Some(out),
            frames: 0,
        }
    }

    fn write_segment(
        out: &mut W,
        first_frame: usize,
        segment_id: u32,
        species_ids: &[u8],
        frames: &[Arc<Frame>],
    ) -> io::Result<()> {
        for (k, frame) in frames.iter().enumerate() {
            writeln!(out, "{}", species_ids.len())?;
            writeln!(out, "frame {} segment {}", first_frame + k, segment_id)?;
            for (&s, p) in species_ids.iter().zip(frame.positions()) {
                writeln!(
                    out,
                    "{} {:.4} {:.4} {:.4}",
                    species::symbol(s),
                    p.x * 10.0,
                    p.y * 10.0,
                    p.z * 10.0
                )?;
            }
        }
        out.flush()
    }
}

impl<W: Write + Send> FrameSink for XyzSink<W> {
    fn on_segment(&mut self, segment_id: u32, species_ids: &[u8], frames: &[Arc<Frame>]) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        match Self::write_segment(out, self.frames, segment_id, species_ids, frames) {
            Ok(()) => self.frames += frames.len(),
            Err(e) => {
                warn!("XYZ export stopped: {}", e);
                self.out = None;
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(e) = out.flush() {
                warn!("XYZ export flush failed: {}", e);
            }
        }
        debug!(frames = self.frames, "XYZ export closed");
    }
}

/// Writes every received segment to a trajectory archive.
pub struct ArchiveSink<W: Write + Send> {
    writer: Option<ArchiveWriter<W>>,
}

impl ArchiveSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write + Send> ArchiveSink<W> {
    pub fn new(out: W) -> io::Result<Self> {
        Ok(Self {
            writer: Some(ArchiveWriter::new(out)?),
        })
    }
}

impl<W: Write + Send> FrameSink for ArchiveSink<W> {
    fn on_segment(&mut self, segment_id: u32, species_ids: &[u8], frames: &[Arc<Frame>]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = writer
            .write_frames(segment_id, species_ids, frames)
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            warn!("archive stopped at segment {}: {}", segment_id, e);
            self.writer = None;
        }
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("archive flush failed: {}", e);
            }
            debug!(segments = writer.segments_written(), "archive closed");
        }
    }
}
