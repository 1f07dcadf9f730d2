//! The accumulated frames of the active job.
//!
//! Frames are appended one segment at a time and never mutated afterwards.
//! Readers that need a frame beyond the next reset take an [`AnalysisFrame`],
//! which shares the frame and species data instead of borrowing the trajectory.

use std::sync::Arc;

use thiserror::Error;

use crate::codec::Segment;

/// One particle position in renderer axes (y is up).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// One timestep: a position per particle, aligned by index with the job's species.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    positions: Vec<Position>,
}

impl Frame {
    pub fn new(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A frame detached from the trajectory, together with the species it indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisFrame {
    pub species: Arc<[u8]>,
    pub frame: Arc<Frame>,
}

impl AnalysisFrame {
    pub fn positions(&self) -> &[Position] {
        self.frame.positions()
    }
}

/// Consumer of decoded frames holding per-job resources (an exporter, a renderer buffer).
pub trait FrameSink: Send {
    fn on_segment(&mut self, segment_id: u32, species: &[u8], frames: &[Arc<Frame>]);

    /// Free everything held for the current job. Called once, on trajectory reset.
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrajectoryError {
    #[error("segment {segment_id} carries {got} particles, job has {expected}")]
    ParticleCountMismatch {
        segment_id: u32,
        expected: usize,
        got: usize,
    },
    #[error("segment {segment_id} species differ from the job's species")]
    SpeciesMismatch { segment_id: u32 },
}

#[derive(Default)]
pub struct Trajectory {
    species: Option<Arc<[u8]>>,
    frames: Vec<Arc<Frame>>,
    sinks: Vec<Box<dyn FrameSink>>,
}

impl std::fmt::Debug for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trajectory")
            .field("particles", &self.particle_count())
            .field("frames", &self.frames.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames received so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn particle_count(&self) -> usize {
        self.species.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    pub fn species(&self) -> Option<&Arc<[u8]>> {
        self.species.as_ref()
    }

    pub fn frame(&self, index: usize) -> Option<&Arc<Frame>> {
        self.frames.get(index)
    }

    pub fn register_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Append every frame of `segment`. Returns the number of frames added.
    ///
    /// The first segment fixes the job's species; later segments must match it.
    pub fn append_segment(&mut self, segment: Segment) -> Result<usize, TrajectoryError> {
        let Segment {
            segment_id,
            species,
            frames,
        } = segment;

        let species = match &self.species {
            Some(job_species) => {
                if job_species.len() != species.len() {
                    return Err(TrajectoryError::ParticleCountMismatch {
                        segment_id,
                        expected: job_species.len(),
                        got: species.len(),
                    });
                }
                if job_species.as_ref() != species.as_slice() {
                    return Err(TrajectoryError::SpeciesMismatch { segment_id });
                }
                Arc::clone(job_species)
            }
            None => {
                let species: Arc<[u8]> = species.into();
                self.species = Some(Arc::clone(&species));
                species
            }
        };

        let start = self.frames.len();
        self.frames.extend(frames.into_iter().map(Arc::new));
        let added = &self.frames[start..];
        for sink in &mut self.sinks {
            sink.on_segment(segment_id, &species, added);
        }
        Ok(added.len())
    }

    /// Snapshot of the most recent frame, if any.
    pub fn last_frame(&self) -> Option<AnalysisFrame> {
        let frame = self.frames.last()?;
        let species = self.species.as_ref()?;
        Some(AnalysisFrame {
            species: Arc::clone(species),
            frame: Arc::clone(frame),
        })
    }

    /// Release and drop every registered sink, keeping the frames.
    pub fn release_sinks(&mut self) {
        for mut sink in self.sinks.drain(..) {
            sink.release();
        }
    }

    /// Drop all frames and release every registered sink.
    pub fn clear(&mut self) {
        self.release_sinks();
        self.frames.clear();
        self.species = None;
    }
}
