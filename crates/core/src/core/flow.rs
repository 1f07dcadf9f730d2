//! Sequential pull of trajectory segments.
//!
//! Segments are requested one at a time, in id order starting at 1. `waiting`
//! is set while a request is scheduled or outstanding and guards against a
//! second concurrent request.

use crate::protocol::Availability;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    /// Nothing to do until the next announcement or segment.
    Idle,
    /// A request for this segment should go out after the debounce delay.
    Request(u32),
    /// Every segment of a completed job has been received.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFlow {
    next_segment: u32,
    latest: u32,
    total: u32,
    waiting: bool,
    job_complete: bool,
}

impl Default for SegmentFlow {
    fn default() -> Self {
        Self {
            next_segment: 1,
            latest: 0,
            total: 0,
            waiting: false,
            job_complete: false,
        }
    }
}

impl SegmentFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn next_segment(&self) -> u32 {
        self.next_segment
    }

    pub fn latest(&self) -> u32 {
        self.latest
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn waiting(&self) -> bool {
        self.waiting
    }

    pub fn job_complete(&self) -> bool {
        self.job_complete
    }

    /// Record a `new_frames` announcement. Announcements never move `latest` backwards.
    pub fn announce(&mut self, availability: Availability) {
        self.total = availability.total;
        self.latest = self.latest.max(availability.latest);
        if availability.latest == availability.total {
            self.job_complete = true;
        }
    }

    /// Whether a segment with this id is the one in flight.
    pub fn expects(&self, segment_id: u32) -> bool {
        self.waiting && segment_id == self.next_segment
    }

    /// The expected segment was appended to the trajectory.
    pub fn segment_received(&mut self) {
        self.waiting = false;
        self.next_segment = self.next_segment.saturating_add(1);
    }

    /// The server does not have `segment_id` yet. Returns whether the in-flight request was cleared.
    pub fn not_ready(&mut self, segment_id: u32) -> bool {
        if segment_id == self.next_segment && self.waiting {
            self.waiting = false;
            return true;
        }
        false
    }

    /// Decide what to do next. Sets `waiting` when it asks for a request.
    pub fn evaluate(&mut self) -> FlowStep {
        if !self.waiting && self.next_segment <= self.latest {
            self.waiting = true;
            FlowStep::Request(self.next_segment)
        } else if self.next_segment > self.latest {
            self.waiting = false;
            if self.job_complete {
                FlowStep::Finished
            } else {
                FlowStep::Idle
            }
        } else {
            FlowStep::Idle
        }
    }
}
