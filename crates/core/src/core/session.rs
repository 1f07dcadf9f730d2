//! One client's view of a deposition job.
//!
//! [`Session`] is a reducer: it takes one event at a time (connection change,
//! inbound message, timer expiry, user action) and returns the commands the
//! caller must carry out. It never performs I/O or sleeps itself, so the
//! whole download protocol can be driven by hand in tests.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{decode_segment, encode_submission};
use crate::config::{ConfigError, Configuration};
use crate::flow::{FlowStep, SegmentFlow};
use crate::heightmap::HeightMap;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::status::{JobStatus, StatusFacts};
use crate::trajectory::{AnalysisFrame, FrameSink, Trajectory};

/// Named timers. At most one of each kind is pending at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Delay before sending a segment request.
    Debounce,
    /// Re-send the in-flight request in case it or its answer was lost.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTiming {
    pub debounce: Duration,
    pub retry: Duration,
}

impl Default for FlowTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            retry: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(ClientMessage),
    /// Start `timer`, replacing any pending instance.
    Schedule { timer: Timer, after: Duration },
    CancelTimer(Timer),
    /// The job completed and the last frame is ready for analysis.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    Disconnected,
    Text(String),
    Binary(Vec<u8>),
    Timer(Timer),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error("not connected to the server")]
    Disconnected,
    #[error("waiting for the server to answer a previous request")]
    Pending,
    #[error("a job is already running")]
    AlreadyRunning,
    #[error("no job is running")]
    NotRunning,
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error("could not encode submission: {0}")]
    Encode(String),
}

#[derive(Debug, Default)]
pub struct Session {
    timing: FlowTiming,
    connected: bool,
    submit_pending: bool,
    running: bool,
    failed: bool,
    analysis_ready: bool,
    /// A debounce expiry is owed a request.
    debounce_armed: bool,
    analysis: Option<AnalysisFrame>,
    flow: SegmentFlow,
    trajectory: Trajectory,
}

impl Session {
    pub fn new(timing: FlowTiming) -> Self {
        Self {
            timing,
            ..Default::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn flow(&self) -> &SegmentFlow {
        &self.flow
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Attach a sink to the current job. It is released on the next submission.
    pub fn register_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.trajectory.register_sink(sink);
    }

    /// Release the current job's sinks without touching its frames.
    pub fn release_sinks(&mut self) {
        self.trajectory.release_sinks();
    }

    /// Snapshot of the last frame, taken when the job completed.
    pub fn analysis_frame(&self) -> Option<&AnalysisFrame> {
        self.analysis.as_ref()
    }

    /// Height map of the analysis frame. `None` before a job has completed.
    pub fn height_map(&self, bins: usize) -> Option<HeightMap> {
        self.analysis
            .as_ref()
            .and_then(|frame| HeightMap::from_frame(frame, bins))
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::derive(&StatusFacts {
            connected: self.connected,
            submit_pending: self.submit_pending,
            failed: self.failed,
            running: self.running,
            analysis_ready: self.analysis_ready,
            next_segment: self.flow.next_segment(),
            latest: self.flow.latest(),
            total: self.flow.total(),
        })
    }

    pub fn submit(&mut self, config: &Configuration) -> Result<Vec<Command>, SubmitRejection> {
        if !self.connected {
            return Err(SubmitRejection::Disconnected);
        }
        if self.submit_pending {
            return Err(SubmitRejection::Pending);
        }
        if self.running {
            return Err(SubmitRejection::AlreadyRunning);
        }
        config.validate()?;
        let payload =
            encode_submission(config).map_err(|e| SubmitRejection::Encode(e.to_string()))?;

        self.trajectory.clear();
        self.flow.reset();
        self.failed = false;
        self.analysis = None;
        self.analysis_ready = false;
        self.debounce_armed = false;
        self.running = true;
        self.submit_pending = true;
        info!(job = %config.job_name(), "submitting job");

        Ok(vec![
            Command::CancelTimer(Timer::Debounce),
            Command::CancelTimer(Timer::Retry),
            Command::Send(ClientMessage::Submit(payload)),
        ])
    }

    /// Stop the running job. Late segments are dropped from here on.
    pub fn cancel(&mut self) -> Result<Vec<Command>, SubmitRejection> {
        if !self.connected {
            return Err(SubmitRejection::Disconnected);
        }
        if !self.running {
            return Err(SubmitRejection::NotRunning);
        }
        self.submit_pending = true;
        info!(next_segment = self.flow.next_segment(), "cancelling job");
        let mut commands = self.stop();
        commands.push(Command::Send(ClientMessage::Cancel));
        Ok(commands)
    }

    pub fn on_connected(&mut self) -> Vec<Command> {
        self.connected = true;
        info!("connected");
        Vec::new()
    }

    /// Transport loss leaves the download state alone; the retry timer picks it up again.
    pub fn on_disconnected(&mut self) -> Vec<Command> {
        if self.connected {
            warn!(
                next_segment = self.flow.next_segment(),
                waiting = self.flow.waiting(),
                "connection lost"
            );
        }
        self.connected = false;
        Vec::new()
    }

    pub fn on_text(&mut self, text: &str) -> Vec<Command> {
        self.submit_pending = false;
        let message = match ServerMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "discarding malformed message");
                return Vec::new();
            }
        };
        if !self.running {
            if message != ServerMessage::Cancelled {
                debug!(?message, "no job running, ignoring message");
            }
            return Vec::new();
        }

        match message {
            ServerMessage::Queued => {
                info!("job queued");
                Vec::new()
            }
            ServerMessage::NewFrames(availability) => {
                debug!(
                    latest = availability.latest,
                    total = availability.total,
                    "segments available"
                );
                self.flow.announce(availability);
                self.evaluate()
            }
            ServerMessage::SegmentNotReady(id) => {
                if self.flow.not_ready(id) {
                    debug!(segment = id, "segment not ready yet");
                }
                Vec::new()
            }
            ServerMessage::Cancelled => {
                info!("job cancelled by server");
                self.stop()
            }
            ServerMessage::Failed => {
                warn!(frames = self.trajectory.len(), "job failed");
                self.failed = true;
                self.stop()
            }
            ServerMessage::Unknown(text) => {
                warn!(message = %text, "unknown server message");
                Vec::new()
            }
        }
    }

    pub fn on_binary(&mut self, buf: &[u8]) -> Vec<Command> {
        self.submit_pending = false;
        if !self.running {
            debug!(bytes = buf.len(), "no job running, ignoring segment");
            return Vec::new();
        }
        if !self.flow.waiting() {
            warn!(bytes = buf.len(), "segment arrived with no request in flight");
            return Vec::new();
        }
        let segment = match decode_segment(buf) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding undecodable segment");
                return Vec::new();
            }
        };
        if !self.flow.expects(segment.segment_id) {
            warn!(
                got = segment.segment_id,
                expected = self.flow.next_segment(),
                "discarding out-of-order segment"
            );
            return Vec::new();
        }
        let segment_id = segment.segment_id;
        match self.trajectory.append_segment(segment) {
            Ok(frames) => debug!(segment = segment_id, frames, "segment appended"),
            Err(e) => {
                warn!(error = %e, "discarding segment");
                return Vec::new();
            }
        }
        self.flow.segment_received();

        let mut commands = vec![Command::CancelTimer(Timer::Retry)];
        commands.extend(self.evaluate());
        commands
    }

    pub fn on_timer(&mut self, timer: Timer) -> Vec<Command> {
        if !self.running {
            return Vec::new();
        }
        let next = self.flow.next_segment();
        let armed = timer == Timer::Debounce && std::mem::take(&mut self.debounce_armed);
        match timer {
            Timer::Debounce if armed && self.flow.waiting() => {
                debug!(segment = next, "requesting segment");
                vec![Command::Send(ClientMessage::RequestSegment(next))]
            }
            Timer::Debounce => Vec::new(),
            Timer::Retry if self.flow.waiting() => {
                debug!(segment = next, "re-requesting segment");
                vec![
                    Command::Send(ClientMessage::RequestSegment(next)),
                    Command::Schedule {
                        timer: Timer::Retry,
                        after: self.timing.retry,
                    },
                ]
            }
            // Request was answered with `no_seg`; look again.
            Timer::Retry => self.evaluate(),
        }
    }

    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Connected => self.on_connected(),
            Event::Disconnected => self.on_disconnected(),
            Event::Text(text) => self.on_text(&text),
            Event::Binary(buf) => self.on_binary(&buf),
            Event::Timer(timer) => self.on_timer(timer),
        }
    }

    fn stop(&mut self) -> Vec<Command> {
        self.running = false;
        self.debounce_armed = false;
        vec![
            Command::CancelTimer(Timer::Debounce),
            Command::CancelTimer(Timer::Retry),
        ]
    }

    fn evaluate(&mut self) -> Vec<Command> {
        if !self.running {
            return Vec::new();
        }
        match self.flow.evaluate() {
            FlowStep::Idle => Vec::new(),
            FlowStep::Request(_) => {
                self.debounce_armed = true;
                vec![
                    Command::Schedule {
                        timer: Timer::Debounce,
                        after: self.timing.debounce,
                    },
                    Command::Schedule {
                        timer: Timer::Retry,
                        after: self.timing.retry,
                    },
                ]
            }
            FlowStep::Finished => {
                self.analysis = self.trajectory.last_frame();
                self.analysis_ready = true;
                info!(
                    frames = self.trajectory.len(),
                    particles = self.trajectory.particle_count(),
                    "trajectory complete"
                );
                let mut commands = self.stop();
                commands.push(Command::Finished);
                commands
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codec::encode_segment;
    use crate::trajectory::{Frame, Position};

    fn mixture() -> Configuration {
        let mut cfg = Configuration::default();
        cfg.set_ratio("TPD", 1);
        cfg
    }

    fn segment_bytes(id: u32, frames: usize, particles: usize) -> Vec<u8> {
        let species = vec![5u8; particles];
        let frames: Vec<Frame> = (0..frames)
            .map(|f| {
                Frame::new(
                    (0..particles)
                        .map(|p| Position::new(p as f32 * 0.3, id as f32 + f as f32 * 0.1, 0.5))
                        .collect(),
                )
            })
            .collect();
        encode_segment(id, &species, &frames)
    }

    fn running_session() -> Session {
        let mut s = Session::new(FlowTiming::default());
        s.on_connected();
        s.submit(&mixture()).unwrap();
        s.on_text("queued");
        s
    }

    fn sends(commands: &[Command]) -> Vec<ClientMessage> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Send(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn all_zero_mixture_is_never_sent() {
        let mut s = Session::new(FlowTiming::default());
        s.on_connected();
        let cfg = Configuration::default();
        assert_eq!(
            s.submit(&cfg),
            Err(SubmitRejection::Invalid(ConfigError::AllRatiosZero))
        );
        assert!(!s.is_running());
        assert_eq!(s.status(), JobStatus::Idle);
    }

    #[test]
    fn submit_guards() {
        let mut s = Session::new(FlowTiming::default());
        assert_eq!(s.submit(&mixture()), Err(SubmitRejection::Disconnected));
        s.on_connected();
        let commands = s.submit(&mixture()).unwrap();
        assert!(matches!(
            sends(&commands).as_slice(),
            [ClientMessage::Submit(_)]
        ));
        assert_eq!(s.status(), JobStatus::Submitting);
        assert_eq!(s.submit(&mixture()), Err(SubmitRejection::Pending));
        s.on_text("queued");
        assert_eq!(s.status(), JobStatus::Queued);
        assert_eq!(s.submit(&mixture()), Err(SubmitRejection::AlreadyRunning));
    }

    #[test]
    fn full_download_finishes_with_last_frame() {
        let mut s = running_session();
        let mut requested = Vec::new();

        for id in 1..=3u32 {
            let commands = s.on_text(&format!(r#"new_frames{{"l":{id},"f":3}}"#));
            assert!(commands.contains(&Command::Schedule {
                timer: Timer::Debounce,
                after: Duration::from_millis(250)
            }));
            requested.extend(sends(&s.on_timer(Timer::Debounce)));
            let commands = s.on_binary(&segment_bytes(id, 2, 4));
            if id < 3 {
                assert!(!commands.contains(&Command::Finished));
                assert!(s.is_running());
            } else {
                assert!(commands.contains(&Command::Finished));
            }
        }

        assert_eq!(
            requested,
            vec![
                ClientMessage::RequestSegment(1),
                ClientMessage::RequestSegment(2),
                ClientMessage::RequestSegment(3)
            ]
        );
        assert!(!s.is_running());
        assert_eq!(s.status(), JobStatus::Complete);
        assert_eq!(s.trajectory().len(), 6);

        let analysis = s.analysis_frame().unwrap();
        assert!(Arc::ptr_eq(&analysis.frame, s.trajectory().frame(5).unwrap()));
        assert!((analysis.positions()[0].y - 3.1).abs() < 1e-6);
        assert!(s.height_map(4).is_some());
    }

    #[test]
    fn shuffled_announcements_request_in_order() {
        let mut s = running_session();
        let mut requested = Vec::new();
        let mut outstanding = 0;

        for latest in [3u32, 1, 5, 2, 4, 5] {
            s.on_text(&format!(r#"new_frames{{"l":{latest},"f":5}}"#));
            // A second expiry of the same debounce must not produce a second request.
            let mut sent = sends(&s.on_timer(Timer::Debounce));
            sent.extend(sends(&s.on_timer(Timer::Debounce)));
            for m in sent {
                if let ClientMessage::RequestSegment(id) = m {
                    outstanding += 1;
                    assert_eq!(outstanding, 1);
                    requested.push(id);
                    s.on_binary(&segment_bytes(id, 1, 2));
                    outstanding -= 1;
                }
            }
            // A stale duplicate is ignored.
            s.on_binary(&segment_bytes(1, 1, 2));
        }

        assert_eq!(requested, vec![1, 2, 3, 4, 5]);
        assert_eq!(s.status(), JobStatus::Complete);
    }

    #[test]
    fn reconnect_retries_same_segment() {
        let mut s = running_session();
        s.on_text(r#"new_frames{"l":2,"f":4}"#);
        s.on_timer(Timer::Debounce);
        s.on_binary(&segment_bytes(1, 1, 3));
        s.on_timer(Timer::Debounce);
        assert!(s.flow().waiting());
        assert_eq!(s.flow().next_segment(), 2);

        s.handle(Event::Disconnected);
        assert_eq!(s.status(), JobStatus::Disconnected);
        s.handle(Event::Connected);
        assert_eq!(s.flow().next_segment(), 2);
        assert!(s.flow().waiting());

        let commands = s.handle(Event::Timer(Timer::Retry));
        assert_eq!(sends(&commands), vec![ClientMessage::RequestSegment(2)]);
        assert!(commands.contains(&Command::Schedule {
            timer: Timer::Retry,
            after: Duration::from_secs(10)
        }));
    }

    #[test]
    fn unexpected_segments_are_dropped() {
        let mut s = running_session();
        // Nothing requested yet.
        assert!(s.on_binary(&segment_bytes(1, 1, 2)).is_empty());
        s.on_text(r#"new_frames{"l":2,"f":2}"#);
        s.on_timer(Timer::Debounce);
        // Premature, truncated, then the right one.
        s.on_binary(&segment_bytes(2, 1, 2));
        s.on_binary(&segment_bytes(1, 1, 2)[..10]);
        // Header claiming endless frames of nothing.
        let mut bogus = 1u32.to_le_bytes().to_vec();
        bogus.extend_from_slice(&u32::MAX.to_le_bytes());
        bogus.extend_from_slice(&0u32.to_le_bytes());
        assert!(s.on_binary(&bogus).is_empty());
        assert!(s.trajectory().is_empty());
        s.on_binary(&segment_bytes(1, 1, 2));
        assert_eq!(s.trajectory().len(), 1);
        // Particle count changes mid-job: desync, segment discarded.
        s.on_timer(Timer::Debounce);
        s.on_binary(&segment_bytes(2, 1, 3));
        assert_eq!(s.trajectory().len(), 1);
        assert_eq!(s.flow().next_segment(), 2);
    }

    #[test]
    fn not_ready_then_retry_looks_again() {
        let mut s = running_session();
        s.on_text(r#"new_frames{"l":1,"f":3}"#);
        s.on_timer(Timer::Debounce);
        s.on_text("no_seg1");
        assert!(!s.flow().waiting());
        assert!(sends(&s.on_timer(Timer::Debounce)).is_empty());
        let commands = s.on_timer(Timer::Retry);
        assert!(commands.contains(&Command::Schedule {
            timer: Timer::Debounce,
            after: Duration::from_millis(250)
        }));
        assert_eq!(
            sends(&s.on_timer(Timer::Debounce)),
            vec![ClientMessage::RequestSegment(1)]
        );
    }

    #[test]
    fn cancel_stops_and_late_segments_are_rejected() {
        let mut s = running_session();
        s.on_text(r#"new_frames{"l":1,"f":3}"#);
        s.on_timer(Timer::Debounce);
        let commands = s.cancel().unwrap();
        assert_eq!(sends(&commands), vec![ClientMessage::Cancel]);
        assert_eq!(s.status(), JobStatus::Submitting);
        s.on_text("cancel");
        assert_eq!(s.status(), JobStatus::Idle);
        s.on_binary(&segment_bytes(1, 1, 2));
        assert!(s.trajectory().is_empty());
        assert!(s.on_timer(Timer::Retry).is_empty());
        assert_eq!(s.cancel(), Err(SubmitRejection::NotRunning));
    }

    #[test]
    fn failure_keeps_frames_and_resubmit_resets() {
        let mut s = running_session();
        s.on_text(r#"new_frames{"l":1,"f":3}"#);
        s.on_timer(Timer::Debounce);
        s.on_binary(&segment_bytes(1, 2, 2));
        s.on_text("failed");
        assert_eq!(s.status(), JobStatus::Failed);
        assert_eq!(s.trajectory().len(), 2);
        assert!(s.analysis_frame().is_none());
        assert!(s.height_map(4).is_none());

        s.submit(&mixture()).unwrap();
        assert!(s.trajectory().is_empty());
        assert_eq!(s.flow(), &SegmentFlow::new());
        s.on_text("queued");
        assert_eq!(s.status(), JobStatus::Queued);
    }

    #[test]
    fn malformed_text_is_ignored() {
        let mut s = running_session();
        assert!(s.on_text("new_frames{oops").is_empty());
        assert!(s.on_text("mystery").is_empty());
        assert!(s.is_running());
    }
}
