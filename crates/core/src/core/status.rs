//! User-facing job status, derived from session state on demand.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Disconnected,
    Submitting,
    Failed,
    Queued,
    /// The server is simulating step `step` of `total`.
    Running { step: u32, total: u32 },
    /// Simulation finished, segment `next` of `total` still to fetch.
    Downloading { next: u32, total: u32 },
    Complete,
    Idle,
}

/// Inputs to [`JobStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFacts {
    pub connected: bool,
    pub submit_pending: bool,
    pub failed: bool,
    pub running: bool,
    pub analysis_ready: bool,
    pub next_segment: u32,
    pub latest: u32,
    pub total: u32,
}

impl JobStatus {
    /// First matching rule wins.
    pub fn derive(f: &StatusFacts) -> Self {
        if !f.connected {
            Self::Disconnected
        } else if f.submit_pending {
            Self::Submitting
        } else if f.failed {
            Self::Failed
        } else if f.running {
            if f.total == 0 {
                Self::Queued
            } else if f.latest < f.total {
                Self::Running {
                    step: f.latest + 1,
                    total: f.total,
                }
            } else {
                Self::Downloading {
                    next: f.next_segment,
                    total: f.total,
                }
            }
        } else if f.analysis_ready {
            Self::Complete
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Submitting => write!(f, "Submitting"),
            Self::Failed => write!(f, "Failed!"),
            Self::Queued => write!(f, "In Queue"),
            Self::Running { step, total } => write!(f, "Running step {step} of {total}"),
            Self::Downloading { next, total } => {
                write!(f, "Complete (downloading segment {next} of {total})")
            }
            Self::Complete => write!(f, "Complete"),
            Self::Idle => write!(f, "Idle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> StatusFacts {
        StatusFacts {
            connected: true,
            next_segment: 1,
            ..Default::default()
        }
    }

    #[test]
    fn disconnected_beats_everything() {
        let f = StatusFacts {
            connected: false,
            submit_pending: true,
            failed: true,
            running: true,
            ..connected()
        };
        assert_eq!(JobStatus::derive(&f), JobStatus::Disconnected);
    }

    #[test]
    fn pending_then_failed() {
        let mut f = StatusFacts {
            submit_pending: true,
            failed: true,
            ..connected()
        };
        assert_eq!(JobStatus::derive(&f), JobStatus::Submitting);
        f.submit_pending = false;
        assert_eq!(JobStatus::derive(&f), JobStatus::Failed);
    }

    #[test]
    fn running_phases() {
        let mut f = StatusFacts {
            running: true,
            ..connected()
        };
        assert_eq!(JobStatus::derive(&f), JobStatus::Queued);
        f.total = 5;
        f.latest = 2;
        assert_eq!(JobStatus::derive(&f), JobStatus::Running { step: 3, total: 5 });
        assert_eq!(JobStatus::derive(&f).to_string(), "Running step 3 of 5");
        f.latest = 5;
        f.next_segment = 4;
        assert_eq!(
            JobStatus::derive(&f),
            JobStatus::Downloading { next: 4, total: 5 }
        );
    }

    #[test]
    fn complete_and_idle() {
        let mut f = connected();
        assert_eq!(JobStatus::derive(&f), JobStatus::Idle);
        f.analysis_ready = true;
        assert_eq!(JobStatus::derive(&f), JobStatus::Complete);
    }
}
