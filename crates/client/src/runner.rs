//! Drives one job: feeds socket events and timer expiries into the session
//! and carries out the commands it returns.

use std::path::PathBuf;
use std::time::Duration;

use depoview::config::Configuration;
use depoview::heightmap::HeightMap;
use depoview::session::{Command, Event, Session, Timer};
use depoview::status::JobStatus;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::{socket_url, ConnectionConfig, ConnectionHandle, ConnectionManager};
use crate::error::ClientError;
use crate::settings::ClientSettings;
use crate::sinks::{ArchiveSink, XyzSink};

/// How long to wait for the server to acknowledge a cancel after Ctrl-C.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Pending deadlines for the session's two timers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Timers {
    debounce: Option<Instant>,
    retry: Option<Instant>,
}

impl Timers {
    fn slot(&mut self, timer: Timer) -> &mut Option<Instant> {
        match timer {
            Timer::Debounce => &mut self.debounce,
            Timer::Retry => &mut self.retry,
        }
    }

    /// Replaces any pending instance of `timer`.
    pub fn schedule(&mut self, timer: Timer, at: Instant) {
        *self.slot(timer) = Some(at);
    }

    pub fn cancel(&mut self, timer: Timer) {
        *self.slot(timer) = None;
    }

    /// Earliest pending timer.
    pub fn next_due(&self) -> Option<(Timer, Instant)> {
        let d = self.debounce.map(|at| (Timer::Debounce, at));
        let r = self.retry.map(|at| (Timer::Retry, at));
        match (d, r) {
            (Some(d), Some(r)) => Some(if r.1 < d.1 { r } else { d }),
            (d, r) => d.or(r),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub bins: usize,
    pub xyz: Option<PathBuf>,
    pub archive: Option<PathBuf>,
}

#[derive(Debug)]
pub enum JobOutcome {
    /// All segments received. `None` when the final frame has nothing to analyse.
    Completed(Option<HeightMap>),
    Cancelled,
}

struct Runner {
    session: Session,
    timers: Timers,
    connection: ConnectionHandle,
    finished: bool,
}

impl Runner {
    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Send(message) => self.connection.send(message),
                Command::Schedule { timer, after } => {
                    self.timers.schedule(timer, Instant::now() + after)
                }
                Command::CancelTimer(timer) => self.timers.cancel(timer),
                Command::Finished => self.finished = true,
            }
        }
    }

    fn submit(&mut self, config: &Configuration, options: &JobOptions) -> Result<(), ClientError> {
        let commands = self.session.submit(config)?;
        // Sinks belong to this job; the submit above released the previous job's.
        if let Some(path) = &options.archive {
            self.session.register_sink(Box::new(ArchiveSink::create(path)?));
            info!("archiving to {}", path.display());
        }
        if let Some(path) = &options.xyz {
            self.session.register_sink(Box::new(XyzSink::create(path)?));
            info!("exporting XYZ to {}", path.display());
        }
        self.apply(commands);
        Ok(())
    }
}

/// Connect, submit `config` once connected, and stream the trajectory until the
/// job completes, fails or is cancelled with Ctrl-C.
pub async fn run_job(
    settings: &ClientSettings,
    config: &Configuration,
    options: &JobOptions,
) -> Result<JobOutcome, ClientError> {
    config.validate()?;
    let url = socket_url(&settings.server_url()?)?;

    let shutdown = CancellationToken::new();
    let _stop_connection = shutdown.clone().drop_guard();
    let (events_tx, mut events) = mpsc::channel(64);
    let (connection, task) = ConnectionManager::spawn(
        ConnectionConfig {
            url,
            token: settings.token.clone(),
            reconnect_interval: settings.reconnect_interval(),
        },
        events_tx,
        shutdown.clone(),
    );

    let mut runner = Runner {
        session: Session::new(settings.flow_timing()),
        timers: Timers::default(),
        connection,
        finished: false,
    };
    let mut submitted = false;
    let mut interrupted = false;
    let mut cancel_deadline: Option<Instant> = None;
    let mut last_status = runner.session.status();
    info!("status: {}", last_status);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        let due = runner.timers.next_due();
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("connection task ended");
                    break JobOutcome::Cancelled;
                };
                let connected = event == Event::Connected;
                let commands = runner.session.handle(event);
                runner.apply(commands);
                if connected && !submitted {
                    runner.submit(config, options)?;
                    submitted = true;
                }
            }
            _ = sleep_until(due.map(|(_, at)| at).unwrap_or_else(Instant::now)), if due.is_some() => {
                if let Some((timer, _)) = due {
                    runner.timers.cancel(timer);
                    let commands = runner.session.on_timer(timer);
                    runner.apply(commands);
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match runner.session.cancel() {
                    Ok(commands) => {
                        runner.apply(commands);
                        cancel_deadline = Some(Instant::now() + CANCEL_GRACE);
                    }
                    Err(e) => {
                        info!("interrupted ({})", e);
                        break JobOutcome::Cancelled;
                    }
                }
            }
            _ = sleep_until(cancel_deadline.unwrap_or_else(Instant::now)), if cancel_deadline.is_some() => {
                warn!("no cancel acknowledgement from the server");
                break JobOutcome::Cancelled;
            }
        }

        let status = runner.session.status();
        if status != last_status {
            info!("status: {}", status);
            last_status = status;
        }

        if runner.finished {
            break JobOutcome::Completed(runner.session.height_map(options.bins));
        }
        if submitted && !runner.session.is_running() && status != JobStatus::Submitting {
            if status == JobStatus::Failed {
                runner.session.release_sinks();
                return Err(ClientError::JobFailed);
            }
            if status != JobStatus::Disconnected {
                break JobOutcome::Cancelled;
            }
        }
    };

    runner.session.release_sinks();
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_replace_and_order() {
        let now = Instant::now();
        let mut t = Timers::default();
        assert_eq!(t.next_due(), None);

        t.schedule(Timer::Retry, now + Duration::from_secs(10));
        t.schedule(Timer::Debounce, now + Duration::from_millis(250));
        assert_eq!(
            t.next_due(),
            Some((Timer::Debounce, now + Duration::from_millis(250)))
        );

        // Rescheduling replaces rather than stacking.
        t.schedule(Timer::Debounce, now + Duration::from_secs(20));
        assert_eq!(
            t.next_due(),
            Some((Timer::Retry, now + Duration::from_secs(10)))
        );

        t.cancel(Timer::Retry);
        assert_eq!(t.next_due().map(|(timer, _)| timer), Some(Timer::Debounce));
        t.cancel(Timer::Debounce);
        assert_eq!(t, Timers::default());
    }
}
