use std::io::{BufRead, BufReader};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::Signal;

use crate::process_manager::{format_exit_diagnostic, own_process_group};
#[cfg(unix)]
use crate::process_manager::signal_process_group;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    pub interval: Duration,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactiveJob {
    pub trigger: Vec<String>,
    pub response: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Periodic(PeriodicJob),
    Reactive(ReactiveJob),
}

impl Job {
    pub fn label(&self) -> String {
        match self {
            Job::Periodic(job) => format!(
                "every {}s: {}",
                job.interval.as_secs(),
                job.command.join(" ")
            ),
            Job::Reactive(job) => format!(
                "on `{}`: {}",
                job.trigger.join(" "),
                job.response.join(" ")
            ),
        }
    }
}

#[derive(Debug)]
pub enum JobError {
    EmptyCommand,
    Spawn {
        command: String,
        error: std::io::Error,
    },
    MissingStdout {
        command: String,
    },
    Read {
        command: String,
        error: std::io::Error,
    },
    TriggerClosed {
        command: String,
    },
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::EmptyCommand => write!(f, "job command is empty"),
            JobError::Spawn { command, error } => {
                write!(f, "failed to spawn `{command}`: {error}")
            }
            JobError::MissingStdout { command } => {
                write!(f, "trigger `{command}` missing stdout pipe")
            }
            JobError::Read { command, error } => {
                write!(f, "failed reading trigger `{command}`: {error}")
            }
            JobError::TriggerClosed { command } => {
                write!(f, "trigger `{command}` closed its output")
            }
        }
    }
}

impl std::error::Error for JobError {}

#[derive(Debug)]
pub enum JobEventKind {
    Started,
    Fired,
    Failed(JobError),
    Stopped,
}

#[derive(Debug)]
pub struct JobEvent {
    pub job: usize,
    pub label: String,
    pub kind: JobEventKind,
}

/// Cooperative stop flag whose waits wake as soon as a stop is requested.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        wake.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `true` if a stop was requested before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (guard, _) = wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}

/// Sleep source for periodic jobs.
pub trait Clock: Send + Sync {
    /// Sleeps for `duration`; returns `false` if the job should stop instead.
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool {
        !shutdown.wait_timeout(duration)
    }
}

const TRIGGER_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

type TriggerRegistry = Arc<Mutex<Vec<(usize, Child)>>>;

/// Runs every configured job on its own thread until shutdown.
///
/// Periodic cadence is `interval + spawn time`, not a wall-clock schedule, and
/// reactive responses are never queued or bounded: each trigger line spawns a
/// new response even if earlier ones are still running.
pub struct JobScheduler {
    shutdown: Shutdown,
    workers: Vec<JoinHandle<()>>,
    triggers: TriggerRegistry,
    events_rx: Option<Receiver<JobEvent>>,
    stop_timeout: Duration,
}

impl JobScheduler {
    pub fn start(jobs: Vec<Job>, clock: Arc<dyn Clock>) -> Self {
        Self::start_with_shutdown(jobs, clock, Shutdown::new())
    }

    pub fn start_with_shutdown(jobs: Vec<Job>, clock: Arc<dyn Clock>, shutdown: Shutdown) -> Self {
        let (events_tx, events_rx) = mpsc::channel::<JobEvent>();
        let triggers: TriggerRegistry = Arc::new(Mutex::new(Vec::new()));
        let mut workers = Vec::with_capacity(jobs.len());

        for (index, job) in jobs.into_iter().enumerate() {
            let reporter = Reporter {
                job: index,
                label: job.label(),
                tx: events_tx.clone(),
            };
            let shutdown = shutdown.clone();
            let worker = match job {
                Job::Periodic(job) => {
                    let clock = clock.clone();
                    thread::spawn(move || run_periodic(job, clock.as_ref(), &shutdown, &reporter))
                }
                Job::Reactive(job) => {
                    let triggers = triggers.clone();
                    thread::spawn(move || run_reactive(job, &triggers, &shutdown, &reporter))
                }
            };
            workers.push(worker);
        }

        Self {
            shutdown,
            workers,
            triggers,
            events_rx: Some(events_rx),
            stop_timeout: Duration::from_secs(2),
        }
    }

    pub fn shutdown_token(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn job_count(&self) -> usize {
        self.workers.len()
    }

    /// Hands the event stream to a single consumer.
    pub fn take_events(&mut self) -> Option<Receiver<JobEvent>> {
        self.events_rx.take()
    }

    pub fn next_event_timeout(&self, timeout: Duration) -> Option<JobEvent> {
        self.events_rx.as_ref()?.recv_timeout(timeout).ok()
    }

    /// Stops every job: wakes sleepers, terminates triggers, and joins all threads.
    pub fn shutdown(mut self) {
        self.shutdown.request();
        self.terminate_triggers();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn terminate_triggers(&self) {
        let mut triggers = self
            .triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, child) in triggers.iter_mut() {
            #[cfg(unix)]
            {
                let _ = signal_process_group(child, Signal::SIGTERM);
            }
            #[cfg(not(unix))]
            {
                let _ = child.kill();
            }
        }

        let deadline = Instant::now() + self.stop_timeout;
        while Instant::now() < deadline {
            let all_exited = triggers
                .iter_mut()
                .all(|(_, child)| child.try_wait().ok().flatten().is_some());
            if all_exited {
                return;
            }
            thread::sleep(Duration::from_millis(40));
        }
        for (job, child) in triggers.iter_mut() {
            if child.try_wait().ok().flatten().is_none() {
                tracing::warn!(job = *job, "trigger ignored SIGTERM; killing");
                #[cfg(unix)]
                {
                    let _ = signal_process_group(child, Signal::SIGKILL);
                }
                #[cfg(not(unix))]
                {
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
        }
    }
}

struct Reporter {
    job: usize,
    label: String,
    tx: Sender<JobEvent>,
}

impl Reporter {
    fn send(&self, kind: JobEventKind) {
        let _ = self.tx.send(JobEvent {
            job: self.job,
            label: self.label.clone(),
            kind,
        });
    }
}

fn run_periodic(job: PeriodicJob, clock: &dyn Clock, shutdown: &Shutdown, reporter: &Reporter) {
    reporter.send(JobEventKind::Started);
    while !shutdown.is_requested() {
        if let Err(err) = spawn_detached(&job.command) {
            reporter.send(JobEventKind::Failed(err));
            return;
        }
        reporter.send(JobEventKind::Fired);
        if !clock.sleep(job.interval, shutdown) {
            break;
        }
    }
    reporter.send(JobEventKind::Stopped);
}

fn run_reactive(
    job: ReactiveJob,
    triggers: &TriggerRegistry,
    shutdown: &Shutdown,
    reporter: &Reporter,
) {
    reporter.send(JobEventKind::Started);
    let trigger_command = job.trigger.join(" ");
    let stdout = {
        let mut child = match spawn_trigger(&job.trigger) {
            Ok(child) => child,
            Err(err) => {
                reporter.send(JobEventKind::Failed(err));
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            reporter.send(JobEventKind::Failed(JobError::MissingStdout {
                command: trigger_command,
            }));
            return;
        };
        let mut registry = triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if shutdown.is_requested() {
            #[cfg(unix)]
            {
                let _ = signal_process_group(&mut child, Signal::SIGTERM);
            }
            let _ = child.kill();
            let _ = child.wait();
            reporter.send(JobEventKind::Stopped);
            return;
        }
        registry.push((reporter.job, child));
        stdout
    };

    let mut reader = BufReader::new(stdout);
    match react(&job, &trigger_command, &mut reader, shutdown, reporter) {
        Some(err) => {
            release_trigger(triggers, reporter.job);
            reporter.send(JobEventKind::Failed(err));
        }
        None => reporter.send(JobEventKind::Stopped),
    }
}

/// Fires the response once up front and once per trigger line. `None` means shutdown.
fn react(
    job: &ReactiveJob,
    trigger_command: &str,
    reader: &mut impl BufRead,
    shutdown: &Shutdown,
    reporter: &Reporter,
) -> Option<JobError> {
    let mut line = String::new();
    while !shutdown.is_requested() {
        if let Err(err) = spawn_detached(&job.response) {
            return Some(err);
        }
        reporter.send(JobEventKind::Fired);

        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) if shutdown.is_requested() => break,
            Ok(0) => {
                return Some(JobError::TriggerClosed {
                    command: trigger_command.to_owned(),
                })
            }
            Ok(_) => {}
            Err(_) if shutdown.is_requested() => break,
            Err(error) => {
                return Some(JobError::Read {
                    command: trigger_command.to_owned(),
                    error,
                })
            }
        }
    }
    None
}

/// Drops a finished task's trigger from the registry and reaps it.
fn release_trigger(triggers: &TriggerRegistry, job: usize) {
    let released = {
        let mut registry = triggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry
            .iter()
            .position(|(id, _)| *id == job)
            .map(|index| registry.swap_remove(index).1)
    };
    let Some(mut child) = released else {
        return;
    };
    if matches!(child.try_wait(), Ok(None)) {
        #[cfg(unix)]
        {
            let _ = signal_process_group(&mut child, Signal::SIGTERM);
        }
        let deadline = Instant::now() + TRIGGER_RELEASE_TIMEOUT;
        while matches!(child.try_wait(), Ok(None)) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(40));
        }
        let _ = child.kill();
    }
    match child.wait() {
        Ok(status) => tracing::debug!(job, "trigger reaped: {}", format_exit_diagnostic(status)),
        Err(err) => tracing::warn!(job, "failed to reap trigger: {err}"),
    }
}

fn spawn_trigger(argv: &[String]) -> Result<Child, JobError> {
    let (program, args) = argv.split_first().ok_or(JobError::EmptyCommand)?;
    let mut process = ProcessCommand::new(program);
    process
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    own_process_group(&mut process);
    process.spawn().map_err(|error| JobError::Spawn {
        command: argv.join(" "),
        error,
    })
}

/// Starts `argv` without waiting on it; a reaper thread collects the exit status.
fn spawn_detached(argv: &[String]) -> Result<(), JobError> {
    let (program, args) = argv.split_first().ok_or(JobError::EmptyCommand)?;
    let mut child = ProcessCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|error| JobError::Spawn {
            command: argv.join(" "),
            error,
        })?;
    thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

#[cfg(test)]
#[path = "tests/jobs_tests.rs"]
mod tests;
