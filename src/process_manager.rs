use std::io::{ErrorKind, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::{setpgid, Pid};

use crate::stacking::WindowStacker;

/// How long a render process may take to exit after its stdin closes before it is signalled.
pub const RETIRE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum ProcessManagerError {
    EmptyCommand,
    Spawn {
        command: String,
        error: std::io::Error,
    },
    MissingStdio {
        command: String,
    },
    InputWrite {
        generation: u64,
        error: std::io::Error,
    },
}

impl std::fmt::Display for ProcessManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessManagerError::EmptyCommand => write!(f, "render command is empty"),
            ProcessManagerError::Spawn { command, error } => {
                write!(f, "failed to spawn render process `{command}`: {error}")
            }
            ProcessManagerError::MissingStdio { command } => {
                write!(f, "render process `{command}` missing stdin pipe")
            }
            ProcessManagerError::InputWrite { generation, error } => write!(
                f,
                "failed writing content to render process #{generation}: {error}"
            ),
        }
    }
}

impl std::error::Error for ProcessManagerError {}

/// Seam between command dispatch and whatever owns the render process.
pub trait RenderSink {
    fn replace(&mut self, argv: &[String], content: &str)
        -> Result<HandleInfo, ProcessManagerError>;
    fn push(&mut self, content: &str) -> Result<(), ProcessManagerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInfo {
    pub generation: u64,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    /// Overlap between a new render process and the one it replaces.
    pub grace_delay: Duration,
    /// Wait before restacking so the new window is mapped.
    pub stack_lead_delay: Duration,
    pub retire_timeout: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(500),
            stack_lead_delay: Duration::from_secs(1),
            retire_timeout: RETIRE_TIMEOUT,
        }
    }
}

/// One spawned render process. Stdin is closed and the child reaped on every exit path.
pub struct RenderProcess {
    generation: u64,
    child: Child,
    stdin: Option<ChildStdin>,
    retire_timeout: Duration,
}

impl RenderProcess {
    fn spawn(
        generation: u64,
        argv: &[String],
        retire_timeout: Duration,
    ) -> Result<Self, ProcessManagerError> {
        let (program, args) = argv.split_first().ok_or(ProcessManagerError::EmptyCommand)?;
        let command = argv.join(" ");
        let mut process = ProcessCommand::new(program);
        process
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        own_process_group(&mut process);
        let mut child = process
            .spawn()
            .map_err(|error| ProcessManagerError::Spawn {
                command: command.clone(),
                error,
            })?;
        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessManagerError::MissingStdio { command });
        };
        Ok(Self {
            generation,
            child,
            stdin: Some(stdin),
            retire_timeout,
        })
    }

    pub fn info(&self) -> HandleInfo {
        HandleInfo {
            generation: self.generation,
            pid: self.child.id(),
        }
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn write(&mut self, content: &str) -> Result<(), ProcessManagerError> {
        let generation = self.generation;
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        // The render process redraws once per input line.
        stdin
            .write_all(content.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|error| ProcessManagerError::InputWrite { generation, error })
    }

    /// Closes stdin, then waits for exit, escalating to SIGTERM past the timeout.
    pub fn retire(mut self) -> String {
        self.release()
    }

    fn release(&mut self) -> String {
        drop(self.stdin.take());
        let deadline = Instant::now() + self.retire_timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return format_exit_diagnostic(status),
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(40));
                }
                Ok(None) => break,
                Err(err) => return format!("wait-error={err}"),
            }
        }
        #[cfg(unix)]
        {
            let _ = signal_process_group(&mut self.child, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        match self.child.wait() {
            Ok(status) => format_exit_diagnostic(status),
            Err(err) => format!("wait-error={err}"),
        }
    }
}

impl Drop for RenderProcess {
    fn drop(&mut self) {
        if self.stdin.is_some() || matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.release();
        }
    }
}

/// Owns the current render process and hot-swaps it on `replace`.
pub struct ProcessSupervisor {
    current: Mutex<Option<RenderProcess>>,
    replace_lock: Mutex<()>,
    generation: AtomicU64,
    timings: SupervisorTimings,
    stacker: Option<Arc<WindowStacker>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    pub fn new(timings: SupervisorTimings, stacker: Option<WindowStacker>) -> Self {
        Self {
            current: Mutex::new(None),
            replace_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            timings,
            stacker: stacker.map(Arc::new),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `argv`, makes it current, feeds it `content`, and schedules the old one's retirement.
    pub fn replace(
        &self,
        argv: &[String],
        content: &str,
    ) -> Result<HandleInfo, ProcessManagerError> {
        let _serial = self
            .replace_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut next = RenderProcess::spawn(generation, argv, self.timings.retire_timeout)?;
        let info = next.info();
        tracing::info!(generation, pid = info.pid, "render process spawned");

        let previous = {
            let mut current = self.lock_current();
            if let Err(err) = next.write(content) {
                tracing::warn!(generation, "initial content write failed: {err}");
            }
            current.replace(next)
        };

        self.prune_background();
        if let Some(previous) = previous {
            self.schedule_retirement(previous);
        }
        if let Some(stacker) = self.stacker.clone() {
            self.schedule_stacking(stacker, generation);
        }
        Ok(info)
    }

    /// Writes `content` to the current process; a no-op when none is running.
    pub fn push(&self, content: &str) -> Result<(), ProcessManagerError> {
        let mut current = self.lock_current();
        match current.as_mut() {
            Some(process) => process.write(content),
            None => Ok(()),
        }
    }

    pub fn current(&self) -> Option<HandleInfo> {
        self.lock_current().as_ref().map(RenderProcess::info)
    }

    pub fn current_is_alive(&self) -> bool {
        self.lock_current()
            .as_mut()
            .is_some_and(RenderProcess::is_alive)
    }

    /// Retires the current process and waits for every retirement and stacking thread.
    pub fn shutdown(&self) {
        let current = self.lock_current().take();
        if let Some(process) = current {
            let generation = process.generation;
            let diagnostic = process.retire();
            tracing::info!(generation, %diagnostic, "render process stopped");
        }
        let handles = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<RenderProcess>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule_retirement(&self, previous: RenderProcess) {
        let grace = self.timings.grace_delay;
        let handle = thread::spawn(move || {
            if !grace.is_zero() {
                thread::sleep(grace);
            }
            let generation = previous.generation;
            let diagnostic = previous.retire();
            tracing::debug!(generation, %diagnostic, "render process retired");
        });
        self.track(handle);
    }

    fn schedule_stacking(&self, stacker: Arc<WindowStacker>, generation: u64) {
        let lead = self.timings.stack_lead_delay;
        let handle = thread::spawn(move || {
            if !lead.is_zero() {
                thread::sleep(lead);
            }
            match stacker.run() {
                Ok(outcome) => tracing::debug!(
                    generation,
                    background = %outcome.background_id,
                    render = %outcome.render_ids.join(","),
                    "render window restacked"
                ),
                Err(err) => tracing::warn!(generation, "window restack failed: {err}"),
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    fn prune_background(&self) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut *background)
            .into_iter()
            .partition(JoinHandle::is_finished);
        *background = running;
        for handle in finished {
            let _ = handle.join();
        }
    }
}

impl RenderSink for ProcessSupervisor {
    fn replace(
        &mut self,
        argv: &[String],
        content: &str,
    ) -> Result<HandleInfo, ProcessManagerError> {
        ProcessSupervisor::replace(self, argv, content)
    }

    fn push(&mut self, content: &str) -> Result<(), ProcessManagerError> {
        ProcessSupervisor::push(self, content)
    }
}

impl RenderSink for &ProcessSupervisor {
    fn replace(
        &mut self,
        argv: &[String],
        content: &str,
    ) -> Result<HandleInfo, ProcessManagerError> {
        ProcessSupervisor::replace(self, argv, content)
    }

    fn push(&mut self, content: &str) -> Result<(), ProcessManagerError> {
        ProcessSupervisor::push(self, content)
    }
}

pub(crate) fn format_exit_diagnostic(status: std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        if let Some(code) = status.code() {
            return format!("exit={code}");
        }
        if let Some(signal) = status.signal() {
            return format!("signal={signal}");
        }
        "exit=unknown".to_owned()
    }
    #[cfg(not(unix))]
    {
        format!("exit={}", status.code().unwrap_or(-1))
    }
}

/// Puts the child in its own process group so shutdown can signal the whole tree.
pub(crate) fn own_process_group(process: &mut ProcessCommand) {
    #[cfg(unix)]
    unsafe {
        process.pre_exec(|| {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|error| std::io::Error::new(ErrorKind::Other, error.to_string()))
        });
    }
    #[cfg(not(unix))]
    let _ = process;
}

#[cfg(unix)]
pub(crate) fn signal_process_group(child: &mut Child, signal: Signal) -> Result<(), nix::Error> {
    let pid = child.id() as i32;
    if pid > 0 {
        kill(Pid::from_raw(-pid), signal)
    } else {
        Ok(())
    }
}
