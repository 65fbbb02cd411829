use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::config::{Config, ConfigError};
use crate::dispatch::{CommandDispatcher, DispatchError, Effect};
use crate::jobs::{JobEvent, JobEventKind, JobScheduler, Shutdown, SystemClock};
use crate::process_manager::ProcessSupervisor;
use crate::state::RenderTarget;
use crate::transport::{CommandServer, Control, TransportError};

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Transport(TransportError),
    Startup(DispatchError),
    Render(DispatchError),
    Signals(std::io::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "{err}"),
            AppError::Transport(err) => write!(f, "{err}"),
            AppError::Startup(err) => write!(f, "initial render failed: {err}"),
            AppError::Render(err) => write!(f, "render process failed: {err}"),
            AppError::Signals(err) => write!(f, "failed to install signal handlers: {err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TransportError> for AppError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// The running supervisor: owns the render state and every background thread.
pub struct App {
    target: RenderTarget,
    dispatcher: CommandDispatcher,
    supervisor: ProcessSupervisor,
    scheduler: Option<JobScheduler>,
    shutdown: Shutdown,
    monitor: Option<JoinHandle<()>>,
    server: Option<JoinHandle<()>>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    addr: SocketAddr,
}

impl App {
    /// Binds the command server, draws the first render process and starts the jobs.
    pub fn start(config: &Config) -> Result<Self, AppError> {
        let target = config.render_target()?;
        let dispatcher = CommandDispatcher::new(config.theme_backend());
        let server = CommandServer::bind(&config.transport.bind)?;
        let addr = server.local_addr()?;

        let image = target.theme().image_path();
        if let Err(err) = dispatcher.backend().apply_wallpaper(&image) {
            tracing::warn!(image = %image.display(), "initial wallpaper failed: {err}");
        }

        let supervisor = ProcessSupervisor::new(config.timings(), config.stacker());
        if let Err(err) = dispatcher.reload(&target, &mut &supervisor) {
            supervisor.shutdown();
            return Err(AppError::Startup(err));
        }

        let shutdown = Shutdown::new();
        let mut scheduler = JobScheduler::start_with_shutdown(
            config.jobs(),
            Arc::new(SystemClock),
            shutdown.clone(),
        );
        tracing::info!(jobs = scheduler.job_count(), "job scheduler started");
        let monitor = scheduler.take_events().map(spawn_event_monitor);

        let (control_tx, control_rx) = mpsc::channel();
        let server = match server.spawn(control_tx.clone(), shutdown.clone()) {
            Ok(server) => server,
            Err(err) => {
                scheduler.shutdown();
                supervisor.shutdown();
                return Err(err.into());
            }
        };
        tracing::info!(%addr, "listening for commands");

        Ok(Self {
            target,
            dispatcher,
            supervisor,
            scheduler: Some(scheduler),
            shutdown,
            monitor,
            server: Some(server),
            control_tx,
            control_rx,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sender into the interactive loop; `Control::Shutdown` ends `run`.
    pub fn control(&self) -> Sender<Control> {
        self.control_tx.clone()
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Serves requests until shutdown. A render spawn failure ends the loop with an error.
    pub fn run(mut self) -> Result<(), AppError> {
        let result = self.serve();
        self.teardown();
        result
    }

    /// Tears everything down without serving.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn serve(&mut self) -> Result<(), AppError> {
        while let Ok(control) = self.control_rx.recv() {
            let (request, reply) = match control {
                Control::Request { request, reply } => (request, reply),
                Control::Shutdown => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
            };
            let outcome = self
                .dispatcher
                .dispatch(&mut self.target, &mut &self.supervisor, &request);
            match outcome {
                Ok(outcome) => {
                    match outcome.effect {
                        Effect::Replaced(info) => tracing::debug!(
                            cmd = %request.cmd,
                            generation = info.generation,
                            "render process replaced"
                        ),
                        Effect::Pushed => tracing::trace!(cmd = %request.cmd, "content pushed"),
                        Effect::None => {}
                    }
                    let _ = reply.send(outcome.reply);
                }
                Err(err) => {
                    let _ = reply.send(serde_json::json!({ "error": err.to_string() }));
                    return Err(AppError::Render(err));
                }
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.shutdown.request();
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        // Drain requests that raced the shutdown so their clients are not left waiting.
        while let Ok(control) = self.control_rx.try_recv() {
            if let Control::Request { reply, .. } = control {
                let _ = reply.send(serde_json::json!({ "error": "shutting down" }));
            }
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        self.supervisor.shutdown();
        tracing::info!("supervisor stopped");
    }
}

fn spawn_event_monitor(events: Receiver<JobEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in events {
            let job = event.job;
            let label = event.label.as_str();
            match event.kind {
                JobEventKind::Started => tracing::debug!(job, label, "job started"),
                JobEventKind::Fired => tracing::trace!(job, label, "job fired"),
                JobEventKind::Failed(err) => tracing::warn!(job, label, "job stopped: {err}"),
                JobEventKind::Stopped => tracing::debug!(job, label, "job stopped"),
            }
        }
    })
}

/// Forwards SIGINT/SIGTERM into the interactive loop until dropped.
pub struct SignalForwarder {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalForwarder {
    pub fn install(tx: Sender<Control>) -> Result<Self, AppError> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(AppError::Signals)?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                tracing::info!(signal, "received signal");
                if tx.send(Control::Shutdown).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Entry point for `barkeep run`.
pub fn run(config: &Config) -> Result<(), AppError> {
    let app = App::start(config)?;
    let signals = match SignalForwarder::install(app.control()) {
        Ok(signals) => signals,
        Err(err) => {
            app.stop();
            return Err(err);
        }
    };
    let result = app.run();
    drop(signals);
    result
}
