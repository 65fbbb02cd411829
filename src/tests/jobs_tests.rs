use super::{
    Clock, Job, JobError, JobEvent, JobEventKind, JobScheduler, PeriodicJob, ReactiveJob,
    Shutdown, SystemClock,
};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Advances virtual time instantly and requests shutdown once past `horizon`.
struct FakeClock {
    elapsed: Mutex<Duration>,
    horizon: Duration,
}

impl FakeClock {
    fn new(horizon: Duration) -> Self {
        Self {
            elapsed: Mutex::new(Duration::ZERO),
            horizon,
        }
    }
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool {
        let mut elapsed = self.elapsed.lock().expect("clock lock");
        *elapsed += duration;
        if *elapsed > self.horizon {
            shutdown.request();
            return false;
        }
        true
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

fn collect_until<F>(events: &Receiver<JobEvent>, mut done: F) -> Vec<JobEvent>
where
    F: FnMut(&[JobEvent]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    while Instant::now() < deadline && !done(&seen) {
        if let Ok(event) = events.recv_timeout(Duration::from_millis(100)) {
            seen.push(event);
        }
    }
    seen
}

fn fired(events: &[JobEvent], job: usize) -> usize {
    events
        .iter()
        .filter(|event| event.job == job && matches!(event.kind, JobEventKind::Fired))
        .count()
}

#[test]
fn periodic_job_runs_at_least_three_times_in_three_and_a_half_seconds() {
    let clock = Arc::new(FakeClock::new(Duration::from_millis(3500)));
    let mut scheduler = JobScheduler::start(
        vec![Job::Periodic(PeriodicJob {
            interval: Duration::from_secs(1),
            command: argv(&["true"]),
        })],
        clock,
    );
    let events = scheduler.take_events().expect("events");

    let seen = collect_until(&events, |seen| {
        seen.iter()
            .any(|event| matches!(event.kind, JobEventKind::Stopped))
    });
    scheduler.shutdown();

    assert!(matches!(seen[0].kind, JobEventKind::Started));
    assert!(fired(&seen, 0) >= 3, "fired {} times", fired(&seen, 0));
    assert!(seen
        .iter()
        .all(|event| !matches!(event.kind, JobEventKind::Failed(_))));
}

#[test]
fn reactive_job_fires_before_first_line_and_once_per_line() {
    let mut scheduler = JobScheduler::start(
        vec![Job::Reactive(ReactiveJob {
            trigger: argv(&["sh", "-c", "echo a; echo b"]),
            response: argv(&["true"]),
        })],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");

    let seen = collect_until(&events, |seen| {
        seen.iter()
            .any(|event| matches!(event.kind, JobEventKind::Failed(_)))
    });
    scheduler.shutdown();

    assert_eq!(fired(&seen, 0), 3);
    let last = seen.last().expect("events");
    assert!(matches!(
        last.kind,
        JobEventKind::Failed(JobError::TriggerClosed { .. })
    ));
}

fn registered_triggers(scheduler: &JobScheduler) -> Vec<usize> {
    scheduler
        .triggers
        .lock()
        .expect("registry lock")
        .iter()
        .map(|(job, _)| *job)
        .collect()
}

#[test]
fn closed_trigger_is_reaped_while_siblings_keep_running() {
    let mut scheduler = JobScheduler::start(
        vec![
            Job::Reactive(ReactiveJob {
                trigger: argv(&["sh", "-c", "echo a"]),
                response: argv(&["true"]),
            }),
            Job::Reactive(ReactiveJob {
                trigger: argv(&["sleep", "30"]),
                response: argv(&["true"]),
            }),
        ],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");

    let seen = collect_until(&events, |seen| {
        seen.iter()
            .any(|event| event.job == 0 && matches!(event.kind, JobEventKind::Failed(_)))
            && fired(seen, 1) >= 1
    });
    assert!(seen.iter().any(|event| event.job == 0
        && matches!(event.kind, JobEventKind::Failed(JobError::TriggerClosed { .. }))));
    assert_eq!(registered_triggers(&scheduler), vec![1]);

    scheduler.shutdown();
}

#[test]
fn response_failure_terminates_a_live_trigger() {
    let mut scheduler = JobScheduler::start(
        vec![Job::Reactive(ReactiveJob {
            trigger: argv(&["sleep", "30"]),
            response: argv(&["/nonexistent/barkeep-response"]),
        })],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");

    let started = Instant::now();
    let seen = collect_until(&events, |seen| {
        seen.iter()
            .any(|event| matches!(event.kind, JobEventKind::Failed(_)))
    });
    assert!(matches!(
        seen.last().map(|event| &event.kind),
        Some(JobEventKind::Failed(JobError::Spawn { .. }))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(registered_triggers(&scheduler).is_empty());

    scheduler.shutdown();
}

#[test]
fn spawn_failure_ends_only_its_own_job() {
    let mut scheduler = JobScheduler::start(
        vec![
            Job::Periodic(PeriodicJob {
                interval: Duration::from_secs(60),
                command: argv(&["true"]),
            }),
            Job::Periodic(PeriodicJob {
                interval: Duration::from_secs(1),
                command: argv(&["/nonexistent/barkeep-job-binary"]),
            }),
        ],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");

    let seen = collect_until(&events, |seen| {
        fired(seen, 0) >= 1
            && seen
                .iter()
                .any(|event| event.job == 1 && matches!(event.kind, JobEventKind::Failed(_)))
    });
    assert!(seen.iter().any(|event| event.job == 1
        && matches!(event.kind, JobEventKind::Failed(JobError::Spawn { .. }))));
    assert!(!seen
        .iter()
        .any(|event| event.job == 0 && matches!(event.kind, JobEventKind::Failed(_))));

    let started = Instant::now();
    scheduler.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));

    let rest: Vec<JobEvent> = events.try_iter().collect();
    assert!(rest
        .iter()
        .any(|event| event.job == 0 && matches!(event.kind, JobEventKind::Stopped)));
}

#[test]
fn shutdown_terminates_long_running_triggers() {
    let mut scheduler = JobScheduler::start(
        vec![Job::Reactive(ReactiveJob {
            trigger: argv(&["sh", "-c", "sleep 30"]),
            response: argv(&["true"]),
        })],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");
    let seen = collect_until(&events, |seen| fired(seen, 0) >= 1);
    assert_eq!(fired(&seen, 0), 1);

    let started = Instant::now();
    scheduler.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));

    let rest: Vec<JobEvent> = events.try_iter().collect();
    assert!(rest
        .iter()
        .any(|event| matches!(event.kind, JobEventKind::Stopped)));
}

#[test]
fn empty_command_is_reported_as_failure() {
    let mut scheduler = JobScheduler::start(
        vec![Job::Periodic(PeriodicJob {
            interval: Duration::from_secs(1),
            command: Vec::new(),
        })],
        Arc::new(SystemClock),
    );
    let events = scheduler.take_events().expect("events");
    let seen = collect_until(&events, |seen| {
        seen.iter()
            .any(|event| matches!(event.kind, JobEventKind::Failed(_)))
    });
    scheduler.shutdown();
    assert!(seen
        .iter()
        .any(|event| matches!(event.kind, JobEventKind::Failed(JobError::EmptyCommand))));
}

#[test]
fn shutdown_token_wakes_waiters_early() {
    let shutdown = Shutdown::new();
    let waker = shutdown.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        waker.request();
    });
    let started = Instant::now();
    assert!(shutdown.wait_timeout(Duration::from_secs(10)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(shutdown.is_requested());
    handle.join().expect("join");
}

#[test]
fn job_labels_describe_the_command() {
    let periodic = Job::Periodic(PeriodicJob {
        interval: Duration::from_secs(5),
        command: argv(&["lemonc", "date-time"]),
    });
    let reactive = Job::Reactive(ReactiveJob {
        trigger: argv(&["bspc", "subscribe"]),
        response: argv(&["lemonc", "desktops"]),
    });
    assert_eq!(periodic.label(), "every 5s: lemonc date-time");
    assert_eq!(reactive.label(), "on `bspc subscribe`: lemonc desktops");
}
