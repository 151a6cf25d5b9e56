use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    signal: Arc<StopSignal>,
    handle: JoinHandle<()>,
    thread_id: ThreadId,
    period: Duration,
}

/// Calls a closure once per period on a dedicated thread.
///
/// A firing that runs late still fires once; the next deadline is counted
/// from the moment the callback returns, so slow callbacks never cause a
/// burst of catch-up calls.
pub struct PeriodicTimer {
    name: String,
    callback: Callback,
    worker: Option<Worker>,
}

impl PeriodicTimer {
    pub fn new(name: impl Into<String>, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.worker.as_ref().map(|worker| worker.period)
    }

    /// No-op while already running.
    pub fn start(&mut self, period: Duration) {
        if self.worker.is_some() {
            debug!(event = "timer_already_running", timer = %self.name);
            return;
        }
        let period = period.max(MIN_PERIOD);
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let callback = Arc::clone(&self.callback);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(&thread_signal, period, &callback));
        match spawned {
            Ok(handle) => {
                let thread_id = handle.thread().id();
                self.worker = Some(Worker {
                    signal,
                    handle,
                    thread_id,
                    period,
                });
            }
            Err(err) => {
                warn!(event = "timer_spawn_failed", timer = %self.name, error = %err);
            }
        }
    }

    /// Idempotent. Blocks until the timer thread exits, except when called
    /// from the timer's own callback, where it only signals.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        *worker.signal.lock() = true;
        worker.signal.cond.notify_all();
        if thread::current().id() == worker.thread_id {
            return;
        }
        if worker.handle.join().is_err() {
            warn!(event = "timer_callback_panicked", timer = %self.name);
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(signal: &StopSignal, period: Duration, callback: &Callback) {
    let mut deadline = Instant::now() + period;
    let mut stopped = signal.lock();
    loop {
        if *stopped {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            drop(stopped);
            callback();
            deadline = Instant::now() + period;
            stopped = signal.lock();
            continue;
        }
        let (guard, _) = signal
            .cond
            .wait_timeout(stopped, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        stopped = guard;
    }
}
