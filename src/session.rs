//! The control session: owns the capture-classify-dispatch loop and its lifecycle.
//!
//! A session moves through [`SessionState::Idle`] → [`SessionState::Initializing`] →
//! [`SessionState::Running`] → [`SessionState::Stopping`] → back to `Idle`. Every `start()`
//! spawns a fresh worker thread which *owns* the frame and landmark sources; they are acquired
//! after the thread starts and are guaranteed to be released on every exit path (normal stop,
//! fatal error, or a panic inside the loop body) before the session reports `Idle` again.
//!
//! Stopping is cooperative: the worker polls a cancellation flag several times per iteration, so
//! a stop request does not have to wait for a full capture cycle. The caller of [`stop()`] waits
//! a bounded amount of time for the acknowledgment; if the worker is wedged (for example inside
//! a blocking frame read), that is reported as [`SessionError::StopTimeout`] and the worker keeps
//! draining on its own; its resources are never destroyed out from under it.
//!
//! [`stop()`]: ControlSession::stop

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::classify::{classify, Command};
use crate::config::{Config, ConfigError, ConfigStore, DetectionConfig};
use crate::dispatch::{CommandDispatcher, DispatchPolicy};
use crate::draw;
use crate::hand::LandmarkSource;
use crate::timer::{FpsCounter, Timer};
use crate::video::{Frame, FrameSource};

/// Lifecycle state of a [`ControlSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Initializing = 1,
    Running = 2,
    Stopping = 3,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` was called while a session was initializing, running, or still stopping.
    #[error("a session is already active")]
    AlreadyActive,

    /// The frame source or the landmark source could not be opened.
    #[error("failed to acquire capture resources")]
    Acquisition(#[source] anyhow::Error),

    /// The worker did not acknowledge a stop request in time.
    ///
    /// The worker still owns its resources and will release them when it gets around to the next
    /// cancellation check; it must not be destroyed forcibly.
    #[error("session did not acknowledge stop within {0:?}")]
    StopTimeout(Duration),
}

/// What a session publishes after each completed loop iteration.
#[derive(Clone)]
pub struct Observation {
    /// The captured frame with the diagnostic overlay drawn onto it.
    pub frame: Frame,
    /// The command classified from (and dispatched for) this frame.
    pub command: Command,
}

/// Tuning knobs for a [`ControlSession`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    stop_timeout: Duration,
    retry_delay: Duration,
    max_read_failures: u32,
    dispatch_policy: DispatchPolicy,
    send_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_millis(100),
            max_read_failures: 30,
            dispatch_policy: DispatchPolicy::default(),
            send_timeout: CommandDispatcher::DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl SessionOptions {
    /// Sets how long [`ControlSession::stop`] waits for the worker's acknowledgment.
    #[inline]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the delay before retrying after a failed frame read or hand detection.
    #[inline]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets how many *consecutive* frame read failures are tolerated before the session gives up
    /// and shuts down.
    #[inline]
    pub fn max_read_failures(mut self, failures: u32) -> Self {
        self.max_read_failures = failures.max(1);
        self
    }

    /// Selects between debounced and send-every-frame dispatch.
    #[inline]
    pub fn dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    /// Sets the per-datagram send timeout.
    #[inline]
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

type FrameFactory = dyn Fn() -> anyhow::Result<Box<dyn FrameSource>> + Send + Sync;
type LandmarkFactory =
    dyn Fn(&DetectionConfig) -> anyhow::Result<Box<dyn LandmarkSource>> + Send + Sync;

/// State shared between the session handle and its worker thread.
struct Shared {
    state: AtomicU8,
    cancel: AtomicBool,
    observation: ArcSwapOption<Observation>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            cancel: AtomicBool::new(false),
            observation: ArcSwapOption::empty(),
        }
    }

    fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            0 => SessionState::Idle,
            1 => SessionState::Initializing,
            2 => SessionState::Running,
            _ => SessionState::Stopping,
        }
    }

    fn set_state(&self, state: SessionState) {
        log::trace!("session state -> {state:?}");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

struct Worker {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

/// Orchestrates the capture → detect → classify → dispatch → publish loop.
///
/// The frame and landmark sources are supplied as factories: fresh instances are constructed
/// inside the worker thread on every start, and the landmark source is additionally reconstructed
/// in place whenever the detection thresholds change while running. At most one session per
/// [`ControlSession`] is active at a time; the sources are exclusively owned by that session.
pub struct ControlSession {
    config: Arc<ConfigStore>,
    shared: Arc<Shared>,
    frame_sources: Arc<FrameFactory>,
    landmark_sources: Arc<LandmarkFactory>,
    options: SessionOptions,
    worker: Option<Worker>,
}

impl ControlSession {
    /// Creates an idle session with default [`SessionOptions`].
    pub fn new<F, C, L, D>(config: Arc<ConfigStore>, frame_sources: F, landmark_sources: L) -> Self
    where
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
        C: FrameSource + 'static,
        L: Fn(&DetectionConfig) -> anyhow::Result<D> + Send + Sync + 'static,
        D: LandmarkSource + 'static,
    {
        Self::with_options(
            config,
            frame_sources,
            landmark_sources,
            SessionOptions::default(),
        )
    }

    pub fn with_options<F, C, L, D>(
        config: Arc<ConfigStore>,
        frame_sources: F,
        landmark_sources: L,
        options: SessionOptions,
    ) -> Self
    where
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
        C: FrameSource + 'static,
        L: Fn(&DetectionConfig) -> anyhow::Result<D> + Send + Sync + 'static,
        D: LandmarkSource + 'static,
    {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            frame_sources: Arc::new(move || {
                frame_sources().map(|source| Box::new(source) as Box<dyn FrameSource>)
            }),
            landmark_sources: Arc::new(move |detection: &DetectionConfig| {
                landmark_sources(detection)
                    .map(|source| Box::new(source) as Box<dyn LandmarkSource>)
            }),
            options,
            worker: None,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Returns the most recently published observation, if any.
    ///
    /// This is a latest-value-wins slot, not a queue: a consumer that polls slower than the loop
    /// runs simply misses intermediate observations.
    pub fn latest(&self) -> Option<Arc<Observation>> {
        self.shared.observation.load_full()
    }

    /// Returns the shared configuration store.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Validates and atomically publishes a new configuration.
    ///
    /// Callable from any state. If the detection thresholds changed while the session is running,
    /// the worker recreates its landmark source in place without otherwise interrupting the loop.
    pub fn update_config(&self, config: Config) -> Result<(), ConfigError> {
        self.config.update(config)
    }

    /// Starts the session.
    ///
    /// Valid only from [`SessionState::Idle`]; otherwise [`SessionError::AlreadyActive`] is
    /// returned and nothing happens. Blocks until the worker has either acquired both capture
    /// resources (`Ok`) or failed to, in which case the failure is returned and the session is
    /// back at `Idle` with no resources held.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.reap();
        if self.worker.is_some() || self.shared.state() != SessionState::Idle {
            return Err(SessionError::AlreadyActive);
        }

        self.shared.cancel.store(false, Ordering::SeqCst);
        self.shared.observation.store(None);
        self.shared.set_state(SessionState::Initializing);

        let (init_tx, init_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let worker = SessionWorker {
            shared: self.shared.clone(),
            config: self.config.clone(),
            frame_sources: self.frame_sources.clone(),
            landmark_sources: self.landmark_sources.clone(),
            options: self.options,
        };
        let thread = thread::Builder::new()
            .name("control session".into())
            .spawn(move || worker.run(init_tx, done_tx));
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                self.shared.set_state(SessionState::Idle);
                return Err(SessionError::Acquisition(e.into()));
            }
        };

        match init_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    thread,
                    done: done_rx,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(SessionError::Acquisition(e))
            }
            // The worker died before reporting; its shutdown guard has reset the state.
            Err(_) => {
                let _ = thread.join();
                Err(SessionError::Acquisition(anyhow::anyhow!(
                    "session worker terminated during initialization"
                )))
            }
        }
    }

    /// Requests a cooperative stop and waits (bounded) for the worker to wind down.
    ///
    /// A no-op when the session is idle. On [`SessionError::StopTimeout`] the worker is left
    /// running; it will still honor the cancellation at its next check, and a later `stop()` or
    /// `start()` will reap it.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };

        self.shared.cancel.store(true, Ordering::SeqCst);
        for from in [SessionState::Running, SessionState::Initializing] {
            let _ = self.shared.state.compare_exchange(
                from as u8,
                SessionState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }

        match worker.done.recv_timeout(self.options.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                // Resources are already released at this point; the join is quick.
                let worker = self.worker.take().unwrap();
                let _ = worker.thread.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(SessionError::StopTimeout(
                self.options.stop_timeout,
            )),
        }
    }

    /// Joins a worker that has already wound down on its own (fatal error, or a stop that timed
    /// out earlier and has completed since).
    fn reap(&mut self) {
        if self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.thread.is_finished())
        {
            let worker = self.worker.take().unwrap();
            let _ = worker.thread.join();
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.done.recv_timeout(self.options.stop_timeout);
            if worker.thread.is_finished() {
                let _ = worker.thread.join();
            }
        }
    }
}

/// Everything the worker thread needs, moved into it on start.
struct SessionWorker {
    shared: Arc<Shared>,
    config: Arc<ConfigStore>,
    frame_sources: Arc<FrameFactory>,
    landmark_sources: Arc<LandmarkFactory>,
    options: SessionOptions,
}

impl SessionWorker {
    fn run(self, init_tx: Sender<anyhow::Result<()>>, done_tx: Sender<()>) {
        // Declared before the sources so it drops *after* them: by the time the guard publishes
        // `Idle` and the stop acknowledgment, both sources are guaranteed to be released. This
        // also holds when the loop body panics.
        let mut guard = ShutdownGuard {
            shared: self.shared.clone(),
            config: self.config.clone(),
            send_timeout: self.options.send_timeout,
            stop_failsafe: false,
            _done: done_tx,
        };

        let mut camera = match (self.frame_sources)() {
            Ok(camera) => camera,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };
        let mut detection = self.config.snapshot().detection;
        let mut detector = match (self.landmark_sources)(&detection) {
            Ok(detector) => detector,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        let _ = init_tx.send(Ok(()));
        guard.stop_failsafe = true;
        if self.shared.cancelled() {
            return;
        }
        self.shared.set_state(SessionState::Running);

        let mut dispatcher = CommandDispatcher::new(self.options.dispatch_policy)
            .with_send_timeout(self.options.send_timeout);
        let mut fps = FpsCounter::new("session");
        let t_detect = Timer::new("detect");
        let t_classify = Timer::new("classify");
        let t_dispatch = Timer::new("dispatch");
        let mut read_failures = 0u32;

        loop {
            if self.shared.cancelled() {
                break;
            }

            let mut frame = match camera.read() {
                Ok(frame) => {
                    read_failures = 0;
                    frame
                }
                Err(e) => {
                    read_failures += 1;
                    if read_failures >= self.options.max_read_failures {
                        log::error!(
                            "giving up after {read_failures} consecutive frame read failures: {e:#}"
                        );
                        break;
                    }
                    log::warn!("failed to read frame ({e:#}), retrying");
                    if self.cancellable_sleep(self.options.retry_delay) {
                        break;
                    }
                    continue;
                }
            };
            if self.shared.cancelled() {
                break;
            }

            // One consistent snapshot per iteration; later edits only affect later frames.
            let cfg = self.config.snapshot();

            if cfg.detection != detection {
                log::info!("detection thresholds changed, reopening landmark source");
                // The detector may hold an exclusive resource: close before reopening.
                drop(detector);
                match (self.landmark_sources)(&cfg.detection) {
                    Ok(new) => detector = new,
                    Err(e) => {
                        log::error!("failed to reopen landmark source: {e:#}");
                        break;
                    }
                }
                detection = cfg.detection;
            }

            let hands = match t_detect.time(|| detector.detect(&frame)) {
                Ok(hands) => hands,
                Err(e) => {
                    // Skip the frame; the previously published observation and the previously
                    // dispatched command stay in effect.
                    log::warn!("hand detection failed, skipping frame: {e:#}");
                    if self.cancellable_sleep(self.options.retry_delay) {
                        break;
                    }
                    continue;
                }
            };

            let command = t_classify.time(|| classify(&hands, &cfg.zones, frame.resolution()));
            if self.shared.cancelled() {
                break;
            }
            t_dispatch.time(|| dispatcher.dispatch(command, &cfg.network));

            draw::overlay(&mut frame, &hands, &cfg.zones, command);
            self.shared
                .observation
                .store(Some(Arc::new(Observation { frame, command })));

            fps.tick_with([&t_detect, &t_classify, &t_dispatch]);
        }

        // `camera` and `detector` drop here, then the guard reports Idle and sends the fail-safe
        // STOP.
    }

    /// Sleeps in small slices, polling the cancellation flag. Returns `true` when cancelled.
    fn cancellable_sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + duration;
        loop {
            if self.shared.cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

struct ShutdownGuard {
    shared: Arc<Shared>,
    config: Arc<ConfigStore>,
    send_timeout: Duration,
    /// Whether the fail-safe STOP should go out; only set once the session got past resource
    /// acquisition.
    stop_failsafe: bool,
    _done: Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.stop_failsafe {
            let endpoint = self.config.snapshot().network.clone();
            CommandDispatcher::default()
                .with_send_timeout(self.send_timeout)
                .dispatch_stop(&endpoint);
        }
        self.shared.set_state(SessionState::Idle);
        // Dropping `_done` disconnects the channel, which doubles as the acknowledgment if the
        // explicit send is never observed.
        let _ = self._done.send(());
    }
}
