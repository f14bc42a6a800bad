use crate::collectors::{PerformanceCounter, ProbeError, TemperatureProbe};
use crate::logger::Logger;
use crate::state::{PerformanceSnapshot, TemperatureSnapshot};
use crate::store::SnapshotStore;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::Level;

pub type TemperaturePoller<P> = Poller<TemperatureCycle<P>>;
pub type PerformancePoller<C> = Poller<PerformanceCycle<C>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
    StopRequested,
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("{0} poller is already running")]
    AlreadyRunning(&'static str),
    #[error("{poller} backend unavailable: {source}")]
    BackendUnavailable {
        poller: &'static str,
        source: ProbeError,
    },
    #[error("failed to spawn {poller} poller thread: {source}")]
    Spawn {
        poller: &'static str,
        source: std::io::Error,
    },
    #[error("{0} poller worker exited abnormally")]
    WorkerLost(&'static str),
    #[error("{0} poller is still inside a backend call, left it detached")]
    StillRunning(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub log_every: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            log_every: 10,
        }
    }
}

pub trait PollCycle: Send + 'static {
    type Snapshot: Default + Send + Sync + 'static;

    const NAME: &'static str;

    fn initialize(&mut self) -> Result<(), ProbeError>;

    // Sub-readings that fail are taken from `previous`.
    fn acquire(&mut self, previous: &Self::Snapshot, logger: &dyn Logger) -> Self::Snapshot;

    fn report(&self, snapshot: &Self::Snapshot, logger: &dyn Logger);
}

// One per worker thread. A restarted poller gets a fresh one, so a worker that
// is still stuck in a backend call keeps seeing its own stop request.
struct Control {
    state: Mutex<PollerState>,
    wake: Condvar,
}

impl Control {
    fn running() -> Self {
        Self {
            state: Mutex::new(PollerState::Running),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_requested(&self) -> bool {
        *self.lock() == PollerState::StopRequested
    }

    fn request_stop(&self) {
        let mut state = self.lock();
        if *state == PollerState::Running {
            *state = PollerState::StopRequested;
            self.wake.notify_all();
        }
    }

    // Returns true when a stop arrived during the sleep.
    fn sleep(&self, interval: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, interval, |state| *state == PollerState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == PollerState::StopRequested
    }

    fn wait_stopped(&self, grace: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, grace, |state| *state != PollerState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == PollerState::Stopped
    }

    fn finish(&self) {
        *self.lock() = PollerState::Stopped;
        self.wake.notify_all();
    }
}

struct Worker {
    control: Arc<Control>,
    handle: JoinHandle<()>,
}

pub struct Poller<C: PollCycle> {
    cycle: Arc<Mutex<C>>,
    store: Arc<SnapshotStore<C::Snapshot>>,
    logger: Arc<dyn Logger>,
    settings: PollSettings,
    worker: Option<Worker>,
    initialized: bool,
    unavailable_reported: bool,
}

impl<C: PollCycle> Poller<C> {
    pub fn new(
        cycle: C,
        store: Arc<SnapshotStore<C::Snapshot>>,
        logger: Arc<dyn Logger>,
        settings: PollSettings,
    ) -> Self {
        Self {
            cycle: Arc::new(Mutex::new(cycle)),
            store,
            logger,
            settings,
            worker: None,
            initialized: false,
            unavailable_reported: false,
        }
    }

    pub fn state(&self) -> PollerState {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => *worker.control.lock(),
            _ => PollerState::Stopped,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore<C::Snapshot>> {
        &self.store
    }

    pub fn start(&mut self) -> Result<(), PollerError> {
        if self.state() == PollerState::Running {
            return Err(PollerError::AlreadyRunning(C::NAME));
        }
        if let Err(err) = self.release_worker() {
            self.logger.write_line(Level::WARN, &err.to_string());
        }
        self.initialize()?;

        let control = Arc::new(Control::running());
        let spawned = thread::Builder::new()
            .name(format!("{}-poller", C::NAME))
            .spawn({
                let cycle = self.cycle.clone();
                let store = self.store.clone();
                let logger = self.logger.clone();
                let control = control.clone();
                let settings = self.settings;
                move || run(&cycle, &store, logger.as_ref(), settings, &control)
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { control, handle });
                Ok(())
            }
            Err(source) => Err(PollerError::Spawn {
                poller: C::NAME,
                source,
            }),
        }
    }

    // Only reached before any worker has run, so the backend lock is free.
    fn initialize(&mut self) -> Result<(), PollerError> {
        if self.initialized {
            return Ok(());
        }
        let result = self
            .cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialize();

        match result {
            Ok(()) => {
                self.initialized = true;
                self.unavailable_reported = false;
                Ok(())
            }
            Err(source) => {
                if !self.unavailable_reported {
                    self.logger.write_line(
                        Level::ERROR,
                        &format!("{} backend unavailable: {source}", C::NAME),
                    );
                    self.unavailable_reported = true;
                }
                Err(PollerError::BackendUnavailable {
                    poller: C::NAME,
                    source,
                })
            }
        }
    }

    pub fn stop(&self) {
        if let Some(worker) = &self.worker {
            worker.control.request_stop();
        }
    }

    /// Stops the loop and waits up to `grace` for the worker to exit. A worker
    /// still inside a backend call after that is detached.
    pub fn join(&mut self, grace: Duration) -> Result<(), PollerError> {
        self.stop();
        if let Some(worker) = &self.worker {
            worker.control.wait_stopped(grace);
        }
        self.release_worker()
    }

    fn release_worker(&mut self) -> Result<(), PollerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        if !worker.handle.is_finished() && *worker.control.lock() != PollerState::Stopped {
            return Err(PollerError::StillRunning(C::NAME));
        }
        worker
            .handle
            .join()
            .map_err(|_| PollerError::WorkerLost(C::NAME))
    }
}

impl<C: PollCycle> Drop for Poller<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<C: PollCycle>(
    cycle: &Mutex<C>,
    store: &SnapshotStore<C::Snapshot>,
    logger: &dyn Logger,
    settings: PollSettings,
    control: &Control,
) {
    let log_every = settings.log_every.max(1);
    let mut refresh_count: u64 = 0;

    while !control.stop_requested() {
        {
            // Blocks while a detached worker from an earlier start is still
            // inside the backend.
            let mut cycle = cycle.lock().unwrap_or_else(PoisonError::into_inner);
            if control.stop_requested() {
                break;
            }
            let previous = store.read();
            let snapshot = cycle.acquire(&previous, logger);
            if control.stop_requested() {
                break;
            }
            let published = store.publish(snapshot);

            if refresh_count % log_every == 0 {
                cycle.report(&published, logger);
            }
        }
        refresh_count += 1;

        if control.sleep(settings.interval) {
            break;
        }
    }

    control.finish();
}

fn carry_forward<T: Clone>(
    fresh: Result<T, ProbeError>,
    previous: &T,
    what: &str,
    logger: &dyn Logger,
) -> T {
    match fresh {
        Ok(value) => value,
        Err(err) => {
            logger.write_line(Level::WARN, &format!("{what} read failed: {err}"));
            previous.clone()
        }
    }
}

pub struct TemperatureCycle<P> {
    probe: P,
}

impl<P: TemperatureProbe> TemperatureCycle<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: TemperatureProbe> PollCycle for TemperatureCycle<P> {
    type Snapshot = TemperatureSnapshot;

    const NAME: &'static str = "temperature";

    fn initialize(&mut self) -> Result<(), ProbeError> {
        self.probe.initialize()
    }

    fn acquire(
        &mut self,
        previous: &TemperatureSnapshot,
        logger: &dyn Logger,
    ) -> TemperatureSnapshot {
        let cpu = carry_forward(
            self.probe.cpu_temperature(),
            &previous.cpu,
            "cpu temperature",
            logger,
        );
        let gpu = carry_forward(
            self.probe.gpu_temperature(),
            &previous.gpu,
            "gpu temperature",
            logger,
        );
        let disks = self.probe.disk_temperatures();

        TemperatureSnapshot {
            cycle: previous.cycle + 1,
            captured_at: Some(SystemTime::now()),
            cpu,
            gpu,
            disks,
        }
    }

    fn report(&self, snapshot: &TemperatureSnapshot, logger: &dyn Logger) {
        logger.write_line(
            Level::INFO,
            &format!("cpu cores (temperature): {}", snapshot.cpu.core_count()),
        );
        for (i, celsius) in snapshot.cpu.cores.iter().enumerate() {
            logger.write_line(Level::INFO, &format!("cpu core {i}: {celsius}°C"));
        }
        logger.write_line(Level::INFO, &format!("gpu: {}°C", snapshot.gpu.celsius));
        logger.write_line(
            Level::INFO,
            &format!("disks (temperature): {}", snapshot.disks.count()),
        );
        for disk in &snapshot.disks.disks {
            logger.write_line(
                Level::INFO,
                &format!("disk {}: {}°C", disk.drive_id, disk.celsius),
            );
        }
    }
}

pub struct PerformanceCycle<C> {
    counter: C,
}

impl<C: PerformanceCounter> PerformanceCycle<C> {
    pub fn new(counter: C) -> Self {
        Self { counter }
    }
}

impl<C: PerformanceCounter> PollCycle for PerformanceCycle<C> {
    type Snapshot = PerformanceSnapshot;

    const NAME: &'static str = "performance";

    fn initialize(&mut self) -> Result<(), ProbeError> {
        self.counter.initialize()
    }

    fn acquire(
        &mut self,
        previous: &PerformanceSnapshot,
        logger: &dyn Logger,
    ) -> PerformanceSnapshot {
        let memory = carry_forward(
            self.counter.memory_performance(),
            &previous.memory,
            "memory performance",
            logger,
        );
        let processor = carry_forward(
            self.counter.processor_performance(),
            &previous.processor,
            "processor performance",
            logger,
        );

        PerformanceSnapshot {
            cycle: previous.cycle + 1,
            captured_at: Some(SystemTime::now()),
            memory,
            processor,
        }
    }

    fn report(&self, snapshot: &PerformanceSnapshot, logger: &dyn Logger) {
        logger.write_line(
            Level::INFO,
            &format!("cpu usage: {}%", snapshot.processor.load_percent),
        );
        logger.write_line(
            Level::INFO,
            &format!("memory total: {} bytes", snapshot.memory.total_bytes),
        );
        logger.write_line(
            Level::INFO,
            &format!("memory available: {} bytes", snapshot.memory.available_bytes),
        );
        logger.write_line(
            Level::INFO,
            &format!("memory load: {}%", snapshot.memory.load_percent),
        );
    }
}

impl<P: TemperatureProbe> Poller<TemperatureCycle<P>> {
    pub fn temperature(
        probe: P,
        store: Arc<SnapshotStore<TemperatureSnapshot>>,
        logger: Arc<dyn Logger>,
        settings: PollSettings,
    ) -> Self {
        Self::new(TemperatureCycle::new(probe), store, logger, settings)
    }
}

impl<C: PerformanceCounter> Poller<PerformanceCycle<C>> {
    pub fn performance(
        counter: C,
        store: Arc<SnapshotStore<PerformanceSnapshot>>,
        logger: Arc<dyn Logger>,
        settings: PollSettings,
    ) -> Self {
        Self::new(PerformanceCycle::new(counter), store, logger, settings)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::collectors::{PerformanceCounter, ProbeError, TemperatureProbe};
    use crate::state::{
        CpuTemperature, DiskTemperatureSet, GpuTemperature, MemoryPerformance,
        ProcessorPerformance,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    // Call `n` (1-based) of the cpu read returns cores `[n*10, n*10 + 2]`.
    #[derive(Default)]
    pub struct FakeTemperatureProbe {
        pub cpu_calls: u32,
        pub failing_cpu_calls: Vec<u32>,
        pub fail_gpu: bool,
        pub fail_init: bool,
        pub gpu_celsius: u32,
        pub disks: Vec<(String, u32)>,
    }

    impl TemperatureProbe for FakeTemperatureProbe {
        fn initialize(&mut self) -> Result<(), ProbeError> {
            if self.fail_init {
                return Err(ProbeError::BackendUnavailable("driver missing".to_string()));
            }
            Ok(())
        }

        fn cpu_temperature(&mut self) -> Result<CpuTemperature, ProbeError> {
            self.cpu_calls += 1;
            if self.failing_cpu_calls.contains(&self.cpu_calls) {
                return Err(ProbeError::SensorUnavailable("cpu"));
            }
            let base = self.cpu_calls * 10;
            Ok(CpuTemperature::new(vec![base, base + 2]))
        }

        fn gpu_temperature(&mut self) -> Result<GpuTemperature, ProbeError> {
            if self.fail_gpu {
                return Err(ProbeError::SensorUnavailable("gpu"));
            }
            Ok(GpuTemperature {
                celsius: self.gpu_celsius,
            })
        }

        fn disk_temperatures(&mut self) -> DiskTemperatureSet {
            DiskTemperatureSet::from_entries(self.disks.clone())
        }
    }

    #[derive(Clone, Default)]
    pub struct Gate {
        entered: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl Gate {
        pub fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }

        pub fn wait_entered(&self) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !self.entered.load(Ordering::SeqCst) {
                assert!(Instant::now() < deadline, "backend call never started");
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    pub struct GatedProbe {
        pub gate: Gate,
    }

    impl TemperatureProbe for GatedProbe {
        fn cpu_temperature(&mut self) -> Result<CpuTemperature, ProbeError> {
            self.gate.entered.store(true, Ordering::SeqCst);
            while !self.gate.released.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(CpuTemperature::new(vec![40]))
        }

        fn gpu_temperature(&mut self) -> Result<GpuTemperature, ProbeError> {
            Ok(GpuTemperature::default())
        }

        fn disk_temperatures(&mut self) -> DiskTemperatureSet {
            DiskTemperatureSet::default()
        }
    }

    #[derive(Default)]
    pub struct FakePerformanceCounter {
        pub calls: u32,
        pub fail_memory: bool,
        pub fail_processor: bool,
        pub fail_init: bool,
    }

    impl PerformanceCounter for FakePerformanceCounter {
        fn initialize(&mut self) -> Result<(), ProbeError> {
            if self.fail_init {
                return Err(ProbeError::BackendUnavailable("pdh unavailable".to_string()));
            }
            Ok(())
        }

        fn memory_performance(&mut self) -> Result<MemoryPerformance, ProbeError> {
            self.calls += 1;
            if self.fail_memory {
                return Err(ProbeError::SensorUnavailable("memory"));
            }
            Ok(MemoryPerformance::from_sizes(1000, 1000 - u64::from(self.calls)))
        }

        fn processor_performance(&mut self) -> Result<ProcessorPerformance, ProbeError> {
            if self.fail_processor {
                return Err(ProbeError::SensorUnavailable("processor"));
            }
            Ok(ProcessorPerformance {
                load_percent: self.calls.min(100),
            })
        }
    }
}
