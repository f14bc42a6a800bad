use crate::collectors::{HardwareInventory, PerformanceCounter, TemperatureProbe};
use crate::logger::{Logger, TracingLogger};
use crate::poller::{PerformancePoller, PollSettings, Poller, PollerError, TemperaturePoller};
use crate::store::{PerformanceStore, TemperatureStore};
use crate::view::{Gauges, TelemetryView};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll: PollSettings,
    pub disk_target: String,
}

pub struct TelemetrySession<P: TemperatureProbe, C: PerformanceCounter> {
    temperature: TemperaturePoller<P>,
    performance: PerformancePoller<C>,
    view: TelemetryView,
}

impl<P: TemperatureProbe, C: PerformanceCounter> TelemetrySession<P, C> {
    pub fn new(
        probe: P,
        counter: C,
        inventory: &dyn HardwareInventory,
        settings: SessionSettings,
    ) -> Self {
        Self::with_loggers(
            probe,
            counter,
            inventory,
            settings,
            Arc::new(TracingLogger::new("temperature")),
            Arc::new(TracingLogger::new("performance")),
        )
    }

    pub fn with_loggers(
        probe: P,
        counter: C,
        inventory: &dyn HardwareInventory,
        settings: SessionSettings,
        temperature_logger: Arc<dyn Logger>,
        performance_logger: Arc<dyn Logger>,
    ) -> Self {
        let temperatures = Arc::new(TemperatureStore::new());
        let performance = Arc::new(PerformanceStore::new());
        let external_gpu = inventory.has_external_gpu();
        info!(
            external_gpu,
            adapters = inventory.video_adapters().len(),
            "gpu gauge source decided"
        );

        Self {
            temperature: Poller::temperature(
                probe,
                temperatures.clone(),
                temperature_logger,
                settings.poll,
            ),
            performance: Poller::performance(
                counter,
                performance.clone(),
                performance_logger,
                settings.poll,
            ),
            view: TelemetryView::new(temperatures, performance, external_gpu, settings.disk_target),
        }
    }

    pub fn activate(&mut self) {
        start_logged(self.temperature.start());
        start_logged(self.performance.start());
        self.view.resume();
    }

    pub fn deactivate(&mut self) {
        self.view.pause();
        self.temperature.stop();
        self.performance.stop();
    }

    pub fn shutdown(&mut self, grace: Duration) -> Result<(), PollerError> {
        self.deactivate();
        let temperature = self.temperature.join(grace);
        let performance = self.performance.join(grace);
        temperature.and(performance)
    }

    pub fn tick(&mut self) -> Option<&Gauges> {
        self.view.tick()
    }

    pub fn view(&self) -> &TelemetryView {
        &self.view
    }

    pub fn temperature_store(&self) -> &Arc<TemperatureStore> {
        self.temperature.store()
    }

    pub fn performance_store(&self) -> &Arc<PerformanceStore> {
        self.performance.store()
    }
}

fn start_logged(result: Result<(), PollerError>) {
    match result {
        Ok(()) | Err(PollerError::AlreadyRunning(_)) => {}
        // Already written through the poller's logger.
        Err(PollerError::BackendUnavailable { .. }) => {}
        Err(err) => warn!(error = %err, "poller did not start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::inventory::SystemInventory;
    use crate::collectors::{VideoAdapter, VideoAdapterKind};
    use crate::logger::testing::RecordingLogger;
    use crate::poller::fakes::{FakePerformanceCounter, FakeTemperatureProbe, Gate, GatedProbe};
    use crate::poller::PollerState;
    use std::thread;
    use std::sync::mpsc;
    use std::time::Instant;

    const GRACE: Duration = Duration::from_secs(5);

    fn settings() -> SessionSettings {
        SessionSettings {
            poll: PollSettings {
                interval: Duration::from_millis(2),
                log_every: 10,
            },
            disk_target: "0".to_string(),
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for session");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn activate_runs_pollers_and_view() {
        let inventory = SystemInventory::new(vec![VideoAdapter {
            name: "Intel card0".to_string(),
            kind: VideoAdapterKind::Integrated,
        }]);
        let mut session = TelemetrySession::new(
            FakeTemperatureProbe {
                gpu_celsius: 99,
                disks: vec![("C:0".to_string(), 35), ("D:1".to_string(), 42)],
                ..FakeTemperatureProbe::default()
            },
            FakePerformanceCounter::default(),
            &inventory,
            settings(),
        );
        assert!(session.tick().is_none());

        session.activate();
        assert!(session.view().is_ticking());
        wait_for(|| {
            session.temperature_store().version() >= 1 && session.performance_store().version() >= 1
        });

        let gauges = session.tick().cloned().expect("ticking");
        assert_eq!(gauges.disk_temp_celsius, 35);
        assert_eq!(gauges.gpu_temp_celsius, gauges.cpu_temp_celsius);
        assert!(gauges.temperature_cycle >= 1);

        session.shutdown(GRACE).expect("shutdown");
        assert!(!session.view().is_ticking());
        assert!(session.tick().is_none());
    }

    #[test]
    fn unavailable_backend_leaves_other_poller_running() {
        let logger = Arc::new(RecordingLogger::default());
        let mut session = TelemetrySession::with_loggers(
            FakeTemperatureProbe {
                fail_init: true,
                ..FakeTemperatureProbe::default()
            },
            FakePerformanceCounter::default(),
            &SystemInventory::default(),
            settings(),
            logger.clone(),
            Arc::new(RecordingLogger::default()),
        );

        session.activate();
        wait_for(|| session.performance_store().version() >= 2);
        assert_eq!(session.temperature_store().version(), 0);
        assert_eq!(session.temperature.state(), PollerState::Stopped);
        assert_eq!(logger.count(tracing::Level::ERROR), 1);

        let gauges = session.tick().cloned().expect("ticking");
        assert_eq!(gauges.cpu_temp_celsius, 0);
        assert!(gauges.performance_cycle >= 2);
        session.shutdown(GRACE).expect("shutdown");
    }

    #[test]
    fn reactivation_resumes_publishing() {
        let mut session = TelemetrySession::new(
            FakeTemperatureProbe::default(),
            FakePerformanceCounter::default(),
            &SystemInventory::default(),
            settings(),
        );

        session.activate();
        wait_for(|| session.temperature_store().version() >= 1);
        session.deactivate();
        session.activate();
        let before = session.temperature_store().version();
        wait_for(|| session.temperature_store().version() > before);
        session.shutdown(GRACE).expect("shutdown");
    }

    #[test]
    fn stuck_temperature_backend_does_not_block_reactivation() {
        let gate = Gate::default();
        let mut session = TelemetrySession::with_loggers(
            GatedProbe { gate: gate.clone() },
            FakePerformanceCounter::default(),
            &SystemInventory::default(),
            settings(),
            Arc::new(RecordingLogger::default()),
            Arc::new(RecordingLogger::default()),
        );
        session.activate();
        gate.wait_entered();

        let (done, returned) = mpsc::channel();
        thread::spawn(move || {
            session.deactivate();
            session.activate();
            let _ = done.send(session);
        });
        let mut session = returned
            .recv_timeout(Duration::from_secs(2))
            .expect("activate() blocked on the stuck temperature backend");

        assert!(session.view().is_ticking());
        let before = session.performance_store().version();
        wait_for(|| session.performance_store().version() > before);
        assert!(session.tick().is_some());

        let began = Instant::now();
        assert!(matches!(
            session.shutdown(Duration::from_millis(20)),
            Err(PollerError::StillRunning("temperature"))
        ));
        assert!(began.elapsed() < Duration::from_secs(1));
        gate.release();
    }
}
