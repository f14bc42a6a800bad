use crate::state::{CpuTemperature, DiskTemperatureSet, GpuTemperature};
use crate::store::{PerformanceStore, TemperatureStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Gauges {
    pub cpu_temp_celsius: u32,
    pub gpu_temp_celsius: u32,
    pub disk_temp_celsius: u32,
    pub cpu_load_percent: u32,
    pub memory_load_percent: u32,
    pub temperature_cycle: u64,
    pub performance_cycle: u64,
    pub captured_at: Option<String>,
}

impl fmt::Display for Gauges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu {}°C | gpu {}°C | disk {}°C | cpu load {}% | mem {}%",
            self.cpu_temp_celsius,
            self.gpu_temp_celsius,
            self.disk_temp_celsius,
            self.cpu_load_percent,
            self.memory_load_percent
        )
    }
}

pub fn mean_core_temperature(cpu: &CpuTemperature) -> u32 {
    if cpu.cores.is_empty() {
        return 0;
    }
    let sum: u64 = cpu.cores.iter().map(|t| u64::from(*t)).sum();
    (sum / cpu.cores.len() as u64) as u32
}

pub fn gpu_display_temperature(gpu: &GpuTemperature, cpu_display: u32, external_gpu: bool) -> u32 {
    if external_gpu {
        gpu.celsius
    } else {
        cpu_display
    }
}

pub fn select_disk_temperature(disks: &DiskTemperatureSet, target: &str) -> Option<u32> {
    disks
        .disks
        .iter()
        .find(|d| d.drive_id.contains(target))
        .map(|d| d.celsius)
}

pub struct TelemetryView {
    temperatures: Arc<TemperatureStore>,
    performance: Arc<PerformanceStore>,
    external_gpu: bool,
    disk_target: String,
    gauges: Gauges,
    ticking: bool,
}

impl TelemetryView {
    pub fn new(
        temperatures: Arc<TemperatureStore>,
        performance: Arc<PerformanceStore>,
        external_gpu: bool,
        disk_target: impl Into<String>,
    ) -> Self {
        Self {
            temperatures,
            performance,
            external_gpu,
            disk_target: disk_target.into(),
            gauges: Gauges::default(),
            ticking: false,
        }
    }

    pub fn resume(&mut self) {
        self.ticking = true;
    }

    pub fn pause(&mut self) {
        self.ticking = false;
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn gauges(&self) -> &Gauges {
        &self.gauges
    }

    pub fn tick(&mut self) -> Option<&Gauges> {
        if !self.ticking {
            return None;
        }

        let temps = self.temperatures.read();
        let perf = self.performance.read();

        let cpu = mean_core_temperature(&temps.cpu);
        self.gauges.cpu_temp_celsius = cpu;
        self.gauges.gpu_temp_celsius = gpu_display_temperature(&temps.gpu, cpu, self.external_gpu);
        if let Some(disk) = select_disk_temperature(&temps.disks, &self.disk_target) {
            self.gauges.disk_temp_celsius = disk;
        }
        self.gauges.cpu_load_percent = perf.processor.load_percent.min(100);
        self.gauges.memory_load_percent = perf.memory.load_percent.min(100);
        self.gauges.temperature_cycle = temps.cycle;
        self.gauges.performance_cycle = perf.cycle;
        self.gauges.captured_at = temps
            .captured_at
            .map(|t| humantime::format_rfc3339_seconds(t).to_string());

        Some(&self.gauges)
    }
}
