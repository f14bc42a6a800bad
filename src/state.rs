use serde::Serialize;
use std::time::SystemTime;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CpuTemperature {
    pub cores: Vec<u32>,
}

impl CpuTemperature {
    pub fn new(cores: Vec<u32>) -> Self {
        Self { cores }
    }

    pub fn core_count(&self) -> u32 {
        self.cores.len() as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GpuTemperature {
    pub celsius: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskTemperature {
    pub drive_id: String,
    pub celsius: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskTemperatureSet {
    pub disks: Vec<DiskTemperature>,
}

impl DiskTemperatureSet {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
        let mut disks: Vec<DiskTemperature> = Vec::new();
        for (drive_id, celsius) in entries {
            if disks.iter().any(|d| d.drive_id == drive_id) {
                continue;
            }
            disks.push(DiskTemperature { drive_id, celsius });
        }
        Self { disks }
    }

    pub fn count(&self) -> u32 {
        self.disks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryPerformance {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub load_percent: u32,
}

impl MemoryPerformance {
    pub fn from_sizes(total_bytes: u64, available_bytes: u64) -> Self {
        let available_bytes = available_bytes.min(total_bytes);
        let load_percent = if total_bytes > 0 {
            ((total_bytes - available_bytes) as u128 * 100 / total_bytes as u128) as u32
        } else {
            0
        };
        Self {
            total_bytes,
            available_bytes,
            load_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorPerformance {
    pub load_percent: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemperatureSnapshot {
    pub cycle: u64,
    pub captured_at: Option<SystemTime>,
    pub cpu: CpuTemperature,
    pub gpu: GpuTemperature,
    pub disks: DiskTemperatureSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceSnapshot {
    pub cycle: u64,
    pub captured_at: Option<SystemTime>,
    pub memory: MemoryPerformance,
    pub processor: ProcessorPerformance,
}
