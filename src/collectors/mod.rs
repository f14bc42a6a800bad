pub mod inventory;
pub mod system;

use crate::state::{
    CpuTemperature, DiskTemperatureSet, GpuTemperature, MemoryPerformance, ProcessorPerformance,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no {0} sensor reported a value")]
    SensorUnavailable(&'static str),
    #[error("hardware backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },
}

/// One-shot temperature reads. Calls block until the hardware answers.
pub trait TemperatureProbe: Send + 'static {
    fn initialize(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    fn cpu_temperature(&mut self) -> Result<CpuTemperature, ProbeError>;

    fn gpu_temperature(&mut self) -> Result<GpuTemperature, ProbeError>;

    // Best-effort; an empty set means nothing could be read.
    fn disk_temperatures(&mut self) -> DiskTemperatureSet;
}

pub trait PerformanceCounter: Send + 'static {
    fn initialize(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    fn memory_performance(&mut self) -> Result<MemoryPerformance, ProbeError>;

    fn processor_performance(&mut self) -> Result<ProcessorPerformance, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAdapterKind {
    Integrated,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAdapter {
    pub name: String,
    pub kind: VideoAdapterKind,
}

pub trait HardwareInventory {
    fn video_adapters(&self) -> &[VideoAdapter];

    fn has_external_gpu(&self) -> bool {
        self.video_adapters()
            .iter()
            .any(|a| a.kind == VideoAdapterKind::External)
    }
}
