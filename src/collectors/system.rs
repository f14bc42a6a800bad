use crate::collectors::{PerformanceCounter, ProbeError, TemperatureProbe};
use crate::state::{
    CpuTemperature, DiskTemperatureSet, GpuTemperature, MemoryPerformance, ProcessorPerformance,
};
#[cfg(target_os = "linux")]
use std::fs;
use std::process::Command;
use sysinfo::{ComponentExt, CpuExt, System, SystemExt};
use tracing::debug;

const CPU_MARKERS: [&str; 7] = [
    "cpu",
    "package",
    "tctl",
    "tdie",
    "coretemp",
    "k10temp",
    "x86_pkg_temp",
];
pub(crate) const GPU_MARKERS: [&str; 4] = ["gpu", "nvidia", "amdgpu", "radeon"];
const DISK_MARKERS: [&str; 6] = ["nvme", "drivetemp", "hdd", "ssd", "disk", "sata"];

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub label: String,
    pub celsius: f32,
}

impl SensorReading {
    fn is_plausible(&self) -> bool {
        self.celsius.is_finite() && self.celsius > 0.0 && self.celsius <= 130.0
    }

    fn label_has(&self, markers: &[&str]) -> bool {
        let label = self.label.to_lowercase();
        markers.iter().any(|m| label.contains(m))
    }

    // `Core 3`, not `coretemp Package id 0`.
    fn is_core(&self) -> bool {
        self.label
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "core")
    }

    fn whole_degrees(&self) -> u32 {
        self.celsius.round() as u32
    }
}

pub struct SystemProbe {
    system: System,
    nvidia_smi: bool,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            nvidia_smi: false,
        }
    }

    fn ensure_supported() -> Result<(), ProbeError> {
        if System::IS_SUPPORTED {
            Ok(())
        } else {
            Err(ProbeError::BackendUnavailable(
                "sysinfo does not support this operating system".to_string(),
            ))
        }
    }

    fn sensor_readings(&mut self) -> Vec<SensorReading> {
        self.system.refresh_components();
        let mut readings: Vec<SensorReading> = self
            .system
            .components()
            .iter()
            .map(|c| SensorReading {
                label: c.label().to_string(),
                celsius: c.temperature(),
            })
            .collect();

        if !readings
            .iter()
            .any(|r| r.is_plausible() && r.label_has(&CPU_MARKERS))
        {
            readings.extend(collect_linux_thermal_zones());
        }
        readings
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureProbe for SystemProbe {
    fn initialize(&mut self) -> Result<(), ProbeError> {
        Self::ensure_supported()?;
        self.system.refresh_components_list();
        self.nvidia_smi = nvidia_smi_gpu_temperature().is_ok();
        debug!(
            components = self.system.components().len(),
            nvidia_smi = self.nvidia_smi,
            "temperature backend ready"
        );
        Ok(())
    }

    fn cpu_temperature(&mut self) -> Result<CpuTemperature, ProbeError> {
        let readings = self.sensor_readings();
        cpu_core_temperatures(&readings).ok_or(ProbeError::SensorUnavailable("cpu"))
    }

    fn gpu_temperature(&mut self) -> Result<GpuTemperature, ProbeError> {
        if self.nvidia_smi {
            return nvidia_smi_gpu_temperature();
        }
        let readings = self.sensor_readings();
        gpu_temperature_from(&readings).ok_or(ProbeError::SensorUnavailable("gpu"))
    }

    fn disk_temperatures(&mut self) -> DiskTemperatureSet {
        let windows = collect_windows_disk_temperatures();
        if !windows.is_empty() {
            return windows;
        }
        let readings = self.sensor_readings();
        disk_temperatures_from(&readings)
    }
}

impl PerformanceCounter for SystemProbe {
    fn initialize(&mut self) -> Result<(), ProbeError> {
        Self::ensure_supported()?;
        self.system.refresh_memory();
        // cpu_usage is a delta between refreshes; prime the first sample.
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(ProbeError::BackendUnavailable(
                "no processors reported".to_string(),
            ));
        }
        Ok(())
    }

    fn memory_performance(&mut self) -> Result<MemoryPerformance, ProbeError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProbeError::SensorUnavailable("memory"));
        }
        Ok(MemoryPerformance::from_sizes(
            total,
            self.system.available_memory(),
        ))
    }

    fn processor_performance(&mut self) -> Result<ProcessorPerformance, ProbeError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(ProbeError::SensorUnavailable("processor"));
        }
        let usage = self.system.global_cpu_info().cpu_usage();
        if !usage.is_finite() {
            return Err(ProbeError::SensorUnavailable("processor"));
        }
        Ok(ProcessorPerformance {
            load_percent: usage.round().clamp(0.0, 100.0) as u32,
        })
    }
}

pub fn cpu_core_temperatures(readings: &[SensorReading]) -> Option<CpuTemperature> {
    let cpu: Vec<&SensorReading> = readings
        .iter()
        .filter(|r| r.is_plausible() && !r.label_has(&GPU_MARKERS))
        .collect();

    let cores: Vec<u32> = cpu
        .iter()
        .filter(|r| r.is_core())
        .map(|r| r.whole_degrees())
        .collect();
    if !cores.is_empty() {
        return Some(CpuTemperature::new(cores));
    }

    cpu.iter()
        .filter(|r| r.label_has(&CPU_MARKERS))
        .map(|r| r.whole_degrees())
        .max()
        .map(|package| CpuTemperature::new(vec![package]))
}

pub fn gpu_temperature_from(readings: &[SensorReading]) -> Option<GpuTemperature> {
    readings
        .iter()
        .find(|r| r.is_plausible() && r.label_has(&GPU_MARKERS))
        .map(|r| GpuTemperature {
            celsius: r.whole_degrees(),
        })
}

pub fn disk_temperatures_from(readings: &[SensorReading]) -> DiskTemperatureSet {
    DiskTemperatureSet::from_entries(
        readings
            .iter()
            .filter(|r| r.is_plausible() && r.label_has(&DISK_MARKERS))
            .enumerate()
            .map(|(i, r)| (format!("{}:{}", r.label, i), r.whole_degrees())),
    )
}

fn nvidia_smi_gpu_temperature() -> Result<GpuTemperature, ProbeError> {
    let output = run_nvidia_smi(&[
        "--query-gpu=temperature.gpu",
        "--format=csv,noheader,nounits",
    ])
    .ok_or_else(|| ProbeError::Command {
        command: "nvidia-smi".to_string(),
        reason: "not found".to_string(),
    })?;
    if !output.status.success() {
        return Err(ProbeError::Command {
            command: "nvidia-smi".to_string(),
            reason: format!("exited with {}", output.status),
        });
    }

    let text = decode_cmd_stdout(&output.stdout);
    text.lines()
        .next()
        .and_then(parse_f64_loose)
        .filter(|v| *v > 0.0)
        .map(|v| GpuTemperature {
            celsius: v.round() as u32,
        })
        .ok_or(ProbeError::SensorUnavailable("gpu"))
}

#[cfg(target_os = "linux")]
fn collect_linux_thermal_zones() -> Vec<SensorReading> {
    let Ok(entries) = fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let Ok(raw) = fs::read_to_string(path.join("temp")) else {
            continue;
        };
        let Ok(v) = raw.trim().parse::<f32>() else {
            continue;
        };
        let label = fs::read_to_string(path.join("type"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| name.to_string());
        out.push(SensorReading {
            label,
            celsius: if v > 1000.0 { v / 1000.0 } else { v },
        });
    }
    out
}

#[cfg(not(target_os = "linux"))]
fn collect_linux_thermal_zones() -> Vec<SensorReading> {
    Vec::new()
}

#[cfg(target_os = "windows")]
fn collect_windows_disk_temperatures() -> DiskTemperatureSet {
    let script = "Get-PhysicalDisk -ErrorAction SilentlyContinue | ForEach-Object { $r = $_ | Get-StorageReliabilityCounter -ErrorAction SilentlyContinue; if ($null -ne $r) { \"$($_.DeviceId)|$($r.Temperature)\" } }";
    let Some(output) = run_powershell(script) else {
        return DiskTemperatureSet::default();
    };
    if !output.status.success() {
        return DiskTemperatureSet::default();
    }

    let text = decode_cmd_stdout(&output.stdout);
    DiskTemperatureSet::from_entries(text.lines().filter_map(|line| {
        let mut parts = line.splitn(2, '|').map(str::trim);
        let device = parts.next()?;
        let celsius = parse_f64_loose(parts.next()?)?;
        if device.is_empty() || celsius <= 0.0 {
            return None;
        }
        Some((format!("PhysicalDrive{device}"), celsius.round() as u32))
    }))
}

#[cfg(not(target_os = "windows"))]
fn collect_windows_disk_temperatures() -> DiskTemperatureSet {
    DiskTemperatureSet::default()
}

pub(crate) fn run_nvidia_smi(args: &[&str]) -> Option<std::process::Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}

#[cfg(target_os = "windows")]
pub(crate) fn run_powershell(script: &str) -> Option<std::process::Output> {
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    if let Ok(output) = Command::new("powershell")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
    {
        return Some(output);
    }

    Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
        .ok()
}

pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

pub(crate) fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    // PowerShell on older Windows writes UTF-16LE.
    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}
