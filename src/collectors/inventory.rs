use crate::collectors::system::{decode_cmd_stdout, run_nvidia_smi, GPU_MARKERS};
use crate::collectors::{HardwareInventory, VideoAdapter, VideoAdapterKind};
#[cfg(target_os = "linux")]
use std::fs;
use sysinfo::{ComponentExt, System, SystemExt};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SystemInventory {
    adapters: Vec<VideoAdapter>,
}

impl SystemInventory {
    pub fn new(adapters: Vec<VideoAdapter>) -> Self {
        let mut inventory = Self::default();
        for adapter in adapters {
            inventory.push(adapter);
        }
        inventory
    }

    pub fn detect() -> Self {
        let mut adapters = collect_nvidia_adapters();
        adapters.extend(collect_platform_adapters());
        if adapters.is_empty() {
            adapters = collect_component_adapters();
        }

        let inventory = Self::new(adapters);

        debug!(
            adapters = inventory.adapters.len(),
            external_gpu = inventory.has_external_gpu(),
            "video adapters detected"
        );
        inventory
    }

    fn push(&mut self, adapter: VideoAdapter) {
        if let Some(existing) = self
            .adapters
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(&adapter.name))
        {
            if adapter.kind == VideoAdapterKind::External {
                existing.kind = VideoAdapterKind::External;
            }
            return;
        }
        self.adapters.push(adapter);
    }
}

impl HardwareInventory for SystemInventory {
    fn video_adapters(&self) -> &[VideoAdapter] {
        &self.adapters
    }
}

pub fn classify_pci_vendor(vendor: &str) -> (&'static str, VideoAdapterKind) {
    match vendor.trim().to_ascii_lowercase().as_str() {
        "0x10de" => ("NVIDIA", VideoAdapterKind::External),
        "0x1002" => ("AMD", VideoAdapterKind::External),
        "0x8086" => ("Intel", VideoAdapterKind::Integrated),
        _ => ("Generic", VideoAdapterKind::Integrated),
    }
}

pub fn classify_adapter_name(name: &str) -> VideoAdapterKind {
    let lower = name.to_ascii_lowercase();
    let integrated = ["intel", "microsoft basic", "(tm) graphics", "vega 8", "virtual"]
        .iter()
        .any(|m| lower.contains(m));
    if integrated {
        VideoAdapterKind::Integrated
    } else {
        VideoAdapterKind::External
    }
}

fn collect_nvidia_adapters() -> Vec<VideoAdapter> {
    let Some(output) = run_nvidia_smi(&["--query-gpu=name", "--format=csv,noheader"]) else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    decode_cmd_stdout(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| VideoAdapter {
            name: name.to_string(),
            kind: VideoAdapterKind::External,
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn collect_platform_adapters() -> Vec<VideoAdapter> {
    let Ok(entries) = fs::read_dir("/sys/class/drm") else {
        return Vec::new();
    };

    let mut cards: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        // card0-DP-1 and friends are connectors of card0.
        .filter(|name| name.starts_with("card") && !name.contains('-'))
        .collect();
    cards.sort();

    cards
        .into_iter()
        .filter_map(|card| {
            let vendor = fs::read_to_string(format!("/sys/class/drm/{card}/device/vendor")).ok()?;
            let (vendor_name, kind) = classify_pci_vendor(&vendor);
            Some(VideoAdapter {
                name: format!("{vendor_name} {card}"),
                kind,
            })
        })
        .collect()
}

#[cfg(target_os = "windows")]
fn collect_platform_adapters() -> Vec<VideoAdapter> {
    use crate::collectors::system::run_powershell;

    let script = "Get-CimInstance Win32_VideoController -ErrorAction SilentlyContinue | ForEach-Object { $_.Name }";
    let Some(output) = run_powershell(script) else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    decode_cmd_stdout(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| VideoAdapter {
            name: name.to_string(),
            kind: classify_adapter_name(name),
        })
        .collect()
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn collect_platform_adapters() -> Vec<VideoAdapter> {
    Vec::new()
}

fn collect_component_adapters() -> Vec<VideoAdapter> {
    let mut system = System::new();
    system.refresh_components_list();
    system
        .components()
        .iter()
        .map(|c| c.label().to_string())
        .filter(|label| {
            let lower = label.to_lowercase();
            GPU_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(|label| VideoAdapter {
            kind: classify_adapter_name(&label),
            name: label,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, kind: VideoAdapterKind) -> VideoAdapter {
        VideoAdapter {
            name: name.to_string(),
            kind,
        }
    }

    #[test]
    fn external_gpu_present_when_any_adapter_is_external() {
        let inventory = SystemInventory::new(vec![
            adapter("Intel card0", VideoAdapterKind::Integrated),
            adapter("NVIDIA card1", VideoAdapterKind::External),
        ]);
        assert!(inventory.has_external_gpu());

        let inventory =
            SystemInventory::new(vec![adapter("Intel card0", VideoAdapterKind::Integrated)]);
        assert!(!inventory.has_external_gpu());
        assert!(!SystemInventory::default().has_external_gpu());
    }

    #[test]
    fn duplicate_names_merge_and_keep_external() {
        let inventory = SystemInventory::new(vec![
            adapter("GeForce RTX 3060", VideoAdapterKind::Integrated),
            adapter("geforce rtx 3060", VideoAdapterKind::External),
        ]);
        assert_eq!(inventory.video_adapters().len(), 1);
        assert!(inventory.has_external_gpu());
    }

    #[test]
    fn pci_vendors_are_classified() {
        assert_eq!(classify_pci_vendor("0x10de\n").1, VideoAdapterKind::External);
        assert_eq!(classify_pci_vendor("0x1002").1, VideoAdapterKind::External);
        assert_eq!(classify_pci_vendor("0x8086").1, VideoAdapterKind::Integrated);
        assert_eq!(classify_pci_vendor("0x1af4").1, VideoAdapterKind::Integrated);
    }

    #[test]
    fn adapter_names_are_classified() {
        assert_eq!(
            classify_adapter_name("Intel(R) UHD Graphics 630"),
            VideoAdapterKind::Integrated
        );
        assert_eq!(
            classify_adapter_name("AMD Radeon(TM) Graphics"),
            VideoAdapterKind::Integrated
        );
        assert_eq!(
            classify_adapter_name("NVIDIA GeForce GTX 1660"),
            VideoAdapterKind::External
        );
    }
}
