use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Memory assumed when a configured size cannot be understood.
pub const DEFAULT_MEMORY_MB: u64 = 8192;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    NotFound,
    Starting,
    Stopped,
    Running,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A single observation of a VM. Never cached: every query goes back to the
/// backend because the VM changes underneath us.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    pub name: String,
    #[serde(default)]
    pub status: VmState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Free-form backend diagnostics (container state, transport hint, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnc_url: Option<String>,
}

impl VmStatus {
    pub fn new(name: impl Into<String>, status: VmState) -> Self {
        Self {
            name: name.into(),
            status,
            ip_address: None,
            detail: None,
            os: None,
            cpu: None,
            memory_size: None,
            disk_size: None,
            display: None,
            vnc_url: None,
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(name, VmState::NotFound)
    }

    pub fn unknown(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(name, VmState::Unknown)
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == VmState::Running
    }

    /// The address, if one has really been assigned.
    pub fn usable_ip(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && *ip != "0.0.0.0")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SharedDirectory {
    pub host_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl SharedDirectory {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            guest_path: None,
            read_only: false,
        }
    }

    pub fn with_guest_path(mut self, guest_path: impl Into<String>) -> Self {
        self.guest_path = Some(guest_path.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub guest: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub cpu: u32,
    pub memory_mb: u64,
    pub display: Option<String>,
    pub storage: Option<String>,
    pub shared_directories: Vec<SharedDirectory>,
    pub ports: Vec<PortMapping>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cpu: 4,
            memory_mb: DEFAULT_MEMORY_MB,
            display: None,
            storage: None,
            shared_directories: Vec::new(),
            ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub cpu: Option<u32>,
    pub memory_mb: Option<u64>,
    pub display: Option<String>,
    pub storage: Option<String>,
}

/// Where a VM image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub image: String,
    pub registry: String,
    pub organization: String,
}

/// Result of a mutating provider call. Backends that lack an operation say so
/// here instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum VmOutcome {
    Completed(serde_json::Value),
    Unsupported { operation: &'static str },
}

impl VmOutcome {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Normalises a human memory size to megabytes.
///
/// Bare integers are already megabytes; otherwise `<number><unit>` with unit
/// one of `GB`, `G`, `MB`, `M` (case-insensitive, optional space). Anything
/// else falls back to [`DEFAULT_MEMORY_MB`].
pub fn parse_memory(input: &str) -> u64 {
    match try_parse_memory(input) {
        Some(mb) => mb,
        None => {
            log::warn!("could not parse memory size '{input}', using {DEFAULT_MEMORY_MB}MB");
            DEFAULT_MEMORY_MB
        }
    }
}

fn try_parse_memory(input: &str) -> Option<u64> {
    let input = input.trim().to_ascii_uppercase();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim() {
        "GB" | "G" => 1024.0,
        "MB" | "M" | "" => 1.0,
        _ => return None,
    };

    let mb = value * multiplier;
    if mb.is_finite() && mb >= 0.0 {
        Some(mb.round() as u64)
    } else {
        None
    }
}
