//! Pluggable VM backends behind one lifecycle interface.

pub mod lume;

use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    config::ProviderConfig,
    error::{ComputerError, Result},
    models::{ImageSpec, RunOptions, UpdateOptions, VmOutcome, VmStatus},
    retry::RetryPolicy,
};

pub use lume::{classify_transport_error, LumeProvider, TransportIssue};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Lume,
}

impl FromStr for ProviderType {
    type Err = ComputerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lume" => Ok(Self::Lume),
            other => Err(ComputerError::Provider(format!("unknown provider type '{other}'"))),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Lume => f.write_str("lume"),
        }
    }
}

/// Optional operations a backend actually implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderCapabilities {
    pub list: bool,
    pub update: bool,
    pub pull: bool,
}

/// Lifecycle operations over one kind of VM backend.
///
/// "Does not exist yet" and "not reachable yet" are normal states while a VM
/// is provisioned, so `get_vm` reports them as a [`VmStatus`] rather than an
/// error. Operations against one VM name must not run concurrently.
#[async_trait]
pub trait VmProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn get_vm(&self, name: &str) -> Result<VmStatus>;

    async fn list_vms(&self) -> Result<Vec<VmStatus>> {
        Err(ComputerError::Unsupported {
            operation: "list".into(),
            provider: self.provider_type().to_string(),
        })
    }

    async fn run_vm(&self, name: &str, options: &RunOptions) -> Result<VmOutcome>;

    async fn stop_vm(&self, name: &str) -> Result<VmOutcome>;

    /// Best effort; backends without it answer `Unsupported`.
    async fn update_vm(&self, _name: &str, _options: &UpdateOptions) -> Result<VmOutcome> {
        Ok(VmOutcome::Unsupported { operation: "update" })
    }

    async fn pull_image(&self, _name: &str, _image: &ImageSpec) -> Result<VmOutcome> {
        Ok(VmOutcome::Unsupported { operation: "pull" })
    }

    /// Polls until the VM reports a real address. Never times out; callers
    /// that need a deadline wrap this future in their own.
    async fn get_ip(&self, name: &str, retry_delay: Duration) -> Result<String> {
        let mut backoff = RetryPolicy::poll(retry_delay).backoff();
        loop {
            let status = self.get_vm(name).await?;
            if let Some(ip) = status.usable_ip() {
                info!("{name} has address {ip}");
                return Ok(ip.to_string());
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempts();
            let detail = status.detail.as_deref().unwrap_or("no details");
            if attempt % 10 == 0 {
                info!("still waiting for {name} to get an address (attempt {attempt}, {:?}: {detail})", status.status);
            } else {
                debug!("no address for {name} yet ({:?}: {detail})", status.status);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn VmProvider>> {
    match config.provider_type {
        ProviderType::Lume => Ok(Arc::new(LumeProvider::new(config)?)),
    }
}
