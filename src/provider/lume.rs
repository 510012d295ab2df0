//! Backend driving the lume VM control plane over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::{
    config::ProviderConfig,
    error::{ComputerError, Result},
    models::{ImageSpec, RunOptions, SharedDirectory, UpdateOptions, VmOutcome, VmState, VmStatus},
    provider::{ProviderCapabilities, ProviderType, VmProvider},
};

/// Image pulls download whole disk images.
const PULL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Why a control-plane call never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportIssue {
    ConnectionRefused,
    Timeout,
    EmptyReply,
    Network,
    Other,
}

impl TransportIssue {
    /// Reassuring explanation for logs while a VM boots.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::ConnectionRefused => "API server is still starting up",
            Self::Timeout => "API server is slow to respond",
            Self::EmptyReply => "API server is starting but not fully initialized",
            Self::Network => "network error; check networking",
            Self::Other => "unexpected transport error",
        }
    }
}

pub fn classify_transport_error(e: &reqwest::Error) -> TransportIssue {
    if e.is_timeout() {
        return TransportIssue::Timeout;
    }
    if e.is_connect() {
        return if io_kind(e) == Some(std::io::ErrorKind::ConnectionRefused) {
            TransportIssue::ConnectionRefused
        } else {
            TransportIssue::Network
        };
    }
    if e.is_request() || e.is_body() {
        // connected, but the server hung up before answering
        return TransportIssue::EmptyReply;
    }
    TransportIssue::Other
}

fn io_kind(e: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = err.source();
    }
    None
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunBody {
    cpu: u32,
    memory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    shared_directories: Vec<SharedDirectory>,
}

#[derive(Debug, Serialize)]
struct StorageBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullBody<'a> {
    image: &'a str,
    name: &'a str,
    registry: &'a str,
    organization: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LumeProvider {
    client: Client,
    base: Url,
    storage: Option<String>,
}

impl LumeProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base: Url::parse(&config.base_url())?,
            storage: config.storage.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Base URL extended by `segments`, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ComputerError::Provider(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn vm_url(&self, name: &str, action: Option<&str>) -> Result<Url> {
        match action {
            Some(action) => self.url(&["vms", name, action]),
            None => self.url(&["vms", name]),
        }
    }

    fn with_storage(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.storage {
            Some(storage) => request.query(&[("storage", storage)]),
            None => request,
        }
    }

    /// Sends a mutating call. Unlike status queries these fail loudly: a run
    /// or stop that never reached lume did not happen.
    async fn mutate(&self, what: &str, request: RequestBuilder) -> Result<VmOutcome> {
        let response = request.send().await.map_err(|e| {
            let issue = classify_transport_error(&e);
            ComputerError::Provider(format!("{what}: {} ({e})", issue.hint()))
        })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("lume {what} failed with {status}: {text}");
            return Err(ComputerError::Provider(format!("{what} failed with {status}: {text}")));
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(VmOutcome::Completed(value))
    }
}

/// Keeps only shared directories whose host side exists.
async fn existing_shared_directories(dirs: &[SharedDirectory]) -> Vec<SharedDirectory> {
    let mut kept = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let exists = tokio::fs::metadata(&dir.host_path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if exists {
            kept.push(dir.clone());
        } else {
            warn!("shared directory {:?} does not exist; skipping", dir.host_path);
        }
    }
    kept
}

#[async_trait]
impl VmProvider for LumeProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Lume
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            list: true,
            update: true,
            pull: true,
        }
    }

    async fn get_vm(&self, name: &str) -> Result<VmStatus> {
        let request = self.with_storage(self.client.get(self.vm_url(name, None)?));
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let issue = classify_transport_error(&e);
                debug!("status query for {name}: {} ({e})", issue.hint());
                return Ok(VmStatus::unknown(name, issue.hint()));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                let issue = classify_transport_error(&e);
                return Ok(VmStatus::unknown(name, issue.hint()));
            }
        };

        if status == StatusCode::NOT_FOUND {
            return Ok(VmStatus::not_found(name));
        }
        if !status.is_success() {
            let mut vm = VmStatus::new(name, VmState::Error);
            vm.detail = Some(format!("{status}: {}", text.trim()));
            return Ok(vm);
        }
        if text.trim().is_empty() {
            return Ok(VmStatus::unknown(name, TransportIssue::EmptyReply.hint()));
        }

        match serde_json::from_str::<VmStatus>(&text) {
            Ok(vm) => Ok(vm),
            Err(e) => {
                debug!("unparsable status for {name}: {e}: {text}");
                Ok(VmStatus::unknown(name, format!("unparsable status: {e}")))
            }
        }
    }

    async fn list_vms(&self) -> Result<Vec<VmStatus>> {
        let request = self.with_storage(self.client.get(self.url(&["vms"])?));
        let response = request.send().await.map_err(|e| {
            let issue = classify_transport_error(&e);
            ComputerError::Provider(format!("list: {} ({e})", issue.hint()))
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ComputerError::Provider(format!("list failed with {status}: {text}")));
        }
        Ok(response.json().await?)
    }

    async fn run_vm(&self, name: &str, options: &RunOptions) -> Result<VmOutcome> {
        if !options.ports.is_empty() {
            warn!("lume does not map ports; ignoring {:?}", options.ports);
        }
        let body = RunBody {
            cpu: options.cpu,
            memory: format!("{}MB", options.memory_mb),
            display: options.display.clone(),
            storage: options.storage.clone().or_else(|| self.storage.clone()),
            shared_directories: existing_shared_directories(&options.shared_directories).await,
        };
        info!("starting {name} with {} cpus and {}", body.cpu, body.memory);
        let request = self.client.post(self.vm_url(name, Some("run"))?).json(&body);
        self.mutate("run", request).await
    }

    async fn stop_vm(&self, name: &str) -> Result<VmOutcome> {
        info!("stopping {name}");
        let body = StorageBody {
            storage: self.storage.clone(),
        };
        let request = self.client.post(self.vm_url(name, Some("stop"))?).json(&body);
        self.mutate("stop", request).await
    }

    async fn update_vm(&self, name: &str, options: &UpdateOptions) -> Result<VmOutcome> {
        let body = UpdateBody {
            cpu: options.cpu,
            memory: options.memory_mb.map(|mb| format!("{mb}MB")),
            display: options.display.clone(),
            storage: options.storage.clone().or_else(|| self.storage.clone()),
        };
        let request = self.client.post(self.vm_url(name, Some("update"))?).json(&body);
        self.mutate("update", request).await
    }

    async fn pull_image(&self, name: &str, image: &ImageSpec) -> Result<VmOutcome> {
        info!("pulling {} from {}/{} as {name}", image.image, image.registry, image.organization);
        let body = PullBody {
            image: &image.image,
            name,
            registry: &image.registry,
            organization: &image.organization,
            storage: self.storage.clone(),
        };
        let request = self
            .client
            .post(self.url(&["pull"])?)
            .json(&body)
            .timeout(PULL_TIMEOUT);
        self.mutate("pull", request).await
    }
}
