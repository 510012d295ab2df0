use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    channel::{CommandChannel, Connector, WsConnector},
    config::{ChannelConfig, Config, ProviderConfig, SessionConfig},
    error::{ComputerError, Result},
    interface::ControlInterface,
    models::{parse_memory, ImageSpec, RunOptions, SharedDirectory, VmState},
    provider::{create_provider, VmProvider},
    LOCALHOST,
};

/// Builds the transport for the computer server at a host.
pub type ConnectorFactory =
    Arc<dyn Fn(&str, &ChannelConfig) -> Result<Arc<dyn Connector>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

#[derive(Clone)]
enum Backing {
    Vm(Arc<dyn VmProvider>),
    /// A computer server already running on this machine.
    Host,
}

/// One logical remote computer: provisions (or attaches to) it, waits until
/// it can be driven, and hands out its [`ControlInterface`].
pub struct Session {
    name: String,
    config: SessionConfig,
    channel_config: ChannelConfig,
    ip_retry_delay: Duration,
    backing: Backing,
    connector_factory: ConnectorFactory,
    // only one start/stop transition runs at a time
    lifecycle: Mutex<()>,
    state: RwLock<SessionState>,
    interface: RwLock<Option<ControlInterface>>,
}

impl Session {
    /// Session from a full config; host-attach mode skips provider creation.
    pub fn new(config: Config) -> Result<Self> {
        let Config {
            channel,
            provider,
            session,
        } = config;

        if session.use_host_computer_server {
            Ok(Self::host(session, channel))
        } else {
            let backend = create_provider(&provider)?;
            Ok(Self::with_provider(session, channel, &provider, backend))
        }
    }

    pub fn with_provider(
        config: SessionConfig,
        channel_config: ChannelConfig,
        provider_config: &ProviderConfig,
        provider: Arc<dyn VmProvider>,
    ) -> Self {
        Self::build(
            config,
            channel_config,
            provider_config.ip_retry_delay(),
            Backing::Vm(provider),
        )
    }

    pub fn host(config: SessionConfig, channel_config: ChannelConfig) -> Self {
        Self::build(
            config,
            channel_config,
            ProviderConfig::default().ip_retry_delay(),
            Backing::Host,
        )
    }

    fn build(
        config: SessionConfig,
        channel_config: ChannelConfig,
        ip_retry_delay: Duration,
        backing: Backing,
    ) -> Self {
        let name = config.name.clone().unwrap_or_else(|| {
            let id = Uuid::new_v4().simple().to_string();
            format!("computer-{}", &id[..8])
        });
        Self {
            name,
            config,
            channel_config,
            ip_retry_delay,
            backing,
            connector_factory: Arc::new(websocket_connector),
            lifecycle: Mutex::new(()),
            state: RwLock::new(SessionState::Unstarted),
            interface: RwLock::new(None),
        }
    }

    /// Replaces how the interface's transport is built.
    pub fn with_connector_factory(mut self, factory: ConnectorFactory) -> Self {
        self.connector_factory = factory;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_host_attached(&self) -> bool {
        matches!(self.backing, Backing::Host)
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        debug!("{}: {:?} -> {next:?}", self.name, *state);
        *state = next;
    }

    /// The interface of a started session.
    pub async fn interface(&self) -> Result<ControlInterface> {
        self.interface
            .read()
            .await
            .clone()
            .ok_or(ComputerError::NotStarted)
    }

    /// Brings the computer up. Calling it on a ready session does nothing.
    /// On failure the session is left unstarted, so calling it again is safe.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.lifecycle.lock().await;
        if self.state().await == SessionState::Ready {
            info!("{} is already started", self.name);
            return Ok(());
        }

        self.set_state(SessionState::Starting).await;
        let result = match self.config.start_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.bring_up())
                .await
                .unwrap_or_else(|_| Err(ComputerError::timeout("session start", limit))),
            None => self.bring_up().await,
        };

        match result {
            Ok(interface) => {
                info!("{} ready at {}", self.name, interface.host());
                *self.interface.write().await = Some(interface);
                self.set_state(SessionState::Ready).await;
                Ok(())
            }
            Err(e) => {
                error!("{} failed to start: {e}", self.name);
                self.set_state(SessionState::Unstarted).await;
                Err(ComputerError::SessionStartFailed { cause: Box::new(e) })
            }
        }
    }

    async fn bring_up(&self) -> Result<ControlInterface> {
        let host = match &self.backing {
            Backing::Host => {
                info!("attaching {} to the local computer server", self.name);
                LOCALHOST.to_string()
            }
            Backing::Vm(provider) => {
                self.ensure_vm(provider.as_ref()).await?;
                info!("waiting for {} to get an address", self.name);
                provider.get_ip(&self.name, self.ip_retry_delay).await?
            }
        };

        let connector = (self.connector_factory)(&host, &self.channel_config)?;
        let channel = CommandChannel::new(connector, self.channel_config.clone());
        let interface = ControlInterface::with_channel(&host, self.config.os_type, channel);

        // an address does not mean the server inside the guest is listening
        if let Err(e) = interface.wait_for_ready(self.config.ready_timeout()).await {
            interface.force_close().await;
            return Err(e);
        }
        Ok(interface)
    }

    /// Runs the VM unless it is already up or on its way.
    async fn ensure_vm(&self, provider: &dyn VmProvider) -> Result<()> {
        let status = provider.get_vm(&self.name).await?;
        match status.status {
            VmState::Running | VmState::Starting => {
                info!("reusing {} ({:?})", self.name, status.status);
                return Ok(());
            }
            VmState::NotFound if provider.capabilities().pull => {
                let image = ImageSpec {
                    image: self.config.image.clone(),
                    registry: self.config.registry.clone(),
                    organization: self.config.organization.clone(),
                };
                provider.pull_image(&self.name, &image).await?;
            }
            _ => {}
        }

        let outcome = provider.run_vm(&self.name, &self.run_options()).await?;
        debug!("run {}: {outcome:?}", self.name);
        Ok(())
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            cpu: self.config.cpu,
            memory_mb: parse_memory(&self.config.memory),
            display: Some(self.config.display.clone()),
            storage: self.config.storage.clone(),
            shared_directories: self
                .config
                .shared_directories
                .iter()
                .map(SharedDirectory::new)
                .collect(),
            ports: Vec::new(),
        }
    }

    /// Closes the interface and, for provisioned VMs, stops the VM. Problems
    /// are logged; shutdown always completes.
    pub async fn stop(&self) {
        let _transition = self.lifecycle.lock().await;
        let state = self.state().await;
        if matches!(state, SessionState::Unstarted | SessionState::Stopped) {
            debug!("{} is not running ({state:?})", self.name);
            return;
        }

        self.set_state(SessionState::Stopping).await;
        if let Some(interface) = self.interface.write().await.take() {
            interface.close().await;
        }
        if let Backing::Vm(provider) = &self.backing {
            match provider.stop_vm(&self.name).await {
                Ok(outcome) => debug!("stopped {}: {outcome:?}", self.name),
                Err(e) => warn!("could not stop {}: {e}", self.name),
            }
        }
        self.set_state(SessionState::Stopped).await;
        info!("{} stopped", self.name);
    }

    /// Screenshot pixel coordinates to screen coordinates.
    pub async fn to_screen_coordinates(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.interface().await?.to_screen_coordinates(x, y).await
    }

    /// Screen coordinates to screenshot pixel coordinates.
    pub async fn to_screenshot_coordinates(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        self.interface().await?.to_screenshot_coordinates(x, y).await
    }
}

fn websocket_connector(host: &str, config: &ChannelConfig) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(WsConnector::new(host, config.port, &config.path)?))
}
