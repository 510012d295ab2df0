use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::{OsType, ScreenSize},
    provider::ProviderType,
    retry::RetryPolicy,
    DEFAULT_CONTROL_PORT,
};

pub const CONFIG_FILE_NAME: &str = "remote-computer.toml";
pub const ENV_PREFIX: &str = "REMOTE_COMPUTER_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub provider: ProviderConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Defaults, then `<config dir>/remote-computer.toml` if present, then
    /// `REMOTE_COMPUTER_*` environment variables (`__` separates sections).
    pub fn load() -> Result<Self> {
        let file = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME));
        Self::figment(file.as_deref())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::figment(Some(path.as_ref()))
    }

    fn figment(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            if file.exists() {
                log::info!("reading config from {file:?}");
                figment = figment.merge(Toml::file(file));
            }
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?; // boxed because the error size from figment is large

        log::debug!("using config: {config:?}");
        Ok(config)
    }
}

/// Control channel tuning. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub port: u16,
    pub path: String,
    pub connect_timeout_secs: f64,
    pub ping_interval_secs: f64,
    pub ping_timeout_secs: f64,
    pub min_reconnect_interval_secs: f64,
    pub backoff_base_secs: f64,
    pub backoff_max_secs: f64,
    pub command_attempts: u32,
    pub command_retry_delay_secs: f64,
    pub command_timeout_secs: f64,
    /// How long one command attempt waits for a missing connection.
    pub connection_wait_secs: f64,
    pub ready_poll_interval_secs: f64,
    /// During an outage, one reconnect failure in this many is logged at info.
    pub log_every: u32,
    /// The remote server is shared with other clients; `close()` then leaves
    /// the transport open.
    pub shared_server: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONTROL_PORT,
            path: "/ws".to_string(),
            connect_timeout_secs: 30.0,
            ping_interval_secs: 5.0,
            ping_timeout_secs: 10.0,
            min_reconnect_interval_secs: 0.5,
            backoff_base_secs: 1.0,
            backoff_max_secs: 30.0,
            command_attempts: 3,
            command_retry_delay_secs: 1.0,
            command_timeout_secs: 120.0,
            connection_wait_secs: 10.0,
            ready_poll_interval_secs: 1.0,
            log_every: 500,
            shared_server: true,
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        secs(self.ping_timeout_secs)
    }

    pub fn min_reconnect_interval(&self) -> Duration {
        secs(self.min_reconnect_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        secs(self.command_timeout_secs)
    }

    pub fn connection_wait(&self) -> Duration {
        secs(self.connection_wait_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        secs(self.ready_poll_interval_secs)
    }

    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: secs(self.backoff_base_secs),
            max_delay: secs(self.backoff_max_secs),
            ..RetryPolicy::reconnect()
        }
    }

    pub fn command_policy(&self) -> RetryPolicy {
        let delay = secs(self.command_retry_delay_secs);
        RetryPolicy {
            max_attempts: Some(self.command_attempts.max(1)),
            base_delay: delay,
            max_delay: delay,
            ..RetryPolicy::command()
        }
    }
}

/// VM control-plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub host: String,
    pub port: u16,
    pub storage: Option<String>,
    pub connect_timeout_secs: f64,
    pub request_timeout_secs: f64,
    pub ip_retry_delay_secs: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::Lume,
            host: "localhost".to_string(),
            port: 7777,
            storage: None,
            connect_timeout_secs: 15.0,
            request_timeout_secs: 20.0,
            ip_retry_delay_secs: 2.0,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/lume", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_secs)
    }

    pub fn ip_retry_delay(&self) -> Duration {
        secs(self.ip_retry_delay_secs)
    }
}

/// What computer to bring up and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// VM name; generated when absent.
    pub name: Option<String>,
    pub display: String,
    pub memory: String,
    pub cpu: u32,
    pub os_type: OsType,
    pub image: String,
    pub registry: String,
    pub organization: String,
    pub storage: Option<String>,
    pub shared_directories: Vec<PathBuf>,
    /// Attach to a control server already running on this machine instead of
    /// provisioning a VM.
    pub use_host_computer_server: bool,
    pub ready_timeout_secs: f64,
    /// Deadline for the whole start sequence; unbounded when absent.
    pub start_timeout_secs: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            display: "1024x768".to_string(),
            memory: "8GB".to_string(),
            cpu: 4,
            os_type: OsType::Macos,
            image: "macos-sequoia-cua:latest".to_string(),
            registry: "ghcr.io".to_string(),
            organization: "trycua".to_string(),
            storage: None,
            shared_directories: Vec::new(),
            use_host_computer_server: false,
            ready_timeout_secs: 60.0,
            start_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn ready_timeout(&self) -> Duration {
        secs(self.ready_timeout_secs)
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_secs.map(secs)
    }

    /// Parses `display` as `<width>x<height>`.
    pub fn display_size(&self) -> Option<ScreenSize> {
        let (w, h) = self.display.trim().split_once(['x', 'X'])?;
        Some(ScreenSize::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_constants() {
        let config = ChannelConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.ping_interval(), Duration::from_secs(5));
        assert_eq!(config.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.min_reconnect_interval(), Duration::from_millis(500));
        assert_eq!(config.command_policy().max_attempts, Some(3));
        assert_eq!(config.reconnect_policy().max_delay, Duration::from_secs(30));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[provider]
host = "10.0.0.5"
port = 7000

[session]
os_type = "linux"
memory = "16GB"
use_host_computer_server = true
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.provider.base_url(), "http://10.0.0.5:7000/lume");
        assert_eq!(config.session.os_type, OsType::Linux);
        assert_eq!(config.session.memory, "16GB");
        assert!(config.session.use_host_computer_server);
        assert_eq!(config.channel.port, DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session.cpu, 4);
        assert_eq!(config.provider.port, 7777);
    }

    #[test]
    fn display_parsing() {
        let mut session = SessionConfig::default();
        assert_eq!(session.display_size(), Some(ScreenSize::new(1024, 768)));
        session.display = "1920 x 1080".into();
        assert_eq!(session.display_size(), Some(ScreenSize::new(1920, 1080)));
        session.display = "wide".into();
        assert_eq!(session.display_size(), None);
    }
}
