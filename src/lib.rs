//! Drive a remote computer: provision or attach to a VM, keep a resilient
//! command channel to the control server inside it, and operate its mouse,
//! keyboard, screen, clipboard, filesystem and shell.

pub mod channel;
pub mod config;
pub mod error;
pub mod interface;
pub mod models;
pub mod provider;
pub mod retry;
pub mod session;

/// Port the computer server listens on inside the guest.
pub const DEFAULT_CONTROL_PORT: u16 = 8000;

/// Address used when attaching to a control server on this machine.
pub const LOCALHOST: &str = "127.0.0.1";

pub use channel::{CommandChannel, ConnectionState, Connection, Connector, WsConnector};
pub use config::{ChannelConfig, Config, ProviderConfig, SessionConfig};
pub use error::{ComputerError, Result};
pub use interface::{ControlInterface, ScreenshotOptions};
pub use models::{MouseButton, OsType, Rect, ScreenSize, VmState, VmStatus};
pub use provider::{create_provider, LumeProvider, ProviderType, VmProvider};
pub use retry::RetryPolicy;
pub use session::{Session, SessionState};
