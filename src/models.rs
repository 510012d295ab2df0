pub mod command;
pub mod geometry;
pub mod vm;

use serde::{Deserialize, Serialize};

pub use command::{CommandOutput, Request, Response};
pub use geometry::{CursorPosition, Rect, Scale, ScreenGeometry, ScreenSize};
pub use vm::{
    parse_memory, ImageSpec, PortMapping, RunOptions, SharedDirectory, UpdateOptions, VmOutcome, VmState,
    VmStatus,
};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    #[default]
    Macos,
    Linux,
    Windows,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OsType::Macos => "macos",
            OsType::Linux => "linux",
            OsType::Windows => "windows",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}
