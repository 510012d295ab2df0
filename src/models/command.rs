use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ComputerError, Result},
    models::geometry::{CursorPosition, ScreenSize},
};

/// One request on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Adds the parameter only when present.
    pub fn maybe_param<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The single reply to a [`Request`]; everything besides `success`/`error`
/// is command specific and kept in `body` until decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn ok(body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            success: true,
            error: None,
            body,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            body: Map::new(),
        }
    }

    /// Fails with `CommandFailed` when the server reported non-success.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let cause = self
                .error
                .unwrap_or_else(|| "remote reported failure".to_string());
            Err(ComputerError::command_failed(command, cause))
        }
    }

    /// Decodes the command specific fields into their fixed shape.
    pub fn decode<T: DeserializeOwned>(self, command: &str) -> Result<T> {
        serde_json::from_value(Value::Object(self.body)).map_err(|e| {
            ComputerError::command_failed(command, format!("unexpected response shape: {e}"))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotReply {
    pub image_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizeReply {
    pub size: ScreenSize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionReply {
    pub position: CursorPosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipboardReply {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExistsReply {
    pub exists: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDirReply {
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadTextReply {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeReply {
    #[serde(default)]
    pub tree: Value,
}
