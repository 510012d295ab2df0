//! Typed control surface over a [`CommandChannel`].

pub mod keys;
pub mod screenshot;

use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    channel::CommandChannel,
    config::ChannelConfig,
    error::Result,
    models::{
        command::{
            ClipboardReply, ExistsReply, ListDirReply, PositionReply, ReadTextReply,
            ScreenshotReply, SizeReply, TreeReply,
        },
        CommandOutput, CursorPosition, MouseButton, OsType, Request, Response, ScreenGeometry,
        ScreenSize,
    },
};

pub use keys::{normalize_key, NamedKey};
pub use screenshot::ScreenshotOptions;

/// Remote mouse, keyboard, screen, clipboard, filesystem and shell.
///
/// Every operation is one round trip on the channel and fails with
/// `CommandFailed` when the retry budget runs out or the server reports
/// failure.
#[derive(Debug, Clone)]
pub struct ControlInterface {
    channel: CommandChannel,
    os_type: OsType,
    host: String,
}

impl ControlInterface {
    /// Interface to the computer server on `host`, over WebSocket.
    pub fn new(host: &str, os_type: OsType, config: ChannelConfig) -> Result<Self> {
        let channel = CommandChannel::websocket(host, config)?;
        Ok(Self::with_channel(host, os_type, channel))
    }

    pub fn with_channel(host: &str, os_type: OsType, channel: CommandChannel) -> Self {
        Self {
            channel,
            os_type,
            host: host.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn os_type(&self) -> OsType {
        self.os_type
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub async fn connect(&self) -> Result<()> {
        self.channel.connect().await
    }

    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        self.channel.wait_for_ready(timeout).await
    }

    /// Graceful close; see [`CommandChannel::close`] for what stays open.
    pub async fn close(&self) {
        self.channel.close().await
    }

    pub async fn force_close(&self) {
        self.channel.force_close().await
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let command = request.command.clone();
        self.channel.send(request).await?.check(&command)
    }

    async fn call_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let command = request.command.clone();
        self.call(request).await?.decode(&command)
    }

    fn at(request: Request, at: Option<(i32, i32)>) -> Request {
        request
            .maybe_param("x", at.map(|(x, _)| x))
            .maybe_param("y", at.map(|(_, y)| y))
    }

    // mouse

    pub async fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
        self.call(Request::new("move_cursor").param("x", x).param("y", y))
            .await
            .map(drop)
    }

    /// Clicks at `at`, or wherever the cursor is.
    pub async fn left_click(&self, at: Option<(i32, i32)>) -> Result<()> {
        self.call(Self::at(Request::new("left_click"), at)).await.map(drop)
    }

    pub async fn right_click(&self, at: Option<(i32, i32)>) -> Result<()> {
        self.call(Self::at(Request::new("right_click"), at)).await.map(drop)
    }

    pub async fn double_click(&self, at: Option<(i32, i32)>) -> Result<()> {
        self.call(Self::at(Request::new("double_click"), at)).await.map(drop)
    }

    pub async fn mouse_down(&self, at: Option<(i32, i32)>, button: MouseButton) -> Result<()> {
        let request = Self::at(Request::new("mouse_down"), at).param("button", button.as_str());
        self.call(request).await.map(drop)
    }

    pub async fn mouse_up(&self, at: Option<(i32, i32)>, button: MouseButton) -> Result<()> {
        let request = Self::at(Request::new("mouse_up"), at).param("button", button.as_str());
        self.call(request).await.map(drop)
    }

    /// Drags from the current cursor position to `(x, y)` over `duration`
    /// seconds.
    pub async fn drag_to(&self, x: i32, y: i32, button: MouseButton, duration: f64) -> Result<()> {
        let request = Request::new("drag_to")
            .param("x", x)
            .param("y", y)
            .param("button", button.as_str())
            .param("duration", duration);
        self.call(request).await.map(drop)
    }

    /// Drags through every point of `path` in order.
    pub async fn drag(&self, path: &[(i32, i32)], button: MouseButton, duration: f64) -> Result<()> {
        let points: Vec<Value> = path.iter().map(|(x, y)| Value::from(vec![*x, *y])).collect();
        let request = Request::new("drag")
            .param("path", points)
            .param("button", button.as_str())
            .param("duration", duration);
        self.call(request).await.map(drop)
    }

    // keyboard

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.call(Request::new("type_text").param("text", text))
            .await
            .map(drop)
    }

    /// Presses a key given by symbolic name (`"page_down"`, `"esc"`) or as a
    /// single raw character.
    pub async fn press_key(&self, key: &str) -> Result<()> {
        let key = normalize_key(key, self.os_type)?;
        self.call(Request::new("press_key").param("key", key))
            .await
            .map(drop)
    }

    /// Presses `keys` together; hold and release order is left to the server.
    pub async fn hotkey(&self, keys: &[&str]) -> Result<()> {
        let keys = keys
            .iter()
            .map(|k| normalize_key(k, self.os_type))
            .collect::<Result<Vec<_>>>()?;
        self.call(Request::new("hotkey").param("keys", keys))
            .await
            .map(drop)
    }

    pub async fn key_down(&self, key: &str) -> Result<()> {
        let key = normalize_key(key, self.os_type)?;
        self.call(Request::new("key_down").param("key", key))
            .await
            .map(drop)
    }

    pub async fn key_up(&self, key: &str) -> Result<()> {
        let key = normalize_key(key, self.os_type)?;
        self.call(Request::new("key_up").param("key", key))
            .await
            .map(drop)
    }

    // scrolling

    pub async fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.call(Request::new("scroll").param("x", dx).param("y", dy))
            .await
            .map(drop)
    }

    pub async fn scroll_up(&self, clicks: u32) -> Result<()> {
        self.call(Request::new("scroll_up").param("clicks", clicks))
            .await
            .map(drop)
    }

    pub async fn scroll_down(&self, clicks: u32) -> Result<()> {
        self.call(Request::new("scroll_down").param("clicks", clicks))
            .await
            .map(drop)
    }

    // screen

    async fn capture(&self) -> Result<Vec<u8>> {
        let reply: ScreenshotReply = self.call_as(Request::new("screenshot")).await?;
        screenshot::decode_base64(&reply.image_data)
    }

    /// Captures the screen. Boxes in `options` are given in screen space and
    /// converted to screenshot pixels before drawing.
    pub async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let image = self.capture().await?;
        if !options.needs_processing() {
            return Ok(image);
        }

        let scale = if options.boxes.is_empty() {
            crate::models::Scale::IDENTITY
        } else {
            let screen = self.get_screen_size().await?;
            let shot = screenshot::image_size(&image)?;
            ScreenGeometry::new(screen, shot).to_screenshot_scale()
        };
        debug!("post-processing screenshot with {scale:?}");
        screenshot::process(&image, options, scale)
    }

    pub async fn get_screen_size(&self) -> Result<ScreenSize> {
        let reply: SizeReply = self.call_as(Request::new("get_screen_size")).await?;
        Ok(reply.size)
    }

    pub async fn get_cursor_position(&self) -> Result<CursorPosition> {
        let reply: PositionReply = self.call_as(Request::new("get_cursor_position")).await?;
        Ok(reply.position)
    }

    /// Live screen size next to the size of a freshly captured screenshot.
    pub async fn geometry(&self) -> Result<ScreenGeometry> {
        let screen = self.get_screen_size().await?;
        let shot = screenshot::image_size(&self.capture().await?)?;
        Ok(ScreenGeometry::new(screen, shot))
    }

    /// Screenshot pixel coordinates to screen coordinates.
    pub async fn to_screen_coordinates(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok(self.geometry().await?.to_screen(x, y))
    }

    /// Screen coordinates to screenshot pixel coordinates.
    pub async fn to_screenshot_coordinates(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok(self.geometry().await?.to_screenshot(x, y))
    }

    // clipboard

    pub async fn copy_to_clipboard(&self) -> Result<String> {
        let reply: ClipboardReply = self.call_as(Request::new("copy_to_clipboard")).await?;
        Ok(reply.content)
    }

    pub async fn set_clipboard(&self, text: &str) -> Result<()> {
        self.call(Request::new("set_clipboard").param("text", text))
            .await
            .map(drop)
    }

    // filesystem

    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let reply: ExistsReply = self
            .call_as(Request::new("file_exists").param("path", path))
            .await?;
        Ok(reply.exists)
    }

    pub async fn directory_exists(&self, path: &str) -> Result<bool> {
        let reply: ExistsReply = self
            .call_as(Request::new("directory_exists").param("path", path))
            .await?;
        Ok(reply.exists)
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let reply: ListDirReply = self
            .call_as(Request::new("list_dir").param("path", path))
            .await?;
        Ok(reply.files)
    }

    pub async fn read_text(&self, path: &str) -> Result<String> {
        let reply: ReadTextReply = self
            .call_as(Request::new("read_text").param("path", path))
            .await?;
        Ok(reply.content)
    }

    pub async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        let request = Request::new("write_text")
            .param("path", path)
            .param("content", content);
        self.call(request).await.map(drop)
    }

    pub async fn create_dir(&self, path: &str) -> Result<()> {
        self.call(Request::new("create_dir").param("path", path))
            .await
            .map(drop)
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.call(Request::new("delete_file").param("path", path))
            .await
            .map(drop)
    }

    pub async fn delete_dir(&self, path: &str) -> Result<()> {
        self.call(Request::new("delete_dir").param("path", path))
            .await
            .map(drop)
    }

    // shell

    /// Runs `command` in the remote shell and returns its output.
    pub async fn run_command(&self, command: &str) -> Result<CommandOutput> {
        self.call_as(Request::new("run_command").param("command", command))
            .await
    }

    // accessibility

    pub async fn get_accessibility_tree(&self) -> Result<Value> {
        let reply: TreeReply = self.call_as(Request::new("get_accessibility_tree")).await?;
        Ok(reply.tree)
    }
}
