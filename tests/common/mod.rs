#![allow(dead_code)]

use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use remote_computer::{
    config::ChannelConfig,
    error::{ComputerError, Result},
    models::{Request, Response},
    Connection, Connector,
};
use serde_json::json;
use tokio::time::Instant;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Decides the reply to each request; `Err` simulates a dropped transport.
pub type Handler = Arc<dyn Fn(&Request) -> std::result::Result<Response, String> + Send + Sync>;

/// How a connection answers keepalive pings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PingMode {
    Answer,
    Fail,
    /// Never answers.
    Hang,
}

/// In-memory stand-in for a computer server.
pub struct Scripted {
    handler: Handler,
    /// Ping behaviour of the first connection that opens; later ones answer.
    first_ping: Mutex<Option<PingMode>>,
    /// Connect attempts that fail before the first success.
    fail_connects: u32,
    delay: Duration,
    pub connects: AtomicU32,
    pub connect_times: Mutex<Vec<Instant>>,
    pub closes: Arc<AtomicU32>,
    pub requests: Arc<Mutex<Vec<Request>>>,
    in_flight: Arc<AtomicU32>,
    pub max_in_flight: Arc<AtomicU32>,
}

impl Scripted {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            first_ping: Mutex::new(None),
            fail_connects: 0,
            delay: Duration::ZERO,
            connects: AtomicU32::new(0),
            connect_times: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicU32::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicU32::new(0)),
            max_in_flight: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A server that answers every command successfully.
    pub fn desktop(screen: (u32, u32), shot: (u32, u32)) -> Self {
        Self::new(desktop_handler(screen, shot))
    }

    pub fn failing_connects(mut self, count: u32) -> Self {
        self.fail_connects = count;
        self
    }

    pub fn with_first_ping(self, mode: PingMode) -> Self {
        *self.first_ping.lock().unwrap() = Some(mode);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    pub fn last_request(&self, command: &str) -> Option<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.command == command)
            .cloned()
    }
}

#[async_trait]
impl Connector for Scripted {
    fn endpoint(&self) -> String {
        "scripted://computer".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.connect_times.lock().unwrap().push(Instant::now());
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_connects {
            return Err(ComputerError::Connection("connection refused".into()));
        }
        let ping = self.first_ping.lock().unwrap().take().unwrap_or(PingMode::Answer);
        Ok(Box::new(ScriptedConnection {
            handler: self.handler.clone(),
            ping,
            delay: self.delay,
            closes: self.closes.clone(),
            requests: self.requests.clone(),
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }))
    }
}

struct ScriptedConnection {
    handler: Handler,
    ping: PingMode,
    delay: Duration,
    closes: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<Request>>>,
    in_flight: Arc<AtomicU32>,
    max_in_flight: Arc<AtomicU32>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn request(&mut self, payload: String) -> Result<String> {
        let request: Request = serde_json::from_str(&payload)?;
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match (self.handler)(&request) {
            Ok(response) => Ok(serde_json::to_string(&response)?),
            Err(cause) => Err(ComputerError::Connection(cause)),
        }
    }

    async fn ping(&mut self) -> Result<()> {
        match self.ping {
            PingMode::Answer => Ok(()),
            PingMode::Fail => Err(ComputerError::Connection("broken pipe".into())),
            PingMode::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Answers the commands a desktop server knows with canned data.
pub fn desktop_handler(screen: (u32, u32), shot: (u32, u32)) -> Handler {
    let image = STANDARD.encode(png(shot.0, shot.1));
    Arc::new(move |request: &Request| {
        let body = match request.command.as_str() {
            "get_screen_size" => json!({"size": {"width": screen.0, "height": screen.1}}),
            "screenshot" => json!({"image_data": image}),
            "get_cursor_position" => json!({"position": {"x": 12, "y": 34}}),
            "copy_to_clipboard" => json!({"content": "copied"}),
            "file_exists" | "directory_exists" => json!({"exists": true}),
            "list_dir" => json!({"files": ["a.txt", "b"]}),
            "read_text" => json!({"content": "hello"}),
            "run_command" => json!({"stdout": "ok\n", "stderr": ""}),
            "get_accessibility_tree" => json!({"tree": {"role": "window"}}),
            _ => json!({}),
        };
        Ok(Response::ok(body))
    })
}

/// Channel settings with fast pings disabled, for deterministic tests.
pub fn test_channel_config() -> ChannelConfig {
    ChannelConfig {
        ping_interval_secs: 3600.0,
        ..ChannelConfig::default()
    }
}
