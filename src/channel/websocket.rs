use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{
    channel::transport::{Connection, Connector},
    error::{ComputerError, Result},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a computer server's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(host: &str, port: u16, path: &str) -> Result<Self> {
        let url = Url::parse(&format!("ws://{host}:{port}{path}"))?;
        Ok(Self { url })
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ComputerError::Connection(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }
        Ok(Self { url })
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> String {
        self.url.to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ComputerError::Connection(e.to_string()))?;
        debug!("websocket open to {}", self.url);
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WsStream,
}

impl WsConnection {
    async fn write(&mut self, message: Message) -> Result<()> {
        self.stream
            .send(message)
            .await
            .map_err(|e| ComputerError::Connection(e.to_string()))
    }

    async fn next_frame(&mut self) -> Result<Message> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(ComputerError::Connection(e.to_string())),
            None => Err(ComputerError::Connection("connection closed by server".into())),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn request(&mut self, payload: String) -> Result<String> {
        self.write(Message::Text(payload)).await?;
        loop {
            match self.next_frame().await? {
                Message::Text(text) => return Ok(text),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| ComputerError::Connection(format!("non utf-8 reply: {e}")))
                }
                Message::Close(frame) => {
                    return Err(ComputerError::Connection(format!(
                        "server closed the connection: {frame:?}"
                    )))
                }
                // pings are answered by tungstenite on the next write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.write(Message::Ping(Vec::new())).await?;
        loop {
            match self.next_frame().await? {
                Message::Pong(_) => return Ok(()),
                Message::Close(_) => {
                    return Err(ComputerError::Connection("server closed the connection".into()))
                }
                other => trace!("ignoring frame while waiting for pong: {other:?}"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ComputerError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoint_from_parts() {
        let connector = WsConnector::new("192.168.64.3", 8000, "/ws").unwrap();
        assert_eq!(connector.endpoint(), "ws://192.168.64.3:8000/ws");
    }

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(WsConnector::from_url("http://localhost:8000/ws").is_err());
        assert!(WsConnector::from_url("wss://example.com/ws").is_ok());
    }
}
