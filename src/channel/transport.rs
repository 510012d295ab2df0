use async_trait::async_trait;

use crate::error::Result;

/// Opens connections to one control-server endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human readable endpoint, for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// A live transport. Replies are matched to requests purely by order, so a
/// connection must never see a second request before the first is answered;
/// [`CommandChannel`](crate::channel::CommandChannel) guarantees this.
#[async_trait]
pub trait Connection: Send {
    /// Sends one serialized request and returns the next reply.
    async fn request(&mut self, payload: String) -> Result<String>;

    /// Transport-level liveness check.
    async fn ping(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
