// Live transport abstraction - how a feed connection is opened and closed
use tokio::sync::mpsc;

/// Events a live connection delivers, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
}

/// Owner-side control of an open connection.
pub trait ConnectionHandle: Send {
    /// Stops the connection. Must be safe to call more than once.
    fn close(&mut self);
}

/// A freshly opened connection: its control handle plus its event stream.
pub struct TransportSession {
    pub handle: Box<dyn ConnectionHandle>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub trait LiveTransport: Send + Sync {
    /// Starts connecting to `url`. Establishment happens in the background;
    /// an `Err` here means the request could not even be started.
    fn open(&self, url: &str) -> anyhow::Result<TransportSession>;
}
