//! WebSocket transport for the bridge RPC surface.
//!
//! The server upgrades `GET /rpc` to WebSocket, parses each text frame as
//! a JSON [`Message`](mcbridge_protocol::Message) and dispatches it to a
//! [`Handler`]. Replies go back through the connection's [`Sender`].
//! [`RpcClient`] is the matching request/response client.

mod client;
mod connection;
mod handler;
mod server;

pub use client::{ClientError, RpcClient};
pub use connection::{Connection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{RpcServer, ServerConfig};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the RPC server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
