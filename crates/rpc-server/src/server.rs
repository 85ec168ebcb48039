//! Bridge RPC server.
//!
//! Listens on a TCP port, upgrades `GET /rpc` to WebSocket and serves
//! any number of concurrent callers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use mcbridge_protocol::constants::{RPC_PATH, WS_MAX_MESSAGE_SIZE};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, Connection};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }
}

/// The bridge WebSocket server.
pub struct RpcServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<Vec<Connection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> RpcServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Self::with_handler(config, Arc::new(handler))
    }

    /// Creates a server around a handler the caller keeps a reference to.
    pub fn with_handler(config: ServerConfig, handler: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            connections: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address once [`run`](Self::run) has bound the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of callers currently connected.
    pub async fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|c| c.is_alive())
            .count()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("rpc server listening on ws://{local_addr}{RPC_PATH}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("rpc server shutting down");
                    let conns = std::mem::take(&mut *self.connections.lock().await);
                    for conn in conns {
                        conn.close_and_wait().await;
                    }
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer).await {
                                    tracing::warn!(%peer, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::error!("accept error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await?;
        tracing::info!(%peer, "caller connected");

        let conn = connection::spawn_connection(
            ws_stream,
            peer,
            Arc::clone(&self.handler),
            &self.cancel,
        );

        let mut conns = self.connections.lock().await;
        conns.retain(|c| c.is_alive());
        conns.push(conn);
        Ok(())
    }
}

/// Only the RPC path is upgraded; anything else gets a 404.
fn check_path(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() == RPC_PATH {
        return Ok(resp);
    }
    let mut err = ErrorResponse::new(Some(format!("no RPC endpoint at {}", req.uri().path())));
    *err.status_mut() = StatusCode::NOT_FOUND;
    Err(err)
}
