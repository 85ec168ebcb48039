//! Request/response client for the bridge RPC surface.
//!
//! Correlates replies by UUID request id. Used by tests and by tooling
//! that drives a running bridge.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use mcbridge_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT};
use mcbridge_protocol::{
    Ack, Message, MessageType, SetParametersRequest, StartTransferRequest,
    StartTransferResponse, StatusResponse, TransferStatus,
};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// Errors from the RPC client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("bridge error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

/// WebSocket client connected to one bridge.
pub struct RpcClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: Pending,
    cancel: CancellationToken,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl RpcClient {
    /// Connects to `url`, e.g. `ws://127.0.0.1:50051/rpc`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (mut write, mut read) = ws_stream.split();

        let (write_tx, mut write_rx) = mpsc::channel::<tungstenite::Message>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = write_rx.recv() => {
                            let Some(msg) = msg else { break };
                            if let Err(e) = write.send(msg).await {
                                tracing::warn!("client write error: {e}");
                                break;
                            }
                        }
                    }
                }
                let _ = write.close().await;
            })
        };

        let read_handle = {
            let pending = Arc::clone(&pending);
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => break,
                        frame = read.next() => frame,
                    };
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            route_reply(&text, &pending).await;
                        }
                        Some(Ok(tungstenite::Message::Ping(data))) => {
                            let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                        }
                        Some(Ok(tungstenite::Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("client read error: {e}");
                            break;
                        }
                    }
                }
                // Stop the writer and wake every waiter with `Closed`.
                cancel.cancel();
                pending.lock().await.clear();
            })
        };

        Ok(Self {
            write_tx,
            pending,
            cancel,
            read_handle,
            write_handle,
        })
    }

    /// Sends a request and waits for the reply with the same id.
    ///
    /// Error envelopes are returned as [`ClientError::Remote`].
    pub async fn request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Closed);
        }

        let result = tokio::time::timeout(WS_REQUEST_TIMEOUT, rx).await;
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => resp.into_result().map_err(|err| ClientError::Remote {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    pub async fn set_parameters(&self, req: &SetParametersRequest) -> Result<Ack, ClientError> {
        let resp = self.request(MessageType::SetParameters, Some(req)).await?;
        expect_payload(&resp, MessageType::Ack)
    }

    /// Starts a transfer and returns the session id.
    pub async fn start_transfer(&self, req: &StartTransferRequest) -> Result<String, ClientError> {
        let resp = self.request(MessageType::StartTransfer, Some(req)).await?;
        let started: StartTransferResponse = expect_payload(&resp, MessageType::TransferStarted)?;
        Ok(started.session_id)
    }

    pub async fn get_status(&self) -> Result<TransferStatus, ClientError> {
        let resp = self.request::<()>(MessageType::GetStatus, None).await?;
        let status: StatusResponse = expect_payload(&resp, MessageType::Status)?;
        status
            .parse()
            .map_err(|e| ClientError::Unexpected(e.to_string()))
    }

    pub async fn stop_transfer(&self) -> Result<Ack, ClientError> {
        let resp = self.request::<()>(MessageType::StopTransfer, None).await?;
        expect_payload(&resp, MessageType::Ack)
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        let resp = self.request::<()>(MessageType::Ping, None).await?;
        if resp.msg_type != MessageType::Pong {
            return Err(ClientError::Unexpected(format!("{:?}", resp.msg_type)));
        }
        Ok(())
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
    }
}

async fn route_reply(text: &str, pending: &Pending) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("failed to parse reply: {e}");
            return;
        }
    };
    match pending.lock().await.remove(&msg.id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => tracing::debug!(id = %msg.id, "reply without a pending request"),
    }
}

fn expect_payload<T: DeserializeOwned>(
    resp: &Message,
    expected: MessageType,
) -> Result<T, ClientError> {
    if resp.msg_type != expected {
        return Err(ClientError::Unexpected(format!(
            "expected {expected:?}, got {:?}",
            resp.msg_type
        )));
    }
    resp.parse_payload()?
        .ok_or_else(|| ClientError::Unexpected(format!("{expected:?} without payload")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Sender;
    use crate::handler::{Handler, HandlerFuture};
    use crate::server::{RpcServer, ServerConfig};
    use mcbridge_protocol::TransferMode;
    use mcbridge_protocol::constants::{RPC_ERR_CODE_BAD_REQUEST, RPC_PATH};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Serves canned replies and records stop requests.
    #[derive(Default)]
    struct FakeBridge {
        stopped: AtomicBool,
    }

    impl Handler for FakeBridge {
        fn on_set_parameters(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let req: Option<SetParametersRequest> = msg.parse_payload().ok().flatten();
                let reply = match req {
                    Some(r) if !r.username.is_empty() => {
                        msg.reply(MessageType::Ack, Some(&Ack::default()))
                    }
                    _ => Ok(msg.reply_error(RPC_ERR_CODE_BAD_REQUEST, "username required")),
                };
                if let Ok(reply) = reply {
                    let _ = sender.send_msg(reply);
                }
            })
        }

        fn on_start_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let resp = StartTransferResponse {
                    session_id: "s-1".into(),
                };
                if let Ok(reply) = msg.reply(MessageType::TransferStarted, Some(&resp)) {
                    let _ = sender.send_msg(reply);
                }
            })
        }

        fn on_get_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                let status = StatusResponse {
                    status: "12 300 1".into(),
                };
                if let Ok(reply) = msg.reply(MessageType::Status, Some(&status)) {
                    let _ = sender.send_msg(reply);
                }
            })
        }

        fn on_stop_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            self.stopped.store(true, Ordering::SeqCst);
            Box::pin(async move {
                if let Ok(reply) = msg.reply(MessageType::Ack, Some(&Ack::default())) {
                    let _ = sender.send_msg(reply);
                }
            })
        }
    }

    async fn start(handler: Arc<FakeBridge>) -> (Arc<RpcServer<FakeBridge>>, RpcClient) {
        let server = RpcServer::with_handler(ServerConfig::default(), handler);
        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        while server.port().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let url = format!("ws://127.0.0.1:{}{RPC_PATH}", server.port().await);
        let client = RpcClient::connect(&url).await.unwrap();
        (server, client)
    }

    #[test]
    fn client_error_display() {
        assert_eq!(ClientError::Timeout.to_string(), "request timed out");
        let err = ClientError::Remote {
            code: 409,
            message: "parameters have not been set".into(),
        };
        assert!(err.to_string().contains("409"));
    }

    #[tokio::test]
    async fn full_rpc_round() {
        let handler = Arc::new(FakeBridge::default());
        let (server, client) = start(Arc::clone(&handler)).await;

        client.ping().await.unwrap();

        let params = SetParametersRequest {
            username: "u".into(),
            host: "h".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(client.set_parameters(&params).await.unwrap().message, "");

        let id = client
            .start_transfer(&StartTransferRequest {
                mode: TransferMode::Put,
                sources: vec!["/a".into()],
                destinations: vec!["a".into()],
                if_not_exists: None,
            })
            .await
            .unwrap();
        assert_eq!(id, "s-1");

        let status = client.get_status().await.unwrap();
        assert_eq!(status.speed, 12);
        assert_eq!(status.transferred, 300);
        assert!(status.finished);

        client.stop_transfer().await.unwrap();
        assert!(handler.stopped.load(Ordering::SeqCst));

        client.close().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn error_envelope_becomes_remote_error() {
        let (server, client) = start(Arc::new(FakeBridge::default())).await;

        let err = client
            .set_parameters(&SetParametersRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Remote {
                code: RPC_ERR_CODE_BAD_REQUEST,
                ..
            }
        ));

        server.shutdown();
    }

    #[tokio::test]
    async fn requests_fail_after_server_shutdown() {
        let (server, client) = start(Arc::new(FakeBridge::default())).await;
        server.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed | ClientError::Ws(_)));
    }
}
