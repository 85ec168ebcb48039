//! Per-caller connection: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use mcbridge_protocol::constants::{
    RPC_ERR_CODE_BAD_REQUEST, RPC_ERR_CODE_NOT_IMPLEMENTED, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use mcbridge_protocol::{Message, MessageType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to one caller.
///
/// Cloneable; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the caller is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error reply for the given request.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// An accepted caller connection.
pub struct Connection {
    pub peer: SocketAddr,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl Connection {
    /// `true` until the read pump exits.
    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Closes the connection and waits for the read pump to finish.
    pub async fn close_and_wait(self) {
        self.cancel.cancel();
        let _ = self.reader.await;
    }
}

/// Spawns the read and write pumps for an upgraded WebSocket.
///
/// The pumps stop when the caller goes away or `server_cancel` fires.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    peer: SocketAddr,
    handler: Arc<H>,
    server_cancel: &CancellationToken,
) -> Connection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let (ws_sink, ws_stream) = ws_stream.split();
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        read_pump(ws_stream, sender, &handler, &read_cancel).await;
        read_cancel.cancel();
        tracing::info!(%peer, "caller disconnected");
    });

    Connection {
        peer,
        cancel,
        reader,
    }
}

/// Drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(ws_msg) = msg else { break };
                if let Err(e) = sink.send(ws_msg).await {
                    tracing::error!("write pump send error: {e}");
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Reads frames and dispatches requests to the handler.
///
/// Any incoming frame resets the read deadline; a silent caller is
/// dropped after [`WS_PONG_WAIT`].
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: &Arc<H>, cancel: &CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                tracing::warn!("read deadline exceeded, closing connection");
                break;
            }

            frame = stream.next() => {
                let ws_msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match ws_msg {
                    WsMessage::Text(text) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                            continue;
                        }
                        dispatch_text(handler, &sender, &text).await;
                    }
                    WsMessage::Binary(_) => {
                        tracing::warn!("binary frames are not supported, ignoring");
                    }
                    WsMessage::Ping(data) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    WsMessage::Pong(_) => {}
                    WsMessage::Close(_) => {
                        tracing::debug!("received close frame");
                        break;
                    }
                    WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Routes a text (JSON) request to the matching handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            let reply = Message::error("", RPC_ERR_CODE_BAD_REQUEST, format!("invalid JSON: {e}"));
            let _ = sender.send_msg(reply);
            return;
        }
    };

    tracing::trace!(msg_type = ?msg.msg_type, id = %msg.id, "received request");
    let s = sender.clone();
    match msg.msg_type {
        MessageType::SetParameters => handler.on_set_parameters(s, msg).await,
        MessageType::StartTransfer => handler.on_start_transfer(s, msg).await,
        MessageType::GetStatus => handler.on_get_status(s, msg).await,
        MessageType::StopTransfer => handler.on_stop_transfer(s, msg).await,
        MessageType::Ping => handler.on_ping(s, msg).await,
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, RPC_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}
