use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (1 MB). RPC payloads are small.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for request/response operations.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Path the RPC server upgrades to WebSocket.
pub const RPC_PATH: &str = "/rpc";

/// RPC message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from caller to bridge
    #[serde(rename = "set_parameters")]
    SetParameters,
    #[serde(rename = "start_transfer")]
    StartTransfer,
    #[serde(rename = "get_status")]
    GetStatus,
    #[serde(rename = "stop_transfer")]
    StopTransfer,
    #[serde(rename = "ping")]
    Ping,

    // Responses from bridge to caller
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "transfer_started")]
    TransferStarted,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common RPC error codes.
pub const RPC_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const RPC_ERR_CODE_UNAUTHORIZED: i32 = 401;
pub const RPC_ERR_CODE_CONFLICT: i32 = 409;
pub const RPC_ERR_CODE_INTERNAL: i32 = 500;
pub const RPC_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
pub const RPC_ERR_CODE_BAD_GATEWAY: i32 = 502;
