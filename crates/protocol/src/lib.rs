//! Wire protocol for the mcbridge RPC surface.
//!
//! Every request and response travels in a JSON [`Message`] envelope with
//! an `id` used for request/response correlation and a [`MessageType`]
//! tag. Payload types live in [`messages`]; shared value types such as
//! [`TransferMode`] and [`TransferStatus`] live in [`types`].

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use messages::{
    Ack, SetParametersRequest, StartTransferRequest, StartTransferResponse, StatusResponse,
};
pub use types::{ParseStatusError, ProxyKind, TransferMode, TransferStatus};
