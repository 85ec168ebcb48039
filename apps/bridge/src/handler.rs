//! RPC handler: maps protocol requests onto the bridge service.

use std::sync::Arc;

use mcbridge_credentials::CredentialError;
use mcbridge_protocol::constants::{
    RPC_ERR_CODE_BAD_GATEWAY, RPC_ERR_CODE_BAD_REQUEST, RPC_ERR_CODE_CONFLICT,
    RPC_ERR_CODE_INTERNAL, RPC_ERR_CODE_UNAUTHORIZED,
};
use mcbridge_protocol::{
    Ack, Message, MessageType, SetParametersRequest, StartTransferRequest, StartTransferResponse,
    StatusResponse,
};
use mcbridge_rpc_server::{Handler, HandlerFuture, Sender};
use mcbridge_session::{BridgeService, ServiceError};
use mcbridge_transfer::TransferError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

pub struct BridgeHandler {
    service: Arc<BridgeService>,
    exit_when_finished: bool,
    /// Fired once a caller has been told the transfer finished.
    finished: CancellationToken,
}

impl BridgeHandler {
    pub fn new(
        service: Arc<BridgeService>,
        exit_when_finished: bool,
        finished: CancellationToken,
    ) -> Self {
        Self {
            service,
            exit_when_finished,
            finished,
        }
    }
}

impl Handler for BridgeHandler {
    fn on_set_parameters(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse::<SetParametersRequest>(&sender, &msg) else {
                return;
            };
            match self.service.set_parameters(&req).await {
                Ok(()) => reply(&sender, &msg, MessageType::Ack, &Ack::default()),
                Err(e) => reply_service_error(&sender, &msg, &e),
            }
        })
    }

    fn on_start_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse::<StartTransferRequest>(&sender, &msg) else {
                return;
            };
            match self.service.start_transfer(req).await {
                Ok(session_id) => reply(
                    &sender,
                    &msg,
                    MessageType::TransferStarted,
                    &StartTransferResponse { session_id },
                ),
                Err(e) => reply_service_error(&sender, &msg, &e),
            }
        })
    }

    fn on_get_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let status = self.service.status();
            reply(&sender, &msg, MessageType::Status, &StatusResponse::from(status));
            if status.finished && self.exit_when_finished {
                tracing::info!("caller observed finished status");
                self.finished.cancel();
            }
        })
    }

    fn on_stop_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.service.stop_transfer();
            reply(&sender, &msg, MessageType::Ack, &Ack::default());
        })
    }
}

/// Parses a required payload, answering 400 when it is missing or invalid.
fn parse<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.parse_payload() {
        Ok(Some(req)) => Some(req),
        Ok(None) => {
            let _ = sender.send_error(msg, RPC_ERR_CODE_BAD_REQUEST, "missing payload");
            None
        }
        Err(e) => {
            let _ = sender.send_error(msg, RPC_ERR_CODE_BAD_REQUEST, &format!("invalid payload: {e}"));
            None
        }
    }
}

fn reply<T: Serialize>(sender: &Sender, msg: &Message, msg_type: MessageType, payload: &T) {
    match msg.reply(msg_type, Some(payload)) {
        Ok(reply) => {
            let _ = sender.send_msg(reply);
        }
        Err(e) => tracing::error!("failed to build reply: {e}"),
    }
}

fn reply_service_error(sender: &Sender, msg: &Message, err: &ServiceError) {
    let code = error_code(err);
    tracing::warn!(msg_type = ?msg.msg_type, code, "request failed: {err}");
    let _ = sender.send_error(msg, code, &err.to_string());
}

fn error_code(err: &ServiceError) -> i32 {
    match err {
        ServiceError::NotConfigured => RPC_ERR_CODE_CONFLICT,
        ServiceError::InvalidParameters(_)
        | ServiceError::Transfer(TransferError::LengthMismatch { .. }) => RPC_ERR_CODE_BAD_REQUEST,
        ServiceError::Credential(CredentialError::Rejected { .. }) => RPC_ERR_CODE_UNAUTHORIZED,
        ServiceError::Credential(_) | ServiceError::Store(_) | ServiceError::Session(_) => {
            RPC_ERR_CODE_BAD_GATEWAY
        }
        ServiceError::Transfer(_) => RPC_ERR_CODE_INTERNAL,
    }
}
