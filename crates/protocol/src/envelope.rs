//! The JSON frame every RPC request and reply travels in.
//!
//! A caller picks the `id`; the bridge echoes it on the reply so several
//! requests can be in flight on one socket. Failures come back as a frame
//! of type `error` carrying a [`WsError`] and no payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;

/// Failure reported by the bridge; `code` follows HTTP status semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

/// One RPC frame. The payload stays raw until the handler for `msg_type`
/// knows which type to decode it into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

impl Message {
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: payload.map(serde_json::value::to_raw_value).transpose()?,
            error: None,
        })
    }

    /// Decodes the payload. `Ok(None)` means the frame carried none.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(WsError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Builds the reply to this request, echoing its id.
    pub fn reply<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(self.id.clone(), msg_type, payload)
    }

    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self::error(self.id.clone(), code, message)
    }

    /// Splits a reply into success or the error it carries.
    pub fn into_result(self) -> Result<Self, WsError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
