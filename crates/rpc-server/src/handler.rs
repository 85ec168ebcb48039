//! Handler trait for RPC requests.
//!
//! Implementors provide the bridge operations; the server takes care of
//! connections, parsing and routing.

use std::future::Future;
use std::pin::Pin;

use mcbridge_protocol::constants::RPC_ERR_CODE_NOT_IMPLEMENTED;
use mcbridge_protocol::{Message, MessageType};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives parsed requests from any connected caller.
///
/// Each method gets the connection's `sender` and the request envelope,
/// and is expected to reply with the request's `id`. Defaults answer
/// 501 so implementors only override what they support.
pub trait Handler: Send + Sync + 'static {
    /// `set_parameters`
    fn on_set_parameters(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// `start_transfer`
    fn on_start_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// `get_status`
    fn on_get_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// `stop_transfer`
    fn on_stop_transfer(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }
}

fn not_implemented<'a>(sender: Sender, msg: Message) -> HandlerFuture<'a> {
    Box::pin(async move {
        let _ = sender.send_error(&msg, RPC_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
    })
}
