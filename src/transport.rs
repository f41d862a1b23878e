//! Duplex socket link to one remote party.
//!
//! The socket library itself sits behind [`SocketConnector`] and
//! [`SocketConnection`]. [`TssSocket`] owns one connection and routes
//! what arrives on it: round notices go to the [`EventLedger`], protocol
//! envelopes to the [`MessageMailbox`].

use crate::config::SocketConfig;
use crate::error::TssClientResult;
use crate::events::{Event, EventKind, EventLedger};
use crate::mailbox::{message_tag, Message, MessageMailbox};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const PRECOMPUTE_COMPLETE: &str = "precompute_complete";
pub const PRECOMPUTE_FAILED: &str = "precompute_failed";
pub const INBOUND_MESSAGE: &str = "send";
pub const OUTBOUND_MESSAGE: &str = "send_msg";

/// Outbound protocol envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TssSendMsg {
    pub session: String,
    pub sender: usize,
    pub recipient: usize,
    pub msg_type: String,
    pub msg_data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TssRecvMsg {
    pub session: String,
    pub sender: usize,
    pub recipient: usize,
    pub msg_type: String,
    pub msg_data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecomputeUpdate {
    pub session: String,
    pub party: usize,
}

/// Connection options derived from a [`SocketConfig`] and the session `sid`.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketOptions {
    pub path: Option<String>,
    pub connect_params: HashMap<String, String>,
    pub reconnect_attempts: u32,
    pub reconnect_wait_max: Duration,
    pub force_websockets: bool,
    pub compress: bool,
}

impl SocketOptions {
    pub fn new(config: &SocketConfig, sid: &str) -> Self {
        let mut connect_params = HashMap::new();
        connect_params.insert(String::from("sessionId"), sid.to_string());
        SocketOptions {
            path: config.path.clone(),
            connect_params,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_wait_max: config.reconnect_wait_max,
            force_websockets: config.force_websockets,
            compress: config.compress,
        }
    }
}

/// Receives everything a connection delivers. Called from the socket
/// library's own threads.
pub trait SocketEventHandler: Send + Sync {
    fn on_event(&self, event: &str, payload: &Value);

    fn on_connect(&self) {}

    fn on_disconnect(&self, _reason: &str) {}

    fn on_error(&self, _reason: &str) {}
}

pub trait SocketConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Identity assigned by the server once the handshake completed.
    fn id(&self) -> Option<String>;

    /// Returns false when the payload could not be handed to the wire.
    fn emit(&self, event: &str, payload: Value) -> bool;

    fn disconnect(&self);
}

pub trait SocketConnector: Send + Sync {
    fn connect(
        &self,
        url: &str,
        options: &SocketOptions,
        handler: Arc<dyn SocketEventHandler>,
    ) -> TssClientResult<Box<dyn SocketConnection>>;
}

struct InboundRouter {
    session: String,
    party: usize,
    mailbox: Arc<MessageMailbox>,
    ledger: Arc<EventLedger>,
}

impl InboundRouter {
    fn data_error(&self, reason: &str) {
        warn!("socket: party {}: {}", self.party, reason);
        self.ledger.append(Event::new(
            &self.session,
            None,
            EventKind::TransportError,
            reason,
        ));
    }

    fn precompute_update(&self, payload: &Value, kind: EventKind) {
        let update: PrecomputeUpdate = match serde_json::from_value(payload.clone()) {
            Ok(update) => update,
            Err(_) => return self.data_error("Received json was not decodable"),
        };
        if update.session != self.session {
            debug!("socket: ignoring {:?} for a different session", kind);
            return;
        }
        info!("socket: party {} reported {:?}", update.party, kind);
        self.ledger.append(Event::new(
            &update.session,
            Some(update.party),
            kind,
            update.party.to_string(),
        ));
    }

    fn protocol_message(&self, payload: &Value) {
        let msg: TssRecvMsg = match serde_json::from_value(payload.clone()) {
            Ok(msg) => msg,
            Err(_) => return self.data_error("Server failed to respond with valid json"),
        };
        if msg.session != self.session {
            debug!("socket: ignoring message for a different session");
            return;
        }
        debug!(
            "dkls: Received message {}, sender: `{}`, receiver: `{}`",
            message_tag(&msg.msg_type),
            msg.sender,
            msg.recipient
        );
        self.mailbox.put(Message {
            session: msg.session,
            sender: msg.sender,
            recipient: msg.recipient,
            msg_type: msg.msg_type,
            payload: msg.msg_data,
        });
    }
}

impl SocketEventHandler for InboundRouter {
    fn on_event(&self, event: &str, payload: &Value) {
        match event {
            PRECOMPUTE_COMPLETE => self.precompute_update(payload, EventKind::RoundComplete),
            PRECOMPUTE_FAILED => self.precompute_update(payload, EventKind::RoundError),
            INBOUND_MESSAGE => self.protocol_message(payload),
            other => debug!("socket: party {}: unhandled event {}", self.party, other),
        }
    }

    fn on_connect(&self) {
        info!("connected, party: {}", self.party);
    }

    fn on_disconnect(&self, reason: &str) {
        info!("disconnected, party: {} ({})", self.party, reason);
    }

    fn on_error(&self, reason: &str) {
        warn!("socket error, party: {} ({})", self.party, reason);
    }
}

pub struct TssSocket {
    session: String,
    party: usize,
    url: String,
    connection: Box<dyn SocketConnection>,
}

impl TssSocket {
    pub fn connect(
        connector: &dyn SocketConnector,
        session: &str,
        sid: &str,
        party: usize,
        url: &str,
        config: &SocketConfig,
        mailbox: Arc<MessageMailbox>,
        ledger: Arc<EventLedger>,
    ) -> TssClientResult<Self> {
        let router = Arc::new(InboundRouter {
            session: session.to_string(),
            party,
            mailbox,
            ledger,
        });
        let options = SocketOptions::new(config, sid);
        let connection = connector.connect(url, &options, router)?;
        Ok(TssSocket {
            session: session.to_string(),
            party,
            url: url.to_string(),
            connection,
        })
    }

    pub fn party(&self) -> usize {
        self.party
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn socket_id(&self) -> Option<String> {
        self.connection.id()
    }

    /// Connected and identified by the server.
    pub fn is_ready(&self) -> bool {
        self.is_connected() && self.socket_id().is_some()
    }

    pub fn send(&self, msg: &TssSendMsg) -> bool {
        if !self.is_connected() {
            warn!(
                "socket: party {} not connected, dropping {}",
                self.party,
                message_tag(&msg.msg_type)
            );
            return false;
        }
        let payload = match serde_json::to_value(msg) {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        debug!(
            "dkls: Sending message {}, sender: `{}`, receiver: `{}`",
            message_tag(&msg.msg_type),
            msg.sender,
            msg.recipient
        );
        self.connection.emit(OUTBOUND_MESSAGE, payload)
    }

    pub fn disconnect(&self) {
        debug!("socket: closing party {} of {}", self.party, self.session);
        self.connection.disconnect();
    }
}
