//! Inbound protocol messages waiting to be consumed by the signing engine.

use crate::error::{TssClientError, TssClientResult};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::cmp;
use std::time::{Duration, Instant};

/// Message type the engine uses to ask whether the peer supports
/// worker offloading. Always answered locally with [`WORKER_SUPPORT_REPLY`].
pub const WORKER_SUPPORT_PROBE: &str = "ga1_worker_support";
pub const WORKER_SUPPORT_REPLY: &str = "not supported";

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub session: String,
    pub sender: usize,
    pub recipient: usize,
    pub msg_type: String,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub session: String,
    pub sender: usize,
    pub recipient: usize,
    pub msg_type: String,
}

impl MessageKey {
    pub fn new(session: &str, sender: usize, recipient: usize, msg_type: &str) -> Self {
        MessageKey {
            session: session.to_string(),
            sender,
            recipient,
            msg_type: msg_type.to_string(),
        }
    }

    fn matches(&self, message: &Message) -> bool {
        message.session == self.session
            && message.sender == self.sender
            && message.recipient == self.recipient
            && message.msg_type == self.msg_type
    }
}

/// Short tag for logs, the part of a message type after `~`.
pub(crate) fn message_tag(msg_type: &str) -> &str {
    msg_type.split('~').nth(1).unwrap_or(msg_type)
}

pub struct MessageMailbox {
    messages: Mutex<Vec<Message>>,
    arrived: Condvar,
    poll_interval: Duration,
}

impl MessageMailbox {
    pub fn new(poll_interval: Duration) -> Self {
        MessageMailbox {
            messages: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
            poll_interval,
        }
    }

    /// Duplicate keys are kept and served oldest first.
    pub fn put(&self, message: Message) {
        debug!(
            "mailbox: {} from {} to {} ({})",
            message_tag(&message.msg_type),
            message.sender,
            message.recipient,
            message.session
        );
        self.messages.lock().push(message);
        self.arrived.notify_all();
    }

    pub fn take(&self, key: &MessageKey, timeout: Duration) -> TssClientResult<String> {
        self.take_unless(key, timeout, || false)
    }

    /// Blocks until a message matching `key` arrives and removes it, or
    /// fails once `timeout` elapses. `abort` is checked at least once per
    /// poll interval and ends the wait early when it returns true.
    pub fn take_unless<F>(&self, key: &MessageKey, timeout: Duration, abort: F) -> TssClientResult<String>
    where
        F: Fn() -> bool,
    {
        if key.msg_type == WORKER_SUPPORT_PROBE {
            return Ok(WORKER_SUPPORT_REPLY.to_string());
        }

        let deadline = Instant::now() + timeout;
        let mut messages = self.messages.lock();
        loop {
            if let Some(position) = messages.iter().position(|message| key.matches(message)) {
                return Ok(messages.remove(position).payload);
            }
            if abort() {
                warn!(
                    "mailbox: round aborted while waiting for {} from {}",
                    message_tag(&key.msg_type),
                    key.sender
                );
                return Err(TssClientError::RoundAborted {
                    sender: key.sender,
                    msg_type: key.msg_type.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "mailbox: timed out waiting for {} from {} to {}",
                    message_tag(&key.msg_type),
                    key.sender,
                    key.recipient
                );
                return Err(TssClientError::MessageTimeout {
                    sender: key.sender,
                    recipient: key.recipient,
                    msg_type: key.msg_type.clone(),
                });
            }
            let wait = cmp::min(deadline - now, self.poll_interval);
            self.arrived.wait_for(&mut messages, wait);
        }
    }

    pub fn pending(&self, session: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.session == session)
            .count()
    }

    pub fn remove_all(&self, session: &str) {
        self.messages.lock().retain(|message| message.session != session);
    }
}
