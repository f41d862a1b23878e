use crate::config::ClientConfig;
use crate::connections::ConnectionDirectory;
use crate::events::EventLedger;
use crate::mailbox::MessageMailbox;
use std::sync::Arc;

/// Stores shared by every [`TssClient`](crate::TssClient) of a process.
/// Entries are keyed by session, so clients of different sessions can
/// share one context. Clones share the same stores.
#[derive(Clone)]
pub struct TssContext {
    connections: Arc<ConnectionDirectory>,
    mailbox: Arc<MessageMailbox>,
    ledger: Arc<EventLedger>,
}

impl TssContext {
    pub fn new(config: &ClientConfig) -> Self {
        TssContext {
            connections: Arc::new(ConnectionDirectory::new()),
            mailbox: Arc::new(MessageMailbox::new(config.poll_interval)),
            ledger: Arc::new(EventLedger::new()),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionDirectory> {
        &self.connections
    }

    pub fn mailbox(&self) -> &Arc<MessageMailbox> {
        &self.mailbox
    }

    pub fn ledger(&self) -> &Arc<EventLedger> {
        &self.ledger
    }

    /// Drops everything recorded for a session.
    pub fn purge(&self, session: &str) {
        self.connections.unregister_all(session);
        self.mailbox.remove_all(session);
        self.ledger.remove_all(session);
    }
}

impl Default for TssContext {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}
