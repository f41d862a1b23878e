use crate::error::{TssClientError, TssClientResult};
use crate::transport::TssSocket;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a remote party of a session is reached.
#[derive(Clone)]
pub struct ConnectionEntry {
    pub session: String,
    pub party: usize,
    pub endpoint: Option<String>,
    pub socket_endpoint: Option<String>,
    pub socket: Option<Arc<TssSocket>>,
}

/// Registry of remote parties, keyed by `(session, party)`.
#[derive(Default)]
pub struct ConnectionDirectory {
    entries: RwLock<HashMap<(String, usize), ConnectionEntry>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a party, replacing and disconnecting any previous entry.
    pub fn register(&self, entry: ConnectionEntry) {
        let key = (entry.session.clone(), entry.party);
        let previous = self.entries.write().insert(key, entry);
        if let Some(socket) = previous.and_then(|previous| previous.socket) {
            socket.disconnect();
        }
    }

    pub fn lookup(&self, session: &str, party: usize) -> TssClientResult<ConnectionEntry> {
        self.entries
            .read()
            .get(&(session.to_string(), party))
            .cloned()
            .ok_or_else(|| TssClientError::UnknownParty {
                session: session.to_string(),
                party,
            })
    }

    /// Every registered party of the session, ordered by party index.
    pub fn all_endpoints(&self, session: &str) -> Vec<ConnectionEntry> {
        let mut entries: Vec<ConnectionEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.session == session)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.party);
        entries
    }

    pub fn unregister(&self, session: &str, party: usize) {
        let removed = self.entries.write().remove(&(session.to_string(), party));
        if let Some(socket) = removed.and_then(|entry| entry.socket) {
            socket.disconnect();
        }
    }

    pub fn unregister_all(&self, session: &str) {
        let removed: Vec<ConnectionEntry> = {
            let mut entries = self.entries.write();
            let keys: Vec<(String, usize)> = entries
                .keys()
                .filter(|(s, _)| s == session)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        debug!("connections: released {} parties of {}", removed.len(), session);
        for socket in removed.into_iter().filter_map(|entry| entry.socket) {
            socket.disconnect();
        }
    }
}
