//! Session orchestration: connect, precompute, sign, cleanup.

use crate::coefficients::curve_order;
use crate::config::ClientConfig;
use crate::connections::ConnectionEntry;
use crate::context::TssContext;
use crate::engine::{CommChannel, Counterparties, Precompute, SignatureFragments, SignerParams, SigningEngine};
use crate::error::{TssClientError, TssClientResult};
use crate::events::{Event, EventKind};
use crate::helpers::{hash_message, hex_signature, to_32_bytes};
use crate::mailbox::{message_tag, MessageKey};
use crate::rest::{
    decode_fragment, post_json, CleanupRequest, PeerClient, PrecomputeRequest, SignRequest, CLEANUP_ROUTE,
    HASH_ALGORITHM, PRECOMPUTE_ROUTE, SIGN_ROUTE,
};
use crate::session;
use crate::transport::{SocketConnector, TssSendMsg, TssSocket};
use base64::{engine::general_purpose, Engine as _};
use curv::arithmetic::{Converter, Samplable};
use curv::BigInt;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zeroize::Zeroize;

/// Everything needed to join a signing session.
pub struct SessionParams {
    pub session: String,
    /// This client's party index, `0..parties.len()`.
    pub index: usize,
    pub parties: Vec<usize>,
    /// REST endpoint per party, `None` at `index`.
    pub endpoints: Vec<Option<String>>,
    /// Socket endpoint per party, `None` at `index`.
    pub socket_endpoints: Vec<Option<String>>,
    /// Base64 of the client's denormalized share.
    pub share: String,
    /// Base64 of the 64 byte signing public key.
    pub public_key: String,
}

impl Drop for SessionParams {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Constructed,
    Connected,
    Precomputing,
    Ready,
    Signed,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub r: BigInt,
    pub s: BigInt,
    /// Recovery id, 0 or 1.
    pub v: u8,
}

impl Signature {
    /// `r || s || v` as hex, with `v` offset by 27.
    pub fn to_hex(&self) -> TssClientResult<String> {
        hex_signature(&self.r, &self.s, self.v + 27)
    }
}

pub struct TssClient<E: SigningEngine, C: PeerClient> {
    session: String,
    sid: String,
    index: usize,
    parties: usize,
    public_key: String,
    config: ClientConfig,
    context: TssContext,
    engine: E,
    peers: C,
    signer: E::Signer,
    rng: E::Rng,
    comm: E::Comm,
    state: SessionState,
    consumed: bool,
    /// Every party reported the current precompute. Cleared by `precompute`.
    ready: bool,
}

impl<E: SigningEngine, C: PeerClient> TssClient<E, C> {
    /// Registers every remote party, opens their sockets and binds the
    /// engine to the shared mailbox.
    pub fn new(
        params: SessionParams,
        context: &TssContext,
        engine: E,
        peers: C,
        connector: &dyn SocketConnector,
        config: ClientConfig,
    ) -> TssClientResult<Self> {
        let parties = params.parties.len();
        if parties != params.endpoints.len() || parties != params.socket_endpoints.len() {
            return Err(TssClientError::LengthMismatch {
                parties,
                endpoints: params.endpoints.len(),
                socket_endpoints: params.socket_endpoints.len(),
            });
        }
        if params.index >= parties {
            return Err(TssClientError::InvalidIndex {
                index: params.index,
                parties,
            });
        }
        let sid = session::sid(&params.session)?;

        for party in (0..parties).filter(|party| *party != params.index) {
            let socket = match &params.socket_endpoints[party] {
                Some(url) => match TssSocket::connect(
                    connector,
                    &params.session,
                    &sid,
                    party,
                    url,
                    &config.socket,
                    context.mailbox().clone(),
                    context.ledger().clone(),
                ) {
                    Ok(socket) => Some(Arc::new(socket)),
                    Err(e) => {
                        context.connections().unregister_all(&params.session);
                        return Err(e);
                    }
                },
                None => None,
            };
            context.connections().register(ConnectionEntry {
                session: params.session.clone(),
                party,
                endpoint: params.endpoints[party].clone(),
                socket_endpoint: params.socket_endpoints[party].clone(),
                socket,
            });
        }

        let channel = Self::comm_channel(context, &config);
        let built = Self::engine_handles(&engine, &params, parties, channel);
        let (signer, rng, comm) = match built {
            Ok(handles) => handles,
            Err(e) => {
                context.connections().unregister_all(&params.session);
                return Err(e);
            }
        };

        info!(
            "tss client {} of {} joined session {}",
            params.index, parties, sid
        );
        Ok(TssClient {
            session: params.session.clone(),
            sid,
            index: params.index,
            parties,
            public_key: params.public_key.clone(),
            config,
            context: context.clone(),
            engine,
            peers,
            signer,
            rng,
            comm,
            state: SessionState::Constructed,
            consumed: false,
            ready: false,
        })
    }

    fn comm_channel(context: &TssContext, config: &ClientConfig) -> CommChannel {
        let mailbox = context.mailbox().clone();
        let ledger = context.ledger().clone();
        let read_timeout = config.read_timeout;
        let read = move |session: &str, recipient: usize, sender: usize, msg_type: &str| {
            let key = MessageKey::new(session, sender, recipient, msg_type);
            mailbox.take_unless(&key, read_timeout, || ledger.has_failure(session))
        };

        let connections = context.connections().clone();
        let send = move |session: &str, sender: usize, recipient: usize, msg_type: &str, payload: &str| {
            let socket = match connections.lookup(session, recipient) {
                Ok(ConnectionEntry {
                    socket: Some(socket), ..
                }) => socket,
                _ => {
                    warn!(
                        "dkls: no socket for party {}, dropping {}",
                        recipient,
                        message_tag(msg_type)
                    );
                    return false;
                }
            };
            socket.send(&TssSendMsg {
                session: session.to_string(),
                sender,
                recipient,
                msg_type: msg_type.to_string(),
                msg_data: payload.to_string(),
            })
        };

        CommChannel::new(read, send)
    }

    fn engine_handles(
        engine: &E,
        params: &SessionParams,
        parties: usize,
        channel: CommChannel,
    ) -> TssClientResult<(E::Signer, E::Rng, E::Comm)> {
        let comm = engine.comm(&params.session, params.index, parties, channel)?;
        let mut seed = to_32_bytes(&BigInt::sample(256))?;
        let rng = engine.random_generator(&seed);
        seed.zeroize();
        let signer = engine.signer(&SignerParams {
            session: params.session.clone(),
            player_index: params.index,
            parties,
            threshold: parties,
            share: params.share.clone(),
            public_key: params.public_key.clone(),
        })?;
        Ok((signer, rng?, comm))
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn party_count(&self) -> usize {
        self.parties
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    fn remote_parties(&self) -> impl Iterator<Item = usize> {
        let index = self.index;
        (0..self.parties).filter(move |party| *party != index)
    }

    fn lookup_socket(&self, party: usize) -> TssClientResult<Arc<TssSocket>> {
        self.context
            .connections()
            .lookup(&self.session, party)?
            .socket
            .ok_or_else(|| TssClientError::NotConnected {
                party,
                session: self.session.clone(),
            })
    }

    fn lookup_endpoint(&self, party: usize) -> TssClientResult<String> {
        self.context
            .connections()
            .lookup(&self.session, party)?
            .endpoint
            .ok_or(TssClientError::MissingEndpoint { party })
    }

    fn all_connected(&self) -> bool {
        self.remote_parties().all(|party| {
            self.lookup_socket(party)
                .map(|socket| socket.is_ready())
                .unwrap_or(false)
        })
    }

    /// Waits until every remote socket is connected and identified.
    pub fn check_connected(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.all_connected() {
                if self.state == SessionState::Constructed {
                    self.state = SessionState::Connected;
                }
                return true;
            }
            if Instant::now() >= deadline {
                warn!("tss client: sockets of {} not ready in time", self.sid);
                return false;
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn endpoint_list(&self, socket_id: &str) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .context
            .connections()
            .all_endpoints(&self.session)
            .into_iter()
            .map(|entry| entry.endpoint.unwrap_or_default())
            .collect();
        let at = self.index.min(endpoints.len());
        endpoints.insert(at, format!("websocket:{}", socket_id));
        endpoints
    }

    /// Asks every server to start its precompute, then runs the local one.
    pub fn precompute(
        &mut self,
        server_coeffs: &BTreeMap<String, String>,
        signatures: &[String],
    ) -> TssClientResult<Precompute> {
        self.context.ledger().set_focus(Instant::now());
        self.ready = false;

        for party in self.remote_parties() {
            if !self.lookup_socket(party)?.is_ready() {
                return Err(TssClientError::NotConnected {
                    party,
                    session: self.session.clone(),
                });
            }
        }

        for party in self.remote_parties() {
            let socket_id = self
                .lookup_socket(party)?
                .socket_id()
                .ok_or(TssClientError::SocketIdUnavailable { party })?;
            let endpoint = self.lookup_endpoint(party)?;
            let request = PrecomputeRequest {
                endpoints: self.endpoint_list(&socket_id),
                session: self.session.clone(),
                parties: (0..self.parties).collect(),
                player_index: party,
                threshold: self.parties,
                pubkey: self.public_key.clone(),
                notify_websocket_id: socket_id.clone(),
                send_websocket: socket_id,
                server_coeffs: server_coeffs.clone(),
                signatures: signatures.to_vec(),
            };
            if let Err(e) = post_json(&self.peers, party, &endpoint, PRECOMPUTE_ROUTE, &self.sid, &request) {
                self.state = SessionState::Failed;
                return Err(e);
            }
        }

        self.state = SessionState::Precomputing;
        if !self.engine.setup(&mut self.signer, &mut self.rng, &self.comm) {
            self.state = SessionState::Failed;
            return Err(TssClientError::SetupFailed);
        }

        let counterparties = Counterparties::new((0..self.parties).collect());
        debug!("tss client: precompute with {}", counterparties);
        match self
            .engine
            .precompute(&counterparties, &mut self.signer, &mut self.rng, &self.comm)
        {
            Ok(precompute) => {
                self.consumed = false;
                self.context.ledger().append(Event::new(
                    &self.session,
                    Some(self.index),
                    EventKind::RoundComplete,
                    "precompute_complete",
                ));
                info!("tss client: local precompute complete for {}", self.sid);
                Ok(precompute)
            }
            Err(e) => {
                self.context.ledger().append(Event::new(
                    &self.session,
                    Some(self.index),
                    EventKind::RoundError,
                    "precompute_failed",
                ));
                self.state = SessionState::Failed;
                error!("tss client: precompute failed: {}", e);
                Err(e)
            }
        }
    }

    /// True once every party reported a finished precompute. Fails as soon
    /// as any party reported a failure.
    pub fn is_ready(&mut self, timeout: Duration) -> TssClientResult<bool> {
        let parties = self.parties;
        let outcome = self.context.ledger().wait_for(
            &self.session,
            timeout,
            self.config.poll_interval,
            |counts| {
                let count = |kind| counts.get(&kind).copied().unwrap_or(0);
                if count(EventKind::RoundError) > 0 {
                    Some(Err(TssClientError::PrecomputeFailed))
                } else if count(EventKind::TransportError) > 0 {
                    Some(Err(TssClientError::InvalidPeerData))
                } else if count(EventKind::RoundComplete) == parties {
                    Some(Ok(()))
                } else {
                    None
                }
            },
        );
        match outcome {
            Some(Ok(())) => {
                self.ready = true;
                if self.state == SessionState::Precomputing {
                    self.state = SessionState::Ready;
                }
                Ok(true)
            }
            Some(Err(e)) => {
                self.state = SessionState::Failed;
                Err(e)
            }
            None => Ok(false),
        }
    }

    /// Collects a fragment from every server, adds the local one and
    /// combines them. Can only succeed once per client.
    pub fn sign(
        &mut self,
        message: &str,
        hash_only: bool,
        original_message: Option<&str>,
        precompute: &Precompute,
        signatures: &[String],
    ) -> TssClientResult<Signature> {
        if self.consumed {
            return Err(TssClientError::AlreadyConsumed);
        }
        if !self.ready && !self.is_ready(self.config.read_timeout)? {
            return Err(TssClientError::NotReady);
        }
        match self.sign_with_precompute(message, hash_only, original_message, precompute, signatures) {
            Ok(signature) => {
                self.consumed = true;
                self.state = SessionState::Signed;
                Ok(signature)
            }
            Err(e) => {
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn sign_with_precompute(
        &self,
        message: &str,
        hash_only: bool,
        original_message: Option<&str>,
        precompute: &Precompute,
        signatures: &[String],
    ) -> TssClientResult<Signature> {
        let completed = self
            .context
            .ledger()
            .count(&self.session)
            .get(&EventKind::RoundComplete)
            .copied()
            .unwrap_or(0);
        if completed != self.parties {
            return Err(TssClientError::InsufficientPrecomputes {
                completed,
                required: self.parties,
            });
        }

        if hash_only {
            let original = original_message.ok_or(TssClientError::MissingOriginalMessage)?;
            if hash_message(original) != message {
                return Err(TssClientError::HashMismatch);
            }
        }

        let mut fragments = Vec::with_capacity(self.parties);
        for party in self.remote_parties() {
            let endpoint = self.lookup_endpoint(party)?;
            let request = SignRequest {
                session: self.session.clone(),
                sender: self.index,
                recipient: party,
                msg: message.to_string(),
                hash_only,
                original_message: original_message.unwrap_or_default().to_string(),
                hash_algo: HASH_ALGORITHM.to_string(),
                signatures: signatures.to_vec(),
            };
            let body = post_json(&self.peers, party, &endpoint, SIGN_ROUTE, &self.sid, &request)?;
            fragments.push(decode_fragment(party, &body)?);
        }
        fragments.push(self.engine.local_sign(message, hash_only, precompute)?);

        let precompute_r = self.engine.precompute_r(precompute)?;
        let signature = self.engine.local_verify(
            message,
            hash_only,
            &precompute_r,
            &SignatureFragments::new(fragments),
            &self.public_key,
        )?;

        let decoded_r = general_purpose::STANDARD.decode(&precompute_r)?;
        let last = decoded_r
            .last()
            .ok_or_else(|| TssClientError::InvalidSignature(String::from("R from precompute is empty")))?;
        let mut v = last % 2;

        let decoded = general_purpose::STANDARD.decode(&signature)?;
        if decoded.len() != 64 {
            return Err(TssClientError::InvalidSignature(format!(
                "expected 64 signature bytes, got {}",
                decoded.len()
            )));
        }
        let r = BigInt::from_bytes(&decoded[..32]);
        let mut s = BigInt::from_bytes(&decoded[32..]);

        if self.config.s_less_than_half {
            let n = curve_order();
            let half = &n / &BigInt::from(2);
            if s > half {
                s = &n - &s;
                v ^= 1;
                debug!("tss client: normalized s to the lower half");
            }
        }

        info!("tss client: signed in session {}", self.sid);
        Ok(Signature { r, s, v })
    }

    /// Purges this session's messages and events and releases the servers.
    /// Stops at the first server that fails.
    pub fn cleanup(&mut self, signatures: &[String]) -> TssClientResult<()> {
        self.context.mailbox().remove_all(&self.session);
        self.context.ledger().remove_all(&self.session);
        self.consumed = false;
        self.ready = false;
        self.state = SessionState::Constructed;

        for party in self.remote_parties() {
            let endpoint = self.lookup_endpoint(party)?;
            let request = CleanupRequest {
                session: self.session.clone(),
                signatures: signatures.to_vec(),
            };
            post_json(&self.peers, party, &endpoint, CLEANUP_ROUTE, &self.sid, &request)?;
        }
        Ok(())
    }
}

impl<E: SigningEngine, C: PeerClient> Drop for TssClient<E, C> {
    fn drop(&mut self) {
        debug!("tss client: releasing session {}", self.sid);
        self.context.purge(&self.session);
    }
}
