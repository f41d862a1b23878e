//! In-memory servers and a toy signing engine for exercising [`TssClient`]
//! end to end.
//!
//! The mock protocol is not threshold secure: every party broadcasts a
//! random commitment and all parties derive the same nonce `k` from them.
//! It does exercise every callback, socket event and REST route a real
//! session uses, and it produces ordinary secp256k1 signatures.
//!
//! [`TssClient`]: crate::TssClient

use crate::client::SessionParams;
use crate::coefficients::{curve_order, denormalized_coefficient, invert_mod, lagrange_coefficient, reduce};
use crate::engine::{CommChannel, Counterparties, Precompute, SignatureFragments, SignerParams, SigningEngine};
use crate::error::{TssClientError, TssClientResult};
use crate::helpers::{
    base64_public_key, base64_share, decode_public_key, encode_public_key, hash_message, keccak256, scalar,
    to_32_bytes, verify_signature,
};
use crate::mailbox::{Message, MessageKey, MessageMailbox};
use crate::rest::{
    CleanupRequest, PeerClient, PeerResponse, PrecomputeRequest, SignRequest, CLEANUP_ROUTE, PRECOMPUTE_ROUTE,
    SIGN_ROUTE,
};
use crate::transport::{
    SocketConnection, SocketConnector, SocketEventHandler, SocketOptions, TssSendMsg, INBOUND_MESSAGE,
    PRECOMPUTE_COMPLETE, PRECOMPUTE_FAILED,
};
use base64::{engine::general_purpose, Engine as _};
use curv::arithmetic::{Converter, Samplable, Zero};
use curv::elliptic::curves::secp256_k1::GE;
use curv::elliptic::curves::traits::ECPoint;
use curv::BigInt;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const COMMIT: &str = "mock~commit";
const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn encode_scalar(value: &BigInt) -> TssClientResult<String> {
    Ok(hex::encode(to_32_bytes(value)?))
}

fn decode_scalar(value: &str) -> TssClientResult<BigInt> {
    Ok(BigInt::from_bytes(&hex::decode(value)?))
}

fn message_digest(message: &str, hash_only: bool) -> TssClientResult<BigInt> {
    if hash_only {
        Ok(BigInt::from_bytes(&general_purpose::STANDARD.decode(message)?))
    } else {
        Ok(BigInt::from_bytes(&keccak256(message.as_bytes())))
    }
}

fn r_of(encoded_point: &str) -> TssClientResult<BigInt> {
    let point = decode_public_key(&general_purpose::STANDARD.decode(encoded_point)?)?;
    let x = point.x_coor().ok_or(TssClientError::InvalidPublicKey)?;
    Ok(reduce(&x, &curve_order()))
}

#[derive(Serialize, Deserialize)]
struct MockPrecompute {
    parties: usize,
    k: String,
    r: String,
    additive_share: String,
}

impl MockPrecompute {
    fn parse(precompute: &Precompute) -> TssClientResult<Self> {
        Ok(serde_json::from_str(precompute.as_str())?)
    }
}

pub struct MockEngine;

pub struct MockRng {
    _seed: Vec<u8>,
}

pub struct MockComm {
    session: String,
    channel: CommChannel,
}

pub struct MockSigner {
    index: usize,
    parties: usize,
    share: BigInt,
    ready: bool,
}

impl SigningEngine for MockEngine {
    type Rng = MockRng;
    type Comm = MockComm;
    type Signer = MockSigner;

    fn random_generator(&self, seed: &[u8]) -> TssClientResult<MockRng> {
        Ok(MockRng { _seed: seed.to_vec() })
    }

    fn comm(&self, session: &str, _index: usize, _parties: usize, channel: CommChannel) -> TssClientResult<MockComm> {
        Ok(MockComm {
            session: session.to_string(),
            channel,
        })
    }

    fn signer(&self, params: &SignerParams) -> TssClientResult<MockSigner> {
        let share = BigInt::from_bytes(&general_purpose::STANDARD.decode(&params.share)?);
        decode_public_key(&general_purpose::STANDARD.decode(&params.public_key)?)?;
        Ok(MockSigner {
            index: params.player_index,
            parties: params.parties,
            share,
            ready: false,
        })
    }

    fn setup(&self, signer: &mut MockSigner, _rng: &mut MockRng, _comm: &MockComm) -> bool {
        signer.ready = true;
        true
    }

    fn precompute(
        &self,
        counterparties: &Counterparties,
        signer: &mut MockSigner,
        _rng: &mut MockRng,
        comm: &MockComm,
    ) -> TssClientResult<Precompute> {
        if !signer.ready {
            return Err(TssClientError::Engine(String::from("signer not set up")));
        }
        let n = curve_order();
        let own = encode_scalar(&BigInt::sample_below(&n))?;
        let peers: Vec<usize> = counterparties
            .parties()
            .iter()
            .copied()
            .filter(|party| *party != signer.index)
            .collect();

        for peer in &peers {
            if !comm.channel.send(&comm.session, signer.index, *peer, COMMIT, &own) {
                return Err(TssClientError::Engine(format!("party {} unreachable", peer)));
            }
        }
        let mut commitments = BTreeMap::new();
        commitments.insert(signer.index, own);
        for peer in &peers {
            let commitment = comm.channel.read(&comm.session, signer.index, *peer, COMMIT)?;
            commitments.insert(*peer, commitment);
        }

        let transcript: Vec<String> = commitments.into_iter().map(|(_, c)| c).collect();
        let k = reduce(&BigInt::from_bytes(&keccak256(transcript.join(",").as_bytes())), &n);
        let k_scalar = scalar(&k).ok_or_else(|| TssClientError::Engine(String::from("zero nonce")))?;
        let big_r = GE::generator() * &k_scalar;

        let positions: Vec<BigInt> = (1..=signer.parties).map(|p| BigInt::from(p as u64)).collect();
        let lambda = lagrange_coefficient(&positions, &BigInt::from(signer.index as u64 + 1))?;
        let additive = reduce(&(&signer.share * &lambda), &n);

        let blob = MockPrecompute {
            parties: signer.parties,
            k: encode_scalar(&k)?,
            r: general_purpose::STANDARD.encode(&encode_public_key(&big_r)?[..]),
            additive_share: encode_scalar(&additive)?,
        };
        Ok(Precompute::new(serde_json::to_string(&blob)?))
    }

    fn precompute_r(&self, precompute: &Precompute) -> TssClientResult<String> {
        Ok(MockPrecompute::parse(precompute)?.r)
    }

    fn local_sign(&self, message: &str, hash_only: bool, precompute: &Precompute) -> TssClientResult<String> {
        let n = curve_order();
        let blob = MockPrecompute::parse(precompute)?;
        let z = reduce(&message_digest(message, hash_only)?, &n);
        let k_inv = invert_mod(&decode_scalar(&blob.k)?, &n)?;
        let parties_inv = invert_mod(&BigInt::from(blob.parties as u64), &n)?;
        let r = r_of(&blob.r)?;
        let additive = decode_scalar(&blob.additive_share)?;

        let inner = reduce(&(&(&z * &parties_inv) + &(&r * &additive)), &n);
        encode_scalar(&reduce(&(&k_inv * &inner), &n))
    }

    fn local_verify(
        &self,
        message: &str,
        hash_only: bool,
        r: &str,
        fragments: &SignatureFragments,
        public_key: &str,
    ) -> TssClientResult<String> {
        let n = curve_order();
        let mut s = BigInt::zero();
        for fragment in fragments.fragments() {
            s = reduce(&(&s + &decode_scalar(fragment)?), &n);
        }
        let r = r_of(r)?;
        let public_key = general_purpose::STANDARD.decode(public_key)?;
        let msg_hash = if hash_only {
            message.to_string()
        } else {
            hash_message(message)
        };
        if !verify_signature(&msg_hash, &r, &s, &public_key) {
            return Err(TssClientError::InvalidSignature(String::from(
                "combined signature does not verify",
            )));
        }
        let mut bytes = to_32_bytes(&r)?.to_vec();
        bytes.extend_from_slice(&to_32_bytes(&s)?);
        Ok(general_purpose::STANDARD.encode(bytes))
    }
}

pub fn server_url(party: usize) -> String {
    format!("http://server-{}.sim/tss", party)
}

pub fn server_socket_url(party: usize) -> String {
    format!("http://server-{}.sim", party)
}

fn party_of(url: &str) -> Option<usize> {
    let rest = url.strip_prefix("http://server-")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

struct ServerNode {
    share: String,
    mailbox: Arc<MessageMailbox>,
    precomputes: Mutex<HashMap<String, Precompute>>,
}

struct Hub {
    client_index: usize,
    servers: BTreeMap<usize, Arc<ServerNode>>,
    handlers: Mutex<HashMap<usize, Arc<dyn SocketEventHandler>>>,
    links: Mutex<Vec<Arc<AtomicBool>>>,
    offline: Mutex<HashSet<usize>>,
    rejections: Mutex<HashMap<(usize, String), u16>>,
    failing: Mutex<HashSet<usize>>,
    cleanups: AtomicUsize,
    sign_requests: AtomicUsize,
}

impl Hub {
    /// Delivers an event on the client's socket to `server`.
    fn notify_client(&self, server: usize, event: &str, payload: Value) {
        let handler = self.handlers.lock().get(&server).cloned();
        match handler {
            Some(handler) => handler.on_event(event, &payload),
            None => debug!("sim: no client socket for server {}", server),
        }
    }

    fn route(&self, session: &str, sender: usize, recipient: usize, msg_type: &str, payload: &str) -> bool {
        if recipient == self.client_index {
            self.notify_client(
                sender,
                INBOUND_MESSAGE,
                json!({
                    "session": session,
                    "sender": sender,
                    "recipient": recipient,
                    "msg_type": msg_type,
                    "msg_data": payload,
                }),
            );
            return true;
        }
        match self.servers.get(&recipient) {
            Some(server) => {
                server.mailbox.put(Message {
                    session: session.to_string(),
                    sender,
                    recipient,
                    msg_type: msg_type.to_string(),
                    payload: payload.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn server_channel(hub: &Arc<Hub>, party: usize) -> TssClientResult<CommChannel> {
        let server = hub
            .servers
            .get(&party)
            .cloned()
            .ok_or(TssClientError::MissingEndpoint { party })?;
        let router = hub.clone();
        Ok(CommChannel::new(
            move |session: &str, recipient: usize, sender: usize, msg_type: &str| {
                server
                    .mailbox
                    .take(&MessageKey::new(session, sender, recipient, msg_type), SERVER_READ_TIMEOUT)
            },
            move |session: &str, sender: usize, recipient: usize, msg_type: &str, payload: &str| {
                router.route(session, sender, recipient, msg_type, payload)
            },
        ))
    }

    fn run_precompute(hub: Arc<Hub>, party: usize, request: PrecomputeRequest) {
        let update = json!({ "session": request.session, "party": party });
        if hub.failing.lock().contains(&party) {
            hub.notify_client(party, PRECOMPUTE_FAILED, update);
            return;
        }
        let outcome = (|| -> TssClientResult<()> {
            let server = hub
                .servers
                .get(&party)
                .ok_or(TssClientError::MissingEndpoint { party })?;
            let engine = MockEngine;
            let comm = engine.comm(
                &request.session,
                party,
                request.parties.len(),
                Hub::server_channel(&hub, party)?,
            )?;
            let mut rng = engine.random_generator(&[0u8; 32])?;
            let mut signer = engine.signer(&SignerParams {
                session: request.session.clone(),
                player_index: party,
                parties: request.parties.len(),
                threshold: request.threshold,
                share: server.share.clone(),
                public_key: request.pubkey.clone(),
            })?;
            if !engine.setup(&mut signer, &mut rng, &comm) {
                return Err(TssClientError::SetupFailed);
            }
            let counterparties = Counterparties::new(request.parties.clone());
            let precompute = engine.precompute(&counterparties, &mut signer, &mut rng, &comm)?;
            server
                .precomputes
                .lock()
                .insert(request.session.clone(), precompute);
            Ok(())
        })();
        match outcome {
            Ok(()) => hub.notify_client(party, PRECOMPUTE_COMPLETE, update),
            Err(e) => {
                debug!("sim: server {} precompute failed: {}", party, e);
                hub.notify_client(party, PRECOMPUTE_FAILED, update)
            }
        }
    }
}

struct SimConnection {
    hub: Arc<Hub>,
    party: usize,
    connected: Arc<AtomicBool>,
}

impl SocketConnection for SimConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn id(&self) -> Option<String> {
        if self.is_connected() {
            Some(format!("sim-socket-{}", self.party))
        } else {
            None
        }
    }

    fn emit(&self, _event: &str, payload: Value) -> bool {
        if !self.is_connected() {
            return false;
        }
        let msg: TssSendMsg = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => return false,
        };
        self.hub
            .route(&msg.session, msg.sender, msg.recipient, &msg.msg_type, &msg.msg_data)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Remote servers of one session, reachable through [`PeerClient`] and
/// [`SocketConnector`].
#[derive(Clone)]
pub struct SimulatedNetwork {
    hub: Arc<Hub>,
}

impl SimulatedNetwork {
    pub fn new(client_index: usize, server_shares: BTreeMap<usize, String>) -> Self {
        let servers = server_shares
            .into_iter()
            .map(|(party, share)| {
                let node = ServerNode {
                    share,
                    mailbox: Arc::new(MessageMailbox::new(Duration::from_millis(5))),
                    precomputes: Mutex::new(HashMap::new()),
                };
                (party, Arc::new(node))
            })
            .collect();
        SimulatedNetwork {
            hub: Arc::new(Hub {
                client_index,
                servers,
                handlers: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
                offline: Mutex::new(HashSet::new()),
                rejections: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                cleanups: AtomicUsize::new(0),
                sign_requests: AtomicUsize::new(0),
            }),
        }
    }

    /// Sockets opened to `party` from now on never connect.
    pub fn set_offline(&self, party: usize) {
        self.hub.offline.lock().insert(party);
    }

    pub fn reject(&self, party: usize, route: &str, status: u16) {
        self.hub
            .rejections
            .lock()
            .insert((party, route.to_string()), status);
    }

    /// `party` reports a failed precompute instead of running one.
    pub fn fail_precompute(&self, party: usize) {
        self.hub.failing.lock().insert(party);
    }

    pub fn cleanups(&self) -> usize {
        self.hub.cleanups.load(Ordering::SeqCst)
    }

    pub fn sign_requests(&self) -> usize {
        self.hub.sign_requests.load(Ordering::SeqCst)
    }

    pub fn all_disconnected(&self) -> bool {
        self.hub
            .links
            .lock()
            .iter()
            .all(|link| !link.load(Ordering::SeqCst))
    }

    fn respond(status: u16, body: Value) -> TssClientResult<PeerResponse> {
        Ok(PeerResponse {
            status,
            body: body.to_string(),
        })
    }
}

impl SocketConnector for SimulatedNetwork {
    fn connect(
        &self,
        url: &str,
        options: &SocketOptions,
        handler: Arc<dyn SocketEventHandler>,
    ) -> TssClientResult<Box<dyn SocketConnection>> {
        let party = party_of(url).ok_or_else(|| TssClientError::PeerUnreachable {
            party: 0,
            reason: format!("unknown socket url {}", url),
        })?;
        debug!(
            "sim: client socket to server {} (sessionId {:?})",
            party,
            options.connect_params.get("sessionId")
        );
        let online = !self.hub.offline.lock().contains(&party);
        let connected = Arc::new(AtomicBool::new(online));
        self.hub.links.lock().push(connected.clone());
        if online {
            handler.on_connect();
        }
        self.hub.handlers.lock().insert(party, handler);
        Ok(Box::new(SimConnection {
            hub: self.hub.clone(),
            party,
            connected,
        }))
    }
}

impl PeerClient for SimulatedNetwork {
    fn post(&self, party: usize, url: &str, _sid: &str, body: &str) -> TssClientResult<PeerResponse> {
        let server_party = party_of(url).ok_or_else(|| TssClientError::PeerUnreachable {
            party,
            reason: format!("unknown url {}", url),
        })?;
        let server = match self.hub.servers.get(&server_party) {
            Some(server) => server.clone(),
            None => return Self::respond(404, json!({})),
        };
        let route = [PRECOMPUTE_ROUTE, SIGN_ROUTE, CLEANUP_ROUTE]
            .iter()
            .find(|route| url.ends_with(*route))
            .copied()
            .unwrap_or("");
        if let Some(status) = self
            .hub
            .rejections
            .lock()
            .get(&(server_party, route.to_string()))
        {
            return Self::respond(*status, json!({}));
        }

        match route {
            PRECOMPUTE_ROUTE => {
                let request: PrecomputeRequest = serde_json::from_str(body)?;
                let hub = self.hub.clone();
                thread::spawn(move || Hub::run_precompute(hub, server_party, request));
                Self::respond(200, json!({}))
            }
            SIGN_ROUTE => {
                self.hub.sign_requests.fetch_add(1, Ordering::SeqCst);
                let request: SignRequest = serde_json::from_str(body)?;
                let precompute = server.precomputes.lock().get(&request.session).cloned();
                let precompute = match precompute {
                    Some(precompute) => precompute,
                    None => return Self::respond(400, json!({"error": "no precompute"})),
                };
                match MockEngine.local_sign(&request.msg, request.hash_only, &precompute) {
                    Ok(fragment) => Self::respond(200, json!({ "sig": fragment })),
                    Err(e) => Self::respond(500, json!({ "error": e.to_string() })),
                }
            }
            CLEANUP_ROUTE => {
                self.hub.cleanups.fetch_add(1, Ordering::SeqCst);
                let request: CleanupRequest = serde_json::from_str(body)?;
                server.precomputes.lock().remove(&request.session);
                server.mailbox.remove_all(&request.session);
                Self::respond(200, json!({}))
            }
            _ => Self::respond(404, json!({})),
        }
    }
}

/// A freshly dealt key and the network of servers holding its shares.
pub struct SimulatedSession {
    pub session: String,
    pub index: usize,
    pub parties: usize,
    pub network: SimulatedNetwork,
    /// Uncompressed public key of the dealt private key.
    pub public_key: [u8; 65],
    client_share: BigInt,
}

impl SimulatedSession {
    /// Splits a random private key additively over `parties` parties and
    /// denormalizes every part for positions `1..=parties`.
    pub fn new(session: &str, parties: usize, index: usize) -> Self {
        let n = curve_order();
        let private_key = BigInt::sample_below(&n);
        let mut additive: Vec<BigInt> = (1..parties).map(|_| BigInt::sample_below(&n)).collect();
        let partial = additive
            .iter()
            .fold(BigInt::zero(), |acc, part| reduce(&(&acc + part), &n));
        additive.push(reduce(&(&private_key - &partial), &n));

        let positions: Vec<BigInt> = (1..=parties).map(|p| BigInt::from(p as u64)).collect();
        let shares: Vec<BigInt> = additive
            .iter()
            .enumerate()
            .map(|(i, part)| {
                let coefficient = denormalized_coefficient(&BigInt::from(i as u64 + 1), &positions).unwrap();
                reduce(&(part * &coefficient), &n)
            })
            .collect();

        let public_key = encode_public_key(&(GE::generator() * &scalar(&private_key).unwrap())).unwrap();
        let server_shares = shares
            .iter()
            .enumerate()
            .filter(|(party, _)| *party != index)
            .map(|(party, share)| (party, base64_share(share).unwrap()))
            .collect();

        SimulatedSession {
            session: session.to_string(),
            index,
            parties,
            network: SimulatedNetwork::new(index, server_shares),
            public_key,
            client_share: shares[index].clone(),
        }
    }

    pub fn params(&self) -> SessionParams {
        let slot = |url: fn(usize) -> String| -> Vec<Option<String>> {
            (0..self.parties)
                .map(|party| if party == self.index { None } else { Some(url(party)) })
                .collect()
        };
        SessionParams {
            session: self.session.clone(),
            index: self.index,
            parties: (0..self.parties).collect(),
            endpoints: slot(server_url),
            socket_endpoints: slot(server_socket_url),
            share: base64_share(&self.client_share).unwrap(),
            public_key: base64_public_key(&self.public_key).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_map_back_to_parties() {
        assert_eq!(party_of(&server_url(12)), Some(12));
        assert_eq!(party_of(&format!("{}{}", server_url(3), SIGN_ROUTE)), Some(3));
        assert_eq!(party_of(&server_socket_url(7)), Some(7));
        assert_eq!(party_of("http://elsewhere"), None);
    }

    #[test]
    fn dealt_shares_reconstruct_the_key() {
        let setup = SimulatedSession::new("s", 4, 3);
        let n = curve_order();
        let positions: Vec<BigInt> = (1..=4).map(|p| BigInt::from(p as u64)).collect();
        let mut total = BigInt::zero();
        for party in 0..4 {
            let share = if party == setup.index {
                setup.client_share.clone()
            } else {
                let encoded = &setup.network.hub.servers[&party].share;
                BigInt::from_bytes(&general_purpose::STANDARD.decode(encoded).unwrap())
            };
            let lambda = lagrange_coefficient(&positions, &BigInt::from(party as u64 + 1)).unwrap();
            total = reduce(&(&total + &(&share * &lambda)), &n);
        }
        let point = GE::generator() * &scalar(&total).unwrap();
        assert_eq!(encode_public_key(&point).unwrap().to_vec(), setup.public_key.to_vec());

        let params = setup.params();
        assert_eq!(params.endpoints[3], None);
        assert_eq!(params.socket_endpoints[0].as_deref(), Some("http://server-0.sim"));
    }
}
