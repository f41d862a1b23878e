//! Boundary to the multiparty signing engine.
//!
//! The engine runs the DKLS rounds. It talks to the other parties only
//! through the two callbacks of a [`CommChannel`], which block the calling
//! engine thread until a message arrives or the read times out. Handles
//! the engine hands out are owned values and are released on drop.

use crate::error::{TssClientError, TssClientResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroize;

/// `read(session, recipient, sender, msg_type)`.
pub type ReadCallback = dyn Fn(&str, usize, usize, &str) -> TssClientResult<String> + Send + Sync;

/// `send(session, sender, recipient, msg_type, payload)`.
pub type SendCallback = dyn Fn(&str, usize, usize, &str, &str) -> bool + Send + Sync;

#[derive(Clone)]
pub struct CommChannel {
    read: Arc<ReadCallback>,
    send: Arc<SendCallback>,
}

impl CommChannel {
    pub fn new<R, S>(read: R, send: S) -> Self
    where
        R: Fn(&str, usize, usize, &str) -> TssClientResult<String> + Send + Sync + 'static,
        S: Fn(&str, usize, usize, &str, &str) -> bool + Send + Sync + 'static,
    {
        CommChannel {
            read: Arc::new(read),
            send: Arc::new(send),
        }
    }

    pub fn read(&self, session: &str, recipient: usize, sender: usize, msg_type: &str) -> TssClientResult<String> {
        (self.read)(session, recipient, sender, msg_type)
    }

    pub fn send(&self, session: &str, sender: usize, recipient: usize, msg_type: &str, payload: &str) -> bool {
        (self.send)(session, sender, recipient, msg_type, payload)
    }
}

/// Inputs for creating a threshold signer. The share is wiped on drop.
pub struct SignerParams {
    pub session: String,
    pub player_index: usize,
    pub parties: usize,
    pub threshold: usize,
    /// Base64 of the 32 byte share.
    pub share: String,
    /// Base64 of the 64 byte public key.
    pub public_key: String,
}

impl Drop for SignerParams {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

/// Parties taking part in a precompute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counterparties(Vec<usize>);

impl Counterparties {
    pub fn new(parties: Vec<usize>) -> Self {
        Counterparties(parties)
    }

    pub fn parties(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for Counterparties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let csv: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", csv.join(","))
    }
}

impl FromStr for Counterparties {
    type Err = TssClientError;

    fn from_str(csv: &str) -> Result<Self, Self::Err> {
        csv.split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .map_err(|e| TssClientError::Engine(format!("invalid counterparty {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Counterparties)
    }
}

/// Signature fragments of every party, the local one last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureFragments(Vec<String>);

impl SignatureFragments {
    pub fn new(fragments: Vec<String>) -> Self {
        SignatureFragments(fragments)
    }

    pub fn fragments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for SignatureFragments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

impl FromStr for SignatureFragments {
    type Err = TssClientError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Err(TssClientError::Engine(String::from("no signature fragments")));
        }
        Ok(SignatureFragments(input.split(',').map(String::from).collect()))
    }
}

/// Opaque precompute produced by the engine. Wiped on drop.
#[derive(Clone, PartialEq)]
pub struct Precompute(String);

impl Precompute {
    pub fn new(blob: String) -> Self {
        Precompute(blob)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Precompute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Precompute(..)")
    }
}

impl Drop for Precompute {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub trait SigningEngine: Send + Sync {
    type Rng: Send;
    type Comm: Send;
    type Signer: Send;

    fn random_generator(&self, seed: &[u8]) -> TssClientResult<Self::Rng>;

    fn comm(&self, session: &str, index: usize, parties: usize, channel: CommChannel) -> TssClientResult<Self::Comm>;

    fn signer(&self, params: &SignerParams) -> TssClientResult<Self::Signer>;

    fn setup(&self, signer: &mut Self::Signer, rng: &mut Self::Rng, comm: &Self::Comm) -> bool;

    /// Runs the precompute rounds. Blocks on the comm callbacks.
    fn precompute(
        &self,
        counterparties: &Counterparties,
        signer: &mut Self::Signer,
        rng: &mut Self::Rng,
        comm: &Self::Comm,
    ) -> TssClientResult<Precompute>;

    /// Base64 of the serialized `R` point inside a precompute.
    fn precompute_r(&self, precompute: &Precompute) -> TssClientResult<String>;

    /// This party's signature fragment.
    fn local_sign(&self, message: &str, hash_only: bool, precompute: &Precompute) -> TssClientResult<String>;

    /// Combines and verifies all fragments. Returns base64 of `r || s`.
    fn local_verify(
        &self,
        message: &str,
        hash_only: bool,
        r: &str,
        fragments: &SignatureFragments,
        public_key: &str,
    ) -> TssClientResult<String>;
}
