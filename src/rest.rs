//! REST calls issued to remote parties.

use crate::error::{TssClientError, TssClientResult};
use log::warn;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub const SESSION_HEADER: &str = "x-web3-session-id";
pub const HASH_ALGORITHM: &str = "keccak256";

pub const PRECOMPUTE_ROUTE: &str = "/precompute";
pub const SIGN_ROUTE: &str = "/sign";
pub const CLEANUP_ROUTE: &str = "/cleanup";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecomputeRequest {
    pub endpoints: Vec<String>,
    pub session: String,
    pub parties: Vec<usize>,
    pub player_index: usize,
    pub threshold: usize,
    pub pubkey: String,
    #[serde(rename = "notifyWebsocketId")]
    pub notify_websocket_id: String,
    #[serde(rename = "sendWebsocket")]
    pub send_websocket: String,
    pub server_coeffs: BTreeMap<String, String>,
    pub signatures: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub session: String,
    pub sender: usize,
    pub recipient: usize,
    pub msg: String,
    pub hash_only: bool,
    pub original_message: String,
    pub hash_algo: String,
    pub signatures: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub session: String,
    pub signatures: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeerResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking POST of a JSON body to a remote party.
pub trait PeerClient: Send + Sync {
    fn post(&self, party: usize, url: &str, sid: &str, body: &str) -> TssClientResult<PeerResponse>;
}

pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> TssClientResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TssClientError::PeerUnreachable {
                party: 0,
                reason: e.to_string(),
            })?;
        Ok(HttpPeerClient { client })
    }
}

impl PeerClient for HttpPeerClient {
    fn post(&self, party: usize, url: &str, sid: &str, body: &str) -> TssClientResult<PeerResponse> {
        let unreachable = |e: reqwest::Error| TssClientError::PeerUnreachable {
            party,
            reason: e.to_string(),
        };
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SESSION_HEADER, sid)
            .body(body.to_string())
            .send()
            .map_err(unreachable)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(unreachable)?;
        Ok(PeerResponse { status, body })
    }
}

/// Posts `request` to `endpoint + route` and returns the response body.
/// Any status other than 200 is a rejection by that party.
pub fn post_json<T: Serialize>(
    client: &dyn PeerClient,
    party: usize,
    endpoint: &str,
    route: &str,
    sid: &str,
    request: &T,
) -> TssClientResult<String> {
    let url = format!("{}{}", endpoint, route);
    let body = serde_json::to_string(request)?;
    let resp = client.post(party, &url, sid, &body)?;
    if resp.status != 200 {
        warn!("Failed {} route ({}) for {}", route, resp.status, url);
        return Err(TssClientError::PeerRejected {
            party,
            status: resp.status,
        });
    }
    Ok(resp.body)
}

/// A sign response is a single-entry object whose value is the fragment.
pub fn decode_fragment(party: usize, body: &str) -> TssClientResult<String> {
    let decoded: HashMap<String, String> =
        serde_json::from_str(body).map_err(|e| TssClientError::InvalidPeerResponse {
            party,
            reason: e.to_string(),
        })?;
    decoded
        .into_iter()
        .next()
        .map(|(_, fragment)| fragment)
        .ok_or_else(|| TssClientError::InvalidPeerResponse {
            party,
            reason: String::from("no signature fragment"),
        })
}
