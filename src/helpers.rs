//! Encoding and secp256k1 helpers used around a signing session: message
//! hashing, share and key serialization, signature recovery and the
//! endpoint layout handed to [`TssClient`](crate::TssClient).

use crate::coefficients::{curve_order, invert_mod, reduce};
use crate::error::{TssClientError, TssClientResult};
use base64::{engine::general_purpose, Engine as _};
use curv::arithmetic::{Converter, Modulo, One, Zero};
use curv::elliptic::curves::secp256_k1::{FE, GE};
use curv::elliptic::curves::traits::{ECPoint, ECScalar};
use curv::BigInt;
use sha3::{Digest, Keccak256};

const FIELD_PRIME: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];

pub(crate) fn field_prime() -> BigInt {
    BigInt::from_bytes(&FIELD_PRIME)
}

/// Big-endian, left padded to 32 bytes. Values wider than 32 bytes are rejected.
pub fn to_32_bytes(value: &BigInt) -> TssClientResult<[u8; 32]> {
    if value < &BigInt::zero() {
        return Err(TssClientError::NegativeShare);
    }
    let bytes = value.to_bytes();
    if bytes.len() > 32 {
        return Err(TssClientError::InvalidSignature(format!(
            "value is {} bytes wide",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

pub(crate) fn scalar(value: &BigInt) -> Option<FE> {
    let value = reduce(value, &curve_order());
    if value.is_zero() {
        None
    } else {
        Some(ECScalar::from(&value))
    }
}

fn on_curve(x: &BigInt, y: &BigInt) -> bool {
    let p = field_prime();
    if x >= &p || y >= &p || x < &BigInt::zero() || y < &BigInt::zero() {
        return false;
    }
    let lhs = BigInt::mod_mul(y, y, &p);
    let rhs = reduce(&(&BigInt::mod_pow(x, &BigInt::from(3), &p) + &BigInt::from(7)), &p);
    lhs == rhs
}

/// Solves `y^2 = x^3 + 7` and picks the root whose parity matches `odd`.
fn lift_x(x: &BigInt, odd: bool) -> Option<BigInt> {
    let p = field_prime();
    if x >= &p {
        return None;
    }
    let y_squared = reduce(&(&BigInt::mod_pow(x, &BigInt::from(3), &p) + &BigInt::from(7)), &p);
    let exponent = &(&p + &BigInt::one()) / &BigInt::from(4);
    let y = BigInt::mod_pow(&y_squared, &exponent, &p);
    if BigInt::mod_mul(&y, &y, &p) != y_squared {
        return None;
    }
    let y_odd = y.to_bytes().last().map(|b| b & 1 == 1).unwrap_or(false);
    if y_odd == odd {
        Some(y)
    } else {
        Some(&p - &y)
    }
}

/// Parses a secp256k1 public key given as 65 bytes (`04 || x || y`),
/// 64 bytes (`x || y`) or 33 bytes (compressed).
pub fn decode_public_key(bytes: &[u8]) -> TssClientResult<GE> {
    let (x, y) = match bytes.len() {
        65 if bytes[0] == 0x04 => (
            BigInt::from_bytes(&bytes[1..33]),
            BigInt::from_bytes(&bytes[33..]),
        ),
        64 => (
            BigInt::from_bytes(&bytes[..32]),
            BigInt::from_bytes(&bytes[32..]),
        ),
        33 if bytes[0] == 0x02 || bytes[0] == 0x03 => {
            let x = BigInt::from_bytes(&bytes[1..]);
            let y = lift_x(&x, bytes[0] == 0x03).ok_or(TssClientError::InvalidPublicKey)?;
            (x, y)
        }
        _ => return Err(TssClientError::InvalidPublicKey),
    };
    if !on_curve(&x, &y) {
        return Err(TssClientError::InvalidPublicKey);
    }
    Ok(GE::from_coor(&x, &y))
}

/// Serializes a point as `04 || x || y`.
pub fn encode_public_key(point: &GE) -> TssClientResult<[u8; 65]> {
    let x = point.x_coor().ok_or(TssClientError::InvalidPublicKey)?;
    let y = point.y_coor().ok_or(TssClientError::InvalidPublicKey)?;
    let mut out = [0u8; 65];
    out[0] = 0x04;
    out[1..33].copy_from_slice(&to_32_bytes(&x)?);
    out[33..].copy_from_slice(&to_32_bytes(&y)?);
    Ok(out)
}

/// `a * P + b * Q`, skipping terms whose scalar is zero.
pub(crate) fn combine_terms(terms: &[(&BigInt, &GE)]) -> TssClientResult<GE> {
    let mut acc: Option<GE> = None;
    for (k, point) in terms {
        let k = match scalar(k) {
            Some(k) => k,
            None => continue,
        };
        let term = (*point).clone() * &k;
        acc = Some(match acc {
            Some(sum) => sum + term,
            None => term,
        });
    }
    acc.ok_or(TssClientError::InvalidPublicKey)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Base64 of the keccak-256 digest of the UTF-8 message.
pub fn hash_message(message: &str) -> String {
    general_purpose::STANDARD.encode(keccak256(message.as_bytes()))
}

/// Base64 of a share serialized as 32 big-endian bytes.
pub fn base64_share(share: &BigInt) -> TssClientResult<String> {
    Ok(general_purpose::STANDARD.encode(to_32_bytes(share)?))
}

/// Base64 of the 64 byte `x || y` form of an uncompressed public key.
pub fn base64_public_key(public_key: &[u8]) -> TssClientResult<String> {
    match public_key.len() {
        65 if public_key[0] == 0x04 => Ok(general_purpose::STANDARD.encode(&public_key[1..])),
        64 => Ok(general_purpose::STANDARD.encode(public_key)),
        _ => Err(TssClientError::InvalidPublicKey),
    }
}

pub fn hex_uncompressed_public_key(public_key: &[u8], return_64_bytes: bool) -> TssClientResult<String> {
    let encoded = encode_public_key(&decode_public_key(public_key)?)?;
    if return_64_bytes {
        Ok(hex::encode(&encoded[1..]))
    } else {
        Ok(hex::encode(&encoded[..]))
    }
}

pub fn base64_to_base64url(value: &str) -> String {
    value
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect()
}

/// Hex of `r || s || v` with `r` and `s` padded to 32 bytes.
pub fn hex_signature(r: &BigInt, s: &BigInt, v: u8) -> TssClientResult<String> {
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(&to_32_bytes(r)?);
    bytes.extend_from_slice(&to_32_bytes(s)?);
    bytes.push(v);
    Ok(hex::encode(bytes))
}

pub fn remove_leading_zeros(hex: &str) -> String {
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        String::from("0")
    } else {
        trimmed.to_string()
    }
}

fn decode_hash(msg_hash: &str) -> TssClientResult<BigInt> {
    let digest = general_purpose::STANDARD.decode(msg_hash)?;
    Ok(BigInt::from_bytes(&digest))
}

/// Recovers the signer's uncompressed public key from a hash (base64) and
/// an `(r, s, v)` triple. `v` may be given as `0/1` or `27/28`.
pub fn recover_public_key(
    msg_hash: &str,
    s: &BigInt,
    r: &BigInt,
    v: u8,
) -> TssClientResult<[u8; 65]> {
    let n = curve_order();
    let v = if v >= 27 { v - 27 } else { v };
    if v > 1 {
        return Err(TssClientError::InvalidSignature(format!("recovery id {}", v)));
    }
    if r.is_zero() || s.is_zero() || r >= &n || s >= &n {
        return Err(TssClientError::InvalidSignature(String::from(
            "r or s out of range",
        )));
    }
    let z = reduce(&decode_hash(msg_hash)?, &n);
    let y = lift_x(r, v == 1)
        .ok_or_else(|| TssClientError::InvalidSignature(String::from("r is not on the curve")))?;
    let big_r = GE::from_coor(r, &y);

    let r_inv = invert_mod(r, &n)?;
    let u1 = reduce(&(&n - &BigInt::mod_mul(&z, &r_inv, &n)), &n);
    let u2 = BigInt::mod_mul(s, &r_inv, &n);
    let generator = GE::generator();
    let q = combine_terms(&[(&u1, &generator), (&u2, &big_r)])?;
    encode_public_key(&q)
}

/// Standard ECDSA verification of `(r, s)` over a base64 hash.
pub fn verify_signature(msg_hash: &str, r: &BigInt, s: &BigInt, public_key: &[u8]) -> bool {
    let n = curve_order();
    if r.is_zero() || s.is_zero() || r >= &n || s >= &n {
        return false;
    }
    let public_key = match decode_public_key(public_key) {
        Ok(point) => point,
        Err(_) => return false,
    };
    let z = match decode_hash(msg_hash) {
        Ok(z) => reduce(&z, &n),
        Err(_) => return false,
    };
    let s_inv = match invert_mod(s, &n) {
        Ok(inv) => inv,
        Err(_) => return false,
    };
    let u1 = BigInt::mod_mul(&z, &s_inv, &n);
    let u2 = BigInt::mod_mul(r, &s_inv, &n);
    let generator = GE::generator();
    match combine_terms(&[(&u1, &generator), (&u2, &public_key)]) {
        Ok(point) => match point.x_coor() {
            Some(x) => reduce(&x, &n) == *r,
            None => false,
        },
        Err(_) => false,
    }
}

/// Endpoint layout for a session, indexed by party. The client's own slot
/// holds `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub endpoints: Vec<Option<String>>,
    pub socket_endpoints: Vec<Option<String>>,
    pub party_indexes: Vec<usize>,
    pub server_indexes: Vec<usize>,
}

/// Lays out REST and socket endpoints for `parties` participants. Server
/// party `i` talks to `urls[node_indexes[i] - 1]` when a node index is
/// given, or `urls[i]` otherwise. Socket URLs are the REST URLs without
/// their `/tss` mount point.
pub fn generate_endpoints(
    parties: usize,
    client_index: usize,
    node_indexes: &[usize],
    urls: &[String],
) -> TssClientResult<Endpoints> {
    if client_index >= parties {
        return Err(TssClientError::InvalidIndex {
            index: client_index,
            parties,
        });
    }
    let mut layout = Endpoints {
        endpoints: Vec::with_capacity(parties),
        socket_endpoints: Vec::with_capacity(parties),
        party_indexes: Vec::with_capacity(parties),
        server_indexes: Vec::with_capacity(parties.saturating_sub(1)),
    };
    for i in 0..parties {
        layout.party_indexes.push(i);
        if i == client_index {
            layout.endpoints.push(None);
            layout.socket_endpoints.push(None);
            continue;
        }
        let url_index = match node_indexes.get(i) {
            Some(&node) => {
                let url_index = node
                    .checked_sub(1)
                    .ok_or(TssClientError::InvalidIndex { index: node, parties })?;
                layout.server_indexes.push(node);
                url_index
            }
            None => {
                layout.server_indexes.push(i + 1);
                i
            }
        };
        let url = urls.get(url_index).ok_or(TssClientError::InvalidIndex {
            index: url_index,
            parties: urls.len(),
        })?;
        layout.endpoints.push(Some(url.clone()));
        layout.socket_endpoints.push(Some(url.replace("/tss", "")));
    }
    Ok(layout)
}
