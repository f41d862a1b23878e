//! Lagrange and denormalization coefficients over the secp256k1 group order.
//!
//! The user holds one half of a 2-of-2 additive split at point `user_index`
//! while the remote half is itself Shamir-shared among the servers. The
//! DKLS engine instead expects every party to hold a share on one common
//! polynomial indexed `1..=k+1`. The coefficients in this module translate
//! between the two views.

use crate::error::{TssClientError, TssClientResult};
use crate::helpers::{combine_terms, decode_public_key, encode_public_key};
use curv::arithmetic::{Converter, Modulo, One, Zero};
use curv::elliptic::curves::secp256_k1::FE;
use curv::elliptic::curves::traits::ECScalar;
use curv::BigInt;
use std::collections::BTreeMap;

pub fn curve_order() -> BigInt {
    FE::q()
}

/// Canonical representative of `value` in `[0, modulus)`, also for negative input.
pub fn reduce(value: &BigInt, modulus: &BigInt) -> BigInt {
    BigInt::modulus(value, modulus)
}

pub(crate) fn invert_mod(value: &BigInt, modulus: &BigInt) -> TssClientResult<BigInt> {
    BigInt::mod_inv(&reduce(value, modulus), modulus).ok_or(TssClientError::NoModularInverse)
}

fn mul_n(a: &BigInt, b: &BigInt) -> BigInt {
    let n = curve_order();
    BigInt::mod_mul(&reduce(a, &n), &reduce(b, &n), &n)
}

pub fn lagrange_coefficient(parties: &[BigInt], party: &BigInt) -> TssClientResult<BigInt> {
    lagrange_coefficient_at(parties, party, &BigInt::zero())
}

/// `prod(target - x_j) / prod(x_i - x_j)` over every `x_j != party`.
pub fn lagrange_coefficient_at(
    parties: &[BigInt],
    party: &BigInt,
    target: &BigInt,
) -> TssClientResult<BigInt> {
    let n = curve_order();
    let mut upper = BigInt::one();
    let mut lower = BigInt::one();
    for other in parties.iter().filter(|other| *other != party) {
        upper = mul_n(&upper, &(target - other));
        lower = mul_n(&lower, &(party - other));
    }
    Ok(mul_n(&upper, &invert_mod(&lower, &n)?))
}

pub fn additive_coefficient(
    is_user: bool,
    server_indexes: &[BigInt],
    user_index: &BigInt,
    server_index: Option<&BigInt>,
) -> TssClientResult<BigInt> {
    let one = BigInt::one();
    let pair = [one.clone(), user_index.clone()];
    if is_user {
        return lagrange_coefficient(&pair, user_index);
    }
    let server_index = server_index.ok_or(TssClientError::MissingServerIndex)?;
    let server_term = lagrange_coefficient(server_indexes, server_index)?;
    let master_term = lagrange_coefficient(&pair, &one)?;
    Ok(mul_n(&server_term, &master_term))
}

pub fn denormalized_coefficient(party: &BigInt, parties: &[BigInt]) -> TssClientResult<BigInt> {
    if !parties.contains(party) {
        return Err(TssClientError::PartyNotFound {
            party: party.to_hex(),
        });
    }
    let coefficient = lagrange_coefficient(parties, party)?;
    invert_mod(&coefficient, &curve_order())
}

/// Coefficient a party multiplies its raw share by so that the shares of
/// all servers and the user lie on one polynomial over positions `1..=k+1`,
/// where `k` servers take positions `1..=k` in order and the user takes `k+1`.
///
/// `server_indexes` must be strictly ascending.
pub fn dkls_coefficient(
    is_user: bool,
    server_indexes: &[BigInt],
    user_index: &BigInt,
    server_index: Option<&BigInt>,
) -> TssClientResult<BigInt> {
    if server_indexes.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(TssClientError::UnsortedIndexes);
    }

    let positions: Vec<BigInt> = (1..=server_indexes.len() + 1)
        .map(|position| BigInt::from(position as u64))
        .collect();
    let own_position = if is_user {
        BigInt::from(positions.len() as u64)
    } else {
        let server_index = server_index.ok_or(TssClientError::MissingServerIndex)?;
        server_indexes
            .iter()
            .position(|index| index == server_index)
            .map(|position| BigInt::from(position as u64 + 1))
            .unwrap_or_else(BigInt::zero)
    };

    let additive = additive_coefficient(is_user, server_indexes, user_index, server_index)?;
    let denormalized = denormalized_coefficient(&own_position, &positions)?;
    Ok(mul_n(&additive, &denormalized))
}

/// DKLS coefficients for every participating server, keyed by server index.
/// Keys and values are hex without leading zeros.
pub fn server_coefficients(
    server_indexes: &[BigInt],
    user_index: &BigInt,
) -> TssClientResult<BTreeMap<String, String>> {
    server_indexes
        .iter()
        .map(|index| {
            let coefficient = dkls_coefficient(false, server_indexes, user_index, Some(index))?;
            Ok((index.to_hex(), coefficient.to_hex()))
        })
        .collect()
}

pub fn client_coefficient(server_indexes: &[BigInt], user_index: &BigInt) -> TssClientResult<String> {
    Ok(dkls_coefficient(true, server_indexes, user_index, None)?.to_hex())
}

/// The user's share rescaled onto the DKLS polynomial.
pub fn denormalize_share(
    server_indexes: &[BigInt],
    user_index: &BigInt,
    share: &BigInt,
) -> TssClientResult<BigInt> {
    let coefficient = dkls_coefficient(true, server_indexes, user_index, None)?;
    Ok(mul_n(&coefficient, share))
}

/// Combines the DKG public key with the public key of the user's share into
/// the key the session signs for. Both inputs and the output are
/// uncompressed secp256k1 points.
pub fn final_public_key(
    dkg_public_key: &[u8],
    user_share_public_key: &[u8],
    user_index: &BigInt,
) -> TssClientResult<[u8; 65]> {
    let one = BigInt::one();
    let pair = [one.clone(), user_index.clone()];
    let server_term = lagrange_coefficient(&pair, &one)?;
    let user_term = lagrange_coefficient(&pair, user_index)?;

    let dkg = decode_public_key(dkg_public_key)?;
    let user = decode_public_key(user_share_public_key)?;
    let combined = combine_terms(&[(&server_term, &dkg), (&user_term, &user)])?;
    encode_public_key(&combined)
}
