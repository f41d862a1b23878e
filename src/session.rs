//! Session strings.
//!
//! A session is five fields joined by four reserved control characters:
//! `verifierName ^1 verifierId ^2 tssTag ^3 tssNonce ^4 sessionNonce`.
//! The component after the fourth delimiter is the `sid` used to
//! authenticate REST calls and socket connections.

use crate::error::{TssClientError, TssClientResult};
use std::fmt;

pub const DELIMITER_1: char = '\u{001c}';
pub const DELIMITER_2: char = '\u{0015}';
pub const DELIMITER_3: char = '\u{0016}';
pub const DELIMITER_4: char = '\u{0017}';

const DELIMITERS: [char; 4] = [DELIMITER_1, DELIMITER_2, DELIMITER_3, DELIMITER_4];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub verifier_name: String,
    pub verifier_id: String,
    pub tss_tag: String,
    pub tss_nonce: String,
    pub session_nonce: String,
}

impl SessionId {
    pub fn new(
        verifier_name: impl Into<String>,
        verifier_id: impl Into<String>,
        tss_tag: impl Into<String>,
        tss_nonce: impl Into<String>,
        session_nonce: impl Into<String>,
    ) -> TssClientResult<Self> {
        let session = SessionId {
            verifier_name: verifier_name.into(),
            verifier_id: verifier_id.into(),
            tss_tag: tss_tag.into(),
            tss_nonce: tss_nonce.into(),
            session_nonce: session_nonce.into(),
        };
        let fields = [
            &session.verifier_name,
            &session.verifier_id,
            &session.tss_tag,
            &session.tss_nonce,
            &session.session_nonce,
        ];
        if fields.iter().any(|field| field.contains(&DELIMITERS[..])) {
            return Err(TssClientError::InvalidSession);
        }
        Ok(session)
    }

    /// Splits a session string back into its fields.
    pub fn parse(session: &str) -> TssClientResult<Self> {
        let (verifier_name, rest) = split_once(session, DELIMITER_1)?;
        let (verifier_id, rest) = split_once(rest, DELIMITER_2)?;
        let (tss_tag, rest) = split_once(rest, DELIMITER_3)?;
        let (tss_nonce, session_nonce) = split_once(rest, DELIMITER_4)?;
        SessionId::new(verifier_name, verifier_id, tss_tag, tss_nonce, session_nonce)
    }

    pub fn sid(&self) -> &str {
        &self.session_nonce
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}{}{}{}",
            self.verifier_name,
            DELIMITER_1,
            self.verifier_id,
            DELIMITER_2,
            self.tss_tag,
            DELIMITER_3,
            self.tss_nonce,
            DELIMITER_4,
            self.session_nonce
        )
    }
}

fn split_once(value: &str, delimiter: char) -> TssClientResult<(&str, &str)> {
    let position = value.find(delimiter).ok_or(TssClientError::InvalidSession)?;
    Ok((&value[..position], &value[position + delimiter.len_utf8()..]))
}

/// Returns the `sid` of a raw session string: the component that follows
/// the fourth delimiter.
pub fn sid(session: &str) -> TssClientResult<String> {
    session
        .split(DELIMITER_4)
        .nth(1)
        .map(String::from)
        .ok_or(TssClientError::InvalidSession)
}
