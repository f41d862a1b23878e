use thiserror::Error;

pub type TssClientResult<T> = Result<T, TssClientError>;

#[derive(Error, Debug)]
pub enum TssClientError {
    #[error("Parties and endpoint lengths must be equal - parties: {parties:?}, endpoints: {endpoints:?}, socket endpoints: {socket_endpoints:?}")]
    LengthMismatch {
        parties: usize,
        endpoints: usize,
        socket_endpoints: usize,
    },

    #[error("Session is invalid, does not have the correct delimiters")]
    InvalidSession,

    #[error("Party index {index:?} is outside of the party set of size {parties:?}")]
    InvalidIndex { index: usize, parties: usize },

    #[error("Socket not connected yet, party: {party:?}, session: {session:?}")]
    NotConnected { party: usize, session: String },

    #[error("Client is not ready")]
    NotReady,

    #[error("Insufficient precomputes - completed: {completed:?}, required: {required:?}")]
    InsufficientPrecomputes { completed: usize, required: usize },

    #[error("This instance has already signed a message and cannot be reused")]
    AlreadyConsumed,

    #[error("Party {party:?} responded with error code {status:?}")]
    PeerRejected { party: usize, status: u16 },

    #[error("Party {party:?} could not be reached: {reason}")]
    PeerUnreachable { party: usize, reason: String },

    #[error("Party {party:?} response could not be decoded: {reason}")]
    InvalidPeerResponse { party: usize, reason: String },

    #[error("No endpoint registered for party {party:?}")]
    MissingEndpoint { party: usize },

    #[error("Socket ID unavailable for party {party:?}")]
    SocketIdUnavailable { party: usize },

    #[error("Party {party:?} is not registered for session {session:?}")]
    UnknownParty { session: String, party: usize },

    #[error("Hash of original message does not match message")]
    HashMismatch,

    #[error("Original message has to be provided")]
    MissingOriginalMessage,

    #[error("Error occurred during precompute")]
    PrecomputeFailed,

    #[error("Servers responding with invalid data")]
    InvalidPeerData,

    #[error("Failed to receive message {msg_type:?} from party {sender:?} for party {recipient:?} in reasonable time")]
    MessageTimeout {
        sender: usize,
        recipient: usize,
        msg_type: String,
    },

    #[error("Round aborted while waiting for message {msg_type:?} from party {sender:?}")]
    RoundAborted { sender: usize, msg_type: String },

    #[error("Value has no inverse modulo the curve order")]
    NoModularInverse,

    #[error("isUser is false, serverIndex must be supplied")]
    MissingServerIndex,

    #[error("Party {party} not found in parties")]
    PartyNotFound { party: String },

    #[error("Server indexes must be sorted")]
    UnsortedIndexes,

    #[error("Invalid public key bytes")]
    InvalidPublicKey,

    #[error("Share may not be negative")]
    NegativeShare,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Failed to setup client")]
    SetupFailed,

    #[error("Signing engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}
