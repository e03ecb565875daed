//! Error handling for the ledger
//!
//! Every fallible operation returns [`LedgerError`]. Callers that need to
//! react to the *kind* of failure (the peer synchronizer counting violations,
//! the node halting on a broken invariant) use [`LedgerError::class`].

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse failure classes used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Input could not be decoded or is structurally invalid
    MalformedInput,
    /// Input is well formed but breaks a consensus rule
    ConsensusViolation,
    /// A peer connection failed; retried by reconnecting
    TransientNetworkFailure,
    /// The ledger's own state is inconsistent; the ledger halts
    InternalInvariantFailure,
    /// Harmless rejections (duplicates, full pool, stale work)
    Benign,
    /// Storage, configuration or environment failures
    Environment,
}

/// Consensus rule a block or transaction broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    UnknownParent,
    BadHeight { expected: u64, found: u64 },
    TimestampBeforeParent,
    TimestampTooFarAhead,
    WrongDifficulty { expected: u32, found: u32 },
    InsufficientWork,
    MerkleMismatch,
    BadSignature,
    WrongReward { expected: u64, found: u64 },
    SystemCreditDisabled,
    InsufficientBalance { required: u64, available: u64 },
    StaleNonce { expected: u64, found: u64 },
    NonceGap { expected: u64, found: u64 },
    DuplicateNonce { nonce: u64 },
    BalanceOverflow,
    ReorgTooDeep { depth: u64, limit: u64 },
}

impl Violation {
    /// Stable reason code reported through the query API.
    pub fn code(&self) -> &'static str {
        match self {
            Violation::UnknownParent => "unknown-parent",
            Violation::BadHeight { .. } => "bad-height",
            Violation::TimestampBeforeParent => "time-too-old",
            Violation::TimestampTooFarAhead => "time-too-new",
            Violation::WrongDifficulty { .. } => "bad-difficulty",
            Violation::InsufficientWork => "high-hash",
            Violation::MerkleMismatch => "bad-merkle-root",
            Violation::BadSignature => "bad-signature",
            Violation::WrongReward { .. } => "bad-coinbase-amount",
            Violation::SystemCreditDisabled => "system-credit-disabled",
            Violation::InsufficientBalance { .. } => "insufficient-balance",
            Violation::StaleNonce { .. } => "nonce-too-low",
            Violation::NonceGap { .. } => "nonce-gap",
            Violation::DuplicateNonce { .. } => "nonce-conflict",
            Violation::BalanceOverflow => "balance-overflow",
            Violation::ReorgTooDeep { .. } => "reorg-too-deep",
        }
    }

    /// Whether a peer relaying this is at fault. Nonce and balance
    /// failures happen in honest races, so they are not counted.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(
            self,
            Violation::UnknownParent
                | Violation::InsufficientBalance { .. }
                | Violation::StaleNonce { .. }
                | Violation::NonceGap { .. }
                | Violation::DuplicateNonce { .. }
                | Violation::ReorgTooDeep { .. }
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnknownParent => write!(f, "parent block is unknown"),
            Violation::BadHeight { expected, found } => {
                write!(f, "height {found} does not follow parent (expected {expected})")
            }
            Violation::TimestampBeforeParent => write!(f, "timestamp is older than parent"),
            Violation::TimestampTooFarAhead => write!(f, "timestamp is too far in the future"),
            Violation::WrongDifficulty { expected, found } => {
                write!(f, "difficulty {found} does not match expected {expected}")
            }
            Violation::InsufficientWork => write!(f, "hash does not meet the difficulty target"),
            Violation::MerkleMismatch => write!(f, "merkle root does not commit to the body"),
            Violation::BadSignature => write!(f, "signature verification failed"),
            Violation::WrongReward { expected, found } => {
                write!(f, "coinbase pays {found}, block reward is {expected}")
            }
            Violation::SystemCreditDisabled => write!(f, "system credits are disabled"),
            Violation::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "insufficient balance: required {required}, available {available}"
            ),
            Violation::StaleNonce { expected, found } => {
                write!(f, "nonce {found} already used (next is {expected})")
            }
            Violation::NonceGap { expected, found } => {
                write!(f, "nonce {found} skips ahead of {expected}")
            }
            Violation::DuplicateNonce { nonce } => write!(f, "nonce {nonce} is already queued"),
            Violation::BalanceOverflow => write!(f, "credit would overflow the balance"),
            Violation::ReorgTooDeep { depth, limit } => {
                write!(f, "reorganization depth {depth} exceeds limit {limit}")
            }
        }
    }
}

/// Reasons for rejecting input that say nothing bad about its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AlreadyKnown,
    PoolFull { capacity: usize },
    StaleWork,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AlreadyKnown => "duplicate",
            Rejection::PoolFull { .. } => "mempool-full",
            Rejection::StaleWork => "stale-work",
        }
    }
}

/// Error types for ledger operations
#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Structurally invalid or undecodable input
    Malformed(String),
    /// Consensus rule violation
    Consensus(Violation),
    /// Benign rejection
    Rejected(Rejection),
    /// Network communication errors
    Network(String),
    /// Broken internal invariant; the ledger stops accepting mutations
    Invariant(String),
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Configuration errors
    Config(String),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Malformed(_) => ErrorClass::MalformedInput,
            LedgerError::Consensus(_) => ErrorClass::ConsensusViolation,
            LedgerError::Rejected(_) => ErrorClass::Benign,
            LedgerError::Network(_) => ErrorClass::TransientNetworkFailure,
            LedgerError::Invariant(_) => ErrorClass::InternalInvariantFailure,
            LedgerError::Database(_)
            | LedgerError::Serialization(_)
            | LedgerError::Io(_)
            | LedgerError::Crypto(_)
            | LedgerError::Config(_) => ErrorClass::Environment,
        }
    }

    /// Short machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Malformed(_) => "malformed",
            LedgerError::Consensus(v) => v.code(),
            LedgerError::Rejected(r) => r.code(),
            LedgerError::Network(_) => "network",
            LedgerError::Invariant(_) => "invariant",
            LedgerError::Database(_) => "database",
            LedgerError::Serialization(_) => "serialization",
            LedgerError::Io(_) => "io",
            LedgerError::Crypto(_) => "crypto",
            LedgerError::Config(_) => "config",
        }
    }

    /// Whether a peer that sent the offending input should be charged a violation.
    pub fn is_peer_fault(&self) -> bool {
        match self {
            LedgerError::Malformed(_) => true,
            LedgerError::Consensus(v) => v.is_peer_fault(),
            _ => false,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            LedgerError::Consensus(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Malformed(msg) => write!(f, "Malformed input: {msg}"),
            LedgerError::Consensus(v) => write!(f, "Consensus violation ({}): {v}", v.code()),
            LedgerError::Rejected(Rejection::AlreadyKnown) => write!(f, "Rejected: already known"),
            LedgerError::Rejected(Rejection::PoolFull { capacity }) => {
                write!(f, "Rejected: mempool is full ({capacity} entries)")
            }
            LedgerError::Rejected(Rejection::StaleWork) => {
                write!(f, "Rejected: chain tip moved while mining")
            }
            LedgerError::Network(msg) => write!(f, "Network error: {msg}"),
            LedgerError::Invariant(msg) => write!(f, "Internal invariant failure: {msg}"),
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<Violation> for LedgerError {
    fn from(v: Violation) -> Self {
        LedgerError::Consensus(v)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(err: sled::transaction::TransactionError<LedgerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => LedgerError::Database(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Malformed(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            LedgerError::Malformed("x".into()).class(),
            ErrorClass::MalformedInput
        );
        assert_eq!(
            LedgerError::Consensus(Violation::BadSignature).class(),
            ErrorClass::ConsensusViolation
        );
        assert_eq!(
            LedgerError::Network("reset".into()).class(),
            ErrorClass::TransientNetworkFailure
        );
        assert_eq!(
            LedgerError::Invariant("work".into()).class(),
            ErrorClass::InternalInvariantFailure
        );
        assert_eq!(
            LedgerError::Rejected(Rejection::AlreadyKnown).class(),
            ErrorClass::Benign
        );
    }

    #[test]
    fn test_peer_fault_policy() {
        assert!(LedgerError::Malformed("garbage".into()).is_peer_fault());
        assert!(LedgerError::Consensus(Violation::InsufficientWork).is_peer_fault());
        assert!(!LedgerError::Consensus(Violation::UnknownParent).is_peer_fault());
        assert!(!LedgerError::Consensus(Violation::StaleNonce {
            expected: 3,
            found: 1
        })
        .is_peer_fault());
        assert!(!LedgerError::Rejected(Rejection::StaleWork).is_peer_fault());
    }

    #[test]
    fn test_reason_codes() {
        let err = LedgerError::Consensus(Violation::NonceGap {
            expected: 3,
            found: 5,
        });
        assert_eq!(err.code(), "nonce-gap");
        assert!(err.to_string().contains("nonce 5 skips ahead of 3"));
        assert_eq!(
            LedgerError::Rejected(Rejection::PoolFull { capacity: 2 }).code(),
            "mempool-full"
        );
    }
}
