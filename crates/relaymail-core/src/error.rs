//! Error types for relaymail

use thiserror::Error;

/// Main error type for relaymail operations.
///
/// Every variant carries owned strings so a single failure can be handed to
/// several waiters (see [`crate::capability::CapabilityCache`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The owning identity declined to sign the session challenge
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The sponsor relay refused to pay for a draft operation
    #[error("Sponsorship rejected: {0}")]
    SponsorshipRejected(String),

    /// The user refused to sign the fee-attached transaction
    #[error("Signature declined: {0}")]
    SignatureDeclined(String),

    /// No membership capability exists for the identity in this conversation
    #[error("Not a member of conversation {0}")]
    NotAMember(String),

    /// Local persistence failed; no partial effect is visible
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single record could not be decrypted
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// A network round-trip did not complete
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller supplied malformed input (empty alias, bad address, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conversation was not found locally
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// The operation was abandoned because its context was swapped out
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias using MailError
pub type MailResult<T> = Result<T, MailError>;

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MailError {
                fn from(err: $ty) -> Self {
                    MailError::StorageUnavailable(err.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    std::io::Error,
);

impl From<serde_json::Error> for MailError {
    fn from(err: serde_json::Error) -> Self {
        MailError::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for MailError {
    fn from(err: postcard::Error) -> Self {
        MailError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for MailError {
    fn from(err: base64::DecodeError) -> Self {
        MailError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        MailError::NetworkUnavailable(err.to_string())
    }
}
