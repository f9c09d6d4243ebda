//! Signing capabilities of the owning identity
//!
//! The wallet holding the identity's key lives outside this crate. It is
//! reached through two narrow traits: one for personal messages (session
//! binding) and one for fee-attached transaction bytes (sponsored writes).
//! Both may prompt a human and may be declined.

use async_trait::async_trait;
use thiserror::Error;

/// Why a signing request produced no signature
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The holder of the key refused to sign
    #[error("declined: {0}")]
    Declined(String),

    /// The wallet could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Signs human-readable personal messages on behalf of an address
#[async_trait]
pub trait PersonalMessageSigner: Send + Sync {
    /// Sign `message` with the key of `address`, returning the encoded signature
    async fn sign_personal_message(
        &self,
        address: &str,
        message: &[u8],
    ) -> Result<String, SignerError>;
}

/// Signs exactly the transaction bytes it is handed
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign `tx_bytes` with the key of `address`, returning the encoded signature
    async fn sign_transaction(&self, address: &str, tx_bytes: &[u8])
        -> Result<String, SignerError>;
}
