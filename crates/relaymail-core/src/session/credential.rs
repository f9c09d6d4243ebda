//! Session credential
//!
//! A credential binds a freshly generated ed25519 session key to the owning
//! identity: the owner signs a canonical challenge naming the session public
//! key, the scope and the validity window. The credential is then used for
//! decryption requests until it expires.

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};

/// Version of the persisted JSON layout
pub const CREDENTIAL_FORMAT_VERSION: u32 = 1;

const MS_PER_MINUTE: i64 = 60 * 1000;

/// Expiry instant, `None` if it does not fit in an `i64`
fn checked_expiry(created_at: i64, ttl_minutes: u32) -> Option<i64> {
    i64::from(ttl_minutes)
        .checked_mul(MS_PER_MINUTE)
        .and_then(|ttl_ms| created_at.checked_add(ttl_ms))
}

/// Time-boxed, signature-bound session credential.
///
/// Immutable once signed; renewal produces a new credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    owner: String,
    scope: Vec<String>,
    ttl_minutes: u32,
    created_at: i64,
    session_seed: [u8; 32],
    signature: Option<String>,
}

/// On-disk layout of a credential
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredential {
    format_version: u32,
    owner: String,
    scope: Vec<String>,
    ttl_minutes: u32,
    created_at: i64,
    expires_at: i64,
    session_key: String,
    session_public_key: String,
    signature: String,
}

impl SessionCredential {
    /// Build an unsigned credential with a fresh random session key
    pub fn generate(owner: impl Into<String>, scope: Vec<String>, ttl_minutes: u32, now_ms: i64) -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_seed(owner, scope, ttl_minutes, now_ms, seed)
    }

    /// Build an unsigned credential from a known session key seed
    pub fn from_seed(
        owner: impl Into<String>,
        scope: Vec<String>,
        ttl_minutes: u32,
        now_ms: i64,
        session_seed: [u8; 32],
    ) -> Self {
        Self {
            owner: owner.into(),
            scope,
            ttl_minutes,
            created_at: now_ms,
            session_seed,
            signature: None,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn ttl_minutes(&self) -> u32 {
        self.ttl_minutes
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Expiry instant (unix ms), saturating at `i64::MAX`
    pub fn expires_at(&self) -> i64 {
        checked_expiry(self.created_at, self.ttl_minutes).unwrap_or(i64::MAX)
    }

    /// True at and after the expiry instant
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    /// Milliseconds left before expiry, zero once expired
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.expires_at().saturating_sub(now_ms).max(0)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.session_seed)
    }

    /// Hex-encoded ed25519 public key of the session
    pub fn session_public_key(&self) -> String {
        hex::encode(self.signing_key().verifying_key().to_bytes())
    }

    /// Canonical text the owner signs to bind this session to their identity
    pub fn challenge(&self) -> String {
        format!(
            "relaymail session v{}\n\
             owner: {}\n\
             scope: {}\n\
             ttl_minutes: {}\n\
             created_at: {}\n\
             session_key: {}",
            CREDENTIAL_FORMAT_VERSION,
            self.owner,
            self.scope.join(","),
            self.ttl_minutes,
            self.created_at,
            self.session_public_key(),
        )
    }

    /// Short identifier of this credential for logs
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(self.challenge().as_bytes());
        hex::encode(&hash.as_bytes()[..8])
    }

    /// Attach the owner's signature over [`Self::challenge`]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Sign a request with the session key, returning a hex signature
    pub fn sign_request(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key().sign(message).to_bytes())
    }

    /// Serialize into the versioned JSON layout.
    ///
    /// # Errors
    ///
    /// Returns `MailError::InvalidInput` for an unsigned credential, which
    /// must never be persisted.
    pub fn to_json(&self) -> MailResult<Vec<u8>> {
        let signature = self.signature.clone().ok_or_else(|| {
            MailError::InvalidInput("refusing to persist an unsigned session".to_string())
        })?;
        let stored = StoredCredential {
            format_version: CREDENTIAL_FORMAT_VERSION,
            owner: self.owner.clone(),
            scope: self.scope.clone(),
            ttl_minutes: self.ttl_minutes,
            created_at: self.created_at,
            expires_at: self.expires_at(),
            session_key: hex::encode(self.session_seed),
            session_public_key: self.session_public_key(),
            signature,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Parse the versioned JSON layout.
    ///
    /// Rejects unknown format versions, validity windows that overflow, and
    /// credentials whose stored public key or expiry does not match what the
    /// key material implies.
    pub fn from_json(data: &[u8]) -> MailResult<Self> {
        let stored: StoredCredential = serde_json::from_slice(data)?;
        if stored.format_version != CREDENTIAL_FORMAT_VERSION {
            return Err(MailError::Serialization(format!(
                "unsupported session format version {}",
                stored.format_version
            )));
        }
        let expires_at = checked_expiry(stored.created_at, stored.ttl_minutes).ok_or_else(|| {
            MailError::Serialization(format!(
                "session window overflows: created at {} for {} minutes",
                stored.created_at, stored.ttl_minutes
            ))
        })?;

        let seed_bytes = hex::decode(&stored.session_key)
            .map_err(|e| MailError::Serialization(format!("bad session key: {}", e)))?;
        let session_seed: [u8; 32] = seed_bytes
            .try_into()
            .map_err(|_| MailError::Serialization("session key must be 32 bytes".to_string()))?;

        let credential = Self {
            owner: stored.owner,
            scope: stored.scope,
            ttl_minutes: stored.ttl_minutes,
            created_at: stored.created_at,
            session_seed,
            signature: Some(stored.signature),
        };

        if credential.session_public_key() != stored.session_public_key {
            return Err(MailError::Serialization(
                "session public key does not match key material".to_string(),
            ));
        }
        if expires_at != stored.expires_at {
            return Err(MailError::Serialization(
                "session expiry does not match its ttl".to_string(),
            ));
        }
        Ok(credential)
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .field("ttl_minutes", &self.ttl_minutes)
            .field("created_at", &self.created_at)
            .field("session_public_key", &self.session_public_key())
            .field("signed", &self.is_signed())
            .finish()
    }
}
