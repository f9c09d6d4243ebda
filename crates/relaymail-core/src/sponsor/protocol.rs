//! Relay wire protocol
//!
//! ```text
//! POST /sponsor  { network, operationKindBytes, sender,
//!                  allowedCallTargets, allowedAddresses }
//!             -> { bytes, digest }
//! POST /execute  { digest, signature } -> { digest }
//! ```
//!
//! Byte fields are standard base64. Errors come back as
//! `{ error, details? }` with a 4xx or 5xx status.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};
use crate::types::Network;

/// Body of `POST /sponsor`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorRequest {
    pub network: Network,
    pub operation_kind_bytes: String,
    pub sender: String,
    pub allowed_call_targets: Vec<String>,
    pub allowed_addresses: Vec<String>,
}

impl SponsorRequest {
    pub fn new(
        network: Network,
        kind_bytes: &[u8],
        sender: impl Into<String>,
        allowed_call_targets: Vec<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            network,
            operation_kind_bytes: BASE64.encode(kind_bytes),
            allowed_addresses: vec![sender.clone()],
            sender,
            allowed_call_targets,
        }
    }
}

/// Body of a successful `POST /sponsor`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorResponse {
    pub bytes: String,
    pub digest: String,
}

/// Body of `POST /execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub digest: String,
    pub signature: String,
}

/// Body of a successful `POST /execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub digest: String,
}

/// Body of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{} ({})", self.error, details),
            None => f.write_str(&self.error),
        }
    }
}

/// Fee-attached transaction returned by the sponsor, awaiting the user's signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsoredTransaction {
    pub bytes: Vec<u8>,
    /// Provisional digest correlating this sponsorship with its execution
    pub digest: String,
}

impl TryFrom<SponsorResponse> for SponsoredTransaction {
    type Error = MailError;

    fn try_from(response: SponsorResponse) -> MailResult<Self> {
        if response.digest.is_empty() {
            return Err(MailError::Serialization(
                "sponsor response carried an empty digest".to_string(),
            ));
        }
        Ok(Self {
            bytes: BASE64.decode(response.bytes.as_bytes())?,
            digest: response.digest,
        })
    }
}

/// Remote service that pays fees for allowlisted operations
#[async_trait]
pub trait SponsorService: Send + Sync {
    /// Ask the service to attach fees to a draft
    async fn sponsor(&self, request: &SponsorRequest) -> MailResult<SponsoredTransaction>;

    /// Submit the user's signature for a sponsored transaction, returning the final digest
    async fn execute(&self, request: &ExecuteRequest) -> MailResult<String>;
}
