//! Fee sponsorship
//!
//! Writes are paid for by a relay service, so the user never needs funds.
//! Every write runs the same two phases, strictly in order:
//!
//! ```text
//! draft ──kind bytes──▶ POST /sponsor ──{bytes, digest}──▶ sign(bytes)
//!                                                            │
//!            final digest ◀── POST /execute ◀──{digest, sig}─┘
//! ```
//!
//! Neither request is retried automatically: both may spend the sponsor's
//! funds, so a failure surfaces to the caller who decides whether to try
//! again with a fresh draft.

mod draft;
mod http;
mod policy;
mod protocol;

pub use draft::{CallArg, DraftOperation, MoveCall};
pub use http::HttpSponsorService;
pub use policy::SponsorPolicy;
pub use protocol::{
    ErrorBody, ExecuteRequest, ExecuteResponse, SponsorRequest, SponsorResponse, SponsorService,
    SponsoredTransaction,
};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::signer::{SignerError, TransactionSigner};

/// Runs drafts through the sponsor relay
#[derive(Clone)]
pub struct SponsorRelay {
    ctx: ClientContext,
    service: Arc<dyn SponsorService>,
    policy: SponsorPolicy,
}

impl SponsorRelay {
    pub fn new(ctx: ClientContext, service: Arc<dyn SponsorService>, policy: SponsorPolicy) -> Self {
        Self {
            ctx,
            service,
            policy,
        }
    }

    pub fn policy(&self) -> &SponsorPolicy {
        &self.policy
    }

    /// Sponsor, sign and execute `draft`, returning the final digest.
    ///
    /// # Errors
    ///
    /// - `MailError::SponsorshipRejected` if the draft fails the local
    ///   allowlist check or the relay refuses it; nothing is signed
    /// - `MailError::SignatureDeclined` if the user refuses to sign; nothing
    ///   is executed
    /// - `MailError::NetworkUnavailable` if either request does not complete
    /// - `MailError::Cancelled` if the context is swapped before execution
    pub async fn relay(
        &self,
        draft: &DraftOperation,
        signer: &dyn TransactionSigner,
    ) -> MailResult<String> {
        self.ctx.ensure_active()?;
        self.policy.check(draft, self.ctx.identity())?;
        if draft.network != self.ctx.network() {
            return Err(MailError::SponsorshipRejected(format!(
                "draft targets {} but the client is on {}",
                draft.network,
                self.ctx.network()
            )));
        }

        let kind_bytes = draft.kind_bytes()?;
        let request = SponsorRequest::new(
            draft.network,
            &kind_bytes,
            draft.sender.clone(),
            self.policy.targets(),
        );
        debug!(
            sender = %draft.sender,
            calls = draft.calls.len(),
            kind_len = kind_bytes.len(),
            "Requesting sponsorship"
        );

        let sponsored = self.service.sponsor(&request).await.map_err(|e| {
            warn!(error = %e, "Sponsorship failed");
            e
        })?;
        debug!(digest = %sponsored.digest, "Sponsored, awaiting signature");

        let signature = signer
            .sign_transaction(&draft.sender, &sponsored.bytes)
            .await
            .map_err(|e| match e {
                SignerError::Declined(reason) => MailError::SignatureDeclined(reason),
                SignerError::Unavailable(reason) => MailError::SignatureDeclined(format!(
                    "signer unavailable: {}",
                    reason
                )),
            })?;

        self.ctx.ensure_active()?;

        let digest = self
            .service
            .execute(&ExecuteRequest {
                digest: sponsored.digest.clone(),
                signature,
            })
            .await?;

        info!(
            provisional = %sponsored.digest,
            digest = %digest,
            "Sponsored transaction executed"
        );
        Ok(digest)
    }
}
