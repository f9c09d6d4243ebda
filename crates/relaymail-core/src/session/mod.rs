//! Session lifecycle
//!
//! ```text
//! Absent ──create──▶ Valid ──ttl elapses──▶ Expired ──next use──▶ Absent
//!    ▲                  ▲
//!    └──── Restoring ───┘   (start-up: load persisted credential)
//! ```
//!
//! Expiry is detected lazily on every use. Failed restoration is not an
//! error: the manager falls back to `Absent` and the next use creates a new
//! credential, which requires the owner's signature.

mod clock;
mod credential;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{SessionCredential, CREDENTIAL_FORMAT_VERSION};

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::signer::{PersonalMessageSigner, SignerError};
use crate::storage::Storage;

/// Default credential lifetime
pub const DEFAULT_SESSION_TTL_MINUTES: u32 = 30;

/// Observable state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential; the next use must create one
    Absent,
    /// A persisted credential is being loaded
    Restoring,
    /// A signed, unexpired credential is active
    Valid,
    /// The active credential's window has passed; it will be dropped on next use
    Expired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Absent => write!(f, "Absent"),
            SessionState::Restoring => write!(f, "Restoring"),
            SessionState::Valid => write!(f, "Valid"),
            SessionState::Expired => write!(f, "Expired"),
        }
    }
}

struct SessionInner {
    ctx: ClientContext,
    restoring: bool,
    credential: Option<Arc<SessionCredential>>,
}

/// Owns the session credential of the current identity
pub struct SessionManager {
    storage: Storage,
    signer: Arc<dyn PersonalMessageSigner>,
    clock: Arc<dyn Clock>,
    scope: Vec<String>,
    ttl_minutes: u32,
    inner: RwLock<SessionInner>,
    /// Serializes credential creation so one prompt serves concurrent callers
    create_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        ctx: ClientContext,
        storage: Storage,
        signer: Arc<dyn PersonalMessageSigner>,
        clock: Arc<dyn Clock>,
        scope: Vec<String>,
        ttl_minutes: u32,
    ) -> Self {
        Self {
            storage,
            signer,
            clock,
            scope,
            ttl_minutes,
            inner: RwLock::new(SessionInner {
                ctx,
                restoring: false,
                credential: None,
            }),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Context the session currently belongs to
    pub fn context(&self) -> ClientContext {
        self.inner.read().ctx.clone()
    }

    pub fn state(&self) -> SessionState {
        let inner = self.inner.read();
        if inner.restoring {
            return SessionState::Restoring;
        }
        match &inner.credential {
            None => SessionState::Absent,
            Some(c) if c.is_expired(self.clock.now_ms()) => SessionState::Expired,
            Some(_) => SessionState::Valid,
        }
    }

    /// The active credential, if one is valid right now.
    ///
    /// An expired credential is dropped here, moving the state to `Absent`.
    pub fn active_credential(&self) -> Option<Arc<SessionCredential>> {
        let now = self.clock.now_ms();
        {
            let inner = self.inner.read();
            match &inner.credential {
                Some(c) if !c.is_expired(now) => return Some(c.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        let mut inner = self.inner.write();
        let expired = inner
            .credential
            .as_ref()
            .map(|c| c.is_expired(now))
            .unwrap_or(false);
        if expired {
            info!(owner = %inner.ctx.identity(), "Session expired");
            inner.credential = None;
        }
        inner.credential.clone()
    }

    /// Load the persisted credential of the current owner.
    ///
    /// Corrupt, expired or foreign credentials are discarded and the state
    /// falls back to `Absent`. Only storage failures are returned as errors.
    pub async fn restore(&self) -> MailResult<SessionState> {
        let owner = {
            let mut inner = self.inner.write();
            inner.restoring = true;
            inner.ctx.identity().to_string()
        };

        let result = self.load_persisted(&owner);

        let mut inner = self.inner.write();
        inner.restoring = false;
        if inner.ctx.identity() != owner {
            debug!(owner = %owner, "Identity switched during restore, discarding result");
            return Ok(SessionState::Absent);
        }
        match result {
            Ok(Some(credential)) => {
                info!(
                    owner = %owner,
                    fingerprint = %credential.fingerprint(),
                    "Restored session"
                );
                inner.credential = Some(Arc::new(credential));
                Ok(SessionState::Valid)
            }
            Ok(None) => {
                inner.credential = None;
                Ok(SessionState::Absent)
            }
            Err(e) => {
                inner.credential = None;
                Err(e)
            }
        }
    }

    fn load_persisted(&self, owner: &str) -> MailResult<Option<SessionCredential>> {
        let Some(blob) = self.storage.load_session(owner)? else {
            return Ok(None);
        };

        let credential = match SessionCredential::from_json(&blob) {
            Ok(c) => c,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Discarding unreadable session");
                self.storage.delete_session(owner)?;
                return Ok(None);
            }
        };

        if credential.owner() != owner {
            warn!(owner = %owner, stored_owner = %credential.owner(), "Discarding session of another identity");
            self.storage.delete_session(owner)?;
            return Ok(None);
        }
        if credential.is_expired(self.clock.now_ms()) {
            debug!(owner = %owner, "Persisted session already expired");
            self.storage.delete_session(owner)?;
            return Ok(None);
        }
        Ok(Some(credential))
    }

    /// Return the active credential, creating a new one if needed.
    ///
    /// Creating asks the owner to sign the session challenge. A declined
    /// signature leaves the session `Absent` and yields
    /// `MailError::AuthorizationDenied`.
    pub async fn ensure_session(&self) -> MailResult<Arc<SessionCredential>> {
        if let Some(credential) = self.active_credential() {
            return Ok(credential);
        }
        let _guard = self.create_lock.lock().await;
        if let Some(credential) = self.active_credential() {
            return Ok(credential);
        }
        self.create().await
    }

    /// Replace the active credential with a freshly signed one
    pub async fn renew(&self) -> MailResult<Arc<SessionCredential>> {
        let _guard = self.create_lock.lock().await;
        self.create().await
    }

    async fn create(&self) -> MailResult<Arc<SessionCredential>> {
        let ctx = self.context();
        ctx.ensure_active()?;

        let unsigned = SessionCredential::generate(
            ctx.identity(),
            self.scope.clone(),
            self.ttl_minutes,
            self.clock.now_ms(),
        );
        debug!(owner = %ctx.identity(), "Requesting session signature");

        let signature = self
            .signer
            .sign_personal_message(ctx.identity(), unsigned.challenge().as_bytes())
            .await
            .map_err(|e| match e {
                SignerError::Declined(reason) => MailError::AuthorizationDenied(reason),
                SignerError::Unavailable(reason) => {
                    MailError::AuthorizationDenied(format!("signer unavailable: {}", reason))
                }
            })?;

        let credential = unsigned.with_signature(signature);

        let mut inner = self.inner.write();
        if inner.ctx.generation() != ctx.generation() {
            return Err(MailError::Cancelled(
                "identity switched while the session was being signed".to_string(),
            ));
        }
        self.storage
            .save_session(ctx.identity(), &credential.to_json()?)?;

        let credential = Arc::new(credential);
        inner.credential = Some(credential.clone());
        info!(
            owner = %ctx.identity(),
            fingerprint = %credential.fingerprint(),
            expires_at = credential.expires_at(),
            "Created session"
        );
        Ok(credential)
    }

    /// Point the manager at a new context.
    ///
    /// The previous identity's credential stays persisted but is no longer
    /// active; call [`Self::restore`] to pick up the new identity's session.
    pub fn switch_identity(&self, ctx: ClientContext) {
        let mut inner = self.inner.write();
        info!(
            from = %inner.ctx.identity(),
            to = %ctx.identity(),
            "Switching session identity"
        );
        inner.ctx = ctx;
        inner.credential = None;
        inner.restoring = false;
    }

    /// Log out: forget the active credential and delete the persisted one
    pub fn clear(&self) -> MailResult<()> {
        let mut inner = self.inner.write();
        self.storage.delete_session(inner.ctx.identity())?;
        inner.credential = None;
        info!(owner = %inner.ctx.identity(), "Session cleared");
        Ok(())
    }
}
