//! Address book
//!
//! Each identity keeps its own map from counterpart address to a
//! human-readable alias. The map is persisted as one blob per owner and
//! mirrored into a watch channel so views can re-render when it changes.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::context::ClientContext;
use crate::error::{MailError, MailResult};
use crate::storage::Storage;
use crate::types::is_valid_address;

/// Snapshot of an owner's aliases, keyed by address
pub type AliasMap = BTreeMap<String, String>;

fn normalize_address(address: &str) -> MailResult<String> {
    let address = address.trim();
    if !is_valid_address(address) {
        return Err(MailError::InvalidInput(format!(
            "'{}' is not a valid address",
            address
        )));
    }
    Ok(address.to_ascii_lowercase())
}

/// Alias directory of one owning identity
pub struct AliasDirectory {
    owner: String,
    storage: Storage,
    /// Serializes read-modify-write of the persisted map
    write_lock: Mutex<()>,
    tx: watch::Sender<AliasMap>,
}

impl AliasDirectory {
    /// Load the directory of the context's identity
    pub fn open(storage: Storage, ctx: &ClientContext) -> MailResult<Self> {
        let owner = ctx.identity().to_string();
        let aliases = storage.load_aliases(&owner)?;
        debug!(owner = %owner, count = aliases.len(), "Loaded alias directory");
        let (tx, _) = watch::channel(aliases);
        Ok(Self {
            owner,
            storage,
            write_lock: Mutex::new(()),
            tx,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Add or rename a counterpart.
    ///
    /// # Errors
    ///
    /// Returns `MailError::InvalidInput` for a malformed address or an alias
    /// that is empty after trimming.
    pub fn set_alias(&self, address: &str, alias: &str) -> MailResult<()> {
        let address = normalize_address(address)?;
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(MailError::InvalidInput("alias must not be empty".to_string()));
        }

        let _guard = self.write_lock.lock();
        let mut aliases = self.tx.borrow().clone();
        if aliases.get(&address).map(String::as_str) == Some(alias) {
            return Ok(());
        }
        aliases.insert(address.clone(), alias.to_string());
        self.storage.save_aliases(&self.owner, &aliases)?;
        self.tx.send_replace(aliases);
        info!(owner = %self.owner, address = %address, "Alias saved");
        Ok(())
    }

    /// Forget a counterpart. Returns whether it was known.
    pub fn remove(&self, address: &str) -> MailResult<bool> {
        let address = normalize_address(address)?;

        let _guard = self.write_lock.lock();
        let mut aliases = self.tx.borrow().clone();
        if aliases.remove(&address).is_none() {
            return Ok(false);
        }
        self.storage.save_aliases(&self.owner, &aliases)?;
        self.tx.send_replace(aliases);
        info!(owner = %self.owner, address = %address, "Alias removed");
        Ok(true)
    }

    pub fn alias_for(&self, address: &str) -> Option<String> {
        let address = normalize_address(address).ok()?;
        self.tx.borrow().get(&address).cloned()
    }

    pub fn is_known(&self, address: &str) -> bool {
        self.alias_for(address).is_some()
    }

    /// All aliases, ordered by address
    pub fn list(&self) -> AliasMap {
        self.tx.borrow().clone()
    }

    /// Receive the map whenever it changes
    pub fn watch(&self) -> watch::Receiver<AliasMap> {
        self.tx.subscribe()
    }
}
