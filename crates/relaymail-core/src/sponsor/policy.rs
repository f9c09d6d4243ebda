//! Sponsorship allowlist
//!
//! The relay only pays for calls into the messaging package plus a handful of
//! framework helpers, and only for drafts whose sender is the requesting
//! identity. The same rules are checked locally before any request leaves the
//! client.

use std::collections::BTreeSet;

use crate::error::{MailError, MailResult};

use super::draft::DraftOperation;

/// Module functions of the messaging package that may be sponsored
const PACKAGE_FUNCTIONS: &[&str] = &[
    "channel::new",
    "channel::share",
    "channel::add_encrypted_key",
    "channel::send_message",
    "channel::add_members",
    "channel::remove_members",
    "member_cap::transfer_to_sender",
    "member_cap::transfer_to_recipient",
    "member_cap::transfer_member_caps",
    "creator_cap::transfer_to_sender",
    "config::none",
    "attachment::new",
];

/// Framework calls the ledger SDK inserts on its own
const FRAMEWORK_TARGETS: &[&str] = &[
    "0x1::vector::empty",
    "0x2::coin::join",
    "0x2::coin::split",
];

/// Expand a short framework address (`0x1`) to its 32-byte form
fn long_form(target: &str) -> Option<String> {
    let (address, rest) = target.split_once("::")?;
    let hex = address.strip_prefix("0x")?;
    if hex.len() >= 64 {
        return None;
    }
    Some(format!("0x{:0>64}::{}", hex, rest))
}

/// Set of call targets the relay will pay for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorPolicy {
    targets: BTreeSet<String>,
}

impl SponsorPolicy {
    /// Allowlist for `package_id` plus the framework helpers
    pub fn for_package(package_id: &str) -> Self {
        let mut policy = Self {
            targets: BTreeSet::new(),
        };
        for function in PACKAGE_FUNCTIONS {
            policy.allow(format!("{}::{}", package_id, function));
        }
        for target in FRAMEWORK_TARGETS {
            policy.allow(*target);
        }
        policy
    }

    /// Add a target; framework targets are listed in short and long form
    pub fn allow(&mut self, target: impl Into<String>) {
        let target = target.into();
        if let Some(long) = long_form(&target) {
            self.targets.insert(long);
        }
        self.targets.insert(target);
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            self.allow(target);
        }
        self
    }

    pub fn allows(&self, target: &str) -> bool {
        self.targets.contains(target)
    }

    /// Targets sent to the relay with every sponsor request
    pub fn targets(&self) -> Vec<String> {
        self.targets.iter().cloned().collect()
    }

    /// Fail closed unless every call is allowlisted and the sender is `identity`
    pub fn check(&self, draft: &DraftOperation, identity: &str) -> MailResult<()> {
        if draft.sender != identity {
            return Err(MailError::SponsorshipRejected(format!(
                "draft sender {} is not the active identity {}",
                draft.sender, identity
            )));
        }
        if draft.calls.is_empty() {
            return Err(MailError::InvalidInput(
                "draft operation has no calls".to_string(),
            ));
        }
        if let Some(target) = draft.targets().find(|t| !self.allows(t)) {
            return Err(MailError::SponsorshipRejected(format!(
                "call target {} is not sponsored",
                target
            )));
        }
        Ok(())
    }
}
