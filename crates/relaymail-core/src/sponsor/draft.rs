//! Draft operations
//!
//! A draft is the fee-less description of a write: who initiates it, on which
//! network, and which contract calls it performs. Its kind encoding carries
//! only the calls; gas owner, budget and price are attached by the sponsor.

use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};
use crate::types::Network;

/// Argument of a contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallArg {
    /// An on-ledger object by id
    Object(String),
    /// An account address
    Address(String),
    /// Raw bytes (already-encrypted payloads, keys)
    Bytes(Vec<u8>),
    U64(u64),
    /// A list of addresses
    Addresses(Vec<String>),
}

/// One contract call: `package::module::function` plus arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCall {
    pub target: String,
    pub arguments: Vec<CallArg>,
}

impl MoveCall {
    pub fn new(target: impl Into<String>, arguments: Vec<CallArg>) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }
}

/// The fee-less part of a transaction
#[derive(Serialize)]
struct OperationKind<'a> {
    calls: &'a [MoveCall],
}

/// A write waiting to be sponsored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftOperation {
    pub sender: String,
    pub network: Network,
    pub calls: Vec<MoveCall>,
}

impl DraftOperation {
    pub fn new(sender: impl Into<String>, network: Network) -> Self {
        Self {
            sender: sender.into(),
            network,
            calls: Vec::new(),
        }
    }

    pub fn with_call(mut self, call: MoveCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn push_call(&mut self, call: MoveCall) {
        self.calls.push(call);
    }

    /// Canonical encoding of the calls, without any fee metadata.
    ///
    /// # Errors
    ///
    /// Returns `MailError::InvalidInput` for a draft without calls.
    pub fn kind_bytes(&self) -> MailResult<Vec<u8>> {
        if self.calls.is_empty() {
            return Err(MailError::InvalidInput(
                "draft operation has no calls".to_string(),
            ));
        }
        Ok(postcard::to_allocvec(&OperationKind { calls: &self.calls })?)
    }

    /// Call targets in order of appearance
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().map(|c| c.target.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes_are_deterministic_and_sender_free() {
        let call = MoveCall::new("0x2::coin::join", vec![CallArg::U64(5)]);
        let a = DraftOperation::new("0xa", Network::Testnet).with_call(call.clone());
        let b = DraftOperation::new("0xb", Network::Mainnet).with_call(call);

        assert_eq!(a.kind_bytes().unwrap(), b.kind_bytes().unwrap());
    }

    #[test]
    fn test_empty_draft_has_no_kind() {
        let draft = DraftOperation::new("0xa", Network::Testnet);
        assert!(matches!(draft.kind_bytes(), Err(MailError::InvalidInput(_))));
    }
}
