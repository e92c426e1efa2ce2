//! Draft transactions and signed envelopes.

use crate::entry::AuthorizationSubEntry;
use crate::types::{Address, ArgumentTuple};
use serde::{Deserialize, Serialize};

/// The single contract call carried by a draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Target contract
    pub contract: Address,
    /// Function name
    pub function_name: String,
    /// Fully ordered argument tuple
    pub args: ArgumentTuple,
}

/// An unsubmitted transaction invoking exactly one contract call.
///
/// `auth` starts empty; simulation fills in the required entry set, which the
/// handshake then signs or substitutes in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftTransaction {
    /// Source account paying fees
    pub source: Address,
    /// Source account sequence
    pub sequence: i64,
    /// Fee bid in the smallest unit
    pub fee: u32,
    /// The contract call
    pub call: ContractCall,
    /// Required partial authorizations (filled by simulation)
    pub auth: Vec<AuthorizationSubEntry>,
}

impl DraftTransaction {
    /// New draft with no authorization entries yet
    pub fn new(source: Address, call: ContractCall) -> Self {
        Self {
            source,
            sequence: 0,
            fee: 0,
            call,
            auth: Vec::new(),
        }
    }

    /// Indices of entries authorized by `address`
    pub fn entry_indices_for(&self, address: &Address) -> Vec<usize> {
        self.auth
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.authorizing_address() == Some(address))
            .map(|(index, _)| index)
            .collect()
    }

    /// Replace the entry at `index`, returning the previous one
    pub fn replace_entry(
        &mut self,
        index: usize,
        entry: AuthorizationSubEntry,
    ) -> Option<AuthorizationSubEntry> {
        self.auth
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, entry))
    }

    /// Address-credential entries still waiting for a signature
    pub fn unsigned_entries(&self) -> impl Iterator<Item = &AuthorizationSubEntry> {
        self.auth.iter().filter(|entry| entry.is_stub())
    }
}

/// One signature over the envelope bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Signing account
    pub signer: Address,
    /// Signature bytes
    pub signature: Vec<u8>,
}

/// A transaction plus its envelope signatures, ready to submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Canonical transaction bytes (see `codec::encode_transaction`)
    pub transaction: Vec<u8>,
    /// Envelope signatures
    pub signatures: Vec<EnvelopeSignature>,
}
