//! Collaborator effects
//!
//! The handshake never talks to the network or a wallet directly; every side
//! effect goes through one of these traits. Production code plugs in RPC and
//! wallet adapters, tests plug in the fakes from `duet-testkit`.
//!
//! # Effect Classification
//!
//! - **LedgerReader**: read-only, cacheable, safe to repeat
//! - **Simulator**: read-only, not cached (every draft is fresh)
//! - **Signer**: may block on a human for an unbounded time; may be declined
//! - **Submitter**: not idempotent on its own; callers re-query session state
//!   before any retry

use crate::entry::AuthorizationSubEntry;
use crate::errors::Result;
use crate::ledger::{LedgerEntry, LedgerKey, SimulationResult, SubmitResponse};
use crate::transaction::DraftTransaction;
use crate::types::SequenceNumber;
use async_trait::async_trait;

/// Batched point lookups of ledger state
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetch the entries stored under `keys`.
    ///
    /// Only existing entries are returned, in arbitrary order; absence is not
    /// an error.
    async fn get_entries(&self, keys: &[LedgerKey]) -> Result<Vec<LedgerEntry>>;

    /// Latest closed ledger sequence
    async fn latest_sequence(&self) -> Result<SequenceNumber>;
}

/// Transaction simulation
#[async_trait]
pub trait Simulator: Send + Sync {
    /// Simulate `draft` and return the required authorization entries
    async fn simulate(&self, draft: &DraftTransaction) -> Result<SimulationResult>;
}

/// External signer (wallet)
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign an unsigned authorization stub.
    ///
    /// Returns `SigningDeclined` when the operator refuses.
    async fn sign_sub_entry(
        &self,
        entry: &AuthorizationSubEntry,
        network_passphrase: &str,
    ) -> Result<AuthorizationSubEntry>;

    /// Sign the encoded transaction and return the encoded signed envelope
    async fn sign_envelope(&self, transaction: &[u8]) -> Result<Vec<u8>>;
}

/// Transaction submission
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit an encoded signed envelope
    async fn submit(&self, envelope: &[u8]) -> Result<SubmitResponse>;
}
