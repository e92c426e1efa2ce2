//! Duet Core
//!
//! Leaf types for the two-party session handshake: addresses and typed
//! arguments, partial authorization entries and their portable codec, the
//! request deduplication cache, expiration arithmetic, configuration, retry
//! policy, the error model, and the collaborator effect traits (ledger read,
//! simulation, signing, submission).
//!
//! Nothing in this crate performs I/O on its own; the handshake flows in
//! `duet-handshake` compose these pieces through an explicit context.

pub mod cache;
pub mod codec;
pub mod config;
pub mod effects;
pub mod entry;
pub mod errors;
pub mod expiration;
pub mod ledger;
pub mod retry;
pub mod transaction;
pub mod types;

pub use cache::{cancel_pair, CacheStats, CancelHandle, CancelSignal, RequestCache};
pub use config::HandshakeConfig;
pub use effects::{LedgerReader, Signer, Simulator, Submitter};
pub use entry::{
    AddressCredentials, AuthorizationSubEntry, AuthorizedInvocation, CredentialKind, Credentials,
    InvokedFunction,
};
pub use errors::{HandshakeError, Recovery, Result};
pub use expiration::{format_remaining, ExpirationTracker, PollingState};
pub use ledger::{
    find_entry, LedgerEntry, LedgerKey, RejectReason, SessionOutcome, SessionRecord,
    SimulationResult, SubmitResponse, SubmitStatus,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use transaction::{ContractCall, DraftTransaction, EnvelopeSignature, SignedEnvelope};
pub use types::{
    Address, AddressKind, ArgValue, ArgumentTuple, SequenceNumber, SessionId, Wager, MINIMAL_UNIT,
};
