//! Duet Testing Infrastructure
//!
//! Fakes for every collaborator the handshake talks to, plus fixtures and a
//! tracing initializer for tests.
//!
//! - [`FakeLedger`]: in-memory ledger implementing `LedgerReader`,
//!   `Simulator` and `Submitter` with a toy session contract, call counters
//!   and failure injection
//! - [`FakeSigner`]: deterministic signer with decline/delay switches
//! - [`fixtures`]: addresses, contract and configuration

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod ledger;
pub mod signer;

pub use fixtures::*;
pub use ledger::{CallCounts, FakeLedger, SubmitFault};
pub use signer::{fake_signature, FakeSigner};

use tracing_subscriber::EnvFilter;

/// Install a test-writer fmt subscriber once; later calls are no-ops.
///
/// Filter via `RUST_LOG`, default `warn`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
