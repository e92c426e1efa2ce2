//! Deterministic fake signer
//!
//! Signatures are `sha256("duet-fake-sig" ++ address ++ digest)`. The fake
//! ledger verifies them with [`fake_signature`], so a tampered entry or
//! envelope is rejected on submit just like on a real network.

use async_trait::async_trait;
use duet_core::codec::{self, signature_preimage};
use duet_core::{
    Address, AuthorizationSubEntry, Credentials, EnvelopeSignature, HandshakeError, Result,
    Signer, SignedEnvelope,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Fake signature of `digest` by `address`
pub fn fake_signature(address: &Address, digest: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"duet-fake-sig");
    hasher.update(address.as_str().as_bytes());
    hasher.update(digest);
    hasher.finalize().to_vec()
}

#[derive(Debug, Default)]
struct SignerState {
    decline: bool,
    delay: Option<Duration>,
    tamper: bool,
    sub_entry_calls: usize,
    envelope_calls: usize,
    signed_for: Vec<Address>,
}

/// Signer holding every test key
#[derive(Debug, Clone, Default)]
pub struct FakeSigner {
    state: Arc<Mutex<SignerState>>,
}

impl FakeSigner {
    /// Signer that approves everything immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline every request until reset
    pub fn set_decline(&self, decline: bool) {
        self.state.lock().decline = decline;
    }

    /// Wait before answering (simulates a slow human)
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Return an entry whose arguments differ from the request
    pub fn set_tamper(&self, tamper: bool) {
        self.state.lock().tamper = tamper;
    }

    /// Number of `sign_sub_entry` calls
    pub fn sub_entry_calls(&self) -> usize {
        self.state.lock().sub_entry_calls
    }

    /// Number of `sign_envelope` calls
    pub fn envelope_calls(&self) -> usize {
        self.state.lock().envelope_calls
    }

    /// Addresses whose sub-entries were signed, in order
    pub fn signed_for(&self) -> Vec<Address> {
        self.state.lock().signed_for.clone()
    }

    async fn gate(&self) -> Result<()> {
        let (decline, delay) = {
            let state = self.state.lock();
            (state.decline, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if decline {
            return Err(HandshakeError::signing_declined("operator rejected the request"));
        }
        Ok(())
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign_sub_entry(
        &self,
        entry: &AuthorizationSubEntry,
        network_passphrase: &str,
    ) -> Result<AuthorizationSubEntry> {
        self.state.lock().sub_entry_calls += 1;
        self.gate().await?;

        let preimage = signature_preimage(entry, network_passphrase)?;
        let mut signed = entry.clone();
        let Credentials::Address(creds) = &mut signed.credentials else {
            return Err(HandshakeError::build("nothing to sign for source-account entry"));
        };
        creds.signature = Some(fake_signature(&creds.address, &preimage));
        let address = creds.address.clone();

        let tamper = {
            let mut state = self.state.lock();
            state.signed_for.push(address);
            state.tamper
        };
        if tamper {
            signed.root_invocation.args.0.reverse();
        }
        Ok(signed)
    }

    async fn sign_envelope(&self, transaction: &[u8]) -> Result<Vec<u8>> {
        self.state.lock().envelope_calls += 1;
        self.gate().await?;

        let draft = codec::decode_transaction(transaction)?;
        let digest = Sha256::digest(transaction);
        let envelope = SignedEnvelope {
            transaction: transaction.to_vec(),
            signatures: vec![EnvelopeSignature {
                signature: fake_signature(&draft.source, &digest),
                signer: draft.source,
            }],
        };
        codec::encode_envelope(&envelope)
    }
}
