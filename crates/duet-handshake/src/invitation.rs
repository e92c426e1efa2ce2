//! Portable invitations
//!
//! An invitation is the initiator's signed partial authorization plus the
//! metadata the joiner needs. Everything except the entry itself is derived
//! from the entry, so the token carries exactly one encoded entry and nothing
//! in it can disagree with what was signed.

use duet_core::codec;
use duet_core::{
    Address, AuthorizationSubEntry, ExpirationTracker, HandshakeError, Result, SequenceNumber,
    SessionId, Wager,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Index of the session id in the authorized argument tuple
const SESSION_ARG: usize = 0;
/// Index of the wager in the authorized argument tuple
const WAGER_ARG: usize = 1;

/// Immutable invitation to join a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Session to create
    pub session_id: SessionId,
    /// Initiating party
    pub initiator: Address,
    /// Initiator's wager
    pub initiator_wager: Wager,
    /// Initiator's signed entry, substituted byte-for-byte by the joiner
    pub signed_entry: AuthorizationSubEntry,
    /// Exclusive validity bound: the signed entry is rejected from this
    /// ledger sequence on, where remaining validity reaches zero
    pub expiration_bound: SequenceNumber,
}

impl Invitation {
    /// Derive an invitation from a signed entry.
    ///
    /// Fails with `Decode` when the entry is unsigned or its arguments do not
    /// have the `(session_id, wager)` shape, and with `UnsupportedInvocation`
    /// when it authorizes a function other than `start_function`.
    pub fn from_signed_entry(
        signed_entry: AuthorizationSubEntry,
        start_function: &str,
    ) -> Result<Self> {
        let invocation = codec::extract_invocation(&signed_entry, start_function)?;
        let session_id = invocation
            .args
            .get(SESSION_ARG)
            .and_then(|arg| arg.as_u32())
            .ok_or_else(|| HandshakeError::decode("entry carries no session id"))?;
        let initiator_wager = invocation
            .args
            .get(WAGER_ARG)
            .and_then(|arg| arg.as_i128())
            .ok_or_else(|| HandshakeError::decode("entry carries no wager"))?;

        let initiator = signed_entry
            .authorizing_address()
            .cloned()
            .ok_or_else(|| HandshakeError::decode("entry is not address-bound"))?;
        let expiration_bound = codec::extract_expiration_bound(&signed_entry)
            .ok_or_else(|| HandshakeError::decode("entry has no validity bound"))?;
        if !signed_entry.is_signed() {
            return Err(HandshakeError::decode("entry is not signed"));
        }

        Ok(Self {
            session_id,
            initiator,
            initiator_wager,
            signed_entry,
            expiration_bound,
        })
    }

    /// Encode as a URL-safe token
    pub fn to_token(&self) -> Result<String> {
        codec::encode_entry(&self.signed_entry)
    }

    /// Decode a token produced by [`to_token`](Self::to_token)
    pub fn from_token(token: &str, start_function: &str) -> Result<Self> {
        Self::from_signed_entry(codec::decode_entry(token)?, start_function)
    }

    /// Remaining validity at `current_sequence`
    pub fn remaining(
        &self,
        tracker: &ExpirationTracker,
        current_sequence: SequenceNumber,
    ) -> Duration {
        tracker.remaining(self.expiration_bound, current_sequence)
    }

    /// True once `current_sequence` reached the exclusive validity bound
    pub fn is_expired(&self, current_sequence: SequenceNumber) -> bool {
        current_sequence >= self.expiration_bound
    }
}
