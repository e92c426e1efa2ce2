//! Invitation builder (initiator side)
//!
//! The second party is unknown when the initiator prepares an invitation, so
//! the draft reuses the initiator's own address as a placeholder for the
//! second leg. The placeholder's wager is pinned to [`MINIMAL_UNIT`]: two
//! full-value deductions from one balance would fail the contract's balance
//! check during simulation.
//!
//! The placeholder means the simulated entry set contains two entries for the
//! same address. This module, and only this module, therefore selects the
//! initiator's entry by argument tuple (the wager argument must equal the
//! real wager) rather than by address alone.

use crate::context::HandshakeContext;
use crate::invitation::Invitation;
use duet_core::codec;
use duet_core::{
    Address, ArgValue, AuthorizationSubEntry, CancelSignal, ContractCall, DraftTransaction,
    HandshakeError, Result, SessionId, Wager, MINIMAL_UNIT,
};
use std::sync::Arc;

/// Index of the wager inside an authorized `(session_id, wager)` tuple
const WAGER_ARG: usize = 1;

/// Select the initiator's entry among entries produced with the placeholder.
///
/// Matches on `(address, wager argument)`. Fails with `AmbiguousEntry` unless
/// exactly one entry matches, which includes `wager == MINIMAL_UNIT`, where the
/// real and placeholder legs are indistinguishable.
pub fn select_initiator_entry<'a>(
    entries: &'a [AuthorizationSubEntry],
    initiator: &Address,
    wager: Wager,
) -> Result<&'a AuthorizationSubEntry> {
    let expected = ArgValue::I128(wager);
    let mut candidates = entries.iter().filter(|entry| {
        entry.authorizing_address() == Some(initiator)
            && entry.argument_tuple().get(WAGER_ARG) == Some(&expected)
    });

    match (candidates.next(), candidates.next()) {
        (Some(entry), None) => Ok(entry),
        (None, _) => Err(HandshakeError::ambiguous(format!(
            "no entry for {} with wager {wager}",
            initiator.short()
        ))),
        (Some(_), Some(_)) => Err(HandshakeError::ambiguous(format!(
            "{} entries for {} with wager {wager}",
            2 + candidates.count(),
            initiator.short()
        ))),
    }
}

/// Prepares signed invitations
#[derive(Debug, Clone)]
pub struct InvitationBuilder {
    ctx: Arc<HandshakeContext>,
}

impl InvitationBuilder {
    /// Builder over `ctx`
    pub fn new(ctx: Arc<HandshakeContext>) -> Self {
        Self { ctx }
    }

    /// Build, simulate, select and sign the initiator's entry
    pub async fn prepare(
        &self,
        session_id: SessionId,
        initiator: &Address,
        initiator_wager: Wager,
    ) -> Result<Invitation> {
        self.prepare_with_cancel(session_id, initiator, initiator_wager, None)
            .await
    }

    /// [`prepare`](Self::prepare) whose signature request can be cancelled
    pub async fn prepare_with_cancel(
        &self,
        session_id: SessionId,
        initiator: &Address,
        initiator_wager: Wager,
        cancel: Option<CancelSignal>,
    ) -> Result<Invitation> {
        if initiator_wager <= 0 {
            return Err(HandshakeError::build(format!(
                "wager must be positive, got {initiator_wager}"
            )));
        }
        tracing::info!(
            session_id,
            initiator = %initiator.short(),
            wager = initiator_wager,
            "preparing invitation"
        );

        let draft = self.draft(session_id, initiator, initiator_wager);
        let simulation = self.ctx.simulator().simulate(&draft).await.map_err(|e| match e {
            HandshakeError::Build { .. } => e,
            other => HandshakeError::build(format!("simulation failed: {other}")),
        })?;
        tracing::debug!(
            session_id,
            entries = simulation.auth.len(),
            latest_sequence = simulation.latest_sequence,
            "simulated draft"
        );

        let stub = select_initiator_entry(&simulation.auth, initiator, initiator_wager)?;
        codec::extract_invocation(stub, self.ctx.start_function())?;

        let expiration_bound = simulation
            .latest_sequence
            .saturating_add(self.ctx.config().ledger.auth_validity_ledgers);
        let stamped = stub.with_expiration_bound(expiration_bound);

        let signed = self.ctx.sign_sub_entry(&stamped, cancel).await.map_err(|e| {
            tracing::debug!(session_id, error = %e, "initiator signature not obtained");
            e
        })?;

        let invitation = Invitation::from_signed_entry(signed, self.ctx.start_function())
            .map_err(|e| HandshakeError::build(format!("signed entry is unusable: {e}")))?;
        tracing::info!(session_id, expiration_bound, "invitation ready");
        Ok(invitation)
    }

    fn draft(&self, session_id: SessionId, initiator: &Address, wager: Wager) -> DraftTransaction {
        DraftTransaction::new(
            initiator.clone(),
            ContractCall {
                contract: self.ctx.contract().clone(),
                function_name: self.ctx.start_function().to_string(),
                args: vec![
                    ArgValue::U32(session_id),
                    ArgValue::Address(initiator.clone()),
                    // Placeholder second party
                    ArgValue::Address(initiator.clone()),
                    ArgValue::I128(wager),
                    ArgValue::I128(MINIMAL_UNIT),
                ]
                .into(),
            },
        )
    }
}
