//! Participant joiner (second party)
//!
//! Consumes an invitation: checks whether the session already exists,
//! rebuilds the full transaction with both real parties, substitutes the
//! initiator's pre-signed entry, signs the joiner's own entry and submits.
//!
//! By the time the joiner runs every argument is resolved and the two legs
//! name distinct addresses, so the initiator's stub is located by address
//! alone. The argument-tuple matching of the builder does not apply here.
//!
//! `join` is idempotent: a session that already exists is returned as
//! [`JoinOutcome::AlreadyActive`] without rebuilding or resubmitting.

use crate::context::HandshakeContext;
use crate::invitation::Invitation;
use duet_core::codec;
use duet_core::{
    Address, ArgValue, CancelSignal, ContractCall, DraftTransaction, HandshakeError,
    RejectReason, Result, SessionId, SessionRecord, SubmitResponse, SubmitStatus, Wager,
};
use std::sync::Arc;

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// This call submitted the session-creating transaction
    Submitted {
        /// Session created
        session_id: SessionId,
        /// Transaction hash
        hash: String,
        /// Submission status (`Success` or `Pending`)
        status: SubmitStatus,
    },
    /// The session already existed (earlier call, another process, or a lost race)
    AlreadyActive(SessionRecord),
}

impl JoinOutcome {
    /// Session identity, identical across repeated joins
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Submitted { session_id, .. } => *session_id,
            Self::AlreadyActive(record) => record.session_id,
        }
    }

    /// True when this call performed the submission
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

/// Completes sessions from invitations
#[derive(Debug, Clone)]
pub struct ParticipantJoiner {
    ctx: Arc<HandshakeContext>,
}

impl ParticipantJoiner {
    /// Joiner over `ctx`
    pub fn new(ctx: Arc<HandshakeContext>) -> Self {
        Self { ctx }
    }

    /// Join `invitation` as `joiner` wagering `joiner_wager`
    pub async fn join(
        &self,
        invitation: &Invitation,
        joiner: &Address,
        joiner_wager: Wager,
    ) -> Result<JoinOutcome> {
        self.join_with_cancel(invitation, joiner, joiner_wager, None)
            .await
    }

    /// [`join`](Self::join) whose signature requests can be cancelled
    pub async fn join_with_cancel(
        &self,
        invitation: &Invitation,
        joiner: &Address,
        joiner_wager: Wager,
        cancel: Option<CancelSignal>,
    ) -> Result<JoinOutcome> {
        let session_id = invitation.session_id;
        if joiner == &invitation.initiator {
            return Err(HandshakeError::SelfPlay {
                address: joiner.to_string(),
            });
        }
        if joiner_wager <= 0 {
            return Err(HandshakeError::build(format!(
                "wager must be positive, got {joiner_wager}"
            )));
        }

        // Idempotency check completes before any build work starts.
        if let Some(record) = self.ctx.read_session(session_id).await? {
            tracing::info!(session_id, "session already active, skipping submit");
            return Ok(JoinOutcome::AlreadyActive(record));
        }

        let current = self.ctx.cached_sequence().await?;
        self.ensure_not_expired(invitation, current)?;

        tracing::info!(
            session_id,
            joiner = %joiner.short(),
            wager = joiner_wager,
            "joining session"
        );
        let mut draft = self.draft(invitation, joiner, joiner_wager);
        let simulation = match self.ctx.simulator().simulate(&draft).await {
            Ok(simulation) => simulation,
            Err(e) => {
                // A session created since the idempotency check also fails simulation.
                self.ctx.invalidate_session(session_id);
                if let Ok(Some(record)) = self.ctx.read_session(session_id).await {
                    tracing::info!(session_id, "session appeared during join");
                    return Ok(JoinOutcome::AlreadyActive(record));
                }
                return Err(match e {
                    HandshakeError::Build { .. } => e,
                    other => HandshakeError::build(format!("simulation failed: {other}")),
                });
            }
        };
        draft.fee = simulation.min_resource_fee;
        draft.auth = simulation.auth;

        self.substitute_initiator_entry(&mut draft, invitation)?;
        self.sign_joiner_entries(&mut draft, joiner, cancel.clone()).await?;

        let current = self.ctx.fresh_sequence().await?;
        self.ensure_not_expired(invitation, current)?;

        let transaction = codec::encode_transaction(&draft)?;
        let envelope = self
            .ctx
            .bounded(
                "sign_envelope",
                self.ctx.config().timeouts.sign,
                cancel,
                self.ctx.signer().sign_envelope(&transaction),
            )
            .await?;

        let submitted = self
            .ctx
            .bounded(
                "submit",
                self.ctx.config().timeouts.submit,
                None,
                self.ctx.submitter().submit(&envelope),
            )
            .await;

        match submitted {
            Ok(response) => self.handle_response(invitation, response).await,
            Err(e) if e.requires_requery() => self.reconcile(session_id, e).await,
            Err(e) => Err(e),
        }
    }

    fn ensure_not_expired(&self, invitation: &Invitation, current: u32) -> Result<()> {
        if invitation.is_expired(current) {
            tracing::warn!(
                session_id = invitation.session_id,
                expiration_bound = invitation.expiration_bound,
                current,
                "invitation expired"
            );
            return Err(HandshakeError::ExpiredInvitation {
                expiration_bound: invitation.expiration_bound,
                current_sequence: current,
            });
        }
        Ok(())
    }

    fn draft(
        &self,
        invitation: &Invitation,
        joiner: &Address,
        joiner_wager: Wager,
    ) -> DraftTransaction {
        DraftTransaction::new(
            joiner.clone(),
            ContractCall {
                contract: self.ctx.contract().clone(),
                function_name: self.ctx.start_function().to_string(),
                args: vec![
                    ArgValue::U32(invitation.session_id),
                    ArgValue::Address(invitation.initiator.clone()),
                    ArgValue::Address(joiner.clone()),
                    ArgValue::I128(invitation.initiator_wager),
                    ArgValue::I128(joiner_wager),
                ]
                .into(),
            },
        )
    }

    /// Replace the initiator's stub, in place, with the invitation's signed entry
    fn substitute_initiator_entry(
        &self,
        draft: &mut DraftTransaction,
        invitation: &Invitation,
    ) -> Result<()> {
        let indices = draft.entry_indices_for(&invitation.initiator);
        let [index] = indices.as_slice() else {
            return Err(HandshakeError::ambiguous(format!(
                "expected one entry for initiator {}, found {}",
                invitation.initiator.short(),
                indices.len()
            )));
        };
        let index = *index;

        if draft.auth[index].root_invocation != invitation.signed_entry.root_invocation {
            return Err(HandshakeError::ambiguous(
                "initiator entry in the rebuilt transaction authorizes a different invocation",
            ));
        }
        draft.replace_entry(index, invitation.signed_entry.clone());
        tracing::debug!(session_id = invitation.session_id, index, "substituted initiator entry");
        Ok(())
    }

    /// Sign the joiner's address-bound entry; source-account entries ride on the envelope
    async fn sign_joiner_entries(
        &self,
        draft: &mut DraftTransaction,
        joiner: &Address,
        cancel: Option<CancelSignal>,
    ) -> Result<()> {
        let bound = self
            .ctx
            .cached_sequence()
            .await?
            .saturating_add(self.ctx.config().ledger.auth_validity_ledgers);

        for index in draft.entry_indices_for(joiner) {
            if !draft.auth[index].is_stub() {
                continue;
            }
            let stamped = draft.auth[index].with_expiration_bound(bound);
            let signed = self.ctx.sign_sub_entry(&stamped, cancel.clone()).await?;
            draft.replace_entry(index, signed);
        }

        let unsigned = draft.unsigned_entries().count();
        if unsigned > 0 {
            return Err(HandshakeError::build(format!(
                "{unsigned} authorization entries still need a signature"
            )));
        }
        Ok(())
    }

    async fn handle_response(
        &self,
        invitation: &Invitation,
        response: SubmitResponse,
    ) -> Result<JoinOutcome> {
        let session_id = invitation.session_id;
        match response.status {
            SubmitStatus::Success | SubmitStatus::Pending => {
                self.ctx.invalidate_session(session_id);
                tracing::info!(
                    session_id,
                    hash = %response.hash,
                    status = ?response.status,
                    "session submitted"
                );
                Ok(JoinOutcome::Submitted {
                    session_id,
                    hash: response.hash,
                    status: response.status,
                })
            }
            SubmitStatus::Failed(RejectReason::SessionExists) => {
                let taken = HandshakeError::SessionTaken { session_id };
                tracing::info!(session_id, "lost creation race, loading existing session");
                self.load_existing(session_id, taken).await
            }
            SubmitStatus::Failed(RejectReason::AuthExpired) => {
                let current = self
                    .ctx
                    .fresh_sequence()
                    .await
                    .unwrap_or(invitation.expiration_bound);
                Err(HandshakeError::ExpiredInvitation {
                    expiration_bound: invitation.expiration_bound,
                    current_sequence: current,
                })
            }
            SubmitStatus::Failed(RejectReason::InvalidSignature) => {
                Err(HandshakeError::rejected("ledger rejected a signature"))
            }
            SubmitStatus::Failed(RejectReason::Other(message)) => {
                Err(HandshakeError::rejected(message))
            }
        }
    }

    /// Re-query after an ambiguous submit; the transaction may have landed
    async fn reconcile(&self, session_id: SessionId, cause: HandshakeError) -> Result<JoinOutcome> {
        tracing::warn!(session_id, error = %cause, "submit outcome unknown, re-querying session");
        self.load_existing(session_id, cause).await
    }

    /// Load the existing record with bounded backoff, or fail with `cause`
    async fn load_existing(
        &self,
        session_id: SessionId,
        cause: HandshakeError,
    ) -> Result<JoinOutcome> {
        let ctx = &self.ctx;
        let found = ctx
            .config()
            .retry
            .poll_until(|_| async move {
                ctx.invalidate_session(session_id);
                ctx.read_session(session_id).await
            })
            .await;
        match found {
            Some(record) => Ok(JoinOutcome::AlreadyActive(record)),
            None => Err(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InvitationBuilder;
    use crate::context::Collaborators;
    use assert_matches::assert_matches;
    use duet_testkit::{initiator, joiner, test_config, FakeLedger, FakeSigner, SubmitFault};

    struct Harness {
        builder: InvitationBuilder,
        joiner: ParticipantJoiner,
        ledger: FakeLedger,
        signer: FakeSigner,
    }

    fn harness() -> Harness {
        let config = test_config();
        let ledger = FakeLedger::new(&config);
        let signer = FakeSigner::new();
        let ctx = Arc::new(
            HandshakeContext::new(
                config,
                Collaborators {
                    ledger: Arc::new(ledger.clone()),
                    simulator: Arc::new(ledger.clone()),
                    signer: Arc::new(signer.clone()),
                    submitter: Arc::new(ledger.clone()),
                },
            )
            .unwrap(),
        );
        Harness {
            builder: InvitationBuilder::new(ctx.clone()),
            joiner: ParticipantJoiner::new(ctx),
            ledger,
            signer,
        }
    }

    async fn invitation(h: &Harness) -> Invitation {
        h.builder.prepare(42, &initiator(), 100).await.unwrap()
    }

    #[tokio::test]
    async fn test_self_play_makes_no_calls() {
        let h = harness();
        let inv = invitation(&h).await;
        let before = h.ledger.calls();
        assert_matches!(
            h.joiner.join(&inv, &initiator(), 50).await,
            Err(HandshakeError::SelfPlay { .. })
        );
        assert_eq!(h.ledger.calls(), before);
    }

    #[tokio::test]
    async fn test_join_submits_then_is_idempotent() {
        let h = harness();
        let inv = invitation(&h).await;

        let first = h.joiner.join(&inv, &joiner(), 50).await.unwrap();
        assert!(first.is_submitted());
        let second = h.joiner.join(&inv, &joiner(), 50).await.unwrap();
        assert_matches!(second, JoinOutcome::AlreadyActive(_));
        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(h.ledger.calls().submit, 1);
        assert_eq!(h.ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_invitation_rejected_before_simulation() {
        let h = harness();
        let inv = invitation(&h).await;
        h.ledger.set_sequence(inv.expiration_bound);
        let simulations = h.ledger.calls().simulate;
        assert_matches!(
            h.joiner.join(&inv, &joiner(), 50).await,
            Err(HandshakeError::ExpiredInvitation { .. })
        );
        assert_eq!(h.ledger.calls().simulate, simulations);
    }

    #[tokio::test]
    async fn test_lost_race_loads_existing_session() {
        let h = harness();
        let inv = invitation(&h).await;
        let winner = SessionRecord {
            session_id: 42,
            player1: initiator(),
            player2: duet_testkit::test_address(9),
            player1_wager: 100,
            player2_wager: 70,
            outcome: None,
        };
        h.ledger.inject_submit_fault(SubmitFault::Race(winner.clone()));
        let outcome = h.joiner.join(&inv, &joiner(), 50).await.unwrap();
        assert_eq!(outcome, JoinOutcome::AlreadyActive(winner));
    }

    #[tokio::test]
    async fn test_auth_expired_rejection_maps_to_expired() {
        let h = harness();
        let inv = invitation(&h).await;
        h.ledger
            .inject_submit_fault(SubmitFault::Reject(RejectReason::AuthExpired));
        assert_matches!(
            h.joiner.join(&inv, &joiner(), 50).await,
            Err(HandshakeError::ExpiredInvitation { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_submit_that_landed_reconciles_to_active() {
        let h = harness();
        let inv = invitation(&h).await;
        h.ledger.inject_submit_fault(SubmitFault::Hang { apply: true });
        let outcome = h.joiner.join(&inv, &joiner(), 50).await.unwrap();
        assert_matches!(outcome, JoinOutcome::AlreadyActive(record) if record.player2 == joiner());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_submit_that_never_landed_is_timeout() {
        let h = harness();
        let inv = invitation(&h).await;
        h.ledger.inject_submit_fault(SubmitFault::Hang { apply: false });
        let err = h.joiner.join(&inv, &joiner(), 50).await.unwrap_err();
        assert_matches!(err, HandshakeError::Timeout { .. });
        assert!(err.requires_requery());
    }

    #[tokio::test]
    async fn test_source_account_entry_is_not_signed_separately() {
        let h = harness();
        let inv = invitation(&h).await;
        h.ledger.set_source_account_credentials(true);
        let outcome = h.joiner.join(&inv, &joiner(), 50).await.unwrap();
        assert!(outcome.is_submitted());
        // one sub-entry signature from the initiator, none from the joiner
        assert_eq!(h.signer.signed_for(), vec![initiator()]);
    }

    #[tokio::test]
    async fn test_declined_envelope_signature() {
        let h = harness();
        let inv = invitation(&h).await;
        h.signer.set_decline(true);
        assert_matches!(
            h.joiner.join(&inv, &joiner(), 50).await,
            Err(HandshakeError::SigningDeclined { .. })
        );
        assert_eq!(h.ledger.calls().submit, 0);
    }
}
