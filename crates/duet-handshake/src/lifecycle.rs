//! Invitation lifecycle
//!
//! Initiator: `Created → AwaitingSignature → Shared → Active → Complete`,
//! with `AwaitingSignature → Created` on a declined signature and
//! `→ Expired` from any non-terminal state once validity runs out.
//!
//! Joiner: `Received → Reviewing → Joining → Active → Complete`, with
//! `Joining → Reviewing` on a recoverable failure, cancellation from the
//! three pre-active states, and the same expiry rule.
//!
//! States are never stored. A restarted client derives them with [`resume`]
//! from the persisted record, the ledger's session record and the remaining
//! validity.

use crate::context::HandshakeContext;
use crate::invitation::Invitation;
use crate::store::{InvitationStore, PersistedInvitation};
use duet_core::{
    Address, HandshakeError, PollingState, Result, SessionId, SessionRecord, Wager,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Side of the handshake a local participant plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Prepared and shared the invitation
    Initiator,
    /// Received the invitation
    Joiner,
}

/// Initiator-side states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitiatorState {
    /// Inputs chosen, nothing signed yet
    Created,
    /// Waiting on the wallet
    AwaitingSignature,
    /// Invitation handed out, waiting for the joiner
    Shared,
    /// Session exists on the ledger
    Active,
    /// Validity ran out before anyone joined
    Expired,
    /// Session finished with an outcome
    Complete,
}

/// Joiner-side states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinerState {
    /// Invitation decoded
    Received,
    /// Terms shown, wager being chosen
    Reviewing,
    /// Join in flight
    Joining,
    /// Session exists on the ledger
    Active,
    /// Abandoned by the joiner
    Cancelled,
    /// Validity ran out before joining
    Expired,
    /// Session finished with an outcome
    Complete,
}

/// State of one invitation from a participant's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Initiator side
    Initiator(InitiatorState),
    /// Joiner side
    Joiner(JoinerState),
}

/// Inputs that move the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Initiator asked the wallet to sign
    RequestSignature,
    /// Wallet declined
    SignatureDeclined,
    /// Wallet signed; invitation shared
    Signed,
    /// Joiner opened the invitation
    Review,
    /// Joiner started the join
    StartJoin,
    /// Join returned an outcome
    JoinSucceeded,
    /// Join failed recoverably
    JoinFailed,
    /// A periodic read found the session record
    SessionObserved,
    /// The session record carries an outcome
    OutcomeRecorded,
    /// Validity check
    Expire {
        /// Remaining validity
        remaining: Duration,
        /// Whether the session record exists
        session_exists: bool,
    },
    /// Joiner abandoned the invitation
    Cancel,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestSignature => "request_signature",
            Self::SignatureDeclined => "signature_declined",
            Self::Signed => "signed",
            Self::Review => "review",
            Self::StartJoin => "start_join",
            Self::JoinSucceeded => "join_succeeded",
            Self::JoinFailed => "join_failed",
            Self::SessionObserved => "session_observed",
            Self::OutcomeRecorded => "outcome_recorded",
            Self::Expire { .. } => "expire",
            Self::Cancel => "cancel",
        }
    }
}

impl LifecycleState {
    /// Starting state for `role`
    pub fn initial(role: Role) -> Self {
        match role {
            Role::Initiator => Self::Initiator(InitiatorState::Created),
            Role::Joiner => Self::Joiner(JoinerState::Received),
        }
    }

    /// Role this state belongs to
    pub fn role(&self) -> Role {
        match self {
            Self::Initiator(_) => Role::Initiator,
            Self::Joiner(_) => Role::Joiner,
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Initiator(InitiatorState::Expired | InitiatorState::Complete)
                | Self::Joiner(
                    JoinerState::Cancelled | JoinerState::Expired | JoinerState::Complete
                )
        )
    }

    /// The session exists and only completion is left to observe
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Initiator(InitiatorState::Active) | Self::Joiner(JoinerState::Active)
        )
    }

    /// Stable lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiator(state) => match state {
                InitiatorState::Created => "created",
                InitiatorState::AwaitingSignature => "awaiting_signature",
                InitiatorState::Shared => "shared",
                InitiatorState::Active => "active",
                InitiatorState::Expired => "expired",
                InitiatorState::Complete => "complete",
            },
            Self::Joiner(state) => match state {
                JoinerState::Received => "received",
                JoinerState::Reviewing => "reviewing",
                JoinerState::Joining => "joining",
                JoinerState::Active => "active",
                JoinerState::Cancelled => "cancelled",
                JoinerState::Expired => "expired",
                JoinerState::Complete => "complete",
            },
        }
    }

    /// Apply `event`, failing with `InvalidTransition` when it is not allowed here
    pub fn transition(self, event: &LifecycleEvent) -> Result<Self> {
        use InitiatorState as I;
        use JoinerState as J;
        use LifecycleEvent as E;

        let next = match (self, event) {
            (
                state,
                E::Expire {
                    remaining,
                    session_exists,
                },
            ) if !state.is_terminal() && remaining.is_zero() && !session_exists => {
                match state {
                    Self::Initiator(_) => Some(Self::Initiator(I::Expired)),
                    Self::Joiner(_) => Some(Self::Joiner(J::Expired)),
                }
            }

            (Self::Initiator(I::Created), E::RequestSignature) => {
                Some(Self::Initiator(I::AwaitingSignature))
            }
            (Self::Initiator(I::AwaitingSignature), E::SignatureDeclined) => {
                Some(Self::Initiator(I::Created))
            }
            (Self::Initiator(I::AwaitingSignature), E::Signed) => {
                Some(Self::Initiator(I::Shared))
            }
            (Self::Initiator(I::Shared), E::SessionObserved) => Some(Self::Initiator(I::Active)),
            (Self::Initiator(I::Active), E::OutcomeRecorded) => {
                Some(Self::Initiator(I::Complete))
            }

            (Self::Joiner(J::Received), E::Review) => Some(Self::Joiner(J::Reviewing)),
            (Self::Joiner(J::Reviewing), E::StartJoin) => Some(Self::Joiner(J::Joining)),
            (Self::Joiner(J::Joining), E::JoinSucceeded) => Some(Self::Joiner(J::Active)),
            (Self::Joiner(J::Joining), E::JoinFailed) => Some(Self::Joiner(J::Reviewing)),
            (Self::Joiner(J::Received | J::Reviewing | J::Joining), E::Cancel) => {
                Some(Self::Joiner(J::Cancelled))
            }
            (Self::Joiner(J::Active), E::OutcomeRecorded) => Some(Self::Joiner(J::Complete)),

            _ => None,
        };

        next.ok_or_else(|| HandshakeError::InvalidTransition {
            from: self.name().to_string(),
            event: event.name().to_string(),
        })
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role() {
            Role::Initiator => "initiator",
            Role::Joiner => "joiner",
        };
        write!(f, "{role}/{}", self.name())
    }
}

impl PollingState for LifecycleState {
    fn awaits_ledger(&self) -> bool {
        matches!(
            self,
            Self::Initiator(InitiatorState::Shared | InitiatorState::Active)
                | Self::Joiner(JoinerState::Reviewing | JoinerState::Active)
        )
    }
}

/// Derive the state of a persisted invitation from durable facts only
///
/// The role comes from the persisted record itself.
pub fn resume(
    persisted: &PersistedInvitation,
    record: Option<&SessionRecord>,
    remaining: Duration,
) -> LifecycleState {
    match (persisted.role, record) {
        (Role::Initiator, Some(record)) if record.is_complete() => {
            LifecycleState::Initiator(InitiatorState::Complete)
        }
        (Role::Joiner, Some(record)) if record.is_complete() => {
            LifecycleState::Joiner(JoinerState::Complete)
        }
        (Role::Initiator, Some(_)) => LifecycleState::Initiator(InitiatorState::Active),
        (Role::Joiner, Some(_)) => LifecycleState::Joiner(JoinerState::Active),
        (Role::Joiner, None) if persisted.cancelled => {
            LifecycleState::Joiner(JoinerState::Cancelled)
        }
        (Role::Initiator, None) if remaining.is_zero() => {
            LifecycleState::Initiator(InitiatorState::Expired)
        }
        (Role::Joiner, None) if remaining.is_zero() => {
            LifecycleState::Joiner(JoinerState::Expired)
        }
        (Role::Initiator, None) => LifecycleState::Initiator(InitiatorState::Shared),
        (Role::Joiner, None) => LifecycleState::Joiner(JoinerState::Reviewing),
    }
}

/// A persisted invitation reconciled against the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedInvitation {
    /// Decoded invitation
    pub invitation: Invitation,
    /// Durable record it came from
    pub persisted: PersistedInvitation,
    /// Ledger session record, when the session exists
    pub record: Option<SessionRecord>,
    /// Remaining validity at reconciliation time
    pub remaining: Duration,
    /// Derived state
    pub state: LifecycleState,
}

/// Persists invitations and reconciles them on restart
#[derive(Clone)]
pub struct InvitationLifecycle {
    ctx: Arc<HandshakeContext>,
    store: Arc<dyn InvitationStore>,
}

impl fmt::Debug for InvitationLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvitationLifecycle")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl InvitationLifecycle {
    /// Lifecycle over `ctx`, persisting into `store`
    pub fn new(ctx: Arc<HandshakeContext>, store: Arc<dyn InvitationStore>) -> Self {
        Self { ctx, store }
    }

    /// Record an invitation the local participant created and shared
    pub async fn persist_initiator(&self, invitation: &Invitation) -> Result<PersistedInvitation> {
        let record = PersistedInvitation::new(
            invitation.session_id,
            invitation.initiator.clone(),
            Role::Initiator,
            invitation.to_token()?,
        );
        self.store.upsert(record.clone()).await?;
        Ok(record)
    }

    /// Record an invitation the local participant received
    pub async fn persist_joiner(
        &self,
        invitation: &Invitation,
        joiner: &Address,
        joiner_wager: Option<Wager>,
    ) -> Result<PersistedInvitation> {
        let mut record = match self.store.load(invitation.session_id, joiner).await? {
            Some(existing) => existing,
            None => PersistedInvitation::new(
                invitation.session_id,
                joiner.clone(),
                Role::Joiner,
                invitation.to_token()?,
            ),
        };
        if joiner_wager.is_some() {
            record.joiner_wager = joiner_wager;
        }
        self.store.upsert(record.clone()).await?;
        Ok(record)
    }

    /// Mark a received invitation as cancelled
    pub async fn cancel(&self, session_id: SessionId, joiner: &Address) -> Result<()> {
        let mut record = self
            .store
            .load(session_id, joiner)
            .await?
            .ok_or_else(|| {
                HandshakeError::storage(format!("no persisted invitation for session {session_id}"))
            })?;
        if record.role != Role::Joiner {
            return Err(HandshakeError::InvalidTransition {
                from: "initiator".to_string(),
                event: "cancel".to_string(),
            });
        }
        record.cancelled = true;
        self.store.upsert(record).await?;
        tracing::info!(session_id, "invitation cancelled");
        Ok(())
    }

    /// Reconcile every invitation `participant` persisted.
    ///
    /// One batched session read covers all of them; records whose token no
    /// longer decodes are skipped with a warning.
    pub async fn resume_all(&self, participant: &Address) -> Result<Vec<ResumedInvitation>> {
        let persisted = self.store.list(participant).await?;
        if persisted.is_empty() {
            return Ok(Vec::new());
        }

        let mut decoded = Vec::with_capacity(persisted.len());
        for record in persisted {
            match Invitation::from_token(&record.auth_token, self.ctx.start_function()) {
                Ok(invitation) => decoded.push((invitation, record)),
                Err(e) => tracing::warn!(
                    session_id = record.session_id,
                    error = %e,
                    "skipping unreadable persisted invitation"
                ),
            }
        }

        let session_ids: Vec<SessionId> = decoded.iter().map(|(inv, _)| inv.session_id).collect();
        let mut records = self.ctx.read_sessions(&session_ids).await?;
        let current = self.ctx.fresh_sequence().await?;
        let tracker = self.ctx.tracker();

        let resumed: Vec<ResumedInvitation> = decoded
            .into_iter()
            .map(|(invitation, persisted)| {
                let record = records.remove(&invitation.session_id);
                let remaining = invitation.remaining(&tracker, current);
                let state = resume(&persisted, record.as_ref(), remaining);
                ResumedInvitation {
                    invitation,
                    persisted,
                    record,
                    remaining,
                    state,
                }
            })
            .collect();
        tracing::info!(
            participant = %participant.short(),
            count = resumed.len(),
            "resumed persisted invitations"
        );
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use duet_core::SessionOutcome;
    use duet_testkit::{initiator, joiner};

    fn persisted(role: Role, cancelled: bool) -> PersistedInvitation {
        let mut record = PersistedInvitation::new(1, initiator(), role, "t".into());
        record.cancelled = cancelled;
        record
    }

    fn record(outcome: Option<SessionOutcome>) -> SessionRecord {
        SessionRecord {
            session_id: 1,
            player1: initiator(),
            player2: joiner(),
            player1_wager: 10,
            player2_wager: 5,
            outcome,
        }
    }

    #[test]
    fn test_initiator_happy_path() {
        let mut state = LifecycleState::initial(Role::Initiator);
        for event in [
            LifecycleEvent::RequestSignature,
            LifecycleEvent::Signed,
            LifecycleEvent::SessionObserved,
            LifecycleEvent::OutcomeRecorded,
        ] {
            state = state.transition(&event).unwrap();
        }
        assert_eq!(state, LifecycleState::Initiator(InitiatorState::Complete));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_decline_returns_to_created() {
        let state = LifecycleState::Initiator(InitiatorState::AwaitingSignature)
            .transition(&LifecycleEvent::SignatureDeclined)
            .unwrap();
        assert_eq!(state, LifecycleState::Initiator(InitiatorState::Created));
    }

    #[test]
    fn test_joiner_failure_and_cancel() {
        let joining = LifecycleState::Joiner(JoinerState::Joining);
        assert_eq!(
            joining.transition(&LifecycleEvent::JoinFailed).unwrap(),
            LifecycleState::Joiner(JoinerState::Reviewing)
        );
        assert_eq!(
            joining.transition(&LifecycleEvent::Cancel).unwrap(),
            LifecycleState::Joiner(JoinerState::Cancelled)
        );
        assert_matches!(
            LifecycleState::Joiner(JoinerState::Active).transition(&LifecycleEvent::Cancel),
            Err(HandshakeError::InvalidTransition { .. })
        );
    }

    #[test]
    fn test_shared_only_activates_on_observation() {
        let shared = LifecycleState::Initiator(InitiatorState::Shared);
        assert_matches!(
            shared.transition(&LifecycleEvent::JoinSucceeded),
            Err(HandshakeError::InvalidTransition { .. })
        );
        assert_matches!(
            LifecycleState::Joiner(JoinerState::Reviewing)
                .transition(&LifecycleEvent::SessionObserved),
            Err(HandshakeError::InvalidTransition { .. })
        );
    }

    #[test]
    fn test_expiry_guard() {
        let shared = LifecycleState::Initiator(InitiatorState::Shared);
        let expire = |secs, session_exists| LifecycleEvent::Expire {
            remaining: Duration::from_secs(secs),
            session_exists,
        };
        assert_eq!(
            shared.transition(&expire(0, false)).unwrap(),
            LifecycleState::Initiator(InitiatorState::Expired)
        );
        assert!(shared.transition(&expire(5, false)).is_err());
        assert!(shared.transition(&expire(0, true)).is_err());
        assert!(LifecycleState::Joiner(JoinerState::Complete)
            .transition(&expire(0, false))
            .is_err());
    }

    #[test]
    fn test_resume_precedence() {
        let live = Duration::from_secs(60);
        assert_eq!(
            resume(&persisted(Role::Joiner, true), Some(&record(None)), live),
            LifecycleState::Joiner(JoinerState::Active)
        );
        assert_eq!(
            resume(
                &persisted(Role::Initiator, false),
                Some(&record(Some(SessionOutcome { winner: None }))),
                Duration::ZERO
            ),
            LifecycleState::Initiator(InitiatorState::Complete)
        );
        assert_eq!(
            resume(&persisted(Role::Joiner, true), None, Duration::ZERO),
            LifecycleState::Joiner(JoinerState::Cancelled)
        );
        assert_eq!(
            resume(&persisted(Role::Initiator, false), None, Duration::ZERO),
            LifecycleState::Initiator(InitiatorState::Expired)
        );
        assert_eq!(
            resume(&persisted(Role::Initiator, false), None, live),
            LifecycleState::Initiator(InitiatorState::Shared)
        );
        assert_eq!(
            resume(&persisted(Role::Joiner, false), None, live),
            LifecycleState::Joiner(JoinerState::Reviewing)
        );
    }

    #[test]
    fn test_resume_role_follows_persisted_record() {
        let live = Duration::from_secs(60);
        for role in [Role::Initiator, Role::Joiner] {
            let state = resume(&persisted(role, false), Some(&record(None)), live);
            assert_eq!(state.role(), role);
            assert!(state.is_active());
        }
    }

    #[test]
    fn test_polling_states() {
        assert!(LifecycleState::Initiator(InitiatorState::Shared).awaits_ledger());
        assert!(LifecycleState::Joiner(JoinerState::Reviewing).awaits_ledger());
        assert!(LifecycleState::Joiner(JoinerState::Active).awaits_ledger());
        assert!(!LifecycleState::Joiner(JoinerState::Joining).awaits_ledger());
        assert!(!LifecycleState::Initiator(InitiatorState::Expired).awaits_ledger());
        assert_eq!(LifecycleState::Joiner(JoinerState::Joining).to_string(), "joiner/joining");
    }
}
