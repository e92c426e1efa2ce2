//! Restart reconciliation
//!
//! Invitations persisted to a file store are resumed into the right state
//! with a single batched ledger read.

use duet_handshake::{
    Collaborators, FileInvitationStore, HandshakeContext, InitiatorState, InvitationBuilder,
    InvitationLifecycle, InvitationStore, JoinerState, LifecycleState, ParticipantJoiner,
};
use duet_testkit::{initiator, joiner, test_config, FakeLedger, FakeSigner};
use std::sync::Arc;
use std::time::Duration;

fn context(ledger: &FakeLedger) -> Arc<HandshakeContext> {
    Arc::new(
        HandshakeContext::new(
            test_config(),
            Collaborators {
                ledger: Arc::new(ledger.clone()),
                simulator: Arc::new(ledger.clone()),
                signer: Arc::new(FakeSigner::new()),
                submitter: Arc::new(ledger.clone()),
            },
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn resume_all_reconciles_each_invitation() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("invitations.json");
    let ledger = FakeLedger::new(&test_config());
    let ctx = context(&ledger);
    let builder = InvitationBuilder::new(ctx.clone());

    let store: Arc<dyn InvitationStore> = Arc::new(FileInvitationStore::new(&store_path));
    let lifecycle = InvitationLifecycle::new(ctx.clone(), store.clone());

    // 1: joined, 2: still open, 3: joined and finished
    for session_id in [1, 2, 3] {
        let invitation = builder.prepare(session_id, &initiator(), 100).await.unwrap();
        lifecycle.persist_initiator(&invitation).await.unwrap();
        if session_id != 2 {
            ParticipantJoiner::new(ctx.clone())
                .join(&invitation, &joiner(), 40)
                .await
                .unwrap();
        }
    }
    ledger.record_outcome(3, Some(joiner()));

    // A fresh process over the same file.
    let restarted = InvitationLifecycle::new(
        context(&ledger),
        Arc::new(FileInvitationStore::new(&store_path)),
    );
    let reads = ledger.calls().get_entries;
    let resumed = restarted.resume_all(&initiator()).await.unwrap();
    assert_eq!(ledger.calls().get_entries, reads + 1);

    let states: Vec<_> = resumed.iter().map(|r| (r.invitation.session_id, r.state)).collect();
    assert_eq!(
        states,
        vec![
            (1, LifecycleState::Initiator(InitiatorState::Active)),
            (2, LifecycleState::Initiator(InitiatorState::Shared)),
            (3, LifecycleState::Initiator(InitiatorState::Complete)),
        ]
    );
    assert!(resumed[1].remaining > Duration::ZERO);
    assert!(resumed[1].record.is_none());

    // Validity runs out for the open one.
    ledger.advance_sequence(10_000);
    let resumed = restarted.resume_all(&initiator()).await.unwrap();
    assert_eq!(
        resumed[1].state,
        LifecycleState::Initiator(InitiatorState::Expired)
    );
    assert_eq!(
        resumed[0].state,
        LifecycleState::Initiator(InitiatorState::Active)
    );
}

#[tokio::test]
async fn joiner_side_cancel_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("invitations.json");
    let ledger = FakeLedger::new(&test_config());
    let ctx = context(&ledger);
    let invitation = InvitationBuilder::new(ctx.clone())
        .prepare(9, &initiator(), 100)
        .await
        .unwrap();

    let lifecycle = InvitationLifecycle::new(
        ctx.clone(),
        Arc::new(FileInvitationStore::new(&store_path)),
    );
    let record = lifecycle
        .persist_joiner(&invitation, &joiner(), Some(25))
        .await
        .unwrap();
    assert_eq!(record.joiner_wager, Some(25));

    let resumed = lifecycle.resume_all(&joiner()).await.unwrap();
    assert_eq!(resumed[0].state, LifecycleState::Joiner(JoinerState::Reviewing));

    lifecycle.cancel(9, &joiner()).await.unwrap();
    let restarted = InvitationLifecycle::new(ctx, Arc::new(FileInvitationStore::new(&store_path)));
    let resumed = restarted.resume_all(&joiner()).await.unwrap();
    assert_eq!(resumed[0].state, LifecycleState::Joiner(JoinerState::Cancelled));
    assert_eq!(resumed[0].persisted.joiner_wager, Some(25));

    // Initiator's view is unaffected by the joiner's record.
    assert!(restarted.resume_all(&initiator()).await.unwrap().is_empty());
}

#[tokio::test]
async fn nothing_persisted_means_no_ledger_reads() {
    let ledger = FakeLedger::new(&test_config());
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = InvitationLifecycle::new(
        context(&ledger),
        Arc::new(FileInvitationStore::new(dir.path().join("empty.json"))),
    );
    assert!(lifecycle.resume_all(&initiator()).await.unwrap().is_empty());
    assert_eq!(ledger.calls().total(), 0);
}
