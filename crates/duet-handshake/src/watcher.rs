//! Background lifecycle polling
//!
//! A watcher owns the current [`LifecycleState`] of one invitation and polls
//! the ledger on a coarse interval while that state waits on the ledger:
//! `session_interval` in `Shared` and `Active`, `expiration_interval` in
//! `Reviewing`. Only `Shared` and `Reviewing` read the ledger sequence for
//! expiry; `Active` reads the session record alone. In other non-terminal
//! states it sleeps until the caller applies an event. It stops on a terminal
//! state or on cancellation.

use crate::context::HandshakeContext;
use crate::invitation::Invitation;
use crate::lifecycle::{InitiatorState, LifecycleEvent, LifecycleState};
use duet_core::{cancel_pair, CancelHandle, CancelSignal, HandshakeError, Result, SessionRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Latest view published by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSnapshot {
    /// Current state
    pub state: LifecycleState,
    /// Remaining validity; `None` until the first observation
    pub remaining: Option<Duration>,
    /// Latest session record seen
    pub record: Option<SessionRecord>,
}

/// Handle to a running lifecycle watcher; dropping it stops the task
#[derive(Debug)]
pub struct LifecycleWatcher {
    snapshot: Arc<watch::Sender<WatchSnapshot>>,
    cancel: CancelHandle,
    task: Option<JoinHandle<()>>,
}

impl LifecycleWatcher {
    /// Start watching `invitation` from `initial`
    pub fn spawn(
        ctx: Arc<HandshakeContext>,
        invitation: Invitation,
        initial: LifecycleState,
    ) -> Self {
        let (tx, _) = watch::channel(WatchSnapshot {
            state: initial,
            remaining: None,
            record: None,
        });
        let snapshot = Arc::new(tx);
        let (cancel, signal) = cancel_pair();
        tracing::debug!(
            session_id = invitation.session_id,
            state = %initial,
            "starting lifecycle watcher"
        );
        let task = tokio::spawn(run(ctx, invitation, snapshot.clone(), signal));
        Self {
            snapshot,
            cancel,
            task: Some(task),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> WatchSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<WatchSnapshot> {
        self.snapshot.subscribe()
    }

    /// Apply a caller-side event (review, join, cancel, ...)
    pub fn apply(&self, event: &LifecycleEvent) -> Result<LifecycleState> {
        let mut result = Err(HandshakeError::internal("watcher state unavailable"));
        self.snapshot.send_if_modified(|snapshot| match snapshot.state.transition(event) {
            Ok(next) => {
                snapshot.state = next;
                result = Ok(next);
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Ask the task to stop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to finish and return the final snapshot
    pub async fn join(mut self) -> Result<WatchSnapshot> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| HandshakeError::internal(format!("lifecycle watcher failed: {e}")))?;
        }
        Ok(self.snapshot())
    }
}

impl Drop for LifecycleWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn poll_interval(ctx: &HandshakeContext, state: &LifecycleState) -> Duration {
    match state {
        LifecycleState::Joiner(_) if !state.is_active() => ctx.config().poll.expiration_interval,
        _ => ctx.config().poll.session_interval,
    }
}

/// Events implied by one observation; illegal ones are dropped by the caller
fn observed_events(
    state: &LifecycleState,
    record: Option<&SessionRecord>,
    remaining: Option<Duration>,
) -> Vec<LifecycleEvent> {
    match record {
        Some(record) => {
            let mut events = Vec::with_capacity(2);
            if matches!(state, LifecycleState::Initiator(InitiatorState::Shared)) {
                events.push(LifecycleEvent::SessionObserved);
            }
            if record.is_complete() {
                events.push(LifecycleEvent::OutcomeRecorded);
            }
            events
        }
        None => remaining
            .map(|remaining| LifecycleEvent::Expire {
                remaining,
                session_exists: false,
            })
            .into_iter()
            .collect(),
    }
}

/// One ledger observation; the sequence is skipped once a session exists
async fn observe(
    ctx: &HandshakeContext,
    invitation: &Invitation,
    state: &LifecycleState,
) -> Result<(Option<SessionRecord>, Option<Duration>)> {
    let remaining = if state.is_active() {
        None
    } else {
        let current = ctx.cached_sequence().await?;
        Some(invitation.remaining(&ctx.tracker(), current))
    };
    let record = ctx.read_session(invitation.session_id).await?;
    Ok((record, remaining))
}

async fn run(
    ctx: Arc<HandshakeContext>,
    invitation: Invitation,
    snapshot: Arc<watch::Sender<WatchSnapshot>>,
    mut signal: CancelSignal,
) {
    let session_id = invitation.session_id;
    let mut changes = snapshot.subscribe();
    let tracker = ctx.tracker();

    loop {
        let state = changes.borrow_and_update().state;
        if state.is_terminal() {
            break;
        }
        if !tracker.should_poll(&state) {
            tokio::select! {
                _ = signal.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        match observe(&ctx, &invitation, &state).await {
            Ok((record, remaining)) => {
                let mut next = state;
                for event in observed_events(&state, record.as_ref(), remaining) {
                    if let Ok(moved) = next.transition(&event) {
                        next = moved;
                    }
                }
                if next != state {
                    tracing::info!(session_id, from = %state, to = %next, "lifecycle advanced");
                }
                snapshot.send_modify(|current| {
                    if remaining.is_some() {
                        current.remaining = remaining;
                    }
                    current.record = record;
                    if current.state == state {
                        current.state = next;
                    }
                });
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "lifecycle observation failed");
            }
        }

        let latest = changes.borrow_and_update().state;
        if latest.is_terminal() {
            break;
        }
        let interval = poll_interval(&ctx, &latest);
        tokio::select! {
            _ = signal.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!(session_id, "lifecycle watcher stopped");
}
