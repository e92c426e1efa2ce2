//! Duet Handshake
//!
//! Coordinator-free two-party session creation. The initiator prepares and
//! signs a partial authorization for a transaction whose second party is not
//! yet known, and shares it as a link. The joiner later rebuilds the full
//! transaction, substitutes the pre-signed entry byte-for-byte, signs its own
//! entry and submits. The ledger is the only arbiter.
//!
//! # Architecture
//!
//! - [`context`] - explicit context: config, collaborators, request cache
//! - [`builder`] - initiator side, placeholder-aware entry selection
//! - [`joiner`] - joiner side, idempotent join with race and timeout handling
//! - [`invitation`] / [`link`] - portable invitations and shareable links
//! - [`lifecycle`] / [`watcher`] - per-role state machines, resume, polling
//! - [`store`] - durable client-side invitation records

#![forbid(unsafe_code)]

pub mod builder;
pub mod context;
pub mod invitation;
pub mod joiner;
pub mod lifecycle;
pub mod link;
pub mod store;
pub mod watcher;

pub use builder::{select_initiator_entry, InvitationBuilder};
pub use context::{Collaborators, HandshakeContext};
pub use invitation::Invitation;
pub use joiner::{JoinOutcome, ParticipantJoiner};
pub use lifecycle::{
    resume, InitiatorState, InvitationLifecycle, JoinerState, LifecycleEvent, LifecycleState,
    ResumedInvitation, Role,
};
pub use link::InvitationLink;
pub use store::{FileInvitationStore, InvitationStore, MemoryInvitationStore, PersistedInvitation};
pub use watcher::{LifecycleWatcher, WatchSnapshot};
