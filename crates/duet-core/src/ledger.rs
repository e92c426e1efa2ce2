//! Ledger-side records: session state, point-lookup keys, simulation and
//! submission results.

use crate::entry::AuthorizationSubEntry;
use crate::types::{Address, SequenceNumber, SessionId, Wager};
use serde::{Deserialize, Serialize};

/// Outcome written by the contract when a session finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Winning address; `None` for a draw
    pub winner: Option<Address>,
}

/// Authoritative session state, created once by the ledger.
///
/// Only ever read by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier
    pub session_id: SessionId,
    /// Initiating party
    pub player1: Address,
    /// Joining party
    pub player2: Address,
    /// Initiator's wager
    pub player1_wager: Wager,
    /// Joiner's wager
    pub player2_wager: Wager,
    /// Present once the session outcome has been recorded
    pub outcome: Option<SessionOutcome>,
}

impl SessionRecord {
    /// True once the contract recorded an outcome
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Key of a typed state record on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerKey {
    /// Session record stored by `contract`
    Session {
        /// Owning contract
        contract: Address,
        /// Session identifier
        session_id: SessionId,
    },
}

/// A state record returned by a point lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntry {
    /// A session record
    Session {
        /// Owning contract
        contract: Address,
        /// The record
        record: SessionRecord,
    },
}

impl LedgerEntry {
    /// The key this entry is stored under
    pub fn key(&self) -> LedgerKey {
        match self {
            Self::Session { contract, record } => LedgerKey::Session {
                contract: contract.clone(),
                session_id: record.session_id,
            },
        }
    }

    /// The session record, if this is a session entry
    pub fn as_session(&self) -> Option<&SessionRecord> {
        match self {
            Self::Session { record, .. } => Some(record),
        }
    }
}

/// Find the entry stored under `key`.
///
/// Lookups return entries in arbitrary order and omit absent keys, so results
/// are matched by key content, never by position.
pub fn find_entry<'a>(entries: &'a [LedgerEntry], key: &LedgerKey) -> Option<&'a LedgerEntry> {
    entries.iter().find(|entry| &entry.key() == key)
}

/// Result of simulating a draft transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Required partial authorization entries (unsigned stubs)
    pub auth: Vec<AuthorizationSubEntry>,
    /// Latest ledger sequence at simulation time
    pub latest_sequence: SequenceNumber,
    /// Minimum resource fee reported by the simulation
    pub min_resource_fee: u32,
}

/// Why the ledger refused a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The session already exists (lost a creation race)
    SessionExists,
    /// A partial authorization's validity bound has passed
    AuthExpired,
    /// A signature did not verify
    InvalidSignature,
    /// Anything else
    Other(String),
}

/// Submission status; eventually consistent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitStatus {
    /// Accepted but not yet applied
    Pending,
    /// Applied
    Success,
    /// Rejected
    Failed(RejectReason),
}

/// Response from the submitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Transaction hash (hex)
    pub hash: String,
    /// Status at response time
    pub status: SubmitStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(fill: char) -> Address {
        Address::parse(&format!("G{}", fill.to_string().repeat(55))).unwrap()
    }

    fn contract() -> Address {
        Address::parse(&format!("C{}", "A".repeat(55))).unwrap()
    }

    fn session(id: SessionId) -> LedgerEntry {
        LedgerEntry::Session {
            contract: contract(),
            record: SessionRecord {
                session_id: id,
                player1: addr('B'),
                player2: addr('C'),
                player1_wager: 10,
                player2_wager: 20,
                outcome: None,
            },
        }
    }

    #[test]
    fn test_find_entry_matches_by_key_not_position() {
        let entries = vec![session(9), session(3), session(42)];
        let key = LedgerKey::Session {
            contract: contract(),
            session_id: 42,
        };
        let found = find_entry(&entries, &key).and_then(LedgerEntry::as_session);
        assert_eq!(found.map(|r| r.session_id), Some(42));
    }

    #[test]
    fn test_find_entry_absent_is_none() {
        let entries = vec![session(1)];
        let key = LedgerKey::Session {
            contract: contract(),
            session_id: 2,
        };
        assert!(find_entry(&entries, &key).is_none());
        assert!(find_entry(&[], &key).is_none());
    }
}
