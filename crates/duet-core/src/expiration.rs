//! Expiration tracking
//!
//! Converts a ledger-sequence validity bound into wall-clock remaining time.
//! Sequence arithmetic saturates so the remaining time never goes negative;
//! it is exactly zero once the current sequence reaches the bound.

use crate::types::SequenceNumber;
use std::time::Duration;

/// Remaining validity, in seconds, of a bound at `current_sequence`
pub fn remaining_seconds(
    expiration_bound: SequenceNumber,
    current_sequence: SequenceNumber,
    unit_seconds: u64,
) -> u64 {
    u64::from(expiration_bound.saturating_sub(current_sequence)).saturating_mul(unit_seconds)
}

/// Lifecycle states that may be waiting on the other party
pub trait PollingState {
    /// True while the state is waiting on the counterparty or the contract
    fn awaits_ledger(&self) -> bool;
}

/// Remaining-time calculator for one ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationTracker {
    ledger_close_seconds: u64,
}

impl ExpirationTracker {
    /// Tracker for a ledger that closes every `ledger_close_seconds`
    pub fn new(ledger_close_seconds: u64) -> Self {
        Self {
            ledger_close_seconds,
        }
    }

    /// Average ledger close time
    pub fn ledger_close_seconds(&self) -> u64 {
        self.ledger_close_seconds
    }

    /// `max(0, (bound - current) * unit)`
    pub fn remaining(
        &self,
        expiration_bound: SequenceNumber,
        current_sequence: SequenceNumber,
    ) -> Duration {
        Duration::from_secs(remaining_seconds(
            expiration_bound,
            current_sequence,
            self.ledger_close_seconds,
        ))
    }

    /// True once no validity remains
    pub fn is_expired(
        &self,
        expiration_bound: SequenceNumber,
        current_sequence: SequenceNumber,
    ) -> bool {
        current_sequence >= expiration_bound
    }

    /// Human-facing remaining time for a bound
    pub fn describe(
        &self,
        expiration_bound: SequenceNumber,
        current_sequence: SequenceNumber,
    ) -> String {
        format_remaining(self.remaining(expiration_bound, current_sequence))
    }

    /// Whether a state warrants periodic reads
    pub fn should_poll(&self, state: &impl PollingState) -> bool {
        state.awaits_ledger()
    }
}

/// Format remaining time as `"1h 02m"`, `"4m 05s"`, `"45s"` or `"expired"`
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    if secs == 0 {
        return "expired".to_string();
    }
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
