//! Handshake error model
//!
//! A single error enum shared by every component of the handshake. Errors are
//! `Clone` because a deduplicated read hands the identical outcome to every
//! attached caller.
//!
//! Low-level detail (codec failures, simulation diagnostics) stays in the
//! `Display` output for logs; the text shown to a person always comes from
//! [`HandshakeError::user_message`], which maps onto a small fixed set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Errors raised while preparing, joining or tracking a session handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum HandshakeError {
    /// Draft build or simulation failed before anything was signed
    #[error("Build failed: {message}")]
    Build {
        /// Simulation or validation diagnostic
        message: String,
    },

    /// The required entry set did not contain exactly one matching entry
    #[error("Ambiguous authorization entry: {message}")]
    AmbiguousEntry {
        /// Which match failed and how many candidates were found
        message: String,
    },

    /// The entry authorizes a function other than the session-start call
    #[error("Unsupported invocation: expected `{expected}`, found `{found}`")]
    UnsupportedInvocation {
        /// Configured session-start function name
        expected: String,
        /// Function name carried by the entry
        found: String,
    },

    /// The human operator declined a signature request
    #[error("Signing declined: {message}")]
    SigningDeclined {
        /// Signer-provided reason
        message: String,
    },

    /// The joiner tried to join their own invitation
    #[error("Self-play is not allowed for address {address}")]
    SelfPlay {
        /// Address used on both sides
        address: String,
    },

    /// The invitation's validity bound is behind the current ledger sequence
    #[error("Invitation expired at sequence {expiration_bound} (current {current_sequence})")]
    ExpiredInvitation {
        /// Exclusive validity bound of the signed entry
        expiration_bound: u32,
        /// Ledger sequence observed when the check failed
        current_sequence: u32,
    },

    /// Another submission created the session first
    #[error("Session {session_id} was already created by another submission")]
    SessionTaken {
        /// The contested session
        session_id: u32,
    },

    /// A token or link could not be decoded
    #[error("Decode error: {message}")]
    Decode {
        /// Parser diagnostic
        message: String,
    },

    /// A bounded wait elapsed; the underlying operation may still have succeeded
    #[error("{operation} timed out after {timeout_ms}ms; outcome is unknown")]
    Timeout {
        /// Operation that was waited on
        operation: String,
        /// Configured bound
        timeout_ms: u64,
    },

    /// Transport failure talking to a collaborator
    #[error("Network error: {message}")]
    Network {
        /// Transport diagnostic
        message: String,
    },

    /// The ledger rejected the submission for a reason without a dedicated variant
    #[error("Submission rejected: {message}")]
    Rejected {
        /// Ledger diagnostic
        message: String,
    },

    /// The operation was cancelled by its caller or by a cache clear
    #[error("Operation cancelled")]
    Cancelled,

    /// The lifecycle state machine refused an event
    #[error("Invalid lifecycle transition from {from} on {event}")]
    InvalidTransition {
        /// State name at the time of the event
        from: String,
        /// Event name
        event: String,
    },

    /// Persisted invitation store failure
    #[error("Storage error: {message}")]
    Storage {
        /// Store diagnostic
        message: String,
    },

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    Config {
        /// Configuration diagnostic
        message: String,
    },

    /// Unexpected internal condition
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic
        message: String,
    },
}

impl HandshakeError {
    /// Create a build error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Create an ambiguous entry error
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::AmbiguousEntry {
            message: message.into(),
        }
    }

    /// Create an unsupported invocation error
    pub fn unsupported_invocation(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::UnsupportedInvocation {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a signing declined error
    pub fn signing_declined(message: impl Into<String>) -> Self {
        Self::SigningDeclined {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// How the caller is expected to recover from this error
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Build { .. } | Self::Rejected { .. } => Recovery::RetryWithAdjustedInputs,
            Self::AmbiguousEntry { .. }
            | Self::UnsupportedInvocation { .. }
            | Self::InvalidTransition { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => Recovery::Fatal,
            Self::SigningDeclined { .. } | Self::Cancelled => Recovery::Reprompt,
            Self::SelfPlay { .. } => Recovery::RejectInput,
            Self::ExpiredInvitation { .. } => Recovery::IssueNewInvitation,
            Self::SessionTaken { .. } => Recovery::LoadExisting,
            Self::Decode { .. } => Recovery::ShowInvalidLink,
            Self::Timeout { .. } | Self::Network { .. } | Self::Storage { .. } => {
                Recovery::RequeryState
            }
        }
    }

    /// True when a fresh idempotency read must precede any retry
    pub fn requires_requery(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }

    /// True when the error indicates a logic defect rather than a user or network condition
    pub fn is_fatal(&self) -> bool {
        self.recovery() == Recovery::Fatal
    }

    /// Fixed, user-actionable message for this error
    pub fn user_message(&self) -> &'static str {
        self.recovery().user_message()
    }
}

/// Recovery action associated with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recovery {
    /// Retry after adjusting inputs (e.g. a different wager)
    RetryWithAdjustedInputs,
    /// Not retryable; indicates a defect
    Fatal,
    /// Ask the operator to sign again
    Reprompt,
    /// Reject the input before any network call
    RejectInput,
    /// The initiator must issue a new invitation
    IssueNewInvitation,
    /// Switch to loading the existing session
    LoadExisting,
    /// Show an "invalid invite link" message
    ShowInvalidLink,
    /// Re-query the actual session state before offering a retry
    RequeryState,
}

impl Recovery {
    /// Fixed message shown to a person for this recovery path
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RetryWithAdjustedInputs => {
                "Could not prepare the transaction. Adjust the wager and try again."
            }
            Self::Fatal => "Something went wrong preparing this session.",
            Self::Reprompt => "The signature request was not completed. Try again.",
            Self::RejectInput => "You cannot join your own invitation.",
            Self::IssueNewInvitation => "This invitation has expired. Ask for a new one.",
            Self::LoadExisting => "This session has already started. Loading it now.",
            Self::ShowInvalidLink => "This invite link is invalid.",
            Self::RequeryState => "Still confirming with the network. Checking session status.",
        }
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RetryWithAdjustedInputs => "retry-with-adjusted-inputs",
            Self::Fatal => "fatal",
            Self::Reprompt => "reprompt",
            Self::RejectInput => "reject-input",
            Self::IssueNewInvitation => "issue-new-invitation",
            Self::LoadExisting => "load-existing",
            Self::ShowInvalidLink => "invalid-link",
            Self::RequeryState => "requery-state",
        };
        f.write_str(label)
    }
}

/// Standard Result type for handshake operations
pub type Result<T> = std::result::Result<T, HandshakeError>;

impl From<serde_json::Error> for HandshakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_keeps_detail() {
        let err = HandshakeError::decode("bad base64 at offset 3");
        assert_eq!(err.to_string(), "Decode error: bad base64 at offset 3");
        assert_eq!(err.user_message(), "This invite link is invalid.");
    }

    #[test]
    fn test_recovery_classification() {
        assert_eq!(
            HandshakeError::build("sim").recovery(),
            Recovery::RetryWithAdjustedInputs
        );
        assert!(HandshakeError::ambiguous("2 candidates").is_fatal());
        assert!(HandshakeError::unsupported_invocation("start_game", "end_game").is_fatal());
        assert_eq!(
            HandshakeError::SessionTaken { session_id: 1 }.recovery(),
            Recovery::LoadExisting
        );
        assert_eq!(
            HandshakeError::SelfPlay {
                address: "G".into()
            }
            .recovery(),
            Recovery::RejectInput
        );
    }

    #[test]
    fn test_timeout_requires_requery() {
        let err = HandshakeError::timeout("submit", Duration::from_secs(30));
        assert!(err.requires_requery());
        assert_eq!(
            err,
            HandshakeError::Timeout {
                operation: "submit".into(),
                timeout_ms: 30_000
            }
        );
        assert!(!HandshakeError::Cancelled.requires_requery());
    }
}
