//! Partial authorization entries
//!
//! An [`AuthorizationSubEntry`] is one party's authorization of a specific
//! argument set of the shared contract call. Simulation creates it as an
//! unsigned stub; signing consumes the stub once and produces the immutable
//! signed form that travels inside an invitation.
//!
//! Uniqueness is defined over `(authorizing address, argument tuple)`: during
//! the initiator's simulation the same address legitimately appears twice with
//! different wagers (see the builder's placeholder substitution).

use crate::types::{Address, ArgumentTuple, SequenceNumber};
use serde::{Deserialize, Serialize};

/// Contract function an entry authorizes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvokedFunction {
    /// Contract being invoked
    pub contract: Address,
    /// Function name on that contract
    pub function_name: String,
}

/// Invocation tree root recorded by simulation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizedInvocation {
    /// Function being authorized
    pub function: InvokedFunction,
    /// Arguments the authorizer commits to
    pub args: ArgumentTuple,
}

/// Address-bound credentials
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressCredentials {
    /// Address whose signature is required
    pub address: Address,
    /// Replay-protection nonce assigned by simulation
    pub nonce: i64,
    /// First ledger sequence at which the signature is no longer accepted
    pub expiration_bound: SequenceNumber,
    /// Signature bytes; `None` while the entry is an unsigned stub
    pub signature: Option<Vec<u8>>,
}

/// How an entry is authorized
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Credentials {
    /// Covered by the transaction source's envelope signature
    SourceAccount,
    /// Requires a detached signature from `address`
    Address(AddressCredentials),
}

/// Discriminant of [`Credentials`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Source-account credentials
    SourceAccount,
    /// Address credentials
    Address,
}

/// One partial authorization entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationSubEntry {
    /// Who authorizes and with what signature
    pub credentials: Credentials,
    /// What is authorized
    pub root_invocation: AuthorizedInvocation,
}

impl AuthorizationSubEntry {
    /// Unsigned address-bound stub, as produced by simulation
    pub fn stub(address: Address, nonce: i64, invocation: AuthorizedInvocation) -> Self {
        Self {
            credentials: Credentials::Address(AddressCredentials {
                address,
                nonce,
                expiration_bound: 0,
                signature: None,
            }),
            root_invocation: invocation,
        }
    }

    /// Authorizing address, `None` for source-account credentials
    pub fn authorizing_address(&self) -> Option<&Address> {
        match &self.credentials {
            Credentials::Address(creds) => Some(&creds.address),
            Credentials::SourceAccount => None,
        }
    }

    /// Function this entry authorizes
    pub fn invoked_function(&self) -> &InvokedFunction {
        &self.root_invocation.function
    }

    /// Arguments this entry commits to
    pub fn argument_tuple(&self) -> &ArgumentTuple {
        &self.root_invocation.args
    }

    /// Credential discriminant
    pub fn credential_kind(&self) -> CredentialKind {
        match self.credentials {
            Credentials::SourceAccount => CredentialKind::SourceAccount,
            Credentials::Address(_) => CredentialKind::Address,
        }
    }

    /// Validity bound of the signature (address credentials only)
    pub fn expiration_bound(&self) -> Option<SequenceNumber> {
        match &self.credentials {
            Credentials::Address(creds) => Some(creds.expiration_bound),
            Credentials::SourceAccount => None,
        }
    }

    /// Signature bytes, if signed
    pub fn signature(&self) -> Option<&[u8]> {
        match &self.credentials {
            Credentials::Address(creds) => creds.signature.as_deref(),
            Credentials::SourceAccount => None,
        }
    }

    /// True once a signature is attached
    pub fn is_signed(&self) -> bool {
        self.signature().is_some()
    }

    /// True for address credentials still waiting for a signature
    pub fn is_stub(&self) -> bool {
        matches!(&self.credentials, Credentials::Address(creds) if creds.signature.is_none())
    }

    /// Uniqueness key `(address, argument tuple)`
    pub fn match_key(&self) -> Option<(&Address, &ArgumentTuple)> {
        self.authorizing_address()
            .map(|address| (address, &self.root_invocation.args))
    }

    /// Copy of this stub with its validity bound stamped, ready to be signed
    pub fn with_expiration_bound(&self, bound: SequenceNumber) -> Self {
        let mut entry = self.clone();
        if let Credentials::Address(creds) = &mut entry.credentials {
            creds.expiration_bound = bound;
        }
        entry
    }

    /// True when `other` authorizes the same address and invocation.
    ///
    /// Nonce, bound and signature are ignored; used to check that a signer
    /// returned the entry it was asked to sign.
    pub fn same_authorization(&self, other: &Self) -> bool {
        self.authorizing_address() == other.authorizing_address()
            && self.root_invocation == other.root_invocation
    }
}
