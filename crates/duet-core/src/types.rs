//! Primitive ledger types: addresses, amounts and typed contract arguments.

use crate::errors::{HandshakeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a wagered session on the shared contract
pub type SessionId = u32;

/// Wager amount in the smallest ledger unit
pub type Wager = i128;

/// Ledger sequence number
pub type SequenceNumber = u32;

/// Smallest valid wager; used to pin the placeholder leg during the initiator's simulation
pub const MINIMAL_UNIT: Wager = 1;

/// Length of an encoded strkey address
pub const ADDRESS_LEN: usize = 56;

/// Kind of ledger address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Externally owned account (`G…`)
    Account,
    /// Contract (`C…`)
    Contract,
}

/// A validated strkey address.
///
/// Only the textual shape is validated (prefix, length, base32 alphabet); the
/// checksum belongs to wallet tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != ADDRESS_LEN {
            return Err(HandshakeError::decode(format!(
                "address must be {ADDRESS_LEN} characters, got {}",
                value.len()
            )));
        }
        if !(value.starts_with('G') || value.starts_with('C')) {
            return Err(HandshakeError::decode(
                "address must start with 'G' (account) or 'C' (contract)",
            ));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
        {
            return Err(HandshakeError::decode(
                "address contains characters outside the base32 alphabet",
            ));
        }
        Ok(Self(value.to_string()))
    }

    /// Address kind derived from the prefix
    pub fn kind(&self) -> AddressKind {
        if self.0.starts_with('C') {
            AddressKind::Contract
        } else {
            AddressKind::Account
        }
    }

    /// Borrow the textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs (`GABC…WXYZ`)
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..4], &self.0[ADDRESS_LEN - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = HandshakeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Typed contract argument value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgValue {
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 128-bit integer (amounts)
    I128(i128),
    /// Ledger address
    Address(Address),
    /// Short symbol
    Symbol(String),
    /// Boolean
    Bool(bool),
    /// Opaque bytes
    Bytes(Vec<u8>),
}

impl ArgValue {
    /// The `u32` payload, if this is a `U32`
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// The `i128` payload, if this is an `I128`
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::I128(v) => Some(*v),
            _ => None,
        }
    }

    /// The address payload, if this is an `Address`
    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(a) => Some(a),
            _ => None,
        }
    }
}

/// Ordered, typed argument tuple of a contract call or authorized invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentTuple(pub Vec<ArgValue>);

impl ArgumentTuple {
    /// Build a tuple from values
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self(values)
    }

    /// Argument at `index`
    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.0.get(index)
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no arguments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the values
    pub fn iter(&self) -> impl Iterator<Item = &ArgValue> {
        self.0.iter()
    }
}

impl From<Vec<ArgValue>> for ArgumentTuple {
    fn from(values: Vec<ArgValue>) -> Self {
        Self(values)
    }
}
