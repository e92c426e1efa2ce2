//! Authorization entry codec
//!
//! Converts partial authorization entries and transactions to and from their
//! portable binary form. Entries are carried in invitation links as
//! URL-safe base64 (no padding) over `[version byte] ++ canonical bytes`.
//!
//! The canonical encoding is bincode with fixed-width integers and trailing
//! bytes rejected, so every value has exactly one byte representation. The
//! joiner substitutes a signed entry by identity, which depends on this:
//! `decode_entry(encode_entry(x)) == x` and, for any token produced here,
//! `encode_entry(decode_entry(t)) == t`.

use crate::entry::{AuthorizationSubEntry, AuthorizedInvocation, Credentials};
use crate::errors::{HandshakeError, Result};
use crate::transaction::{DraftTransaction, SignedEnvelope};
use crate::types::SequenceNumber;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Current token format version
pub const TOKEN_VERSION: u8 = 1;

/// Domain separator mixed into every signature preimage
const PREIMAGE_DOMAIN: &[u8] = b"duet/auth-entry/v1";

fn canonical() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn to_canonical_bytes<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    canonical()
        .serialize(value)
        .map_err(|e| HandshakeError::internal(format!("failed to encode {what}: {e}")))
}

fn from_canonical_bytes<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    canonical()
        .deserialize(bytes)
        .map_err(|e| HandshakeError::decode(format!("malformed {what}: {e}")))
}

/// Encode an entry into a URL-safe token
pub fn encode_entry(entry: &AuthorizationSubEntry) -> Result<String> {
    let mut bytes = Vec::with_capacity(128);
    bytes.push(TOKEN_VERSION);
    bytes.extend(to_canonical_bytes(entry, "authorization entry")?);
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode a token produced by [`encode_entry`].
///
/// Fails with `Decode` on malformed input, an unknown version, or
/// source-account credentials (only address-bound entries can travel).
pub fn decode_entry(token: &str) -> Result<AuthorizationSubEntry> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| HandshakeError::decode(format!("invalid base64 token: {e}")))?;

    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| HandshakeError::decode("empty token"))?;
    if *version != TOKEN_VERSION {
        return Err(HandshakeError::decode(format!(
            "unsupported token version {version}"
        )));
    }

    let entry: AuthorizationSubEntry = from_canonical_bytes(body, "authorization entry")?;
    if matches!(entry.credentials, Credentials::SourceAccount) {
        return Err(HandshakeError::decode(
            "token carries source-account credentials, expected an address-bound entry",
        ));
    }
    Ok(entry)
}

/// Check that `entry` authorizes `expected_function` and return its invocation
pub fn extract_invocation<'a>(
    entry: &'a AuthorizationSubEntry,
    expected_function: &str,
) -> Result<&'a AuthorizedInvocation> {
    let found = &entry.invoked_function().function_name;
    if found != expected_function {
        return Err(HandshakeError::unsupported_invocation(
            expected_function,
            found.as_str(),
        ));
    }
    Ok(&entry.root_invocation)
}

/// Validity bound of an address-bound entry
pub fn extract_expiration_bound(entry: &AuthorizationSubEntry) -> Option<SequenceNumber> {
    entry.expiration_bound()
}

/// Canonical bytes of a draft transaction
pub fn encode_transaction(transaction: &DraftTransaction) -> Result<Vec<u8>> {
    to_canonical_bytes(transaction, "transaction")
}

/// Inverse of [`encode_transaction`]
pub fn decode_transaction(bytes: &[u8]) -> Result<DraftTransaction> {
    from_canonical_bytes(bytes, "transaction")
}

/// Canonical bytes of a signed envelope
pub fn encode_envelope(envelope: &SignedEnvelope) -> Result<Vec<u8>> {
    to_canonical_bytes(envelope, "envelope")
}

/// Inverse of [`encode_envelope`]
pub fn decode_envelope(bytes: &[u8]) -> Result<SignedEnvelope> {
    from_canonical_bytes(bytes, "envelope")
}

/// Hex SHA-256 of the canonical transaction bytes
pub fn transaction_hash(transaction: &DraftTransaction) -> Result<String> {
    let bytes = encode_transaction(transaction)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Digest a signer commits to for an address-bound entry.
///
/// Covers the network, the authorizing address, the nonce, the validity bound
/// and the full invocation; the signature itself is excluded.
pub fn signature_preimage(
    entry: &AuthorizationSubEntry,
    network_passphrase: &str,
) -> Result<[u8; 32]> {
    let Credentials::Address(creds) = &entry.credentials else {
        return Err(HandshakeError::build(
            "source-account entries are covered by the envelope signature",
        ));
    };

    let mut hasher = Sha256::new();
    hasher.update(PREIMAGE_DOMAIN);
    hasher.update(Sha256::digest(network_passphrase.as_bytes()));
    hasher.update(to_canonical_bytes(&creds.address, "address")?);
    hasher.update(creds.nonce.to_be_bytes());
    hasher.update(creds.expiration_bound.to_be_bytes());
    hasher.update(to_canonical_bytes(&entry.root_invocation, "invocation")?);
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::InvokedFunction;
    use crate::transaction::ContractCall;
    use crate::types::{Address, ArgValue};
    use assert_matches::assert_matches;

    fn addr(fill: char) -> Address {
        Address::parse(&format!("G{}", fill.to_string().repeat(55))).unwrap()
    }

    fn contract() -> Address {
        Address::parse(&format!("C{}", "Q".repeat(55))).unwrap()
    }

    fn signed_entry(function: &str) -> AuthorizationSubEntry {
        let invocation = AuthorizedInvocation {
            function: InvokedFunction {
                contract: contract(),
                function_name: function.into(),
            },
            args: vec![ArgValue::U32(42), ArgValue::I128(100_0000000)].into(),
        };
        let mut entry = AuthorizationSubEntry::stub(addr('B'), 77, invocation)
            .with_expiration_bound(1_720);
        if let Credentials::Address(creds) = &mut entry.credentials {
            creds.signature = Some(vec![9; 64]);
        }
        entry
    }

    #[test]
    fn test_entry_round_trip_is_exact() {
        let entry = signed_entry("start_game");
        let token = encode_entry(&entry).unwrap();
        let decoded = decode_entry(&token).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(encode_entry(&decoded).unwrap(), token);
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = encode_entry(&signed_entry("start_game")).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_matches!(decode_entry("%%%"), Err(HandshakeError::Decode { .. }));
        assert_matches!(decode_entry(""), Err(HandshakeError::Decode { .. }));
        assert_matches!(decode_entry("AQID"), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let token = encode_entry(&signed_entry("start_game")).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[0] = 9;
        let bumped = URL_SAFE_NO_PAD.encode(bytes);
        assert_matches!(decode_entry(&bumped), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let token = encode_entry(&signed_entry("start_game")).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes.push(0);
        let padded = URL_SAFE_NO_PAD.encode(bytes);
        assert_matches!(decode_entry(&padded), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_source_account_credentials() {
        let mut entry = signed_entry("start_game");
        entry.credentials = Credentials::SourceAccount;
        let token = encode_entry(&entry).unwrap();
        assert_matches!(decode_entry(&token), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_extract_invocation_checks_function_name() {
        let entry = signed_entry("start_game");
        let invocation = extract_invocation(&entry, "start_game").unwrap();
        assert_eq!(invocation.args.get(0), Some(&ArgValue::U32(42)));

        let other = signed_entry("end_game");
        assert_matches!(
            extract_invocation(&other, "start_game"),
            Err(HandshakeError::UnsupportedInvocation { found, .. }) if found == "end_game"
        );
    }

    #[test]
    fn test_extract_expiration_bound() {
        assert_eq!(
            extract_expiration_bound(&signed_entry("start_game")),
            Some(1_720)
        );
    }

    #[test]
    fn test_transaction_round_trip_and_hash() {
        let mut tx = DraftTransaction::new(
            addr('C'),
            ContractCall {
                contract: contract(),
                function_name: "start_game".into(),
                args: vec![ArgValue::U32(1)].into(),
            },
        );
        tx.auth.push(signed_entry("start_game"));
        let bytes = encode_transaction(&tx).unwrap();
        assert_eq!(decode_transaction(&bytes).unwrap(), tx);

        let hash = transaction_hash(&tx).unwrap();
        assert_eq!(hash.len(), 64);
        tx.fee = 100;
        assert_ne!(transaction_hash(&tx).unwrap(), hash);
    }

    #[test]
    fn test_preimage_binds_network_and_bound() {
        let entry = signed_entry("start_game");
        let a = signature_preimage(&entry, "Test Network").unwrap();
        let b = signature_preimage(&entry, "Public Network").unwrap();
        let c = signature_preimage(&entry.with_expiration_bound(9), "Test Network").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);

        let mut unsigned = entry.clone();
        if let Credentials::Address(creds) = &mut unsigned.credentials {
            creds.signature = None;
        }
        assert_eq!(signature_preimage(&unsigned, "Test Network").unwrap(), a);
    }
}
