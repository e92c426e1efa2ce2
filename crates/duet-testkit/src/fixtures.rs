//! Deterministic fixtures

use duet_core::{Address, HandshakeConfig};
use sha2::{Digest, Sha256};
use std::time::Duration;

const BASE32: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn strkey(prefix: char, seed: &[u8]) -> Address {
    let mut body = String::with_capacity(55);
    let mut block = Sha256::digest(seed).to_vec();
    while body.len() < 55 {
        for byte in &block {
            if body.len() == 55 {
                break;
            }
            body.push(char::from(BASE32[usize::from(*byte) % 32]));
        }
        block = Sha256::digest(&block).to_vec();
    }
    Address::parse(&format!("{prefix}{body}")).expect("fixture address is well-formed")
}

/// Account address derived from `seed`; distinct seeds give distinct addresses
pub fn test_address(seed: u8) -> Address {
    strkey('G', &[b'a', seed])
}

/// The session contract used by every fixture
pub fn test_contract() -> Address {
    strkey('C', b"duet-session-contract")
}

/// Initiating party
pub fn initiator() -> Address {
    test_address(1)
}

/// Joining party
pub fn joiner() -> Address {
    test_address(2)
}

/// Valid configuration pointing at [`test_contract`] with short waits
pub fn test_config() -> HandshakeConfig {
    let mut config = HandshakeConfig::default();
    config.ledger.contract = Some(test_contract());
    config.ledger.network_passphrase = "Duet Test Network".to_string();
    config.timeouts.sign = Duration::from_secs(5);
    config.timeouts.submit = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(100);
    config.retry.max_delay = Duration::from_secs(1);
    config.store.path = std::env::temp_dir().join("duet-test-invitations.json");
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_addresses_are_distinct_and_valid() {
        assert_ne!(initiator(), joiner());
        assert_eq!(test_address(7), test_address(7));
        assert_eq!(test_contract().kind(), duet_core::AddressKind::Contract);
        test_config().validate().unwrap();
    }
}
