//! Codec and expiration properties
//!
//! - token round trip is exact in both directions
//! - remaining validity is monotonic, zero at the bound, never negative

use duet_core::codec::{decode_entry, encode_entry};
use duet_core::{
    Address, ArgValue, AuthorizationSubEntry, AuthorizedInvocation, Credentials, ExpirationTracker,
    InvokedFunction,
};
use proptest::prelude::*;
use std::time::Duration;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn address_strategy(prefix: char) -> impl Strategy<Value = Address> {
    prop::collection::vec(0usize..32, 55).prop_map(move |indices| {
        let body: String = indices.into_iter().map(|i| char::from(ALPHABET[i])).collect();
        Address::parse(&format!("{prefix}{body}")).unwrap()
    })
}

fn arg_strategy() -> impl Strategy<Value = ArgValue> {
    prop_oneof![
        any::<u32>().prop_map(ArgValue::U32),
        any::<i128>().prop_map(ArgValue::I128),
        address_strategy('G').prop_map(ArgValue::Address),
        prop::collection::vec(b'a'..=b'z', 1..12)
            .prop_map(|b| ArgValue::Symbol(String::from_utf8(b).unwrap())),
        any::<bool>().prop_map(ArgValue::Bool),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(ArgValue::Bytes),
    ]
}

fn entry_strategy() -> impl Strategy<Value = AuthorizationSubEntry> {
    (
        address_strategy('G'),
        address_strategy('C'),
        any::<i64>(),
        any::<u32>(),
        prop::option::of(prop::collection::vec(any::<u8>(), 64)),
        prop::collection::vec(arg_strategy(), 0..6),
    )
        .prop_map(|(address, contract, nonce, bound, signature, args)| {
            let invocation = AuthorizedInvocation {
                function: InvokedFunction {
                    contract,
                    function_name: "start_game".into(),
                },
                args: args.into(),
            };
            let mut entry = AuthorizationSubEntry::stub(address, nonce, invocation)
                .with_expiration_bound(bound);
            if let Credentials::Address(creds) = &mut entry.credentials {
                creds.signature = signature;
            }
            entry
        })
}

proptest! {
    #[test]
    fn entry_token_round_trip_is_exact(entry in entry_strategy()) {
        let token = encode_entry(&entry).unwrap();
        let decoded = decode_entry(&token).unwrap();
        prop_assert_eq!(&decoded, &entry);
        prop_assert_eq!(encode_entry(&decoded).unwrap(), token);
    }

    #[test]
    fn tokens_are_url_safe(entry in entry_strategy()) {
        let token = encode_entry(&entry).unwrap();
        prop_assert!(token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
    }

    #[test]
    fn remaining_is_monotonic_and_bounded(
        bound in any::<u32>(),
        current in any::<u32>(),
        step in 0u32..10_000,
        unit in 1u64..30,
    ) {
        let tracker = ExpirationTracker::new(unit);
        let now = tracker.remaining(bound, current);
        let later = tracker.remaining(bound, current.saturating_add(step));
        prop_assert!(later <= now);

        if current >= bound {
            prop_assert_eq!(now, Duration::ZERO);
            prop_assert!(tracker.is_expired(bound, current));
        } else {
            prop_assert_eq!(now, Duration::from_secs(u64::from(bound - current) * unit));
            prop_assert!(!tracker.is_expired(bound, current));
        }
    }
}

#[test]
fn remaining_is_zero_exactly_at_bound() {
    let tracker = ExpirationTracker::new(5);
    assert_eq!(tracker.remaining(1_720, 1_719), Duration::from_secs(5));
    assert_eq!(tracker.remaining(1_720, 1_720), Duration::ZERO);
    assert_eq!(tracker.remaining(1_720, 9_999), Duration::ZERO);
    assert_eq!(tracker.describe(1_720, 1_720), "expired");
}
