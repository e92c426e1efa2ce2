//! Placeholder disambiguation properties
//!
//! With the initiator standing in for the unknown second party, simulation
//! yields two entries for the same address. Selection by wager argument must
//! pick the real leg for every wager above the minimal unit.

use duet_core::{
    ArgValue, AuthorizationSubEntry, AuthorizedInvocation, HandshakeError, InvokedFunction, Wager,
    MINIMAL_UNIT,
};
use duet_handshake::select_initiator_entry;
use duet_testkit::{initiator, joiner, test_contract};
use proptest::prelude::*;

fn stub(session_id: u32, wager: Wager, nonce: i64) -> AuthorizationSubEntry {
    AuthorizationSubEntry::stub(
        initiator(),
        nonce,
        AuthorizedInvocation {
            function: InvokedFunction {
                contract: test_contract(),
                function_name: "start_game".into(),
            },
            args: vec![ArgValue::U32(session_id), ArgValue::I128(wager)].into(),
        },
    )
}

proptest! {
    #[test]
    fn real_leg_is_selected_for_every_wager_above_minimal(
        wager in (MINIMAL_UNIT + 1)..i128::MAX,
        session_id in any::<u32>(),
        placeholder_first in any::<bool>(),
    ) {
        let real = stub(session_id, wager, 1);
        let placeholder = stub(session_id, MINIMAL_UNIT, 2);
        let entries = if placeholder_first {
            vec![placeholder, real.clone()]
        } else {
            vec![real.clone(), placeholder]
        };

        let chosen = select_initiator_entry(&entries, &initiator(), wager).unwrap();
        prop_assert_eq!(chosen, &real);
    }

    #[test]
    fn other_parties_entries_never_match(wager in (MINIMAL_UNIT + 1)..1_000_000_0000000i128) {
        let mut foreign = stub(1, wager, 1);
        if let duet_core::Credentials::Address(creds) = &mut foreign.credentials {
            creds.address = joiner();
        }
        let result = select_initiator_entry(std::slice::from_ref(&foreign), &initiator(), wager);
        let is_ambiguous = matches!(result, Err(HandshakeError::AmbiguousEntry { .. }));
        prop_assert!(is_ambiguous);
    }
}

#[test]
fn minimal_wager_cannot_be_disambiguated() {
    let entries = vec![stub(1, MINIMAL_UNIT, 1), stub(1, MINIMAL_UNIT, 2)];
    assert!(matches!(
        select_initiator_entry(&entries, &initiator(), MINIMAL_UNIT),
        Err(HandshakeError::AmbiguousEntry { .. })
    ));
}
