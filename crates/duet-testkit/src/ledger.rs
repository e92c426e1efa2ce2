//! In-memory fake ledger
//!
//! Hosts a toy session contract whose start function takes
//! `(session_id: u32, player1, player2, player1_wager: i128, player2_wager: i128)`
//! and requires each player to authorize `(session_id, own_wager)`.
//!
//! Simulation enforces a per-address balance check over the sum of both
//! deductions, so simulating the same address on both legs with two full
//! wagers fails the way a real contract would. Submission verifies envelope
//! and entry signatures, validity bounds, nonces, the exact required entry
//! set and single session creation.

use crate::signer::fake_signature;
use async_trait::async_trait;
use duet_core::codec::{self, signature_preimage};
use duet_core::{
    Address, ArgValue, ArgumentTuple, AuthorizationSubEntry, AuthorizedInvocation, Credentials,
    DraftTransaction, HandshakeConfig, HandshakeError, InvokedFunction, LedgerEntry, LedgerKey,
    LedgerReader, RejectReason, Result, SequenceNumber, SessionId, SessionOutcome, SessionRecord,
    SimulationResult, Simulator, SubmitResponse, SubmitStatus, Submitter, Wager,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Starting ledger sequence
pub const GENESIS_SEQUENCE: SequenceNumber = 1_000;

/// Balance every address starts with unless overridden
pub const DEFAULT_BALANCE: Wager = 1_000_000_0000000;

/// Reported minimum resource fee
const MIN_RESOURCE_FEE: u32 = 100;

/// One-shot fault applied to the next submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFault {
    /// Reject without applying
    Reject(RejectReason),
    /// Another submission creates `record` first
    Race(SessionRecord),
    /// Never answer; apply the transaction first when `apply` is set
    Hang {
        /// Whether the transaction lands despite the missing response
        apply: bool,
    },
    /// Apply but report `Pending`
    Pending,
    /// Fail at the transport level
    Network,
}

/// Per-operation call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `get_entries`
    pub get_entries: usize,
    /// `latest_sequence`
    pub latest_sequence: usize,
    /// `simulate`
    pub simulate: usize,
    /// `submit`
    pub submit: usize,
}

impl CallCounts {
    /// Sum of all calls
    pub fn total(&self) -> usize {
        self.get_entries + self.latest_sequence + self.simulate + self.submit
    }
}

#[derive(Debug)]
struct LedgerState {
    sequence: SequenceNumber,
    sessions: HashMap<(Address, SessionId), SessionRecord>,
    balances: HashMap<Address, Wager>,
    next_nonce: i64,
    used_nonces: HashSet<(Address, i64)>,
    source_account_credentials: bool,
    submitted: Vec<DraftTransaction>,
    calls: CallCounts,
    read_delay: Option<Duration>,
    fail_reads: bool,
    simulate_error: Option<String>,
    submit_fault: Option<SubmitFault>,
}

/// Session contract parameters parsed from call arguments
struct StartCall {
    session_id: SessionId,
    player1: Address,
    player2: Address,
    player1_wager: Wager,
    player2_wager: Wager,
}

impl StartCall {
    fn parse(args: &ArgumentTuple) -> std::result::Result<Self, String> {
        let bad = || format!("expected (u32, address, address, i128, i128), got {args:?}");
        if args.len() != 5 {
            return Err(bad());
        }
        let session_id = args.get(0).and_then(ArgValue::as_u32).ok_or_else(bad)?;
        let player1 = args.get(1).and_then(ArgValue::as_address).ok_or_else(bad)?;
        let player2 = args.get(2).and_then(ArgValue::as_address).ok_or_else(bad)?;
        let player1_wager = args.get(3).and_then(ArgValue::as_i128).ok_or_else(bad)?;
        let player2_wager = args.get(4).and_then(ArgValue::as_i128).ok_or_else(bad)?;
        if player1_wager <= 0 || player2_wager <= 0 {
            return Err("wagers must be positive".to_string());
        }
        Ok(Self {
            session_id,
            player1: player1.clone(),
            player2: player2.clone(),
            player1_wager,
            player2_wager,
        })
    }

    /// `(address, authorized args)` each player must sign
    fn required_auth(&self) -> [(Address, ArgumentTuple); 2] {
        [
            (
                self.player1.clone(),
                vec![ArgValue::U32(self.session_id), ArgValue::I128(self.player1_wager)].into(),
            ),
            (
                self.player2.clone(),
                vec![ArgValue::U32(self.session_id), ArgValue::I128(self.player2_wager)].into(),
            ),
        ]
    }

    fn deductions(&self) -> HashMap<Address, Wager> {
        let mut totals = HashMap::new();
        *totals.entry(self.player1.clone()).or_insert(0) += self.player1_wager;
        *totals.entry(self.player2.clone()).or_insert(0) += self.player2_wager;
        totals
    }

    fn record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session_id,
            player1: self.player1.clone(),
            player2: self.player2.clone(),
            player1_wager: self.player1_wager,
            player2_wager: self.player2_wager,
            outcome: None,
        }
    }
}

/// In-memory ledger with a toy session contract
#[derive(Debug, Clone)]
pub struct FakeLedger {
    contract: Address,
    start_function: String,
    network_passphrase: String,
    state: Arc<Mutex<LedgerState>>,
}

impl FakeLedger {
    /// Ledger hosting the contract named in `config`
    pub fn new(config: &HandshakeConfig) -> Self {
        Self {
            contract: config.contract().expect("test config names a contract").clone(),
            start_function: config.ledger.start_function.clone(),
            network_passphrase: config.ledger.network_passphrase.clone(),
            state: Arc::new(Mutex::new(LedgerState {
                sequence: GENESIS_SEQUENCE,
                sessions: HashMap::new(),
                balances: HashMap::new(),
                next_nonce: 1,
                used_nonces: HashSet::new(),
                source_account_credentials: false,
                submitted: Vec::new(),
                calls: CallCounts::default(),
                read_delay: None,
                fail_reads: false,
                simulate_error: None,
                submit_fault: None,
            })),
        }
    }

    /// Current ledger sequence
    pub fn sequence(&self) -> SequenceNumber {
        self.state.lock().sequence
    }

    /// Close `ledgers` more ledgers
    pub fn advance_sequence(&self, ledgers: SequenceNumber) {
        let mut state = self.state.lock();
        state.sequence = state.sequence.saturating_add(ledgers);
    }

    /// Jump to `sequence`
    pub fn set_sequence(&self, sequence: SequenceNumber) {
        self.state.lock().sequence = sequence;
    }

    /// Override an address balance
    pub fn set_balance(&self, address: &Address, balance: Wager) {
        self.state.lock().balances.insert(address.clone(), balance);
    }

    /// Balance of `address`
    pub fn balance(&self, address: &Address) -> Wager {
        let state = self.state.lock();
        state.balances.get(address).copied().unwrap_or(DEFAULT_BALANCE)
    }

    /// Give the transaction source source-account credentials during simulation
    pub fn set_source_account_credentials(&self, enabled: bool) {
        self.state.lock().source_account_credentials = enabled;
    }

    /// Delay every `get_entries` call
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    /// Make `get_entries` fail with a network error
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Fail every simulation with `message`
    pub fn set_simulate_error(&self, message: Option<&str>) {
        self.state.lock().simulate_error = message.map(str::to_string);
    }

    /// Apply `fault` to the next submission only
    pub fn inject_submit_fault(&self, fault: SubmitFault) {
        self.state.lock().submit_fault = Some(fault);
    }

    /// Store a session directly, as if created by another client
    pub fn insert_session(&self, record: SessionRecord) {
        let key = (self.contract.clone(), record.session_id);
        self.state.lock().sessions.insert(key, record);
    }

    /// Record an outcome for an existing session
    pub fn record_outcome(&self, session_id: SessionId, winner: Option<Address>) {
        let key = (self.contract.clone(), session_id);
        if let Some(record) = self.state.lock().sessions.get_mut(&key) {
            record.outcome = Some(SessionOutcome { winner });
        }
    }

    /// Stored session, if any
    pub fn session(&self, session_id: SessionId) -> Option<SessionRecord> {
        let key = (self.contract.clone(), session_id);
        self.state.lock().sessions.get(&key).cloned()
    }

    /// Transactions applied so far
    pub fn submitted(&self) -> Vec<DraftTransaction> {
        self.state.lock().submitted.clone()
    }

    /// Call counters
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    fn invocation(&self, args: ArgumentTuple) -> AuthorizedInvocation {
        AuthorizedInvocation {
            function: InvokedFunction {
                contract: self.contract.clone(),
                function_name: self.start_function.clone(),
            },
            args,
        }
    }

    fn parse_call(&self, draft: &DraftTransaction) -> std::result::Result<StartCall, String> {
        if draft.call.contract != self.contract {
            return Err(format!("unknown contract {}", draft.call.contract));
        }
        if draft.call.function_name != self.start_function {
            return Err(format!("unknown function `{}`", draft.call.function_name));
        }
        StartCall::parse(&draft.call.args)
    }

    fn check_balances(state: &LedgerState, call: &StartCall) -> std::result::Result<(), String> {
        for (address, total) in call.deductions() {
            let balance = state.balances.get(&address).copied().unwrap_or(DEFAULT_BALANCE);
            if total > balance {
                return Err(format!(
                    "insufficient balance for {}: needs {total}, has {balance}",
                    address.short()
                ));
            }
        }
        Ok(())
    }

    /// Validate and apply a signed envelope against `state`
    fn apply(&self, state: &mut LedgerState, envelope: &[u8]) -> Result<SubmitResponse> {
        let envelope = codec::decode_envelope(envelope)?;
        let draft = codec::decode_transaction(&envelope.transaction)?;
        let hash = codec::transaction_hash(&draft)?;
        let failed = |reason: RejectReason| -> Result<SubmitResponse> {
            Ok(SubmitResponse {
                hash: hash.clone(),
                status: SubmitStatus::Failed(reason),
            })
        };

        let digest = Sha256::digest(&envelope.transaction);
        let source_signed = envelope.signatures.iter().any(|sig| {
            sig.signer == draft.source && sig.signature == fake_signature(&draft.source, &digest)
        });
        if !source_signed {
            return failed(RejectReason::InvalidSignature);
        }

        let call = match self.parse_call(&draft) {
            Ok(call) => call,
            Err(message) => return failed(RejectReason::Other(message)),
        };

        // The contract refuses a duplicate session before checking any authorization.
        let key = (self.contract.clone(), call.session_id);
        if state.sessions.contains_key(&key) {
            return failed(RejectReason::SessionExists);
        }

        let required = call.required_auth();
        for entry in &draft.auth {
            let covers = |(address, args): &(Address, ArgumentTuple)| {
                let who = match &entry.credentials {
                    Credentials::Address(creds) => &creds.address,
                    Credentials::SourceAccount => &draft.source,
                };
                who == address
                    && entry.argument_tuple() == args
                    && entry.invoked_function().contract == self.contract
                    && entry.invoked_function().function_name == self.start_function
            };
            if !required.iter().any(covers) {
                return failed(RejectReason::Other(
                    "unexpected authorization entry".to_string(),
                ));
            }
        }
        if draft.auth.len() != required.len() {
            return failed(RejectReason::Other(format!(
                "expected {} authorization entries, got {}",
                required.len(),
                draft.auth.len()
            )));
        }

        for entry in &draft.auth {
            let Credentials::Address(creds) = &entry.credentials else {
                continue;
            };
            // bound is exclusive
            if state.sequence >= creds.expiration_bound {
                return failed(RejectReason::AuthExpired);
            }
            let preimage = signature_preimage(entry, &self.network_passphrase)?;
            let expected = fake_signature(&creds.address, &preimage);
            if creds.signature.as_deref() != Some(expected.as_slice()) {
                return failed(RejectReason::InvalidSignature);
            }
            if state
                .used_nonces
                .contains(&(creds.address.clone(), creds.nonce))
            {
                return failed(RejectReason::Other("nonce already used".to_string()));
            }
        }

        if let Err(message) = Self::check_balances(state, &call) {
            return failed(RejectReason::Other(message));
        }

        for (address, total) in call.deductions() {
            let balance = state.balances.entry(address).or_insert(DEFAULT_BALANCE);
            *balance -= total;
        }
        for entry in &draft.auth {
            if let Credentials::Address(creds) = &entry.credentials {
                state
                    .used_nonces
                    .insert((creds.address.clone(), creds.nonce));
            }
        }
        state.sessions.insert(key, call.record());
        state.submitted.push(draft);
        tracing::debug!(session_id = call.session_id, %hash, "fake ledger applied session start");

        Ok(SubmitResponse {
            hash,
            status: SubmitStatus::Success,
        })
    }
}

#[async_trait]
impl LedgerReader for FakeLedger {
    async fn get_entries(&self, keys: &[LedgerKey]) -> Result<Vec<LedgerEntry>> {
        let (delay, fail) = {
            let mut state = self.state.lock();
            state.calls.get_entries += 1;
            (state.read_delay, state.fail_reads)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(HandshakeError::network("fake ledger read failure"));
        }

        let state = self.state.lock();
        // Reverse request order so callers cannot rely on positions.
        let entries = keys
            .iter()
            .rev()
            .filter_map(|key| match key {
                LedgerKey::Session {
                    contract,
                    session_id,
                } => state
                    .sessions
                    .get(&(contract.clone(), *session_id))
                    .map(|record| LedgerEntry::Session {
                        contract: contract.clone(),
                        record: record.clone(),
                    }),
            })
            .collect();
        Ok(entries)
    }

    async fn latest_sequence(&self) -> Result<SequenceNumber> {
        let mut state = self.state.lock();
        state.calls.latest_sequence += 1;
        Ok(state.sequence)
    }
}

#[async_trait]
impl Simulator for FakeLedger {
    async fn simulate(&self, draft: &DraftTransaction) -> Result<SimulationResult> {
        let mut state = self.state.lock();
        state.calls.simulate += 1;

        if let Some(message) = &state.simulate_error {
            return Err(HandshakeError::build(format!("simulation failed: {message}")));
        }
        let call = self
            .parse_call(draft)
            .map_err(|e| HandshakeError::build(format!("simulation failed: {e}")))?;
        if state
            .sessions
            .contains_key(&(self.contract.clone(), call.session_id))
        {
            return Err(HandshakeError::build(format!(
                "simulation failed: session {} already exists",
                call.session_id
            )));
        }
        Self::check_balances(&state, &call)
            .map_err(|e| HandshakeError::build(format!("simulation failed: {e}")))?;

        let source_account = state.source_account_credentials;
        let mut auth = Vec::with_capacity(2);
        for (address, args) in call.required_auth() {
            let invocation = self.invocation(args);
            if source_account && address == draft.source {
                auth.push(AuthorizationSubEntry {
                    credentials: Credentials::SourceAccount,
                    root_invocation: invocation,
                });
            } else {
                let nonce = state.next_nonce;
                state.next_nonce += 1;
                auth.push(AuthorizationSubEntry::stub(address, nonce, invocation));
            }
        }

        Ok(SimulationResult {
            auth,
            latest_sequence: state.sequence,
            min_resource_fee: MIN_RESOURCE_FEE,
        })
    }
}

#[async_trait]
impl Submitter for FakeLedger {
    async fn submit(&self, envelope: &[u8]) -> Result<SubmitResponse> {
        let fault = {
            let mut state = self.state.lock();
            state.calls.submit += 1;
            state.submit_fault.take()
        };

        match fault {
            None => {
                let mut state = self.state.lock();
                self.apply(&mut state, envelope)
            }
            Some(SubmitFault::Reject(reason)) => {
                let signed = codec::decode_envelope(envelope)?;
                let draft = codec::decode_transaction(&signed.transaction)?;
                Ok(SubmitResponse {
                    hash: codec::transaction_hash(&draft)?,
                    status: SubmitStatus::Failed(reason),
                })
            }
            Some(SubmitFault::Race(record)) => {
                self.insert_session(record);
                let mut state = self.state.lock();
                self.apply(&mut state, envelope)
            }
            Some(SubmitFault::Hang { apply }) => {
                if apply {
                    let mut state = self.state.lock();
                    self.apply(&mut state, envelope)?;
                }
                std::future::pending::<()>().await;
                Err(HandshakeError::network("fake submit hang ended"))
            }
            Some(SubmitFault::Pending) => {
                let mut state = self.state.lock();
                let response = self.apply(&mut state, envelope)?;
                Ok(SubmitResponse {
                    status: SubmitStatus::Pending,
                    ..response
                })
            }
            Some(SubmitFault::Network) => {
                Err(HandshakeError::network("fake submit transport failure"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{initiator, joiner, test_config, test_contract};
    use duet_core::ContractCall;

    fn draft(p1: &Address, p2: &Address, w1: Wager, w2: Wager) -> DraftTransaction {
        DraftTransaction::new(
            p1.clone(),
            ContractCall {
                contract: test_contract(),
                function_name: "start_game".into(),
                args: vec![
                    ArgValue::U32(42),
                    ArgValue::Address(p1.clone()),
                    ArgValue::Address(p2.clone()),
                    ArgValue::I128(w1),
                    ArgValue::I128(w2),
                ]
                .into(),
            },
        )
    }

    #[tokio::test]
    async fn test_simulation_emits_one_stub_per_leg() {
        let ledger = FakeLedger::new(&test_config());
        let result = ledger
            .simulate(&draft(&initiator(), &joiner(), 10, 20))
            .await
            .unwrap();
        assert_eq!(result.auth.len(), 2);
        assert!(result.auth.iter().all(AuthorizationSubEntry::is_stub));
        assert_eq!(result.latest_sequence, GENESIS_SEQUENCE);
    }

    #[tokio::test]
    async fn test_double_full_wager_fails_balance_check() {
        let ledger = FakeLedger::new(&test_config());
        ledger.set_balance(&initiator(), 150);
        let me = initiator();
        assert!(ledger.simulate(&draft(&me, &me, 100, 100)).await.is_err());
        assert!(ledger.simulate(&draft(&me, &me, 100, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_entries_omits_absent_keys() {
        let ledger = FakeLedger::new(&test_config());
        ledger.insert_session(SessionRecord {
            session_id: 7,
            player1: initiator(),
            player2: joiner(),
            player1_wager: 1,
            player2_wager: 1,
            outcome: None,
        });
        let keys = [6, 7, 8].map(|session_id| LedgerKey::Session {
            contract: test_contract(),
            session_id,
        });
        let entries = ledger.get_entries(&keys).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(ledger.calls().get_entries, 1);
    }
}
