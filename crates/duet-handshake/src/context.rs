//! Handshake context
//!
//! One explicitly constructed object carries the configuration, the
//! collaborators and the shared request cache. Every component receives it
//! instead of reaching for a global client, which keeps the whole flow
//! testable with fakes.

use duet_core::{
    find_entry, Address, AuthorizationSubEntry, CancelSignal, ExpirationTracker, HandshakeConfig,
    HandshakeError, LedgerKey, LedgerReader, RequestCache, Result, SequenceNumber, SessionId,
    SessionRecord, Signer, Simulator, Submitter,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache key of the latest-sequence read
const SEQUENCE_KEY: &str = "sequence";

/// External collaborators
#[derive(Clone)]
pub struct Collaborators {
    /// Ledger point lookups
    pub ledger: Arc<dyn LedgerReader>,
    /// Transaction simulation
    pub simulator: Arc<dyn Simulator>,
    /// Wallet
    pub signer: Arc<dyn Signer>,
    /// Transaction submission
    pub submitter: Arc<dyn Submitter>,
}

/// Configuration, collaborators and cache shared by every handshake component
#[derive(Clone)]
pub struct HandshakeContext {
    config: Arc<HandshakeConfig>,
    contract: Address,
    collaborators: Collaborators,
    cache: RequestCache,
    tracker: ExpirationTracker,
}

impl std::fmt::Debug for HandshakeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeContext")
            .field("contract", &self.contract)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl HandshakeContext {
    /// Validate `config` and assemble a context
    pub fn new(config: HandshakeConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let contract = config.contract()?.clone();
        let tracker = ExpirationTracker::new(config.ledger.ledger_close_seconds);
        Ok(Self {
            config: Arc::new(config),
            contract,
            collaborators,
            cache: RequestCache::new(),
            tracker,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// The session contract
    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// Session-start function name
    pub fn start_function(&self) -> &str {
        &self.config.ledger.start_function
    }

    /// Shared request cache
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Expiration calculator for this ledger
    pub fn tracker(&self) -> ExpirationTracker {
        self.tracker
    }

    /// Simulator collaborator
    pub fn simulator(&self) -> &dyn Simulator {
        self.collaborators.simulator.as_ref()
    }

    /// Submitter collaborator
    pub fn submitter(&self) -> &dyn Submitter {
        self.collaborators.submitter.as_ref()
    }

    /// Signer collaborator
    pub fn signer(&self) -> &dyn Signer {
        self.collaborators.signer.as_ref()
    }

    /// Ledger key of a session record
    pub fn session_key(&self, session_id: SessionId) -> LedgerKey {
        LedgerKey::Session {
            contract: self.contract.clone(),
            session_id,
        }
    }

    /// Cache key of a session record read
    pub fn session_cache_key(&self, session_id: SessionId) -> String {
        format!("session:{}:{session_id}", self.contract)
    }

    /// Cached, deduplicated read of one session record
    pub async fn read_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        self.read_session_with_cancel(session_id, None).await
    }

    /// [`read_session`](Self::read_session) with caller-side cancellation
    pub async fn read_session_with_cancel(
        &self,
        session_id: SessionId,
        cancel: Option<CancelSignal>,
    ) -> Result<Option<SessionRecord>> {
        let ledger = self.collaborators.ledger.clone();
        let key = self.session_key(session_id);
        let cache_key = self.session_cache_key(session_id);
        self.cache
            .dedupe(
                &cache_key,
                move || async move {
                    let entries = ledger.get_entries(std::slice::from_ref(&key)).await?;
                    Ok(find_entry(&entries, &key)
                        .and_then(|entry| entry.as_session())
                        .cloned())
                },
                self.config.cache.session_ttl,
                cancel,
            )
            .await
    }

    /// Drop any cached read of `session_id`
    pub fn invalidate_session(&self, session_id: SessionId) {
        self.cache.invalidate(&self.session_cache_key(session_id));
    }

    /// One uncached batched read of several sessions, keyed by session id.
    ///
    /// Results are matched by key content; absent sessions are simply missing
    /// from the map.
    pub async fn read_sessions(
        &self,
        session_ids: &[SessionId],
    ) -> Result<HashMap<SessionId, SessionRecord>> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<LedgerKey> = session_ids.iter().map(|id| self.session_key(*id)).collect();
        let entries = self.collaborators.ledger.get_entries(&keys).await?;

        let mut found = HashMap::with_capacity(entries.len());
        for (key, session_id) in keys.iter().zip(session_ids) {
            if let Some(record) = find_entry(&entries, key).and_then(|entry| entry.as_session()) {
                found.insert(*session_id, record.clone());
            }
        }
        Ok(found)
    }

    /// Latest sequence, served from cache within its TTL
    pub async fn cached_sequence(&self) -> Result<SequenceNumber> {
        let ledger = self.collaborators.ledger.clone();
        self.cache
            .dedupe(
                SEQUENCE_KEY,
                move || async move { ledger.latest_sequence().await },
                self.config.cache.sequence_ttl,
                None,
            )
            .await
    }

    /// Latest sequence read straight from the ledger; refreshes the cache
    pub async fn fresh_sequence(&self) -> Result<SequenceNumber> {
        self.cache.invalidate(SEQUENCE_KEY);
        self.cached_sequence().await
    }

    /// Ask the signer for a sub-entry signature under the sign timeout.
    ///
    /// The returned entry must authorize the same address and invocation as
    /// the request and carry a signature.
    pub async fn sign_sub_entry(
        &self,
        entry: &AuthorizationSubEntry,
        cancel: Option<CancelSignal>,
    ) -> Result<AuthorizationSubEntry> {
        let passphrase = &self.config.ledger.network_passphrase;
        let signed = self
            .bounded(
                "sign_sub_entry",
                self.config.timeouts.sign,
                cancel,
                self.signer().sign_sub_entry(entry, passphrase),
            )
            .await?;

        if !signed.same_authorization(entry) {
            return Err(HandshakeError::build(
                "signer returned an entry for a different address or invocation",
            ));
        }
        if !signed.is_signed() {
            return Err(HandshakeError::build("signer returned an unsigned entry"));
        }
        Ok(signed)
    }

    /// Run `operation` under `timeout`, also resolving early on `cancel`
    pub async fn bounded<T>(
        &self,
        operation: &str,
        timeout: Duration,
        cancel: Option<CancelSignal>,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timed = tokio::time::timeout(timeout, future);
        let outcome = match cancel {
            Some(mut signal) => tokio::select! {
                outcome = timed => outcome,
                _ = signal.cancelled() => {
                    tracing::debug!(operation, "cancelled by caller");
                    return Err(HandshakeError::Cancelled);
                }
            },
            None => timed.await,
        };
        outcome.unwrap_or_else(|_| {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "operation timed out"
            );
            Err(HandshakeError::timeout(operation, timeout))
        })
    }
}
