//! Deliverability guard.
//!
//! Pure bookkeeping around domain blacklisting and account reputation.
//! Consulted synchronously before every send (warmup or campaign) and
//! updated asynchronously as inbox sync results arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::config::ReputationDeltas;
use crate::domain::{AccountId, BlacklistEntry, EmailAccount};

/// Disposable-mail domains blacklisted from the start.
const SEED_BLACKLIST: &[&str] = &[
    "yopmail.com",
    "mailinator.com",
    "tempmail.com",
    "guerrillamail.com",
    "sharklasers.com",
    "trashmail.com",
    "temp-mail.org",
    "disposablemail.com",
    "throwawaymail.com",
    "fakeinbox.com",
];

/// Errors that can occur during guard operations.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Storage abstraction for the deliverability guard.
#[async_trait]
pub trait GuardStorage: Send + Sync {
    /// Looks up a blacklist entry by domain.
    async fn get_blacklist_entry(&self, domain: &str) -> GuardResult<Option<BlacklistEntry>>;

    /// Inserts a blacklist entry (idempotent on domain).
    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> GuardResult<()>;

    /// Gets an account by ID.
    async fn get_account(&self, id: &AccountId) -> GuardResult<Option<EmailAccount>>;

    /// Updates an account.
    async fn update_account(&self, account: &EmailAccount) -> GuardResult<()>;
}

/// Domain blacklist check plus account reputation scoring.
pub struct DeliverabilityGuard {
    storage: Arc<dyn GuardStorage>,
    deltas: ReputationDeltas,
    bounce_threshold: u32,
    /// Bounce tallies per domain, promoted into the persisted blacklist at
    /// the threshold.
    bounce_counts: Mutex<HashMap<String, u32>>,
}

impl DeliverabilityGuard {
    /// Creates a guard over the given storage.
    pub fn new(
        storage: Arc<dyn GuardStorage>,
        deltas: ReputationDeltas,
        bounce_threshold: u32,
    ) -> Self {
        Self {
            storage,
            deltas,
            bounce_threshold,
            bounce_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Whether sends to the domain are blocked.
    pub async fn is_blacklisted(&self, domain: &str) -> GuardResult<bool> {
        let domain = domain.to_lowercase();
        if SEED_BLACKLIST.contains(&domain.as_str()) {
            return Ok(true);
        }
        Ok(self.storage.get_blacklist_entry(&domain).await?.is_some())
    }

    /// Records a bounce from a domain. Crossing the configured threshold
    /// promotes the domain into the persisted blacklist.
    pub async fn record_bounce(&self, domain: &str) -> GuardResult<()> {
        let domain = domain.to_lowercase();
        let count = {
            let mut counts = self.bounce_counts.lock().expect("guard lock poisoned");
            let count = counts.entry(domain.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.bounce_threshold {
            if self.storage.get_blacklist_entry(&domain).await?.is_none() {
                tracing::warn!(domain = %domain, bounces = count, "domain blacklisted");
                self.storage
                    .insert_blacklist_entry(&BlacklistEntry {
                        domain: domain.clone(),
                        reason: format!("{} bounces", count),
                        added_at: Utc::now(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Applies a reputation delta to an account, clamped to [0, 100].
    pub async fn adjust_reputation(&self, account_id: &AccountId, delta: i32) -> GuardResult<u8> {
        let mut account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| GuardError::AccountNotFound(account_id.to_string()))?;

        account.adjust_reputation(delta);
        let reputation = account.reputation;
        self.storage.update_account(&account).await?;

        tracing::debug!(account = %account_id, delta, reputation, "reputation adjusted");
        Ok(reputation)
    }

    /// Records a successful delivery for an account.
    pub async fn record_delivery(&self, account_id: &AccountId) -> GuardResult<u8> {
        self.adjust_reputation(account_id, self.deltas.delivery).await
    }

    /// Records an open of an account's mail.
    pub async fn record_open(&self, account_id: &AccountId) -> GuardResult<u8> {
        self.adjust_reputation(account_id, self.deltas.open).await
    }

    /// Records a reply to an account's mail.
    pub async fn record_reply(&self, account_id: &AccountId) -> GuardResult<u8> {
        self.adjust_reputation(account_id, self.deltas.reply).await
    }

    /// Records a bounce against the sending account's reputation.
    pub async fn record_bounce_against(&self, account_id: &AccountId) -> GuardResult<u8> {
        self.adjust_reputation(account_id, self.deltas.bounce).await
    }

    /// Records a spam placement against the sending account's reputation.
    pub async fn record_spam_placement(&self, account_id: &AccountId) -> GuardResult<u8> {
        self.adjust_reputation(account_id, self.deltas.spam).await
    }
}
