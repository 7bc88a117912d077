//! Inbox synchronization.
//!
//! One [`InboxSynchronizer`] serves all accounts. Each `sync` call is an
//! incremental pass over one account's mailbox: fetch everything past the
//! persisted UID cursor, classify each message, apply the side effects
//! (lead replied, lead bounced, warmup reputation), and persist the
//! message idempotently.
//!
//! Concurrency: syncs for the same account are mutually exclusive via a
//! per-account lock; different accounts sync independently. The cursor
//! only ever advances past fully processed messages, so a failure mid
//! batch resumes at-least-once from the last confirmed UID.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mail_parser::MessageParser;
use mail_parser::MimeHeaders;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use super::deliverability_service::DeliverabilityGuard;
use super::warmup_service::WarmupController;
use crate::config::{RetryPolicy, SyncEngineSettings};
use crate::domain::{
    AccountId, Address, Campaign, CampaignId, Classification, EmailAccount, InboundEnvelope,
    InboxMessage, InboxSyncState, Lead, LeadId, LeadStatus, MessageClassifier, MessageContent,
    MessageFlags, MessageId, SendRecord, SendStatus, SentIndex, SequenceStatus, SyncStatus,
    ThreadId,
};
use crate::providers::{with_backoff, FetchQuery, ImapClient, RawMessage, WARMUP_HEADER};

/// Errors that can occur during inbox sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync for this account is already running.
    #[error("sync already running for account: {0}")]
    AlreadyRunning(String),

    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Account is disabled.
    #[error("account inactive: {0}")]
    AccountInactive(String),

    /// Authentication failed; the account has been disabled.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or protocol failure after retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Counters from one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Messages processed this pass.
    pub processed: u64,
    /// Campaign replies found.
    pub replies_found: u64,
    /// Bounces found.
    pub bounces_found: u64,
}

/// Storage abstraction for the synchronizer.
#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// Gets an account by ID.
    async fn get_account(&self, id: &AccountId) -> SyncResult<Option<EmailAccount>>;

    /// Updates an account (used to disable on auth failure).
    async fn update_account(&self, account: &EmailAccount) -> SyncResult<()>;

    /// Gets the sync cursor for an account.
    async fn get_sync_state(&self, account_id: &AccountId) -> SyncResult<Option<InboxSyncState>>;

    /// Creates or replaces the sync cursor for an account.
    async fn upsert_sync_state(&self, state: &InboxSyncState) -> SyncResult<()>;

    /// Stores a message unless one with the same Message-ID exists.
    /// Returns whether the message was inserted.
    async fn insert_message_if_absent(&self, message: &InboxMessage) -> SyncResult<bool>;

    /// Finds a lead by address, across campaigns.
    async fn find_lead_by_email(&self, email: &str) -> SyncResult<Option<Lead>>;

    /// Updates a lead.
    async fn update_lead(&self, lead: &Lead) -> SyncResult<()>;

    /// Gets a campaign by ID.
    async fn get_campaign(&self, id: &CampaignId) -> SyncResult<Option<Campaign>>;

    /// Updates a campaign.
    async fn update_campaign(&self, campaign: &Campaign) -> SyncResult<()>;

    /// The most recent campaign send record for a lead.
    async fn latest_campaign_send(&self, lead_id: &LeadId) -> SyncResult<Option<SendRecord>>;

    /// Updates a send log entry.
    async fn update_send_record(&self, record: &SendRecord) -> SyncResult<()>;

    /// All send records originated by an account, for the sent index.
    async fn send_records_for_account(&self, account_id: &AccountId)
        -> SyncResult<Vec<SendRecord>>;

    /// (from, to) address pairs of recorded warmup exchanges touching an
    /// account, for the sent index.
    async fn warmup_pairs_for_account(
        &self,
        account_id: &AccountId,
    ) -> SyncResult<Vec<(String, String)>>;
}

/// Per-account incremental inbox synchronizer.
pub struct InboxSynchronizer {
    storage: Arc<dyn SyncStorage>,
    imap: Arc<dyn ImapClient>,
    classifier: MessageClassifier,
    guard: Arc<DeliverabilityGuard>,
    warmup: Arc<WarmupController>,
    settings: SyncEngineSettings,
    retry: RetryPolicy,
    locks: std::sync::Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl InboxSynchronizer {
    /// Creates a synchronizer.
    pub fn new(
        storage: Arc<dyn SyncStorage>,
        imap: Arc<dyn ImapClient>,
        guard: Arc<DeliverabilityGuard>,
        warmup: Arc<WarmupController>,
        settings: SyncEngineSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            imap,
            classifier: MessageClassifier::new(),
            guard,
            warmup,
            settings,
            retry,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn account_lock(&self, account_id: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("sync lock map poisoned");
        Arc::clone(
            locks
                .entry(account_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Runs one incremental sync pass for an account.
    pub async fn sync(&self, account_id: &AccountId) -> SyncResult<SyncOutcome> {
        let lock = self.account_lock(account_id);
        let Ok(_guard) = lock.try_lock() else {
            return Err(SyncError::AlreadyRunning(account_id.to_string()));
        };

        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;
        if !account.is_active {
            return Err(SyncError::AccountInactive(account.email.clone()));
        }

        let mut state = self
            .storage
            .get_sync_state(account_id)
            .await?
            .unwrap_or_else(|| InboxSyncState::new(account_id.clone()));
        state.sync_status = SyncStatus::Syncing;
        state.error_message = None;
        self.storage.upsert_sync_state(&state).await?;

        let result = self.run_sync(&account, &mut state).await;

        match result {
            Ok(outcome) => {
                state.sync_status = SyncStatus::Idle;
                state.last_sync_at = Some(Utc::now());
                state.emails_processed += outcome.processed;
                state.replies_found += outcome.replies_found;
                state.bounces_found += outcome.bounces_found;
                self.storage.upsert_sync_state(&state).await?;

                tracing::info!(
                    account = %account.email,
                    processed = outcome.processed,
                    replies = outcome.replies_found,
                    bounces = outcome.bounces_found,
                    "inbox sync complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                // The cursor already reflects every fully processed
                // message; persist it with the failure so the next pass
                // resumes without a gap.
                state.sync_status = SyncStatus::Error;
                state.error_message = Some(e.to_string());
                self.storage.upsert_sync_state(&state).await?;

                if let SyncError::Authentication(_) = &e {
                    let mut disabled = account.clone();
                    disabled.is_active = false;
                    self.storage.update_account(&disabled).await?;
                    tracing::error!(account = %account.email, "account disabled after authentication failure");
                }
                Err(e)
            }
        }
    }

    async fn run_sync(
        &self,
        account: &EmailAccount,
        state: &mut InboxSyncState,
    ) -> SyncResult<SyncOutcome> {
        let lookback =
            Utc::now() - ChronoDuration::days(self.settings.initial_lookback_days as i64);
        let query = match state.last_uid {
            Some(last_uid) => FetchQuery::SinceUid(last_uid),
            None => FetchQuery::SinceDate(lookback),
        };

        let mut batch = self.fetch(account, "INBOX", query).await?;

        // A changed UIDVALIDITY invalidates every persisted UID; fall back
        // to a windowed re-sync.
        if let (Some(stored), Some(current)) = (state.uid_validity, batch.uid_validity) {
            if stored != current {
                tracing::warn!(
                    account = %account.email,
                    stored,
                    current,
                    "UIDVALIDITY changed, resetting sync cursor"
                );
                state.last_uid = None;
                batch = self
                    .fetch(account, "INBOX", FetchQuery::SinceDate(lookback))
                    .await?;
            }
        }
        state.uid_validity = batch.uid_validity.or(state.uid_validity);

        let index = self.build_sent_index(&account.id).await?;
        let mut outcome = SyncOutcome::default();

        for raw in &batch.messages {
            self.process_message(account, raw, &index, &mut outcome)
                .await?;
            // Only advance past messages whose side effects are all
            // persisted; a failure above leaves the cursor at the previous
            // message.
            state.advance_uid(raw.uid);
        }

        Ok(outcome)
    }

    async fn fetch(
        &self,
        account: &EmailAccount,
        mailbox: &str,
        query: FetchQuery,
    ) -> SyncResult<crate::providers::FetchBatch> {
        with_backoff(&self.retry, |e: &crate::providers::TransportError| e.is_transient(), || {
            self.imap.fetch_since(account, mailbox, query)
        })
        .await
        .map_err(|e| match e {
            crate::providers::TransportError::Authentication(msg) => {
                SyncError::Authentication(msg)
            }
            other => SyncError::Transport(other.to_string()),
        })
    }

    async fn build_sent_index(&self, account_id: &AccountId) -> SyncResult<SentIndex> {
        let mut index = SentIndex::new();

        for record in self.storage.send_records_for_account(account_id).await? {
            if let Some(message_id) = &record.message_id {
                index.add_message_id(&message_id.0);
            }
            index.add_subject(&record.subject);
        }

        for (from, to) in self.storage.warmup_pairs_for_account(account_id).await? {
            index.add_warmup_pair(&from, &to);
        }

        Ok(index)
    }

    /// Processes one fetched message: parse, classify, dispatch, persist.
    ///
    /// Parse failures are logged and skipped without failing the pass; the
    /// message is counted as processed so the cursor can move past it.
    async fn process_message(
        &self,
        account: &EmailAccount,
        raw: &RawMessage,
        index: &SentIndex,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        outcome.processed += 1;

        let Some(envelope) = parse_envelope(&raw.body) else {
            tracing::warn!(account = %account.email, uid = raw.uid, "unparseable message skipped");
            return Ok(());
        };

        let classification = self.classifier.classify(&envelope, index);

        let message_id = envelope
            .message_id
            .clone()
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        // Corrected thread fallback chain: references root, then the
        // message being replied to, then the message's own id.
        let thread_id = envelope
            .references
            .first()
            .or(envelope.in_reply_to.first())
            .cloned()
            .unwrap_or_else(|| message_id.clone());

        let is_reply = !envelope.in_reply_to.is_empty()
            || matches!(
                classification,
                Classification::CampaignReply | Classification::WarmupReply
            );

        let message = InboxMessage {
            message_id: MessageId::from(message_id),
            thread_id: Some(ThreadId::from(thread_id)),
            account_id: account.id.clone(),
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            subject: envelope.subject.clone(),
            content: MessageContent {
                text: envelope.text.clone(),
                html: envelope.html.clone(),
            },
            flags: MessageFlags {
                is_read: false,
                is_starred: false,
                is_warmup: matches!(classification, Classification::WarmupReply)
                    || envelope.warmup_ref.is_some(),
                is_reply,
                sent_by_me: envelope.from.email.eq_ignore_ascii_case(&account.email),
            },
            uid: raw.uid,
            received_at: envelope
                .date
                .or(raw.internal_date)
                .unwrap_or_else(Utc::now),
        };

        // Dedup invariant: at most one stored message per Message-ID. A
        // duplicate means an earlier overlapping sync already applied the
        // side effects.
        if !self.storage.insert_message_if_absent(&message).await? {
            tracing::debug!(message_id = %message.message_id, "duplicate message skipped");
            return Ok(());
        }

        match classification {
            Classification::CampaignReply => {
                outcome.replies_found += 1;
                self.apply_reply(account, &envelope).await?;
            }
            Classification::WarmupReply => {
                let warmup = Arc::clone(&self.warmup);
                if let Err(e) = warmup.handle_inbound_warmup(account, &envelope, Utc::now()).await {
                    tracing::warn!(error = %e, "warmup reply handling failed");
                }
            }
            Classification::Bounce => {
                outcome.bounces_found += 1;
                self.apply_bounce(account, &envelope).await?;
            }
            Classification::Unrelated => {}
        }

        Ok(())
    }

    /// A lead replied: stop sequencing and feed campaign stats.
    async fn apply_reply(
        &self,
        _account: &EmailAccount,
        envelope: &InboundEnvelope,
    ) -> SyncResult<()> {
        let Some(mut lead) = self
            .storage
            .find_lead_by_email(&envelope.from.email)
            .await?
        else {
            return Ok(());
        };

        lead.promote(LeadStatus::Replied);
        if !lead.sequence_status.is_terminal() {
            lead.sequence_status = SequenceStatus::Replied;
        }
        self.storage.update_lead(&lead).await?;
        tracing::info!(lead = %lead.id, "lead replied, sequencing stopped");

        if let Some(mut record) = self.storage.latest_campaign_send(&lead.id).await? {
            if !matches!(record.status, SendStatus::Replied) {
                record.status = SendStatus::Replied;
                record.replied_at = Some(Utc::now());
                self.storage.update_send_record(&record).await?;
            }
        }

        if let Some(mut campaign) = self.storage.get_campaign(&lead.campaign_id).await? {
            campaign.stats.replied += 1;
            self.storage.update_campaign(&campaign).await?;
        }
        Ok(())
    }

    /// A bounce came back: absorb the lead, demote reputation, and feed
    /// the domain blacklist.
    async fn apply_bounce(
        &self,
        account: &EmailAccount,
        envelope: &InboundEnvelope,
    ) -> SyncResult<()> {
        let Some(bounced_address) = extract_bounced_address(envelope) else {
            tracing::debug!("bounce with no recoverable recipient address");
            return Ok(());
        };

        if let Err(e) = self.guard.record_bounce_against(&account.id).await {
            tracing::warn!(error = %e, "reputation update failed");
        }

        let domain = bounced_address
            .rsplit('@')
            .next()
            .unwrap_or("")
            .to_string();
        if !domain.is_empty() {
            if let Err(e) = self.guard.record_bounce(&domain).await {
                tracing::warn!(error = %e, "bounce bookkeeping failed");
            }
        }

        let Some(mut lead) = self.storage.find_lead_by_email(&bounced_address).await? else {
            return Ok(());
        };

        lead.promote(LeadStatus::Bounced);
        if !lead.sequence_status.is_terminal() {
            lead.sequence_status = SequenceStatus::Bounced;
        }
        self.storage.update_lead(&lead).await?;
        tracing::info!(lead = %lead.id, address = %bounced_address, "lead bounced");

        if let Some(mut record) = self.storage.latest_campaign_send(&lead.id).await? {
            if !matches!(record.status, SendStatus::Bounced) {
                record.status = SendStatus::Bounced;
                record.bounced_at = Some(Utc::now());
                self.storage.update_send_record(&record).await?;
            }
        }

        if let Some(mut campaign) = self.storage.get_campaign(&lead.campaign_id).await? {
            campaign.stats.bounced += 1;
            campaign.stats.delivered = campaign.stats.delivered.saturating_sub(1);
            self.storage.update_campaign(&campaign).await?;
        }
        Ok(())
    }

    /// Scans the spam folder for misplaced warmup mail and feeds the
    /// placements back into warmup reputation.
    pub async fn scan_spam(&self, account_id: &AccountId) -> SyncResult<u64> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;

        let lookback =
            Utc::now() - ChronoDuration::days(self.settings.initial_lookback_days as i64);
        let batch = self
            .fetch(&account, "Junk", FetchQuery::SinceDate(lookback))
            .await?;

        let mut placements = 0u64;
        for raw in &batch.messages {
            let Some(envelope) = parse_envelope(&raw.body) else {
                continue;
            };
            if let Some(warmup_ref) = &envelope.warmup_ref {
                if let Err(e) = self.warmup.record_spam_placement(warmup_ref).await {
                    tracing::warn!(error = %e, "spam placement handling failed");
                    continue;
                }
                placements += 1;
            }
        }

        if placements > 0 {
            if let Some(mut state) = self.storage.get_sync_state(account_id).await? {
                state.spam_placements += placements;
                self.storage.upsert_sync_state(&state).await?;
            }
            tracing::warn!(account = %account.email, placements, "warmup mail found in spam");
        }
        Ok(placements)
    }
}

/// Parses raw RFC 5322 source into the classifier's envelope view.
pub fn parse_envelope(raw: &[u8]) -> Option<InboundEnvelope> {
    let message = MessageParser::default().parse(raw)?;

    let parse_addr = |addr: &mail_parser::Addr<'_>| Address {
        email: addr.address().unwrap_or("").to_string(),
        name: addr.name().map(|s| s.to_string()),
    };

    let from = message
        .from()
        .and_then(|addr| addr.as_list())
        .and_then(|list| list.first())
        .map(parse_addr)?;

    let to = message
        .to()
        .and_then(|addr| addr.as_list())
        .map(|list| list.iter().map(parse_addr).collect())
        .unwrap_or_default();

    let header_ids = |value: &mail_parser::HeaderValue<'_>| -> Vec<String> {
        if let Some(list) = value.as_text_list() {
            list.iter().map(|s| s.to_string()).collect()
        } else {
            value.as_text().map(|s| vec![s.to_string()]).unwrap_or_default()
        }
    };

    let is_delivery_status = message
        .content_type()
        .map(|ct| {
            ct.ctype().eq_ignore_ascii_case("multipart")
                && ct
                    .subtype()
                    .map(|s| s.eq_ignore_ascii_case("report"))
                    .unwrap_or(false)
                && ct
                    .attribute("report-type")
                    .map(|v| v.eq_ignore_ascii_case("delivery-status"))
                    .unwrap_or(false)
        })
        .unwrap_or(false);

    Some(InboundEnvelope {
        message_id: message.message_id().map(|s| s.to_string()),
        in_reply_to: header_ids(message.in_reply_to()),
        references: header_ids(message.references()),
        from,
        to,
        subject: message.subject().unwrap_or("(no subject)").to_string(),
        text: message
            .body_text(0)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        html: message.body_html(0).map(|s| s.to_string()),
        date: message
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
        warmup_ref: message
            .header(WARMUP_HEADER)
            .and_then(|v| v.as_text())
            .map(|s| s.to_string()),
        is_delivery_status,
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex is valid")
    })
}

/// Pulls the bounced recipient's address out of a DSN, preferring the
/// subject line and falling back to the body.
pub fn extract_bounced_address(envelope: &InboundEnvelope) -> Option<String> {
    let re = email_regex();
    re.find(&envelope.subject)
        .or_else(|| re.find(&envelope.text))
        .map(|m| m.as_str().to_lowercase())
}
