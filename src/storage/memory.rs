//! In-memory reference store.
//!
//! Implements every service storage trait over `RwLock`-guarded maps.
//! Persistence proper is an external collaborator of the engine; this
//! store is the reference implementation used by tests and by deployments
//! that keep engine state in the host application's own database via a
//! custom trait implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{
    AccountId, BlacklistEntry, Campaign, CampaignId, EmailAccount, InboxMessage, InboxSyncState,
    Lead, LeadId, MessageId, SendKind, SendRecord, ThreadId, WarmupEmail,
};
use crate::engine::EngineStorage;
use crate::services::{
    GuardError, GuardResult, GuardStorage, InboxError, InboxResult, InboxStorage, SequenceResult,
    SequencerStorage, SyncResult, SyncStorage, WarmupError, WarmupResult, WarmupStorage,
};

/// In-memory store backing the whole engine.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountId, EmailAccount>>,
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
    leads: RwLock<HashMap<LeadId, Lead>>,
    messages: RwLock<HashMap<String, InboxMessage>>,
    warmup_emails: RwLock<HashMap<String, WarmupEmail>>,
    send_records: RwLock<HashMap<String, SendRecord>>,
    sync_states: RwLock<HashMap<AccountId, InboxSyncState>>,
    blacklist: RwLock<HashMap<String, BlacklistEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account.
    pub async fn insert_account(&self, account: EmailAccount) {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account);
    }

    /// Seeds a campaign.
    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns
            .write()
            .await
            .insert(campaign.id.clone(), campaign);
    }

    /// Seeds a lead.
    pub async fn insert_lead(&self, lead: Lead) {
        self.leads.write().await.insert(lead.id.clone(), lead);
    }

    /// Reads an account.
    pub async fn account(&self, id: &AccountId) -> Option<EmailAccount> {
        self.accounts.read().await.get(id).cloned()
    }

    /// Reads a campaign.
    pub async fn campaign(&self, id: &CampaignId) -> Option<Campaign> {
        self.campaigns.read().await.get(id).cloned()
    }

    /// Reads a lead.
    pub async fn lead(&self, id: &LeadId) -> Option<Lead> {
        self.leads.read().await.get(id).cloned()
    }

    /// Reads the sync cursor for an account.
    pub async fn sync_state(&self, account_id: &AccountId) -> Option<InboxSyncState> {
        self.sync_states.read().await.get(account_id).cloned()
    }

    /// All warmup emails, unordered.
    pub async fn warmup_emails(&self) -> Vec<WarmupEmail> {
        self.warmup_emails.read().await.values().cloned().collect()
    }

    /// All send records, unordered.
    pub async fn send_records(&self) -> Vec<SendRecord> {
        self.send_records.read().await.values().cloned().collect()
    }

    /// All stored inbox messages, unordered.
    pub async fn messages(&self) -> Vec<InboxMessage> {
        self.messages.read().await.values().cloned().collect()
    }

    async fn account_email(&self, id: &AccountId) -> Option<String> {
        self.accounts.read().await.get(id).map(|a| a.email.clone())
    }

    async fn latest_campaign_send_inner(&self, lead_id: &LeadId) -> Option<SendRecord> {
        self.send_records
            .read()
            .await
            .values()
            .filter(|r| r.kind == SendKind::Campaign && r.lead_id.as_ref() == Some(lead_id))
            .max_by_key(|r| (r.step_number.unwrap_or(0), r.sent_at))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// GuardStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl GuardStorage for MemoryStore {
    async fn get_blacklist_entry(&self, domain: &str) -> GuardResult<Option<BlacklistEntry>> {
        Ok(self.blacklist.read().await.get(domain).cloned())
    }

    async fn insert_blacklist_entry(&self, entry: &BlacklistEntry) -> GuardResult<()> {
        self.blacklist
            .write()
            .await
            .entry(entry.domain.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> GuardResult<Option<EmailAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn update_account(&self, account: &EmailAccount) -> GuardResult<()> {
        match self.accounts.write().await.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(GuardError::AccountNotFound(account.id.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SequencerStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl SequencerStorage for MemoryStore {
    async fn get_campaign(&self, id: &CampaignId) -> SequenceResult<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(id).cloned())
    }

    async fn update_campaign(&self, campaign: &Campaign) -> SequenceResult<()> {
        self.campaigns
            .write()
            .await
            .insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn leads_for_campaign(&self, campaign_id: &CampaignId) -> SequenceResult<Vec<Lead>> {
        let mut leads: Vec<Lead> = self
            .leads
            .read()
            .await
            .values()
            .filter(|l| &l.campaign_id == campaign_id)
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.enrolled_at.cmp(&b.enrolled_at));
        Ok(leads)
    }

    async fn get_lead(&self, id: &LeadId) -> SequenceResult<Option<Lead>> {
        Ok(self.leads.read().await.get(id).cloned())
    }

    async fn update_lead(&self, lead: &Lead) -> SequenceResult<()> {
        self.leads.write().await.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> SequenceResult<Option<EmailAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn update_account(&self, account: &EmailAccount) -> SequenceResult<()> {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn latest_campaign_send(&self, lead_id: &LeadId) -> SequenceResult<Option<SendRecord>> {
        Ok(self.latest_campaign_send_inner(lead_id).await)
    }

    async fn insert_send_record(&self, record: &SendRecord) -> SequenceResult<()> {
        self.send_records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_send_record(&self, record: &SendRecord) -> SequenceResult<()> {
        self.send_records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn send_record_by_tracking(
        &self,
        tracking_id: &str,
    ) -> SequenceResult<Option<SendRecord>> {
        Ok(self
            .send_records
            .read()
            .await
            .values()
            .find(|r| r.tracking_id.as_deref() == Some(tracking_id))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// WarmupStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl WarmupStorage for MemoryStore {
    async fn get_account(&self, id: &AccountId) -> WarmupResult<Option<EmailAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> WarmupResult<Option<EmailAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn active_accounts(&self) -> WarmupResult<Vec<EmailAccount>> {
        let mut accounts: Vec<EmailAccount> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(accounts)
    }

    async fn update_account(&self, account: &EmailAccount) -> WarmupResult<()> {
        match self.accounts.write().await.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(WarmupError::AccountNotFound(account.id.to_string())),
        }
    }

    async fn insert_warmup_email(&self, email: &WarmupEmail) -> WarmupResult<()> {
        self.warmup_emails
            .write()
            .await
            .insert(email.id.clone(), email.clone());
        Ok(())
    }

    async fn update_warmup_email(&self, email: &WarmupEmail) -> WarmupResult<()> {
        self.warmup_emails
            .write()
            .await
            .insert(email.id.clone(), email.clone());
        Ok(())
    }

    async fn get_warmup_email(&self, id: &str) -> WarmupResult<Option<WarmupEmail>> {
        Ok(self.warmup_emails.read().await.get(id).cloned())
    }

    async fn warmup_email_by_message_id(
        &self,
        message_id: &str,
    ) -> WarmupResult<Option<WarmupEmail>> {
        let needle = message_id.trim_matches(|c| c == '<' || c == '>');
        Ok(self
            .warmup_emails
            .read()
            .await
            .values()
            .find(|w| {
                w.message_id
                    .as_ref()
                    .map(|m| m.0.trim_matches(|c| c == '<' || c == '>') == needle)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn warmup_emails_from(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
    ) -> WarmupResult<Vec<WarmupEmail>> {
        let mut emails: Vec<WarmupEmail> = self
            .warmup_emails
            .read()
            .await
            .values()
            .filter(|w| &w.from_account_id == account_id && w.sent_at >= since)
            .cloned()
            .collect();
        emails.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        Ok(emails)
    }

    async fn count_warmup_sent(&self, account_id: &AccountId) -> WarmupResult<u64> {
        Ok(self
            .warmup_emails
            .read()
            .await
            .values()
            .filter(|w| {
                &w.from_account_id == account_id
                    && w.status != crate::domain::WarmupEmailStatus::Failed
            })
            .count() as u64)
    }

    async fn warmup_thread_len(&self, thread_id: &ThreadId) -> WarmupResult<u64> {
        Ok(self
            .warmup_emails
            .read()
            .await
            .values()
            .filter(|w| w.thread_id.as_ref() == Some(thread_id))
            .count() as u64)
    }

    async fn insert_send_record(&self, record: &SendRecord) -> WarmupResult<()> {
        self.send_records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SyncStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl SyncStorage for MemoryStore {
    async fn get_account(&self, id: &AccountId) -> SyncResult<Option<EmailAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn update_account(&self, account: &EmailAccount) -> SyncResult<()> {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_sync_state(&self, account_id: &AccountId) -> SyncResult<Option<InboxSyncState>> {
        Ok(self.sync_states.read().await.get(account_id).cloned())
    }

    async fn upsert_sync_state(&self, state: &InboxSyncState) -> SyncResult<()> {
        self.sync_states
            .write()
            .await
            .insert(state.account_id.clone(), state.clone());
        Ok(())
    }

    async fn insert_message_if_absent(&self, message: &InboxMessage) -> SyncResult<bool> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.message_id.0) {
            return Ok(false);
        }
        messages.insert(message.message_id.0.clone(), message.clone());
        Ok(true)
    }

    async fn find_lead_by_email(&self, email: &str) -> SyncResult<Option<Lead>> {
        Ok(self
            .leads
            .read()
            .await
            .values()
            .find(|l| l.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_lead(&self, lead: &Lead) -> SyncResult<()> {
        self.leads.write().await.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: &CampaignId) -> SyncResult<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(id).cloned())
    }

    async fn update_campaign(&self, campaign: &Campaign) -> SyncResult<()> {
        self.campaigns
            .write()
            .await
            .insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    async fn latest_campaign_send(&self, lead_id: &LeadId) -> SyncResult<Option<SendRecord>> {
        Ok(self.latest_campaign_send_inner(lead_id).await)
    }

    async fn update_send_record(&self, record: &SendRecord) -> SyncResult<()> {
        self.send_records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn send_records_for_account(
        &self,
        account_id: &AccountId,
    ) -> SyncResult<Vec<SendRecord>> {
        Ok(self
            .send_records
            .read()
            .await
            .values()
            .filter(|r| &r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn warmup_pairs_for_account(
        &self,
        account_id: &AccountId,
    ) -> SyncResult<Vec<(String, String)>> {
        let warmups: Vec<(AccountId, AccountId)> = self
            .warmup_emails
            .read()
            .await
            .values()
            .filter(|w| &w.from_account_id == account_id || &w.to_account_id == account_id)
            .map(|w| (w.from_account_id.clone(), w.to_account_id.clone()))
            .collect();

        let mut pairs = Vec::new();
        for (from_id, to_id) in warmups {
            if let (Some(from), Some(to)) = (
                self.account_email(&from_id).await,
                self.account_email(&to_id).await,
            ) {
                pairs.push((from, to));
            }
        }
        Ok(pairs)
    }
}

// ---------------------------------------------------------------------------
// InboxStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl InboxStorage for MemoryStore {
    async fn get_account(&self, id: &AccountId) -> InboxResult<Option<EmailAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn messages_for_account(
        &self,
        account_id: &AccountId,
    ) -> InboxResult<Vec<InboxMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .values()
            .filter(|m| &m.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_message(&self, message_id: &MessageId) -> InboxResult<Option<InboxMessage>> {
        Ok(self.messages.read().await.get(&message_id.0).cloned())
    }

    async fn update_message(&self, message: &InboxMessage) -> InboxResult<()> {
        match self.messages.write().await.get_mut(&message.message_id.0) {
            Some(existing) => {
                *existing = message.clone();
                Ok(())
            }
            None => Err(InboxError::MessageNotFound(message.message_id.to_string())),
        }
    }

    async fn insert_send_record(&self, record: &SendRecord) -> InboxResult<()> {
        self.send_records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineStorage
// ---------------------------------------------------------------------------

#[async_trait]
impl EngineStorage for MemoryStore {
    async fn active_accounts(&self) -> anyhow::Result<Vec<EmailAccount>> {
        let mut accounts: Vec<EmailAccount> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(accounts)
    }

    async fn active_campaigns(&self) -> anyhow::Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .await
            .values()
            .filter(|c| c.status == crate::domain::CampaignStatus::Active)
            .cloned()
            .collect())
    }
}
