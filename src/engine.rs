//! Engine assembly and background workers.
//!
//! The [`Engine`] wires storage, transports, and services together and
//! runs the periodic workers: one inbox-sync pass per active account, one
//! warmup tick on a randomized cadence, and one sequencing pass per
//! active campaign. It also exposes the operations the surrounding
//! application consumes: warmup control, immediate campaign runs,
//! analytics, inbox access, and manual replies.
//!
//! Workers are independent tasks sharing only the throttler; stopping the
//! engine flips a flag that halts future admissions while in-flight work
//! runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;

use crate::config::EngineSettings;
use crate::domain::{
    AccountId, Campaign, CampaignId, EmailAccount, InboxMessage, InboxSyncState, LeadId,
    MessageId, SendRecord, ThrottleSettings, WarmupEmail,
};
use crate::providers::{DnsResolver, ImapClient, MailTransport};
use crate::services::{
    CampaignAnalytics, CampaignSequencer, DeliverabilityGuard, GuardStorage, InboxFilter,
    InboxService, InboxStorage, InboxSynchronizer, Pagination, RunReport, SequencerStorage,
    SyncError, SyncOutcome, SyncStorage, Throttler, WarmupAnalytics, WarmupController,
    WarmupStorage, WarmupTickReport,
};

/// Storage the engine itself needs to drive its workers and analytics.
#[async_trait]
pub trait EngineStorage: Send + Sync {
    /// All active accounts.
    async fn active_accounts(&self) -> Result<Vec<EmailAccount>>;

    /// All campaigns currently in the active state.
    async fn active_campaigns(&self) -> Result<Vec<Campaign>>;
}

/// The assembled outreach engine.
pub struct Engine {
    storage: Arc<dyn EngineStorage>,
    throttler: Arc<Throttler>,
    guard: Arc<DeliverabilityGuard>,
    sequencer: Arc<CampaignSequencer>,
    warmup: Arc<WarmupController>,
    sync: Arc<InboxSynchronizer>,
    inbox: InboxService,
    analytics_store: AnalyticsHandles,
    settings: EngineSettings,
    stop_flag: AtomicBool,
}

/// Narrow handles the analytics operations read through.
struct AnalyticsHandles {
    sequencer: Arc<dyn SequencerStorage>,
    warmup: Arc<dyn WarmupStorage>,
    sync: Arc<dyn SyncStorage>,
}

impl Engine {
    /// Assembles an engine over one store and the given providers.
    ///
    /// The store must implement every service storage trait; in practice
    /// that is [`MemoryStore`](crate::storage::MemoryStore) or the host
    /// application's own adapter.
    pub fn new<S>(
        store: Arc<S>,
        transport: Arc<dyn MailTransport>,
        imap: Arc<dyn ImapClient>,
        dns: Arc<dyn DnsResolver>,
        settings: EngineSettings,
    ) -> Arc<Self>
    where
        S: GuardStorage
            + SequencerStorage
            + WarmupStorage
            + SyncStorage
            + InboxStorage
            + EngineStorage
            + 'static,
    {
        let throttler = Arc::new(Throttler::new());
        let guard = Arc::new(DeliverabilityGuard::new(
            Arc::clone(&store) as Arc<dyn GuardStorage>,
            settings.warmup.reputation,
            settings.deliverability.bounce_blacklist_threshold,
        ));

        let warmup_throttle = ThrottleSettings {
            emails_per_hour: 0, // per-account hourly rate is supplied at admission
            delay_between_emails_secs: settings.warmup.delay_between_sends_secs,
            randomize_delay: true,
            separate_warmup_pool: settings.warmup.separate_pool,
        };

        let warmup = Arc::new(WarmupController::new(
            Arc::clone(&store) as Arc<dyn WarmupStorage>,
            Arc::clone(&throttler),
            Arc::clone(&guard),
            Arc::clone(&transport),
            dns,
            settings.warmup.clone(),
            warmup_throttle,
            settings.retry,
        ));

        let sequencer = Arc::new(CampaignSequencer::new(
            Arc::clone(&store) as Arc<dyn SequencerStorage>,
            Arc::clone(&throttler),
            Arc::clone(&guard),
            Arc::clone(&transport),
            settings.retry,
            settings.tracking_pixel_base.clone(),
        ));

        let sync = Arc::new(InboxSynchronizer::new(
            Arc::clone(&store) as Arc<dyn SyncStorage>,
            imap,
            Arc::clone(&guard),
            Arc::clone(&warmup),
            settings.sync.clone(),
            settings.retry,
        ));

        let inbox = InboxService::new(
            Arc::clone(&store) as Arc<dyn InboxStorage>,
            Arc::clone(&transport),
        );

        Arc::new(Self {
            storage: Arc::clone(&store) as Arc<dyn EngineStorage>,
            throttler,
            guard,
            sequencer,
            warmup,
            sync,
            inbox,
            analytics_store: AnalyticsHandles {
                sequencer: store.clone() as Arc<dyn SequencerStorage>,
                warmup: store.clone() as Arc<dyn WarmupStorage>,
                sync: store as Arc<dyn SyncStorage>,
            },
            settings,
            stop_flag: AtomicBool::new(true),
        })
    }

    /// The shared throttler, exposed for inspection.
    pub fn throttler(&self) -> &Arc<Throttler> {
        &self.throttler
    }

    /// The deliverability guard, exposed for inspection.
    pub fn guard(&self) -> &Arc<DeliverabilityGuard> {
        &self.guard
    }

    // -----------------------------------------------------------------
    // Background workers
    // -----------------------------------------------------------------

    /// Starts the background workers.
    ///
    /// Call on an `Arc<Engine>`; the workers hold their own handles, so
    /// the caller keeps its clone for control and queries.
    pub fn start(self: Arc<Self>) {
        self.stop_flag.store(false, Ordering::SeqCst);
        Self::spawn_sync_worker(Arc::clone(&self));
        Self::spawn_warmup_worker(Arc::clone(&self));
        Self::spawn_sequencer_worker(self);
        tracing::info!("engine workers started");
    }

    /// Stops future admissions. In-flight operations run to completion.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        tracing::info!("engine stopping");
    }

    /// Whether the workers are running.
    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }

    fn spawn_sync_worker(engine: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if engine.stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                match engine.storage.active_accounts().await {
                    Ok(accounts) => {
                        // Accounts sync in parallel; a hung session for one
                        // never blocks the others. Per-account exclusion
                        // lives inside the synchronizer.
                        for account in accounts {
                            let engine = Arc::clone(&engine);
                            tokio::spawn(async move {
                                match engine.sync.sync(&account.id).await {
                                    Ok(_) => {}
                                    Err(SyncError::AlreadyRunning(_)) => {
                                        tracing::debug!(account = %account.email, "sync still running, skipped");
                                    }
                                    Err(e) => {
                                        tracing::warn!(account = %account.email, error = %e, "inbox sync failed");
                                    }
                                }
                            });
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "could not list accounts for sync"),
                }

                sleep(engine.settings.sync.interval).await;
            }
        });
    }

    fn spawn_warmup_worker(engine: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if engine.stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = engine.warmup.tick(Utc::now()).await {
                    tracing::warn!(error = %e, "warmup tick failed");
                }

                // Randomized cadence so the warmup pattern never repeats
                // on a fixed clock.
                let min = engine.settings.warmup.min_tick_interval;
                let max = engine.settings.warmup.max_tick_interval.max(min);
                let delay = if max > min {
                    let spread = (max - min).as_secs();
                    min + std::time::Duration::from_secs(
                        rand::thread_rng().gen_range(0..=spread),
                    )
                } else {
                    min
                };
                tracing::debug!(secs = delay.as_secs(), "next warmup tick scheduled");
                sleep(delay).await;
            }
        });
    }

    fn spawn_sequencer_worker(engine: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if engine.stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                match engine.storage.active_campaigns().await {
                    Ok(campaigns) => {
                        for campaign in campaigns {
                            if engine.stop_flag.load(Ordering::SeqCst) {
                                break;
                            }
                            if let Err(e) =
                                engine.sequencer.run_campaign(&campaign.id, Utc::now()).await
                            {
                                tracing::warn!(campaign = %campaign.id, error = %e, "sequencing pass failed");
                            }
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "could not list active campaigns"),
                }

                sleep(engine.settings.sequencer_tick_interval).await;
            }
        });
    }

    // -----------------------------------------------------------------
    // Exposed operations
    // -----------------------------------------------------------------

    /// Validates and enables warmup for an account.
    pub async fn start_warmup(&self, account_id: &AccountId) -> Result<EmailAccount> {
        Ok(self.warmup.start_warmup(account_id).await?)
    }

    /// Pauses warmup for an account.
    pub async fn pause_warmup(&self, account_id: &AccountId) -> Result<EmailAccount> {
        Ok(self.warmup.pause_warmup(account_id).await?)
    }

    /// Resumes a paused warmup.
    pub async fn resume_warmup(&self, account_id: &AccountId) -> Result<EmailAccount> {
        Ok(self.warmup.resume_warmup(account_id).await?)
    }

    /// Stops warmup for an account.
    pub async fn stop_warmup(&self, account_id: &AccountId) -> Result<EmailAccount> {
        Ok(self.warmup.stop_warmup(account_id).await?)
    }

    /// Runs one warmup pass immediately.
    pub async fn run_warmup_now(&self) -> Result<WarmupTickReport> {
        Ok(self.warmup.tick(Utc::now()).await?)
    }

    /// Runs one sequencing pass over a campaign immediately.
    pub async fn run_campaign_now(&self, campaign_id: &CampaignId) -> Result<RunReport> {
        Ok(self.sequencer.run_campaign(campaign_id, Utc::now()).await?)
    }

    /// Runs one inbox sync pass for an account immediately.
    pub async fn sync_inbox_now(&self, account_id: &AccountId) -> Result<SyncOutcome> {
        Ok(self.sync.sync(account_id).await?)
    }

    /// Scans an account's spam folder for misplaced warmup mail and
    /// returns the number of placements found.
    pub async fn scan_spam_now(&self, account_id: &AccountId) -> Result<u64> {
        Ok(self.sync.scan_spam(account_id).await?)
    }

    /// Records a tracking-pixel open.
    pub async fn record_open(&self, tracking_id: &str) -> Result<()> {
        Ok(self.sequencer.record_open(tracking_id, Utc::now()).await?)
    }

    /// Records a link click for a lead.
    pub async fn record_click(&self, lead_id: &LeadId) -> Result<()> {
        Ok(self.sequencer.record_click(lead_id, Utc::now()).await?)
    }

    /// Records an unsubscribe for a lead.
    pub async fn record_unsubscribe(&self, lead_id: &LeadId) -> Result<()> {
        Ok(self.sequencer.record_unsubscribe(lead_id).await?)
    }

    /// Campaign analytics with derived rates.
    pub async fn campaign_analytics(&self, campaign_id: &CampaignId) -> Result<CampaignAnalytics> {
        let campaign = self
            .analytics_store
            .sequencer
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("campaign not found: {}", campaign_id))?;
        Ok(CampaignAnalytics::from_campaign(&campaign))
    }

    /// Warmup analytics for an account.
    pub async fn warmup_analytics(&self, account_id: &AccountId) -> Result<WarmupAnalytics> {
        let account = WarmupStorage::get_account(self.analytics_store.warmup.as_ref(), account_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account not found: {}", account_id))?;

        let epoch = chrono::DateTime::<Utc>::MIN_UTC;
        let history: Vec<WarmupEmail> = self
            .analytics_store
            .warmup
            .warmup_emails_from(account_id, epoch)
            .await?;
        let sync_state: Option<InboxSyncState> = self
            .analytics_store
            .sync
            .get_sync_state(account_id)
            .await?;

        Ok(WarmupAnalytics::from_history(
            &account,
            &history,
            sync_state.as_ref(),
        ))
    }

    /// Lists an account's inbox through a filter.
    pub async fn list_inbox(
        &self,
        account_id: &AccountId,
        filter: &InboxFilter,
        pagination: Pagination,
    ) -> Result<Vec<InboxMessage>> {
        Ok(self.inbox.list(account_id, filter, pagination).await?)
    }

    /// Marks an inbox message read or unread.
    pub async fn mark_read(&self, message_id: &MessageId, read: bool) -> Result<()> {
        Ok(self.inbox.mark_read(message_id, read).await?)
    }

    /// Stars or unstars an inbox message.
    pub async fn star(&self, message_id: &MessageId, starred: bool) -> Result<()> {
        Ok(self.inbox.star(message_id, starred).await?)
    }

    /// Sends a manual reply to a stored message.
    pub async fn send_manual_reply(
        &self,
        account_id: &AccountId,
        message_id: &MessageId,
        body: String,
    ) -> Result<SendRecord> {
        Ok(self.inbox.send_reply(account_id, message_id, body).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MailProviderKind, SmtpSettings, WarmupStatus};
    use crate::providers::{
        FetchBatch, FetchQuery, OutgoingMessage, SendReceipt, TransportResult,
    };
    use crate::storage::MemoryStore;

    struct NullTransport;

    #[async_trait]
    impl MailTransport for NullTransport {
        async fn send(
            &self,
            account: &EmailAccount,
            _message: &OutgoingMessage,
        ) -> TransportResult<SendReceipt> {
            Ok(SendReceipt {
                message_id: MessageId::from(format!("<null@{}>", account.domain())),
            })
        }
    }

    struct NullImap;

    #[async_trait]
    impl ImapClient for NullImap {
        async fn fetch_since(
            &self,
            _account: &EmailAccount,
            _mailbox: &str,
            _query: FetchQuery,
        ) -> TransportResult<FetchBatch> {
            Ok(FetchBatch::default())
        }
    }

    struct NullDns;

    #[async_trait]
    impl DnsResolver for NullDns {
        async fn resolve_mx(&self, _domain: &str) -> TransportResult<Vec<String>> {
            Ok(vec!["mx.example.com.".to_string()])
        }

        async fn resolve_txt(&self, _name: &str) -> TransportResult<Vec<String>> {
            Ok(vec![])
        }
    }

    fn engine() -> Arc<Engine> {
        let store = Arc::new(MemoryStore::new());
        Engine::new(
            store,
            Arc::new(NullTransport),
            Arc::new(NullImap),
            Arc::new(NullDns),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn engine_starts_stopped() {
        let engine = engine();
        assert!(!engine.is_running());
        Arc::clone(&engine).start();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn warmup_start_requires_known_account() {
        let engine = engine();
        let result = engine.start_warmup(&AccountId::from("ghost")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn warmup_start_validates_dns() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(EmailAccount {
                id: AccountId::from("acct-1"),
                email: "alice@example.com".to_string(),
                display_name: None,
                provider: MailProviderKind::Custom,
                smtp: SmtpSettings {
                    host: "smtp.example.com".to_string(),
                    port: 587,
                    username: "alice@example.com".to_string(),
                    password: "pw".to_string(),
                },
                imap: None,
                daily_limit: 50,
                reputation: 50,
                warmup_status: WarmupStatus::NotStarted,
                warmup_settings: None,
                warmup_started_at: None,
                is_active: true,
                dns_health: None,
            })
            .await;

        let engine = Engine::new(
            Arc::clone(&store),
            Arc::new(NullTransport),
            Arc::new(NullImap),
            Arc::new(NullDns),
            EngineSettings::default(),
        );

        let account = engine
            .start_warmup(&AccountId::from("acct-1"))
            .await
            .unwrap();
        let health = account.dns_health.expect("dns recorded");
        assert!(health.mx);
        assert!(account.warmup_settings.unwrap().enabled);
        // In-progress only after the first successful send.
        assert_eq!(account.warmup_status, WarmupStatus::NotStarted);
    }
}
