//! Mailbox warmup.
//!
//! The [`WarmupController`] gradually builds sender reputation by
//! exchanging natural-looking mail between the operator's own accounts on
//! a ramp-up cadence. Content is assembled from independently sampled
//! pools through an injected random source, every send carries a hidden
//! correlation header, and inbox sync feeds replies and spam placements
//! back into reputation and warmup status.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use uuid::Uuid;

use super::deliverability_service::DeliverabilityGuard;
use super::throttle_service::{AccountLimits, Admission, Throttler, TrafficClass};
use crate::config::{RetryPolicy, WarmupContentPools, WarmupEngineSettings, WarmupReplyPools};
use crate::domain::{
    AccountId, Address, EmailAccount, InboundEnvelope, MessageId, SendKind, SendRecord,
    SendStatus, ThreadId, ThrottleSettings, WarmupEmail, WarmupEmailStatus, WarmupSettings,
    WarmupStatus,
};
use crate::providers::{check_dns_health, with_backoff, DnsResolver, MailTransport, OutgoingMessage};

/// Errors that can occur during warmup operations.
#[derive(Debug, Error)]
pub enum WarmupError {
    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Account settings are incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The account's domain failed DNS validation.
    #[error("dns validation failed for {0}")]
    DnsValidation(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for warmup operations.
pub type WarmupResult<T> = Result<T, WarmupError>;

/// Storage abstraction for the warmup controller.
#[async_trait]
pub trait WarmupStorage: Send + Sync {
    /// Gets an account by ID.
    async fn get_account(&self, id: &AccountId) -> WarmupResult<Option<EmailAccount>>;

    /// Gets an account by address.
    async fn account_by_email(&self, email: &str) -> WarmupResult<Option<EmailAccount>>;

    /// All active accounts in the operator's pool.
    async fn active_accounts(&self) -> WarmupResult<Vec<EmailAccount>>;

    /// Updates an account.
    async fn update_account(&self, account: &EmailAccount) -> WarmupResult<()>;

    /// Inserts a warmup email record.
    async fn insert_warmup_email(&self, email: &WarmupEmail) -> WarmupResult<()>;

    /// Updates a warmup email record.
    async fn update_warmup_email(&self, email: &WarmupEmail) -> WarmupResult<()>;

    /// Gets a warmup email by its record id.
    async fn get_warmup_email(&self, id: &str) -> WarmupResult<Option<WarmupEmail>>;

    /// Finds the warmup email that was sent with the given Message-ID.
    async fn warmup_email_by_message_id(
        &self,
        message_id: &str,
    ) -> WarmupResult<Option<WarmupEmail>>;

    /// Warmup emails sent from an account since an instant.
    async fn warmup_emails_from(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
    ) -> WarmupResult<Vec<WarmupEmail>>;

    /// Cumulative warmup emails ever sent from an account.
    async fn count_warmup_sent(&self, account_id: &AccountId) -> WarmupResult<u64>;

    /// Number of messages recorded in a warmup thread.
    async fn warmup_thread_len(&self, thread_id: &ThreadId) -> WarmupResult<u64>;

    /// Appends to the send log.
    async fn insert_send_record(&self, record: &SendRecord) -> WarmupResult<()>;
}

/// Generated warmup message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupContent {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Assembles a warmup message from independently sampled pools.
///
/// Each pool is drawn separately, so no two parts share index correlation
/// and repeated calls vary across every dimension. The body always reads
/// greeting, paragraph, closing, signature, in that order.
pub fn generate_warmup_content<R: Rng>(rng: &mut R, pools: &WarmupContentPools) -> WarmupContent {
    let pick = |rng: &mut R, pool: &[String]| -> String {
        pool.choose(rng).cloned().unwrap_or_default()
    };

    let subject = pick(rng, &pools.subjects);
    let greeting = pick(rng, &pools.greetings);
    let body = pick(rng, &pools.bodies);
    let closing = pick(rng, &pools.closings);
    let signature = pick(rng, &pools.signatures);

    WarmupContent {
        subject,
        body: format!("{}\n\n{}\n\n{}\n{}", greeting, body, closing, signature),
    }
}

/// Assembles a reply within a warmup thread, preserving the `Re:` subject.
pub fn generate_warmup_reply<R: Rng>(
    rng: &mut R,
    pools: &WarmupReplyPools,
    original_subject: &str,
) -> WarmupContent {
    let subject = if original_subject.trim().to_lowercase().starts_with("re:") {
        original_subject.trim().to_string()
    } else {
        format!("Re: {}", original_subject.trim())
    };

    let pick = |rng: &mut R, pool: &[String]| -> String {
        pool.choose(rng).cloned().unwrap_or_default()
    };

    let intro = pick(rng, &pools.intros);
    let body = pick(rng, &pools.bodies);
    let question = pick(rng, &pools.questions);
    let closing = pick(rng, &pools.closings);
    let signature = pick(rng, &pools.signatures);

    WarmupContent {
        subject,
        body: format!(
            "{}\n\n{}\n\n{}\n\n{}\n{}",
            intro, body, question, closing, signature
        ),
    }
}

/// Per-tick outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupTickReport {
    /// Warmup emails sent this tick.
    pub sent: u32,
    /// Accounts skipped because the partner's domain is blacklisted.
    pub blacklisted: u32,
    /// Accounts deferred by the throttler.
    pub deferred: u32,
    /// Accounts already at their daily target.
    pub at_target: u32,
    /// Transport failures.
    pub failed: u32,
    /// Accounts that reached completion this tick.
    pub completed: u32,
}

/// Schedules and sends warmup mail between the operator's own accounts.
pub struct WarmupController {
    storage: Arc<dyn WarmupStorage>,
    throttler: Arc<Throttler>,
    guard: Arc<DeliverabilityGuard>,
    transport: Arc<dyn MailTransport>,
    dns: Arc<dyn DnsResolver>,
    settings: WarmupEngineSettings,
    throttle: ThrottleSettings,
    retry: RetryPolicy,
    pools: WarmupContentPools,
    reply_pools: WarmupReplyPools,
    rng: Mutex<StdRng>,
}

impl WarmupController {
    /// Creates a controller with an OS-seeded random source.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn WarmupStorage>,
        throttler: Arc<Throttler>,
        guard: Arc<DeliverabilityGuard>,
        transport: Arc<dyn MailTransport>,
        dns: Arc<dyn DnsResolver>,
        settings: WarmupEngineSettings,
        throttle: ThrottleSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self::with_rng(
            storage,
            throttler,
            guard,
            transport,
            dns,
            settings,
            throttle,
            retry,
            StdRng::from_entropy(),
        )
    }

    /// Creates a controller with an explicit random source, for
    /// deterministic tests.
    #[allow(clippy::too_many_arguments)]
    pub fn with_rng(
        storage: Arc<dyn WarmupStorage>,
        throttler: Arc<Throttler>,
        guard: Arc<DeliverabilityGuard>,
        transport: Arc<dyn MailTransport>,
        dns: Arc<dyn DnsResolver>,
        settings: WarmupEngineSettings,
        throttle: ThrottleSettings,
        retry: RetryPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            storage,
            throttler,
            guard,
            transport,
            dns,
            settings,
            throttle,
            retry,
            pools: WarmupContentPools::default(),
            reply_pools: WarmupReplyPools::default(),
            rng: Mutex::new(rng),
        }
    }

    /// Replaces the content pools.
    pub fn with_pools(mut self, pools: WarmupContentPools, reply_pools: WarmupReplyPools) -> Self {
        self.pools = pools;
        self.reply_pools = reply_pools;
        self
    }

    /// Enables warmup for an account after validating its configuration
    /// and DNS records.
    ///
    /// The account moves to `in-progress` only once the first warmup send
    /// succeeds; until then it stays `not-started` with warmup enabled.
    pub async fn start_warmup(&self, account_id: &AccountId) -> WarmupResult<EmailAccount> {
        let mut account = self.require_account(account_id).await?;

        if !account.smtp.is_complete() {
            return Err(WarmupError::Configuration(format!(
                "incomplete SMTP settings for {}",
                account.email
            )));
        }

        let health = check_dns_health(self.dns.as_ref(), account.domain())
            .await
            .map_err(|e| WarmupError::Transport(e.to_string()))?;
        let sendable = health.is_sendable();
        account.dns_health = Some(health);

        if !sendable {
            // Flagged and excluded from warmup until the operator fixes DNS.
            self.storage.update_account(&account).await?;
            return Err(WarmupError::DnsValidation(account.domain().to_string()));
        }

        let mut settings = account.warmup_settings.take().unwrap_or_default();
        settings.enabled = true;
        account.warmup_settings = Some(settings);
        if account.warmup_status == WarmupStatus::Paused {
            account.warmup_status = WarmupStatus::InProgress;
        }
        self.storage.update_account(&account).await?;

        tracing::info!(account = %account.email, "warmup enabled");
        Ok(account)
    }

    /// Pauses warmup sending for an account. In-flight sends complete;
    /// future admissions stop.
    pub async fn pause_warmup(&self, account_id: &AccountId) -> WarmupResult<EmailAccount> {
        let mut account = self.require_account(account_id).await?;
        if matches!(
            account.warmup_status,
            WarmupStatus::InProgress | WarmupStatus::NotStarted
        ) {
            account.warmup_status = WarmupStatus::Paused;
            self.storage.update_account(&account).await?;
            tracing::info!(account = %account.email, "warmup paused");
        }
        Ok(account)
    }

    /// Resumes a paused warmup.
    pub async fn resume_warmup(&self, account_id: &AccountId) -> WarmupResult<EmailAccount> {
        let mut account = self.require_account(account_id).await?;
        if account.warmup_status == WarmupStatus::Paused {
            account.warmup_status = if account.warmup_started_at.is_some() {
                WarmupStatus::InProgress
            } else {
                WarmupStatus::NotStarted
            };
            self.storage.update_account(&account).await?;
            tracing::info!(account = %account.email, "warmup resumed");
        }
        Ok(account)
    }

    /// Stops warmup entirely, resetting progress tracking.
    pub async fn stop_warmup(&self, account_id: &AccountId) -> WarmupResult<EmailAccount> {
        let mut account = self.require_account(account_id).await?;
        account.warmup_status = WarmupStatus::NotStarted;
        account.warmup_started_at = None;
        if let Some(settings) = account.warmup_settings.as_mut() {
            settings.enabled = false;
        }
        self.storage.update_account(&account).await?;
        tracing::info!(account = %account.email, "warmup stopped");
        Ok(account)
    }

    /// Runs one warmup pass: each eligible account under its daily target
    /// sends at most one warmup email.
    pub async fn tick(&self, now: DateTime<Utc>) -> WarmupResult<WarmupTickReport> {
        let mut report = WarmupTickReport::default();
        let pool = self.storage.active_accounts().await?;

        for account in &pool {
            if !self.is_warming(account) {
                continue;
            }

            let target = daily_target(
                account.warmup_settings.as_ref().unwrap_or(&WarmupSettings::default()),
                account.warmup_started_at,
                now,
            );
            let start_of_day = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc())
                .unwrap_or(now);
            let sent_today = self
                .storage
                .warmup_emails_from(&account.id, start_of_day)
                .await?
                .iter()
                .filter(|w| w.status != WarmupEmailStatus::Failed)
                .count() as u32;
            if sent_today >= target {
                report.at_target += 1;
                continue;
            }

            let hourly_rate = account
                .warmup_settings
                .as_ref()
                .map(|s| s.hourly_rate)
                .unwrap_or(5);
            let limits = AccountLimits {
                daily_limit: account.daily_limit,
                emails_per_hour: hourly_rate,
            };
            match self.throttler.admit(
                &account.id,
                TrafficClass::Warmup,
                &limits,
                None,
                &self.throttle,
                now,
            ) {
                Admission::Granted => {}
                Admission::Deferred { until } => {
                    tracing::debug!(account = %account.email, %until, "warmup send deferred");
                    report.deferred += 1;
                    continue;
                }
            }

            let partner = {
                let mut rng = self.rng.lock().expect("warmup rng lock poisoned");
                pool.iter()
                    .filter(|candidate| candidate.id != account.id)
                    .collect::<Vec<_>>()
                    .choose(&mut *rng)
                    .map(|a| (*a).clone())
            };
            let Some(partner) = partner else {
                tracing::warn!(account = %account.email, "no partner account available for warmup");
                continue;
            };

            // Blacklisted partner domains are skipped, never retried.
            match self.guard.is_blacklisted(partner.domain()).await {
                Ok(true) => {
                    tracing::info!(
                        account = %account.email,
                        partner = %partner.email,
                        "partner domain blacklisted, warmup send skipped"
                    );
                    report.blacklisted += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "blacklist check failed, skipping warmup send");
                    continue;
                }
            }

            match self.send_warmup_email(account, &partner, now).await {
                Ok(_) => {
                    report.sent += 1;
                    if self.check_completion(&account.id).await? {
                        report.completed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(account = %account.email, error = %e, "warmup send failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn is_warming(&self, account: &EmailAccount) -> bool {
        if !account.is_active {
            return false;
        }
        let enabled = account
            .warmup_settings
            .as_ref()
            .map(|s| s.enabled)
            .unwrap_or(false);
        let status_ok = matches!(
            account.warmup_status,
            WarmupStatus::NotStarted | WarmupStatus::InProgress
        );
        let dns_ok = account
            .dns_health
            .as_ref()
            .map(|h| h.is_sendable())
            .unwrap_or(false);
        enabled && status_ok && dns_ok
    }

    /// Sends one warmup email between two operator accounts.
    pub async fn send_warmup_email(
        &self,
        from: &EmailAccount,
        to: &EmailAccount,
        now: DateTime<Utc>,
    ) -> WarmupResult<WarmupEmail> {
        let content = {
            let mut rng = self.rng.lock().expect("warmup rng lock poisoned");
            generate_warmup_content(&mut *rng, &self.pools)
        };
        let warmup_id = Uuid::new_v4().to_string();

        let mut message = OutgoingMessage::new(
            Address::new(to.email.clone()),
            content.subject.clone(),
            content.body.clone(),
        );
        message.warmup_ref = Some(warmup_id.clone());

        let send_result = with_backoff(&self.retry, |e: &crate::providers::TransportError| e.is_transient(), || {
            self.transport.send(from, &message)
        })
        .await;

        match send_result {
            Ok(receipt) => {
                let warmup_email = WarmupEmail {
                    id: warmup_id,
                    from_account_id: from.id.clone(),
                    to_account_id: to.id.clone(),
                    subject: content.subject.clone(),
                    content: content.body,
                    message_id: Some(receipt.message_id.clone()),
                    thread_id: Some(ThreadId::from(receipt.message_id.0.clone())),
                    sent_at: now,
                    status: WarmupEmailStatus::Sent,
                    is_reply: false,
                    replied_at: None,
                };
                self.storage.insert_warmup_email(&warmup_email).await?;
                self.log_send(from, to, &content.subject, Some(&receipt.message_id), None, now)
                    .await?;

                self.throttler
                    .record_send(&from.id, TrafficClass::Warmup, &self.throttle, now);

                self.mark_in_progress(&from.id, now).await?;
                if let Err(e) = self.guard.record_delivery(&from.id).await {
                    tracing::warn!(account = %from.email, error = %e, "reputation update failed");
                }

                tracing::info!(from = %from.email, to = %to.email, "warmup email sent");
                Ok(warmup_email)
            }
            Err(e) => {
                let failed = WarmupEmail {
                    id: warmup_id,
                    from_account_id: from.id.clone(),
                    to_account_id: to.id.clone(),
                    subject: content.subject.clone(),
                    content: content.body,
                    message_id: None,
                    thread_id: None,
                    sent_at: now,
                    status: WarmupEmailStatus::Failed,
                    is_reply: false,
                    replied_at: None,
                };
                self.storage.insert_warmup_email(&failed).await?;
                let error_text = e.to_string();
                self.log_send(from, to, &content.subject, None, Some(error_text.as_str()), now)
                    .await?;

                if matches!(e, crate::providers::TransportError::Authentication(_)) {
                    let mut disabled = from.clone();
                    disabled.is_active = false;
                    self.storage.update_account(&disabled).await?;
                    tracing::error!(account = %from.email, "account disabled after authentication failure");
                }
                Err(WarmupError::Transport(e.to_string()))
            }
        }
    }

    async fn log_send(
        &self,
        from: &EmailAccount,
        to: &EmailAccount,
        subject: &str,
        message_id: Option<&MessageId>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> WarmupResult<()> {
        self.storage
            .insert_send_record(&SendRecord {
                id: Uuid::new_v4().to_string(),
                account_id: from.id.clone(),
                campaign_id: None,
                lead_id: None,
                step_number: None,
                kind: SendKind::Warmup,
                to: to.email.clone(),
                subject: subject.to_string(),
                message_id: message_id.cloned(),
                tracking_id: None,
                status: if error.is_none() {
                    SendStatus::Sent
                } else {
                    SendStatus::Failed
                },
                sent_at: now,
                opened_at: None,
                replied_at: None,
                bounced_at: None,
                error: error.map(|e| e.to_string()),
            })
            .await
    }

    async fn mark_in_progress(&self, account_id: &AccountId, now: DateTime<Utc>) -> WarmupResult<()> {
        let mut account = self.require_account(account_id).await?;
        if account.warmup_status == WarmupStatus::NotStarted {
            account.warmup_status = WarmupStatus::InProgress;
            account.warmup_started_at = Some(now);
            self.storage.update_account(&account).await?;
        }
        Ok(())
    }

    /// Marks warmup completed once cumulative volume and reputation both
    /// cross their thresholds.
    async fn check_completion(&self, account_id: &AccountId) -> WarmupResult<bool> {
        let mut account = self.require_account(account_id).await?;
        if account.warmup_status != WarmupStatus::InProgress {
            return Ok(false);
        }

        let total_sent = self.storage.count_warmup_sent(account_id).await?;
        if total_sent >= self.settings.completion_sent_threshold
            && account.reputation >= self.settings.completion_reputation_threshold
        {
            account.warmup_status = WarmupStatus::Completed;
            self.storage.update_account(&account).await?;
            tracing::info!(account = %account.email, total_sent, "warmup completed");
            return Ok(true);
        }
        Ok(false)
    }

    /// Handles an inbound message classified as warmup traffic.
    ///
    /// Credits a reply against the originating warmup email and, when
    /// auto-reply is on and the thread is under its cap, schedules a
    /// continuation reply after a randomized delay.
    pub async fn handle_inbound_warmup(
        self: Arc<Self>,
        account: &EmailAccount,
        envelope: &InboundEnvelope,
        now: DateTime<Utc>,
    ) -> WarmupResult<()> {
        let mut thread_id = None;

        // Credit the reply to the warmup email it answers.
        for id in envelope.in_reply_to.iter().chain(envelope.references.iter()) {
            if let Some(mut original) = self.storage.warmup_email_by_message_id(id).await? {
                if original.from_account_id == account.id && original.replied_at.is_none() {
                    original.replied_at = Some(now);
                    self.storage.update_warmup_email(&original).await?;
                    if let Err(e) = self.guard.record_reply(&account.id).await {
                        tracing::warn!(error = %e, "reputation update failed");
                    }
                    tracing::info!(account = %account.email, "warmup reply credited");
                }
                thread_id = original.thread_id.clone();
                break;
            }
        }

        let settings = match &account.warmup_settings {
            Some(s) if s.auto_reply => s.clone(),
            _ => return Ok(()),
        };

        let Some(peer) = self.storage.account_by_email(&envelope.from.email).await? else {
            return Ok(());
        };

        let thread_id = thread_id
            .or_else(|| envelope.references.first().map(|r| ThreadId::from(r.clone())))
            .or_else(|| envelope.message_id.clone().map(ThreadId::from));
        if let Some(ref thread_id) = thread_id {
            let len = self.storage.warmup_thread_len(thread_id).await?;
            // The inbound message itself counts toward the cap.
            if len + 1 >= settings.max_thread_length as u64 {
                tracing::debug!(thread = %thread_id, "warmup thread at maximum length");
                return Ok(());
            }
        }

        let (content, delay_minutes) = {
            let mut rng = self.rng.lock().expect("warmup rng lock poisoned");
            let content = generate_warmup_reply(&mut *rng, &self.reply_pools, &envelope.subject);
            let delay = if settings.reply_delay_minutes > 0 {
                rng.gen_range(0..settings.reply_delay_minutes)
            } else {
                0
            };
            (content, delay)
        };

        let controller = Arc::clone(&self);
        let account = account.clone();
        let in_reply_to = envelope.message_id.clone();
        let references = envelope.references.clone();
        tokio::spawn(async move {
            if delay_minutes > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(delay_minutes as u64 * 60))
                    .await;
            }
            if let Err(e) = controller
                .send_warmup_reply(&account, &peer, content, in_reply_to, references, thread_id)
                .await
            {
                tracing::warn!(account = %account.email, error = %e, "warmup auto-reply failed");
            }
        });

        Ok(())
    }

    /// Sends a reply continuing a warmup thread.
    async fn send_warmup_reply(
        &self,
        from: &EmailAccount,
        to: &EmailAccount,
        content: WarmupContent,
        in_reply_to: Option<String>,
        references: Vec<String>,
        thread_id: Option<ThreadId>,
    ) -> WarmupResult<WarmupEmail> {
        let now = Utc::now();

        let hourly_rate = from
            .warmup_settings
            .as_ref()
            .map(|s| s.hourly_rate)
            .unwrap_or(5);
        let limits = AccountLimits {
            daily_limit: from.daily_limit,
            emails_per_hour: hourly_rate,
        };
        if let Admission::Deferred { until } = self.throttler.admit(
            &from.id,
            TrafficClass::Warmup,
            &limits,
            None,
            &self.throttle,
            now,
        ) {
            tracing::debug!(account = %from.email, %until, "warmup reply dropped by throttle");
            return Err(WarmupError::Transport("reply deferred by throttle".into()));
        }

        let warmup_id = Uuid::new_v4().to_string();
        let mut message = OutgoingMessage::new(
            Address::new(to.email.clone()),
            content.subject.clone(),
            content.body.clone(),
        );
        message.warmup_ref = Some(warmup_id.clone());
        message.in_reply_to = in_reply_to;
        message.references = references;

        let receipt = with_backoff(&self.retry, |e: &crate::providers::TransportError| e.is_transient(), || {
            self.transport.send(from, &message)
        })
        .await
        .map_err(|e| WarmupError::Transport(e.to_string()))?;

        let warmup_email = WarmupEmail {
            id: warmup_id,
            from_account_id: from.id.clone(),
            to_account_id: to.id.clone(),
            subject: content.subject.clone(),
            content: content.body,
            message_id: Some(receipt.message_id.clone()),
            thread_id,
            sent_at: now,
            status: WarmupEmailStatus::Sent,
            is_reply: true,
            replied_at: None,
        };
        self.storage.insert_warmup_email(&warmup_email).await?;
        self.log_send(from, to, &content.subject, Some(&receipt.message_id), None, now)
            .await?;
        self.throttler
            .record_send(&from.id, TrafficClass::Warmup, &self.throttle, now);

        tracing::info!(from = %from.email, to = %to.email, "warmup reply sent");
        Ok(warmup_email)
    }

    /// Records a warmup email found in the recipient's spam folder.
    ///
    /// Demotes the sender's reputation and auto-pauses its warmup when the
    /// trailing-week spam rate crosses the configured threshold.
    pub async fn record_spam_placement(&self, warmup_ref: &str) -> WarmupResult<()> {
        let Some(mut warmup_email) = self.storage.get_warmup_email(warmup_ref).await? else {
            return Ok(());
        };
        if warmup_email.status == WarmupEmailStatus::Spam {
            return Ok(());
        }

        warmup_email.status = WarmupEmailStatus::Spam;
        self.storage.update_warmup_email(&warmup_email).await?;

        let sender = warmup_email.from_account_id.clone();
        if let Err(e) = self.guard.record_spam_placement(&sender).await {
            tracing::warn!(error = %e, "reputation update failed");
        }

        // Auto-pause on a high trailing spam rate.
        let week_ago = Utc::now() - ChronoDuration::days(7);
        let recent = self.storage.warmup_emails_from(&sender, week_ago).await?;
        if !recent.is_empty() {
            let spam = recent
                .iter()
                .filter(|w| w.status == WarmupEmailStatus::Spam)
                .count();
            let rate = spam as f64 / recent.len() as f64;
            if rate > self.settings.spam_rate_pause_threshold {
                tracing::warn!(
                    account = %sender,
                    rate = %format!("{:.1}%", rate * 100.0),
                    "spam rate too high, auto-pausing warmup"
                );
                self.pause_warmup(&sender).await?;
            }
        }
        Ok(())
    }

    async fn require_account(&self, account_id: &AccountId) -> WarmupResult<EmailAccount> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| WarmupError::AccountNotFound(account_id.to_string()))
    }
}

/// Daily warmup volume for an account at `now`, following the linear
/// ramp from the starting volume to the maximum over the ramp period.
pub fn daily_target(
    settings: &WarmupSettings,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u32 {
    let days_in = started_at
        .map(|start| (now - start).num_days().max(0) as u32)
        .unwrap_or(0);

    if settings.ramp_up_days == 0 {
        return settings.max_daily_emails;
    }

    let span = settings
        .max_daily_emails
        .saturating_sub(settings.daily_warmup_emails);
    let increase = (span as u64 * days_in as u64 / settings.ramp_up_days as u64) as u32;
    (settings.daily_warmup_emails + increase).min(settings.max_daily_emails)
}
