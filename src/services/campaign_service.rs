//! Campaign sequencing.
//!
//! The [`CampaignSequencer`] walks each lead through its campaign's
//! templated step sequence: deciding when a step is due, evaluating
//! open/reply condition gates, rendering `{{var}}` templates, and
//! dispatching sends through the throttler, the deliverability guard, and
//! the transport.
//!
//! The per-lead decision logic lives in the pure [`advance`] function; the
//! service wraps it with storage and dispatch.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use super::deliverability_service::DeliverabilityGuard;
use super::throttle_service::{AccountLimits, Admission, Throttler, TrafficClass};
use crate::config::RetryPolicy;
use crate::domain::{
    Address, Campaign, CampaignId, CampaignStatus, EmailAccount, Lead, LeadId, LeadStatus,
    SendKind, SendRecord, SendStatus, SequenceStatus, SequenceStep, StepConditions,
};
use crate::providers::{with_backoff, MailTransport, OutgoingMessage};

/// Errors that can occur during sequencing.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// A template referenced a merge variable the lead does not have.
    #[error("missing template variable: {0}")]
    MissingVariable(String),

    /// Campaign not found.
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    /// No assigned account is active and admitted.
    #[error("no sendable account for campaign {0}")]
    NoSendableAccount(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for sequencer operations.
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Storage abstraction for the sequencer.
#[async_trait]
pub trait SequencerStorage: Send + Sync {
    /// Gets a campaign by ID.
    async fn get_campaign(&self, id: &CampaignId) -> SequenceResult<Option<Campaign>>;

    /// Updates a campaign (stats, status).
    async fn update_campaign(&self, campaign: &Campaign) -> SequenceResult<()>;

    /// All leads on a campaign's target list.
    async fn leads_for_campaign(&self, campaign_id: &CampaignId) -> SequenceResult<Vec<Lead>>;

    /// Gets a lead by ID.
    async fn get_lead(&self, id: &LeadId) -> SequenceResult<Option<Lead>>;

    /// Updates a lead.
    async fn update_lead(&self, lead: &Lead) -> SequenceResult<()>;

    /// Gets an account by ID.
    async fn get_account(&self, id: &crate::domain::AccountId)
        -> SequenceResult<Option<EmailAccount>>;

    /// Updates an account (used to disable on auth failure).
    async fn update_account(&self, account: &EmailAccount) -> SequenceResult<()>;

    /// The most recent campaign send record for a lead, if any.
    async fn latest_campaign_send(&self, lead_id: &LeadId) -> SequenceResult<Option<SendRecord>>;

    /// Appends to the send log.
    async fn insert_send_record(&self, record: &SendRecord) -> SequenceResult<()>;

    /// Updates a send log entry.
    async fn update_send_record(&self, record: &SendRecord) -> SequenceResult<()>;

    /// Finds a send record by its tracking pixel id.
    async fn send_record_by_tracking(
        &self,
        tracking_id: &str,
    ) -> SequenceResult<Option<SendRecord>>;
}

/// What the lead did with the previous sent step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepHistory {
    /// The previous step's email was opened.
    pub prev_opened: bool,
    /// The previous step's email was replied to.
    pub prev_replied: bool,
}

impl StepHistory {
    /// Builds history from the lead's most recent campaign send record.
    pub fn from_record(record: Option<&SendRecord>) -> Self {
        match record {
            Some(record) => Self {
                prev_opened: record.opened_at.is_some()
                    || matches!(record.status, SendStatus::Opened | SendStatus::Replied),
                prev_replied: record.replied_at.is_some()
                    || matches!(record.status, SendStatus::Replied),
            },
            None => Self::default(),
        }
    }
}

/// Decision for one lead at one instant.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The given step is due and its conditions pass; send it.
    Send(SequenceStep),
    /// The current step is not yet due.
    Wait,
    /// The given step's conditions failed (or it is inactive); advance
    /// past it and evaluate the next step immediately.
    Skip(SequenceStep),
    /// The sequence is finished or permanently stopped for this lead.
    Complete,
}

/// Decides what to do for a lead right now.
///
/// Pure: all inputs are explicit, including the previous step's recorded
/// events. Callers handle [`Advance::Skip`] by bumping the lead's step
/// index and calling again, so condition-failed steps are never sent and
/// the next step is evaluated for due-ness in the same pass.
pub fn advance(
    lead: &Lead,
    campaign: &Campaign,
    history: &StepHistory,
    now: DateTime<Utc>,
) -> Advance {
    if !lead.is_sequenceable() {
        return Advance::Complete;
    }

    let steps = campaign.ordered_steps();
    let Some(step) = steps.get(lead.current_step as usize) else {
        return Advance::Complete;
    };

    if !step.is_active {
        return Advance::Skip((*step).clone());
    }

    let anchor = lead.last_step_at.unwrap_or(lead.enrolled_at);
    let due_at = anchor + ChronoDuration::days(step.delay_days as i64);
    if now < due_at {
        return Advance::Wait;
    }

    if let Some(conditions) = step.conditions {
        if !conditions_met(conditions, history) {
            return Advance::Skip((*step).clone());
        }
    }

    Advance::Send((*step).clone())
}

fn conditions_met(conditions: StepConditions, history: &StepHistory) -> bool {
    if let Some(required) = conditions.if_opened {
        if history.prev_opened != required {
            return false;
        }
    }
    if let Some(required) = conditions.if_replied {
        if history.prev_replied != required {
            return false;
        }
    }
    true
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder regex is valid"))
}

/// Renders a `{{var}}` template against a lead's merge fields.
///
/// Any placeholder without a value fails the whole render; the caller
/// excludes the lead and moves on, leaving the campaign running for
/// everyone else.
pub fn render_template(template: &str, lead: &Lead) -> SequenceResult<String> {
    let re = placeholder_regex();
    let mut missing = None;

    let rendered = re.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match lead.merge_field(name) {
            Some(value) => value.to_string(),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(SequenceError::MissingVariable(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// Per-tick outcome counts for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Emails sent this tick.
    pub sent: u32,
    /// Steps skipped by condition gates or inactivity.
    pub skipped: u32,
    /// Leads deferred by the throttler.
    pub deferred: u32,
    /// Leads excluded by template errors.
    pub excluded: u32,
    /// Leads whose domain is blacklisted.
    pub blacklisted: u32,
    /// Transport failures.
    pub failed: u32,
    /// Leads that finished the sequence this tick.
    pub completed: u32,
}

/// Walks leads through campaign sequences and dispatches due sends.
pub struct CampaignSequencer {
    storage: Arc<dyn SequencerStorage>,
    throttler: Arc<Throttler>,
    guard: Arc<DeliverabilityGuard>,
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
    tracking_pixel_base: Option<String>,
}

impl CampaignSequencer {
    /// Creates a sequencer.
    pub fn new(
        storage: Arc<dyn SequencerStorage>,
        throttler: Arc<Throttler>,
        guard: Arc<DeliverabilityGuard>,
        transport: Arc<dyn MailTransport>,
        retry: RetryPolicy,
        tracking_pixel_base: Option<String>,
    ) -> Self {
        Self {
            storage,
            throttler,
            guard,
            transport,
            retry,
            tracking_pixel_base,
        }
    }

    /// Runs one sequencing pass over a campaign.
    ///
    /// Every sequenceable lead is evaluated; due steps are sent subject to
    /// throttling and the blacklist. Failures are contained per lead; only
    /// storage failures and a missing campaign abort the pass.
    pub async fn run_campaign(
        &self,
        campaign_id: &CampaignId,
        now: DateTime<Utc>,
    ) -> SequenceResult<RunReport> {
        let mut campaign = self
            .storage
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| SequenceError::CampaignNotFound(campaign_id.to_string()))?;

        let mut report = RunReport::default();
        if campaign.status != CampaignStatus::Active {
            tracing::debug!(campaign = %campaign_id, status = ?campaign.status, "campaign not active, skipping tick");
            return Ok(report);
        }

        // Sending accounts, round-robin. Disabled accounts drop out as the
        // pass discovers them.
        let mut accounts: Vec<EmailAccount> = Vec::new();
        for account_id in &campaign.account_ids {
            if let Some(account) = self.storage.get_account(account_id).await? {
                if account.is_active {
                    accounts.push(account);
                }
            }
        }
        if accounts.is_empty() {
            return Err(SequenceError::NoSendableAccount(campaign_id.to_string()));
        }

        let leads = self.storage.leads_for_campaign(campaign_id).await?;
        let mut account_cursor = 0usize;
        let mut stats_dirty = false;

        for mut lead in leads {
            if !lead.is_sequenceable() {
                continue;
            }

            let step = match self.advance_lead(&mut lead, &campaign, now, &mut report).await? {
                Some(step) => step,
                None => continue,
            };

            // Blacklisted recipient domains are skipped, not failed.
            let domain = lead.email.rsplit('@').next().unwrap_or("").to_string();
            match self.guard.is_blacklisted(&domain).await {
                Ok(true) => {
                    tracing::info!(lead = %lead.id, domain = %domain, "recipient domain blacklisted, send skipped");
                    report.blacklisted += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(lead = %lead.id, error = %e, "blacklist check failed, deferring lead");
                    continue;
                }
            }

            // Find an admitted account, round-robin from the cursor.
            let mut admitted = None;
            for offset in 0..accounts.len() {
                let idx = (account_cursor + offset) % accounts.len();
                let account = &accounts[idx];
                let limits = AccountLimits {
                    daily_limit: account.daily_limit,
                    emails_per_hour: campaign.throttle.emails_per_hour,
                };
                match self.throttler.admit(
                    &account.id,
                    TrafficClass::Campaign,
                    &limits,
                    Some(&campaign.schedule),
                    &campaign.throttle,
                    now,
                ) {
                    Admission::Granted => {
                        admitted = Some(idx);
                        break;
                    }
                    Admission::Deferred { .. } => {}
                }
            }

            let Some(idx) = admitted else {
                report.deferred += 1;
                continue;
            };
            account_cursor = idx + 1;

            let send_result = self
                .send_step(&accounts[idx], &mut lead, &mut campaign, &step, now)
                .await;
            match send_result {
                Ok(()) => {
                    report.sent += 1;
                    stats_dirty = true;
                }
                Err(SendFailure::Excluded) => report.excluded += 1,
                Err(SendFailure::AccountDisabled) => {
                    let disabled = accounts.remove(idx);
                    tracing::error!(account = %disabled.email, "account disabled after authentication failure");
                    report.failed += 1;
                    if accounts.is_empty() {
                        break;
                    }
                }
                Err(SendFailure::Transport) => report.failed += 1,
                Err(SendFailure::Storage(e)) => return Err(e),
            }
        }

        if stats_dirty {
            self.storage.update_campaign(&campaign).await?;
        }

        Ok(report)
    }

    /// Applies skip cascades for one lead and returns the step to send,
    /// if any is due.
    async fn advance_lead(
        &self,
        lead: &mut Lead,
        campaign: &Campaign,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> SequenceResult<Option<SequenceStep>> {
        let record = self.storage.latest_campaign_send(&lead.id).await?;
        let history = StepHistory::from_record(record.as_ref());
        let mut lead_dirty = false;

        let outcome = loop {
            match advance(lead, campaign, &history, now) {
                Advance::Skip(step) => {
                    tracing::debug!(lead = %lead.id, step = step.step_number, "step skipped");
                    lead.current_step += 1;
                    report.skipped += 1;
                    lead_dirty = true;
                }
                Advance::Wait => break None,
                Advance::Complete => {
                    if !lead.sequence_status.is_terminal() {
                        lead.sequence_status = SequenceStatus::Completed;
                        report.completed += 1;
                        lead_dirty = true;
                    }
                    break None;
                }
                Advance::Send(step) => break Some(step),
            }
        };

        if outcome.is_none() && lead_dirty {
            self.storage.update_lead(lead).await?;
        }
        Ok(outcome)
    }

    /// Renders and dispatches one step to one lead.
    async fn send_step(
        &self,
        account: &EmailAccount,
        lead: &mut Lead,
        campaign: &mut Campaign,
        step: &SequenceStep,
        now: DateTime<Utc>,
    ) -> Result<(), SendFailure> {
        let subject = match render_template(&step.subject, lead) {
            Ok(s) => s,
            Err(e) => return self.exclude_lead(lead, e).await,
        };
        let text = match render_template(&step.content, lead) {
            Ok(c) => c,
            Err(e) => return self.exclude_lead(lead, e).await,
        };

        let tracking_id = match (&self.tracking_pixel_base, campaign.open_tracking) {
            (Some(_), true) => Some(Uuid::new_v4().simple().to_string()),
            _ => None,
        };
        let html = self.render_html(&text, tracking_id.as_deref());

        let to = match (&lead.first_name, &lead.last_name) {
            (Some(first), Some(last)) => {
                Address::with_name(lead.email.clone(), format!("{} {}", first, last))
            }
            (Some(first), None) => Address::with_name(lead.email.clone(), first.clone()),
            _ => Address::new(lead.email.clone()),
        };

        let mut message = OutgoingMessage::new(to, subject.clone(), text);
        message.html = Some(html);

        lead.sequence_status = SequenceStatus::Scheduled;

        let send_result = with_backoff(&self.retry, |e: &crate::providers::TransportError| e.is_transient(), || {
            self.transport.send(account, &message)
        })
        .await;

        match send_result {
            Ok(receipt) => {
                let record = SendRecord {
                    id: Uuid::new_v4().to_string(),
                    account_id: account.id.clone(),
                    campaign_id: Some(campaign.id.clone()),
                    lead_id: Some(lead.id.clone()),
                    step_number: Some(step.step_number),
                    kind: SendKind::Campaign,
                    to: lead.email.clone(),
                    subject,
                    message_id: Some(receipt.message_id),
                    tracking_id,
                    status: SendStatus::Sent,
                    sent_at: now,
                    opened_at: None,
                    replied_at: None,
                    bounced_at: None,
                    error: None,
                };
                self.storage
                    .insert_send_record(&record)
                    .await
                    .map_err(SendFailure::Storage)?;

                lead.promote(LeadStatus::Contacted);
                lead.sequence_status = SequenceStatus::Sent;
                lead.current_step += 1;
                lead.last_step_at = Some(now);
                lead.last_contacted_at = Some(now);
                self.storage
                    .update_lead(lead)
                    .await
                    .map_err(SendFailure::Storage)?;

                campaign.stats.sent += 1;
                campaign.stats.delivered += 1;

                self.throttler
                    .record_send(&account.id, TrafficClass::Campaign, &campaign.throttle, now);
                if let Err(e) = self.guard.record_delivery(&account.id).await {
                    tracing::warn!(account = %account.email, error = %e, "reputation update failed");
                }

                tracing::info!(
                    campaign = %campaign.id,
                    lead = %lead.id,
                    step = step.step_number,
                    account = %account.email,
                    "campaign step sent"
                );
                Ok(())
            }
            Err(e) => {
                let auth_failure = matches!(
                    e,
                    crate::providers::TransportError::Authentication(_)
                );

                let record = SendRecord {
                    id: Uuid::new_v4().to_string(),
                    account_id: account.id.clone(),
                    campaign_id: Some(campaign.id.clone()),
                    lead_id: Some(lead.id.clone()),
                    step_number: Some(step.step_number),
                    kind: SendKind::Campaign,
                    to: lead.email.clone(),
                    subject,
                    message_id: None,
                    tracking_id: None,
                    status: SendStatus::Failed,
                    sent_at: now,
                    opened_at: None,
                    replied_at: None,
                    bounced_at: None,
                    error: Some(e.to_string()),
                };
                self.storage
                    .insert_send_record(&record)
                    .await
                    .map_err(SendFailure::Storage)?;

                // The step was never sent; the lead stays due for the next
                // pass.
                lead.sequence_status = if lead.current_step == 0 {
                    SequenceStatus::Pending
                } else {
                    SequenceStatus::Sent
                };

                if auth_failure {
                    let mut disabled = account.clone();
                    disabled.is_active = false;
                    self.storage
                        .update_account(&disabled)
                        .await
                        .map_err(SendFailure::Storage)?;
                    Err(SendFailure::AccountDisabled)
                } else {
                    tracing::warn!(lead = %lead.id, error = %e, "campaign send failed");
                    Err(SendFailure::Transport)
                }
            }
        }
    }

    async fn exclude_lead(
        &self,
        lead: &mut Lead,
        error: SequenceError,
    ) -> Result<(), SendFailure> {
        tracing::warn!(lead = %lead.id, error = %error, "template render failed, lead excluded");
        lead.excluded = true;
        self.storage
            .update_lead(lead)
            .await
            .map_err(SendFailure::Storage)?;
        Err(SendFailure::Excluded)
    }

    fn render_html(&self, text: &str, tracking_id: Option<&str>) -> String {
        let mut html = format!(
            "<html><body><div style=\"font-family:Arial,sans-serif;line-height:1.6\">{}</div>",
            text.replace('\n', "<br>")
        );
        if let (Some(base), Some(id)) = (&self.tracking_pixel_base, tracking_id) {
            html.push_str(&format!(
                "<img src=\"{}/{}\" width=\"1\" height=\"1\" style=\"display:none\" alt=\"\">",
                base.trim_end_matches('/'),
                id
            ));
        }
        html.push_str("</body></html>");
        html
    }

    /// Records an open from the tracking pixel.
    ///
    /// Promotes the lead, bumps campaign stats, and stamps the send
    /// record. Repeated opens of the same send are counted once.
    pub async fn record_open(&self, tracking_id: &str, now: DateTime<Utc>) -> SequenceResult<()> {
        let Some(mut record) = self.storage.send_record_by_tracking(tracking_id).await? else {
            return Ok(());
        };
        if record.opened_at.is_some() {
            return Ok(());
        }

        record.opened_at = Some(now);
        if record.status == SendStatus::Sent {
            record.status = SendStatus::Opened;
        }
        self.storage.update_send_record(&record).await?;

        if let Some(lead_id) = &record.lead_id {
            if let Some(mut lead) = self.storage.get_lead(lead_id).await? {
                lead.promote(LeadStatus::Opened);
                self.storage.update_lead(&lead).await?;
            }
        }

        if let Some(campaign_id) = &record.campaign_id {
            if let Some(mut campaign) = self.storage.get_campaign(campaign_id).await? {
                campaign.stats.opened += 1;
                self.storage.update_campaign(&campaign).await?;
            }
        }
        Ok(())
    }

    /// Records a link click for a lead.
    pub async fn record_click(&self, lead_id: &LeadId, _now: DateTime<Utc>) -> SequenceResult<()> {
        let Some(mut lead) = self.storage.get_lead(lead_id).await? else {
            return Ok(());
        };
        lead.promote(LeadStatus::Clicked);
        self.storage.update_lead(&lead).await?;

        if let Some(mut campaign) = self.storage.get_campaign(&lead.campaign_id).await? {
            campaign.stats.clicked += 1;
            self.storage.update_campaign(&campaign).await?;
        }
        Ok(())
    }

    /// Records an unsubscribe for a lead. Absorbing: sequencing stops.
    pub async fn record_unsubscribe(&self, lead_id: &LeadId) -> SequenceResult<()> {
        let Some(mut lead) = self.storage.get_lead(lead_id).await? else {
            return Ok(());
        };
        lead.promote(LeadStatus::Unsubscribed);
        lead.sequence_status = SequenceStatus::Unsubscribed;
        self.storage.update_lead(&lead).await?;

        if let Some(mut campaign) = self.storage.get_campaign(&lead.campaign_id).await? {
            campaign.stats.unsubscribed += 1;
            self.storage.update_campaign(&campaign).await?;
        }
        Ok(())
    }
}

/// Internal send dispatch outcome.
enum SendFailure {
    /// Lead excluded by a template error.
    Excluded,
    /// Account disabled after an authentication failure.
    AccountDisabled,
    /// Transport failure after retries; lead stays due.
    Transport,
    /// Storage failure; aborts the pass.
    Storage(SequenceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CampaignStats, SendingSchedule, ThrottleSettings};
    use chrono::TimeZone;

    fn step(number: u32, delay_days: u32, conditions: Option<StepConditions>) -> SequenceStep {
        SequenceStep {
            step_number: number,
            subject: format!("Step {} for {{{{first_name}}}}", number),
            content: "Hi {{first_name}}, checking in.".to_string(),
            delay_days,
            conditions,
            is_active: true,
        }
    }

    fn campaign(steps: Vec<SequenceStep>) -> Campaign {
        Campaign {
            id: CampaignId::from("camp-1"),
            name: "Test".to_string(),
            status: CampaignStatus::Active,
            sequence: steps,
            schedule: SendingSchedule::business_hours(),
            throttle: ThrottleSettings::default(),
            account_ids: vec![],
            open_tracking: false,
            stats: CampaignStats::default(),
            created_at: Utc::now(),
        }
    }

    fn lead() -> Lead {
        let mut lead = Lead::new(
            LeadId::from("lead-1"),
            CampaignId::from("camp-1"),
            "bob@prospect.com",
        );
        lead.first_name = Some("Bob".to_string());
        lead.enrolled_at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        lead
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 10, 0, 0).unwrap()
    }

    #[test]
    fn first_step_due_immediately() {
        let campaign = campaign(vec![step(1, 0, None)]);
        let result = advance(&lead(), &campaign, &StepHistory::default(), now());
        assert!(matches!(result, Advance::Send(s) if s.step_number == 1));
    }

    #[test]
    fn step_waits_for_delay() {
        let campaign = campaign(vec![step(1, 0, None), step(2, 3, None)]);
        let mut lead = lead();
        lead.current_step = 1;
        lead.last_step_at = Some(now() - ChronoDuration::days(1));

        let result = advance(&lead, &campaign, &StepHistory::default(), now());
        assert_eq!(result, Advance::Wait);
    }

    #[test]
    fn step_due_after_delay() {
        let campaign = campaign(vec![step(1, 0, None), step(2, 3, None)]);
        let mut lead = lead();
        lead.current_step = 1;
        lead.last_step_at = Some(now() - ChronoDuration::days(3));

        let result = advance(&lead, &campaign, &StepHistory::default(), now());
        assert!(matches!(result, Advance::Send(s) if s.step_number == 2));
    }

    #[test]
    fn condition_if_not_opened_skips_opened_lead() {
        // Step 2 runs only if the prior email was NOT opened.
        let conditions = StepConditions {
            if_opened: Some(false),
            if_replied: None,
        };
        let campaign = campaign(vec![step(1, 0, None), step(2, 0, Some(conditions))]);
        let mut lead = lead();
        lead.current_step = 1;
        lead.last_step_at = Some(now() - ChronoDuration::days(1));

        let history = StepHistory {
            prev_opened: true,
            prev_replied: false,
        };
        let result = advance(&lead, &campaign, &history, now());
        assert!(matches!(result, Advance::Skip(s) if s.step_number == 2));
    }

    #[test]
    fn condition_if_opened_sends_to_opened_lead() {
        let conditions = StepConditions {
            if_opened: Some(true),
            if_replied: None,
        };
        let campaign = campaign(vec![step(1, 0, None), step(2, 0, Some(conditions))]);
        let mut lead = lead();
        lead.current_step = 1;
        lead.last_step_at = Some(now() - ChronoDuration::days(1));

        let history = StepHistory {
            prev_opened: true,
            prev_replied: false,
        };
        let result = advance(&lead, &campaign, &history, now());
        assert!(matches!(result, Advance::Send(s) if s.step_number == 2));
    }

    #[test]
    fn inactive_step_is_skipped() {
        let mut inactive = step(1, 0, None);
        inactive.is_active = false;
        let campaign = campaign(vec![inactive, step(2, 0, None)]);

        let result = advance(&lead(), &campaign, &StepHistory::default(), now());
        assert!(matches!(result, Advance::Skip(s) if s.step_number == 1));
    }

    #[test]
    fn finished_sequence_completes() {
        let campaign = campaign(vec![step(1, 0, None)]);
        let mut lead = lead();
        lead.current_step = 1;

        let result = advance(&lead, &campaign, &StepHistory::default(), now());
        assert_eq!(result, Advance::Complete);
    }

    #[test]
    fn bounced_lead_always_terminal() {
        let campaign = campaign(vec![step(1, 0, None), step(2, 0, None)]);
        let mut lead = lead();
        lead.promote(LeadStatus::Bounced);
        lead.sequence_status = SequenceStatus::Bounced;

        for _ in 0..3 {
            let result = advance(&lead, &campaign, &StepHistory::default(), now());
            assert_eq!(result, Advance::Complete);
        }
    }

    #[test]
    fn replied_lead_gets_no_more_steps() {
        let campaign = campaign(vec![step(1, 0, None), step(2, 0, None)]);
        let mut lead = lead();
        lead.current_step = 1;
        lead.sequence_status = SequenceStatus::Replied;
        lead.promote(LeadStatus::Replied);

        let result = advance(&lead, &campaign, &StepHistory::default(), now());
        assert_eq!(result, Advance::Complete);
    }

    #[test]
    fn excluded_lead_is_terminal() {
        let campaign = campaign(vec![step(1, 0, None)]);
        let mut lead = lead();
        lead.excluded = true;

        let result = advance(&lead, &campaign, &StepHistory::default(), now());
        assert_eq!(result, Advance::Complete);
    }

    #[test]
    fn template_renders_builtin_and_custom_fields() {
        let mut lead = lead();
        lead.company = Some("Acme".to_string());
        lead.custom_fields
            .insert("pain_point".to_string(), "churn".to_string());

        let rendered = render_template(
            "Hi {{first_name}} at {{company}}, about {{ pain_point }}...",
            &lead,
        )
        .unwrap();
        assert_eq!(rendered, "Hi Bob at Acme, about churn...");
    }

    #[test]
    fn template_missing_variable_errors() {
        let lead = lead(); // no company
        let err = render_template("Hi {{first_name}} at {{company}}", &lead).unwrap_err();
        match err {
            SequenceError::MissingVariable(name) => assert_eq!(name, "company"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn template_without_placeholders_passes_through() {
        let rendered = render_template("No variables here.", &lead()).unwrap();
        assert_eq!(rendered, "No variables here.");
    }

    #[test]
    fn history_from_record_reads_open_and_reply() {
        let record = SendRecord {
            id: "s1".to_string(),
            account_id: crate::domain::AccountId::from("a1"),
            campaign_id: Some(CampaignId::from("camp-1")),
            lead_id: Some(LeadId::from("lead-1")),
            step_number: Some(1),
            kind: SendKind::Campaign,
            to: "bob@prospect.com".to_string(),
            subject: "s".to_string(),
            message_id: None,
            tracking_id: None,
            status: SendStatus::Opened,
            sent_at: Utc::now(),
            opened_at: Some(Utc::now()),
            replied_at: None,
            bounced_at: None,
            error: None,
        };

        let history = StepHistory::from_record(Some(&record));
        assert!(history.prev_opened);
        assert!(!history.prev_replied);

        let empty = StepHistory::from_record(None);
        assert!(!empty.prev_opened);
    }
}
