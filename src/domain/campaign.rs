//! Campaign domain types.
//!
//! A campaign is an ordered email sequence sent to a list of leads through
//! one or more sending accounts, subject to a sending schedule and
//! throttling settings.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{AccountId, CampaignId};

/// A cold-outreach campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique identifier for this campaign.
    pub id: CampaignId,
    /// Human-readable campaign name.
    pub name: String,
    /// Current lifecycle state.
    pub status: CampaignStatus,
    /// Ordered sequence of templated steps.
    pub sequence: Vec<SequenceStep>,
    /// When sends are allowed.
    pub schedule: SendingSchedule,
    /// Rate-limiting settings.
    pub throttle: ThrottleSettings,
    /// Accounts assigned to send for this campaign.
    pub account_ids: Vec<AccountId>,
    /// Whether campaign sends carry an open-tracking pixel.
    pub open_tracking: bool,
    /// Aggregate counters, mutated only by the sequencer and synchronizer.
    pub stats: CampaignStats,
    /// When the campaign was created.
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Steps sorted by step number. The sequence is kept sorted on write,
    /// but callers iterate through this to be safe.
    pub fn ordered_steps(&self) -> Vec<&SequenceStep> {
        let mut steps: Vec<&SequenceStep> = self.sequence.iter().collect();
        steps.sort_by_key(|s| s.step_number);
        steps
    }
}

/// Campaign lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Being configured, not yet sending.
    Draft,
    /// Actively sending.
    Active,
    /// Sending suspended; in-flight sends complete, no new admissions.
    Paused,
    /// All leads have finished the sequence.
    Completed,
}

/// One templated email in a campaign sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    /// Position in the sequence, starting at 1.
    pub step_number: u32,
    /// Subject template with `{{var}}` placeholders.
    pub subject: String,
    /// Body template with `{{var}}` placeholders.
    pub content: String,
    /// Days to wait after the previous step (or enrollment, for the first
    /// step) before this step becomes due.
    pub delay_days: u32,
    /// Optional gates evaluated against the previous sent step's events.
    pub conditions: Option<StepConditions>,
    /// Inactive steps are skipped without evaluation.
    pub is_active: bool,
}

/// Boolean gates on a sequence step.
///
/// Each gate compares against what the lead did with the previous *sent*
/// step: `if_opened: Some(false)` means "send only if the prior email was
/// not opened".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConditions {
    /// Require (or forbid, when false) an open of the previous step.
    pub if_opened: Option<bool>,
    /// Require (or forbid, when false) a reply to the previous step.
    pub if_replied: Option<bool>,
}

/// When a campaign is allowed to send, in its own timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingSchedule {
    /// Offset from UTC in minutes for the campaign's timezone.
    pub utc_offset_minutes: i32,
    /// Days of the week on which sending is allowed.
    pub working_days: Vec<Weekday>,
    /// Start of the daily sending window (local time).
    pub start_time: NaiveTime,
    /// End of the daily sending window (local time).
    pub end_time: NaiveTime,
}

impl SendingSchedule {
    /// A schedule allowing weekdays 09:00-17:00 UTC.
    pub fn business_hours() -> Self {
        Self {
            utc_offset_minutes: 0,
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        }
    }

    /// The campaign's fixed timezone offset.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }

    /// Whether `now` falls inside the sending window.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset());
        if !self.working_days.contains(&local.weekday()) {
            return false;
        }
        let time = local.time();
        time >= self.start_time && time < self.end_time
    }

    /// The next instant at or after `now` when the window is open.
    ///
    /// Scans forward day by day; with at least one working day configured
    /// this terminates within a week.
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.working_days.is_empty() {
            return now;
        }
        if self.is_open(now) {
            return now;
        }
        let offset = self.offset();
        let local = now.with_timezone(&offset);
        for day in 0..8 {
            let date = local.date_naive() + chrono::Duration::days(day);
            let candidate = date.and_time(self.start_time);
            let Some(candidate) = candidate.and_local_timezone(offset).single() else {
                continue;
            };
            let candidate = candidate.with_timezone(&Utc);
            if candidate >= now && self.working_days.contains(&candidate.with_timezone(&offset).weekday()) {
                return candidate;
            }
        }
        now
    }
}

/// Rate-limiting settings for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Maximum sends per hour per account.
    pub emails_per_hour: u32,
    /// Base delay between consecutive sends from one account, in seconds.
    pub delay_between_emails_secs: u64,
    /// Add random jitter to the inter-send delay.
    pub randomize_delay: bool,
    /// When true, warmup traffic draws from its own hourly/daily budget
    /// instead of competing with campaign sends for the account budget.
    pub separate_warmup_pool: bool,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            emails_per_hour: 10,
            delay_between_emails_secs: 60,
            randomize_delay: true,
            separate_warmup_pool: false,
        }
    }
}

/// Aggregate campaign counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Emails handed to the transport.
    pub sent: u64,
    /// Emails accepted by the receiving server (sent minus bounces).
    pub delivered: u64,
    /// Unique opens recorded.
    pub opened: u64,
    /// Unique clicks recorded.
    pub clicked: u64,
    /// Replies detected by inbox sync.
    pub replied: u64,
    /// Bounces detected by inbox sync.
    pub bounced: u64,
    /// Leads that unsubscribed.
    pub unsubscribed: u64,
}

impl CampaignStats {
    fn rate(numerator: u64, denominator: u64) -> f64 {
        if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        }
    }

    /// Opens per delivered email.
    pub fn open_rate(&self) -> f64 {
        Self::rate(self.opened, self.delivered)
    }

    /// Replies per delivered email.
    pub fn reply_rate(&self) -> f64 {
        Self::rate(self.replied, self.delivered)
    }

    /// Bounces per sent email.
    pub fn bounce_rate(&self) -> f64 {
        Self::rate(self.bounced, self.sent)
    }
}
