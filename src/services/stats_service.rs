//! Analytics for campaigns and warmup.
//!
//! Pure aggregation over persisted state; the engine gathers the inputs
//! and these types compute the derived rates the UI layer displays.

use serde::{Deserialize, Serialize};

use crate::domain::{
    Campaign, EmailAccount, InboxSyncState, WarmupEmail, WarmupEmailStatus, WarmupStatus,
};

/// Campaign counters plus derived rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignAnalytics {
    /// Campaign name.
    pub name: String,
    /// Emails sent.
    pub sent: u64,
    /// Emails delivered (sent minus bounces).
    pub delivered: u64,
    /// Unique opens.
    pub opened: u64,
    /// Unique clicks.
    pub clicked: u64,
    /// Replies.
    pub replied: u64,
    /// Bounces.
    pub bounced: u64,
    /// Unsubscribes.
    pub unsubscribed: u64,
    /// Opens per delivered email.
    pub open_rate: f64,
    /// Replies per delivered email.
    pub reply_rate: f64,
    /// Bounces per sent email.
    pub bounce_rate: f64,
}

impl CampaignAnalytics {
    /// Computes analytics for a campaign.
    pub fn from_campaign(campaign: &Campaign) -> Self {
        let stats = &campaign.stats;
        Self {
            name: campaign.name.clone(),
            sent: stats.sent,
            delivered: stats.delivered,
            opened: stats.opened,
            clicked: stats.clicked,
            replied: stats.replied,
            bounced: stats.bounced,
            unsubscribed: stats.unsubscribed,
            open_rate: stats.open_rate(),
            reply_rate: stats.reply_rate(),
            bounce_rate: stats.bounce_rate(),
        }
    }
}

/// Warmup progress for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupAnalytics {
    /// Account address.
    pub email: String,
    /// Current warmup status.
    pub status: WarmupStatus,
    /// Current reputation.
    pub reputation: u8,
    /// Warmup emails sent.
    pub total_sent: u64,
    /// Warmup emails that received a reply.
    pub total_replied: u64,
    /// Warmup emails that landed in spam.
    pub spam_placements: u64,
    /// Replies per sent warmup email.
    pub reply_rate: f64,
    /// Spam placements per sent warmup email.
    pub spam_rate: f64,
}

impl WarmupAnalytics {
    /// Computes warmup analytics from an account's warmup history.
    pub fn from_history(
        account: &EmailAccount,
        emails: &[WarmupEmail],
        sync_state: Option<&InboxSyncState>,
    ) -> Self {
        let sent: Vec<&WarmupEmail> = emails
            .iter()
            .filter(|w| w.status != WarmupEmailStatus::Failed)
            .collect();
        let total_sent = sent.len() as u64;
        let total_replied = sent.iter().filter(|w| w.replied_at.is_some()).count() as u64;
        let spam_placements = sync_state
            .map(|s| s.spam_placements)
            .unwrap_or_else(|| {
                sent.iter()
                    .filter(|w| w.status == WarmupEmailStatus::Spam)
                    .count() as u64
            });

        let rate = |n: u64| {
            if total_sent == 0 {
                0.0
            } else {
                n as f64 / total_sent as f64
            }
        };

        Self {
            email: account.email.clone(),
            status: account.warmup_status,
            reputation: account.reputation,
            total_sent,
            total_replied,
            spam_placements,
            reply_rate: rate(total_replied),
            spam_rate: rate(spam_placements),
        }
    }
}
