//! Lead domain types.
//!
//! A lead is one recipient on a campaign's target list, together with the
//! merge fields used for template rendering and its progress through the
//! campaign sequence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CampaignId, LeadId};

/// A prospect enrolled in a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// Unique identifier for this lead.
    pub id: LeadId,
    /// Campaign whose target list this lead belongs to.
    pub campaign_id: CampaignId,
    /// Recipient address.
    pub email: String,
    /// First name merge field.
    pub first_name: Option<String>,
    /// Last name merge field.
    pub last_name: Option<String>,
    /// Company merge field.
    pub company: Option<String>,
    /// Job title merge field.
    pub job_title: Option<String>,
    /// Website merge field.
    pub website: Option<String>,
    /// Industry merge field.
    pub industry: Option<String>,
    /// Additional operator-defined merge fields.
    pub custom_fields: HashMap<String, String>,
    /// Engagement status. Transitions are monotonic; see [`LeadStatus`].
    pub status: LeadStatus,
    /// Progress through the campaign sequence.
    pub sequence_status: SequenceStatus,
    /// Number of sequence steps completed or skipped (0-based index of the
    /// next step to evaluate).
    pub current_step: u32,
    /// When the most recent step was sent.
    pub last_step_at: Option<DateTime<Utc>>,
    /// Engagement score maintained by the operator's scoring rules.
    pub score: i32,
    /// When this lead was last emailed.
    pub last_contacted_at: Option<DateTime<Utc>>,
    /// Set when template rendering failed for this lead; excluded from all
    /// further sends but kept on the list for operator review.
    pub excluded: bool,
    /// When this lead was enrolled, the anchor for the first step's delay.
    pub enrolled_at: DateTime<Utc>,
}

impl Lead {
    /// Creates a lead with the given address, enrolled now.
    pub fn new(id: LeadId, campaign_id: CampaignId, email: impl Into<String>) -> Self {
        Self {
            id,
            campaign_id,
            email: email.into(),
            first_name: None,
            last_name: None,
            company: None,
            job_title: None,
            website: None,
            industry: None,
            custom_fields: HashMap::new(),
            status: LeadStatus::New,
            sequence_status: SequenceStatus::Pending,
            current_step: 0,
            last_step_at: None,
            score: 0,
            last_contacted_at: None,
            excluded: false,
            enrolled_at: Utc::now(),
        }
    }

    /// Advances the engagement status, enforcing monotonicity.
    ///
    /// A lead only moves forward through the status ladder; attempts to move
    /// backward are ignored. Bounced and unsubscribed are absorbing and can
    /// never be left.
    pub fn promote(&mut self, status: LeadStatus) {
        if self.status.is_terminal() {
            return;
        }
        if status.rank() > self.status.rank() {
            self.status = status;
        }
    }

    /// Looks up a merge field by template variable name.
    pub fn merge_field(&self, name: &str) -> Option<&str> {
        let builtin = match name {
            "email" => Some(self.email.as_str()),
            "first_name" => self.first_name.as_deref(),
            "last_name" => self.last_name.as_deref(),
            "company" => self.company.as_deref(),
            "job_title" => self.job_title.as_deref(),
            "website" => self.website.as_deref(),
            "industry" => self.industry.as_deref(),
            _ => None,
        };
        builtin.or_else(|| self.custom_fields.get(name).map(String::as_str))
    }

    /// Whether the sequencer should consider this lead at all.
    pub fn is_sequenceable(&self) -> bool {
        !self.excluded && !self.status.is_terminal() && !self.sequence_status.is_terminal()
    }
}

/// Engagement status of a lead.
///
/// Statuses form a ladder; a lead only moves forward, except that
/// [`Bounced`](LeadStatus::Bounced) and
/// [`Unsubscribed`](LeadStatus::Unsubscribed) are absorbing terminal states
/// reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    /// Enrolled, never contacted.
    New,
    /// At least one email sent.
    Contacted,
    /// Opened an email.
    Opened,
    /// Clicked a link.
    Clicked,
    /// Replied to an email.
    Replied,
    /// Marked interested by the operator.
    Interested,
    /// An email to this lead bounced. Terminal.
    Bounced,
    /// The lead unsubscribed. Terminal.
    Unsubscribed,
}

impl LeadStatus {
    fn rank(self) -> u8 {
        match self {
            LeadStatus::New => 0,
            LeadStatus::Contacted => 1,
            LeadStatus::Opened => 2,
            LeadStatus::Clicked => 3,
            LeadStatus::Replied => 4,
            LeadStatus::Interested => 5,
            LeadStatus::Bounced => 6,
            LeadStatus::Unsubscribed => 7,
        }
    }

    /// Whether this status absorbs all further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::Bounced | LeadStatus::Unsubscribed)
    }
}

/// State of a lead within its campaign's sequence.
///
/// `Replied`, `Bounced`, and `Unsubscribed` are absorbing: once reached, no
/// further steps are ever scheduled for this lead in this campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceStatus {
    /// Enrolled, first step not yet due or sent.
    Pending,
    /// Admitted by the throttler, send in flight.
    Scheduled,
    /// At least one step sent; more remain.
    Sent,
    /// The lead replied; sequencing stopped.
    Replied,
    /// A send to the lead bounced; sequencing stopped.
    Bounced,
    /// The lead unsubscribed; sequencing stopped.
    Unsubscribed,
    /// Every step was sent or skipped.
    Completed,
}

impl SequenceStatus {
    /// Whether sequencing has permanently stopped for this lead.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SequenceStatus::Replied
                | SequenceStatus::Bounced
                | SequenceStatus::Unsubscribed
                | SequenceStatus::Completed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Lead {
        Lead::new(
            LeadId::from("lead-1"),
            CampaignId::from("camp-1"),
            "bob@prospect.com",
        )
    }

    #[test]
    fn promote_moves_forward() {
        let mut lead = lead();
        lead.promote(LeadStatus::Contacted);
        assert_eq!(lead.status, LeadStatus::Contacted);
        lead.promote(LeadStatus::Opened);
        assert_eq!(lead.status, LeadStatus::Opened);
    }

    #[test]
    fn promote_never_moves_backward() {
        let mut lead = lead();
        lead.promote(LeadStatus::Replied);
        lead.promote(LeadStatus::Contacted);
        assert_eq!(lead.status, LeadStatus::Replied);
    }

    #[test]
    fn bounced_is_absorbing() {
        let mut lead = lead();
        lead.promote(LeadStatus::Bounced);
        lead.promote(LeadStatus::Interested);
        lead.promote(LeadStatus::Unsubscribed);
        assert_eq!(lead.status, LeadStatus::Bounced);
    }

    #[test]
    fn unsubscribed_is_absorbing() {
        let mut lead = lead();
        lead.promote(LeadStatus::Unsubscribed);
        lead.promote(LeadStatus::Replied);
        assert_eq!(lead.status, LeadStatus::Unsubscribed);
    }

    #[test]
    fn merge_field_builtin_and_custom() {
        let mut lead = lead();
        lead.first_name = Some("Bob".to_string());
        lead.custom_fields
            .insert("favorite_color".to_string(), "green".to_string());

        assert_eq!(lead.merge_field("first_name"), Some("Bob"));
        assert_eq!(lead.merge_field("email"), Some("bob@prospect.com"));
        assert_eq!(lead.merge_field("favorite_color"), Some("green"));
        assert_eq!(lead.merge_field("company"), None);
        assert_eq!(lead.merge_field("nonexistent"), None);
    }

    #[test]
    fn excluded_lead_not_sequenceable() {
        let mut lead = lead();
        assert!(lead.is_sequenceable());
        lead.excluded = true;
        assert!(!lead.is_sequenceable());
    }

    #[test]
    fn terminal_sequence_status_not_sequenceable() {
        let mut lead = lead();
        lead.sequence_status = SequenceStatus::Completed;
        assert!(!lead.is_sequenceable());
    }
}
