//! Domain layer types for the ember outreach engine.
//!
//! This module contains the core domain types used throughout the engine:
//! sending accounts, campaigns and their sequences, leads, inbox and warmup
//! messages, sync cursors, and the pure inbound-message classifier.

mod account;
mod campaign;
mod classifier;
mod lead;
mod message;
mod types;

pub use account::{
    DnsHealth, EmailAccount, ImapSettings, MailProviderKind, SmtpSettings, WarmupSettings,
    WarmupStatus, REPUTATION_MAX, REPUTATION_MIN,
};
pub use campaign::{
    Campaign, CampaignStats, CampaignStatus, SendingSchedule, SequenceStep, StepConditions,
    ThrottleSettings,
};
pub use classifier::{
    normalize_subject, Classification, InboundEnvelope, MessageClassifier, SentIndex,
};
pub use lead::{Lead, LeadStatus, SequenceStatus};
pub use message::{
    Address, BlacklistEntry, InboxMessage, InboxSyncState, MessageContent, MessageFlags,
    SendKind, SendRecord, SendStatus, SyncStatus, WarmupEmail, WarmupEmailStatus,
};
pub use types::{AccountId, CampaignId, LeadId, MessageId, ThreadId};
