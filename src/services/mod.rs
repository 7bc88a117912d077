//! Business services layer.
//!
//! This module contains the core services that make up the outreach
//! engine, coordinating between providers, storage, and domain types.
//!
//! # Architecture
//!
//! ```text
//!  Engine (workers, exposed operations)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (SMTP/IMAP/DNS providers, storage)
//! ```
//!
//! # Services Overview
//!
//! - [`Throttler`]: per-account rate limiting shared by all senders
//! - [`DeliverabilityGuard`]: domain blacklist and reputation bookkeeping
//! - [`CampaignSequencer`]: walks leads through campaign step sequences
//! - [`WarmupController`]: paced warmup exchanges between own accounts
//! - [`InboxSynchronizer`]: incremental per-account IMAP sync
//! - [`InboxService`]: inbox listing, search, and manual replies
//! - [`CampaignAnalytics`]/[`WarmupAnalytics`]: derived statistics

mod campaign_service;
mod deliverability_service;
mod inbox_service;
mod stats_service;
mod sync_service;
mod throttle_service;
mod warmup_service;

pub use campaign_service::{
    advance, render_template, Advance, CampaignSequencer, RunReport, SequenceError,
    SequenceResult, SequencerStorage, StepHistory,
};
pub use deliverability_service::{DeliverabilityGuard, GuardError, GuardResult, GuardStorage};
pub use inbox_service::{
    InboxError, InboxFilter, InboxResult, InboxService, InboxStorage, Pagination,
};
pub use stats_service::{CampaignAnalytics, WarmupAnalytics};
pub use sync_service::{
    extract_bounced_address, parse_envelope, InboxSynchronizer, SyncError, SyncOutcome,
    SyncResult, SyncStorage,
};
pub use throttle_service::{AccountLimits, Admission, Throttler, TrafficClass};
pub use warmup_service::{
    daily_target, generate_warmup_content, generate_warmup_reply, WarmupContent,
    WarmupController, WarmupError, WarmupResult, WarmupStorage, WarmupTickReport,
};
