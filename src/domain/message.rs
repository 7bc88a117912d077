//! Message domain types.
//!
//! Covers stored inbox messages, warmup email records, the outbound send
//! log, per-account sync cursors, and blacklist entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, CampaignId, LeadId, MessageId, ThreadId};

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// The address itself.
    pub email: String,
    /// Display name, if present.
    pub name: Option<String>,
}

impl Address {
    /// Creates an address without a display name.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates an address with a display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// The domain part of the address.
    pub fn domain(&self) -> &str {
        self.email.rsplit('@').next().unwrap_or(&self.email)
    }
}

/// Text and HTML bodies of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain-text body.
    pub text: String,
    /// HTML body, when present.
    pub html: Option<String>,
}

/// Flags on a stored inbox message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MessageFlags {
    /// Read by the operator.
    pub is_read: bool,
    /// Starred by the operator.
    pub is_starred: bool,
    /// Identified as warmup traffic.
    pub is_warmup: bool,
    /// Identified as a reply to something we sent.
    pub is_reply: bool,
    /// Sent by one of the operator's own accounts.
    pub sent_by_me: bool,
}

/// A message persisted from an account's inbox.
///
/// At most one record ever exists per [`MessageId`]; stores enforce this
/// with insert-if-absent semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    /// Global deduplication key.
    pub message_id: MessageId,
    /// Conversation this message belongs to. Falls back to the message's
    /// own id when the message starts a thread.
    pub thread_id: Option<ThreadId>,
    /// Account whose inbox this came from.
    pub account_id: AccountId,
    /// Sender.
    pub from: Address,
    /// Recipients.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Bodies.
    pub content: MessageContent,
    /// Message flags.
    pub flags: MessageFlags,
    /// IMAP UID within the account's mailbox.
    pub uid: u32,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

/// Outcome of a warmup send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupEmailStatus {
    /// Accepted by the transport.
    Sent,
    /// Transport reported failure.
    Failed,
    /// Later found in the recipient's spam folder.
    Spam,
}

/// A record of one warmup email between two operator accounts.
///
/// Immutable once created, except for the reply/spam bookkeeping fields
/// updated by inbox sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupEmail {
    /// Unique identifier for this record.
    pub id: String,
    /// Sending account.
    pub from_account_id: AccountId,
    /// Receiving account.
    pub to_account_id: AccountId,
    /// Subject as sent.
    pub subject: String,
    /// Body as sent.
    pub content: String,
    /// Message-ID assigned at send time.
    pub message_id: Option<MessageId>,
    /// Thread the exchange belongs to.
    pub thread_id: Option<ThreadId>,
    /// When the send happened.
    pub sent_at: DateTime<Utc>,
    /// Send outcome.
    pub status: WarmupEmailStatus,
    /// Whether this message was itself a reply in a warmup thread.
    pub is_reply: bool,
    /// Set when a reply to this email was detected.
    pub replied_at: Option<DateTime<Utc>>,
}

/// Kind of outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendKind {
    /// A campaign sequence step.
    Campaign,
    /// Warmup traffic.
    Warmup,
    /// A reply composed by the operator.
    Manual,
}

/// Delivery status of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Handed to the transport successfully.
    Sent,
    /// Recipient opened the email.
    Opened,
    /// Recipient replied.
    Replied,
    /// A bounce came back.
    Bounced,
    /// The transport reported failure.
    Failed,
}

/// One entry in the outbound send log.
///
/// The classifier's sent index and all campaign statistics derive from
/// these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    /// Unique identifier for this record.
    pub id: String,
    /// Account that sent the email.
    pub account_id: AccountId,
    /// Campaign, for campaign sends.
    pub campaign_id: Option<CampaignId>,
    /// Lead, for campaign sends.
    pub lead_id: Option<LeadId>,
    /// Sequence step number, for campaign sends.
    pub step_number: Option<u32>,
    /// What kind of send this was.
    pub kind: SendKind,
    /// Recipient address.
    pub to: String,
    /// Subject as sent.
    pub subject: String,
    /// Message-ID assigned at send time.
    pub message_id: Option<MessageId>,
    /// Open-tracking pixel id, when tracking was enabled.
    pub tracking_id: Option<String>,
    /// Current delivery status.
    pub status: SendStatus,
    /// When the send happened.
    pub sent_at: DateTime<Utc>,
    /// When an open was first recorded.
    pub opened_at: Option<DateTime<Utc>>,
    /// When a reply was detected.
    pub replied_at: Option<DateTime<Utc>>,
    /// When a bounce was detected.
    pub bounced_at: Option<DateTime<Utc>>,
    /// Transport error for failed sends.
    pub error: Option<String>,
}

/// Sync lifecycle state for one account's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No sync running.
    Idle,
    /// A sync is in progress.
    Syncing,
    /// The last sync failed; see the recorded error.
    Error,
}

/// Per-account incremental sync cursor and counters.
///
/// `last_uid` is monotonically non-decreasing; it only advances past
/// messages that were fully processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxSyncState {
    /// Account this cursor belongs to (1:1).
    pub account_id: AccountId,
    /// Highest UID fully processed, if any sync has completed work.
    pub last_uid: Option<u32>,
    /// UIDVALIDITY of the mailbox when the cursor was written. A change
    /// invalidates `last_uid` and forces a windowed re-sync.
    pub uid_validity: Option<u32>,
    /// Current sync lifecycle state.
    pub sync_status: SyncStatus,
    /// Cumulative messages processed.
    pub emails_processed: u64,
    /// Cumulative campaign replies found.
    pub replies_found: u64,
    /// Cumulative bounces found.
    pub bounces_found: u64,
    /// Cumulative warmup emails found in spam.
    pub spam_placements: u64,
    /// When the last sync finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Failure message from the last errored sync.
    pub error_message: Option<String>,
}

impl InboxSyncState {
    /// A fresh cursor for an account that has never synced.
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            last_uid: None,
            uid_validity: None,
            sync_status: SyncStatus::Idle,
            emails_processed: 0,
            replies_found: 0,
            bounces_found: 0,
            spam_placements: 0,
            last_sync_at: None,
            error_message: None,
        }
    }

    /// Advances the cursor, never letting it move backward.
    pub fn advance_uid(&mut self, uid: u32) {
        match self.last_uid {
            Some(last) if uid <= last => {}
            _ => self.last_uid = Some(uid),
        }
    }
}

/// A recipient domain excluded from sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// The blacklisted domain, lowercased.
    pub domain: String,
    /// Why the domain was blacklisted.
    pub reason: String,
    /// When the entry was created.
    pub added_at: DateTime<Utc>,
}
