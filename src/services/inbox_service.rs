//! Inbox access and manual replies.
//!
//! Read/search access to stored inbox messages for the UI layer, plus the
//! manual reply path, which goes through the same send transport and
//! lands in the same send log as automated traffic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AccountId, Address, EmailAccount, InboxMessage, MessageId, SendKind, SendRecord, SendStatus,
};
use crate::providers::{MailTransport, OutgoingMessage};

/// Errors that can occur during inbox operations.
#[derive(Debug, Error)]
pub enum InboxError {
    /// Account not found.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Message not found.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for inbox operations.
pub type InboxResult<T> = Result<T, InboxError>;

/// Filters for inbox listing and search.
///
/// All criteria are conjunctive; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxFilter {
    /// Only unread messages.
    pub unread_only: bool,
    /// Only starred messages.
    pub starred_only: bool,
    /// Restrict by warmup flag (`Some(false)` hides warmup traffic).
    pub is_warmup: Option<bool>,
    /// Case-insensitive substring match on subject, sender, and body.
    pub query: Option<String>,
}

impl InboxFilter {
    /// Whether a message passes this filter.
    pub fn matches(&self, message: &InboxMessage) -> bool {
        if self.unread_only && message.flags.is_read {
            return false;
        }
        if self.starred_only && !message.flags.is_starred {
            return false;
        }
        if let Some(warmup) = self.is_warmup {
            if message.flags.is_warmup != warmup {
                return false;
            }
        }
        if let Some(query) = &self.query {
            let query = query.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                message.subject.to_lowercase(),
                message.from.email.to_lowercase(),
                message.content.text.to_lowercase()
            );
            if !haystack.contains(&query) {
                return false;
            }
        }
        true
    }
}

/// Pagination for inbox listing.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Number of items to skip.
    pub offset: usize,
    /// Maximum number of items to return.
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Storage abstraction for inbox access.
#[async_trait]
pub trait InboxStorage: Send + Sync {
    /// Gets an account by ID.
    async fn get_account(&self, id: &AccountId) -> InboxResult<Option<EmailAccount>>;

    /// Messages for an account, newest first.
    async fn messages_for_account(&self, account_id: &AccountId)
        -> InboxResult<Vec<InboxMessage>>;

    /// Gets a message by its Message-ID.
    async fn get_message(&self, message_id: &MessageId) -> InboxResult<Option<InboxMessage>>;

    /// Replaces a stored message (flag updates).
    async fn update_message(&self, message: &InboxMessage) -> InboxResult<()>;

    /// Appends to the send log.
    async fn insert_send_record(&self, record: &SendRecord) -> InboxResult<()>;
}

/// Inbox listing, flag updates, and manual replies.
pub struct InboxService {
    storage: Arc<dyn InboxStorage>,
    transport: Arc<dyn MailTransport>,
}

impl InboxService {
    /// Creates an inbox service.
    pub fn new(storage: Arc<dyn InboxStorage>, transport: Arc<dyn MailTransport>) -> Self {
        Self { storage, transport }
    }

    /// Lists an account's messages through a filter, newest first.
    pub async fn list(
        &self,
        account_id: &AccountId,
        filter: &InboxFilter,
        pagination: Pagination,
    ) -> InboxResult<Vec<InboxMessage>> {
        let mut messages = self.storage.messages_for_account(account_id).await?;
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        Ok(messages
            .into_iter()
            .filter(|m| filter.matches(m))
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect())
    }

    /// Marks a message read or unread.
    pub async fn mark_read(&self, message_id: &MessageId, read: bool) -> InboxResult<()> {
        let mut message = self.require_message(message_id).await?;
        message.flags.is_read = read;
        self.storage.update_message(&message).await
    }

    /// Stars or unstars a message.
    pub async fn star(&self, message_id: &MessageId, starred: bool) -> InboxResult<()> {
        let mut message = self.require_message(message_id).await?;
        message.flags.is_starred = starred;
        self.storage.update_message(&message).await
    }

    /// Sends a manually composed reply to a stored message.
    ///
    /// Threads via `In-Reply-To`/`References` and appends to the send log
    /// as a manual send.
    pub async fn send_reply(
        &self,
        account_id: &AccountId,
        message_id: &MessageId,
        body: String,
    ) -> InboxResult<SendRecord> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| InboxError::AccountNotFound(account_id.to_string()))?;
        let original = self.require_message(message_id).await?;

        let subject = if original.subject.to_lowercase().starts_with("re:") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };

        let mut outgoing = OutgoingMessage::new(
            Address::new(original.from.email.clone()),
            subject.clone(),
            body,
        );
        outgoing.in_reply_to = Some(original.message_id.0.clone());
        if let Some(thread_id) = &original.thread_id {
            if thread_id.0 != original.message_id.0 {
                outgoing.references = vec![thread_id.0.clone(), original.message_id.0.clone()];
            }
        }

        let receipt = self
            .transport
            .send(&account, &outgoing)
            .await
            .map_err(|e| InboxError::Transport(e.to_string()))?;

        let record = SendRecord {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            campaign_id: None,
            lead_id: None,
            step_number: None,
            kind: SendKind::Manual,
            to: original.from.email.clone(),
            subject,
            message_id: Some(receipt.message_id),
            tracking_id: None,
            status: SendStatus::Sent,
            sent_at: Utc::now(),
            opened_at: None,
            replied_at: None,
            bounced_at: None,
            error: None,
        };
        self.storage.insert_send_record(&record).await?;

        tracing::info!(account = %account.email, to = %record.to, "manual reply sent");
        Ok(record)
    }

    async fn require_message(&self, message_id: &MessageId) -> InboxResult<InboxMessage> {
        self.storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| InboxError::MessageNotFound(message_id.to_string()))
    }
}
