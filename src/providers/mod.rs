//! Infrastructure providers.
//!
//! Network-facing clients behind traits so services stay testable:
//! SMTP submission via `lettre`, IMAP fetching via `async-imap`, DNS
//! lookups via `trust-dns-resolver`, and the shared retry executor.
//!
//! Providers implement the wire plumbing only; all policy (throttling,
//! classification, cursors) lives in the services layer.

mod dns;
mod imap;
mod retry;
mod smtp;

pub use dns::{check_dns_health, DnsResolver, SystemDnsResolver};
pub use imap::{AsyncImapClient, FetchBatch, FetchQuery, ImapClient, RawMessage};
pub use retry::with_backoff;
pub use smtp::{
    MailTransport, OutgoingMessage, SendReceipt, SmtpMailer, LIST_UNSUBSCRIBE_POST_VALUE,
    WARMUP_HEADER, X_MAILER_VALUE,
};

use thiserror::Error;

/// Errors from network-facing providers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Authentication failed or credentials rejected.
    ///
    /// Never retried; disables the affected account until reconfigured.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Connection-level failure (refused, reset, DNS).
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The request was malformed (bad address, unbuildable message).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Protocol-level error from the remote server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The account is missing settings required for the operation.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Whether the retry policy may re-attempt this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Timeout(_)
        )
    }
}

/// Result type for provider operations.
pub type TransportResult<T> = Result<T, TransportError>;
