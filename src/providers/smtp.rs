//! SMTP send transport.
//!
//! Wraps `lettre` to build MIME messages and submit them through the
//! sending account's SMTP server. Every outbound message carries the
//! compliance headers (`X-Mailer`, `List-Unsubscribe`,
//! `List-Unsubscribe-Post`) and, for warmup traffic, a non-visible
//! correlation header that lets inbox sync recognize warmup replies
//! without marking the visible subject line.

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MessageBuilder, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use uuid::Uuid;

use super::{TransportError, TransportResult};
use crate::domain::{Address, EmailAccount, MessageId};

/// Value of the `X-Mailer` header on all outbound mail.
pub const X_MAILER_VALUE: &str = "Ember Mailer";

/// Name of the internal warmup correlation header.
///
/// Present only on warmup traffic; stripped from any operator-facing
/// rendering and never reflected in the subject line.
pub const WARMUP_HEADER: &str = "X-Ember-Ref";

/// Value of the `List-Unsubscribe-Post` header (RFC 8058 one-click).
pub const LIST_UNSUBSCRIBE_POST_VALUE: &str = "List-Unsubscribe=One-Click";

macro_rules! string_header {
    ($(#[$doc:meta])* $name:ident, $header:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        struct $name(String);

        impl Header for $name {
            fn name() -> HeaderName {
                HeaderName::new_from_ascii_str($header)
            }

            fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                Ok(Self(s.to_string()))
            }

            fn display(&self) -> HeaderValue {
                HeaderValue::new(Self::name(), self.0.clone())
            }
        }
    };
}

string_header!(XMailer, "X-Mailer");
string_header!(ListUnsubscribe, "List-Unsubscribe");
string_header!(ListUnsubscribePost, "List-Unsubscribe-Post");
string_header!(WarmupRef, "X-Ember-Ref");

/// An email handed to the transport for submission.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Recipient.
    pub to: Address,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body, when present.
    pub html: Option<String>,
    /// Message-ID being replied to, for reply threading.
    pub in_reply_to: Option<String>,
    /// References chain, for reply threading.
    pub references: Vec<String>,
    /// Warmup correlation token; presence marks the send as warmup traffic.
    pub warmup_ref: Option<String>,
}

impl OutgoingMessage {
    /// Creates a plain outbound message.
    pub fn new(to: Address, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            text: text.into(),
            html: None,
            in_reply_to: None,
            references: vec![],
            warmup_ref: None,
        }
    }
}

/// Receipt for a successful submission.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message-ID stamped on the outbound message.
    pub message_id: MessageId,
}

/// Send transport abstraction.
///
/// The real implementation is [`SmtpMailer`]; tests substitute recording
/// fakes.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Builds and submits one message through the account's SMTP server.
    async fn send(
        &self,
        account: &EmailAccount,
        message: &OutgoingMessage,
    ) -> TransportResult<SendReceipt>;
}

/// SMTP transport backed by `lettre`.
///
/// A fresh connection is made per send; sequencer and warmup volumes are
/// low enough that pooling buys nothing and a stale pooled connection is
/// one more failure mode.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    /// Creates a mailer with the given network timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Builds the RFC 5322 message with all engine headers applied.
    fn build_message(
        account: &EmailAccount,
        outgoing: &OutgoingMessage,
        message_id: &str,
    ) -> TransportResult<Message> {
        let from_mailbox: Mailbox = match &account.display_name {
            Some(name) => format!("{} <{}>", name, account.email),
            None => account.email.clone(),
        }
        .parse()
        .map_err(|e| TransportError::InvalidRequest(format!("invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = match &outgoing.to.name {
            Some(name) => format!("{} <{}>", name, outgoing.to.email),
            None => outgoing.to.email.clone(),
        }
        .parse()
        .map_err(|e| TransportError::InvalidRequest(format!("invalid to address: {}", e)))?;

        let mut builder = MessageBuilder::new()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&outgoing.subject)
            .message_id(Some(message_id.to_string()))
            .header(XMailer(X_MAILER_VALUE.to_string()))
            .header(ListUnsubscribe(format!(
                "<mailto:unsubscribe@{}>",
                account.domain()
            )))
            .header(ListUnsubscribePost(LIST_UNSUBSCRIBE_POST_VALUE.to_string()));

        if let Some(ref warmup_ref) = outgoing.warmup_ref {
            builder = builder.header(WarmupRef(warmup_ref.clone()));
        }

        if let Some(ref in_reply_to) = outgoing.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
            let references = if outgoing.references.is_empty() {
                in_reply_to.clone()
            } else {
                outgoing.references.join(" ")
            };
            builder = builder.references(references);
        }

        let body = match &outgoing.html {
            Some(html) => MultiPart::alternative()
                .singlepart(SinglePart::plain(outgoing.text.clone()))
                .singlepart(SinglePart::html(html.clone())),
            None => MultiPart::mixed().singlepart(SinglePart::plain(outgoing.text.clone())),
        };

        builder
            .multipart(body)
            .map_err(|e| TransportError::InvalidRequest(format!("failed to build message: {}", e)))
    }

    fn build_mailer(
        &self,
        account: &EmailAccount,
    ) -> TransportResult<AsyncSmtpTransport<Tokio1Executor>> {
        if !account.smtp.is_complete() {
            return Err(TransportError::Configuration(format!(
                "incomplete SMTP settings for {}",
                account.email
            )));
        }

        let credentials = SmtpCredentials::new(
            account.smtp.username.clone(),
            account.smtp.password.clone(),
        );

        // Port 465 is implicit TLS; everything else goes through STARTTLS.
        let builder = if account.smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&account.smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp.host)
        }
        .map_err(|e| TransportError::Connection(format!("SMTP relay error: {}", e)))?;

        Ok(builder
            .credentials(credentials)
            .port(account.smtp.port)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(
        &self,
        account: &EmailAccount,
        message: &OutgoingMessage,
    ) -> TransportResult<SendReceipt> {
        let message_id = format!("<{}@{}>", Uuid::new_v4(), account.domain());
        let email = Self::build_message(account, message, &message_id)?;
        let mailer = self.build_mailer(account)?;

        let response = tokio::time::timeout(self.timeout, mailer.send(email))
            .await
            .map_err(|_| TransportError::Timeout(format!("SMTP send to {}", account.smtp.host)))?
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("535") || text.to_lowercase().contains("auth") {
                    TransportError::Authentication(text)
                } else {
                    TransportError::Connection(format!("SMTP send failed: {}", text))
                }
            })?;

        if !response.is_positive() {
            return Err(TransportError::Protocol(format!(
                "SMTP rejected message: {}",
                response.code()
            )));
        }

        tracing::debug!(
            account = %account.email,
            to = %message.to.email,
            message_id = %message_id,
            "email submitted"
        );

        Ok(SendReceipt {
            message_id: MessageId::from(message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, MailProviderKind, SmtpSettings, WarmupStatus};

    fn account() -> EmailAccount {
        EmailAccount {
            id: AccountId::from("acct-1"),
            email: "alice@example.com".to_string(),
            display_name: Some("Alice".to_string()),
            provider: MailProviderKind::Custom,
            smtp: SmtpSettings {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: "alice@example.com".to_string(),
                password: "hunter2".to_string(),
            },
            imap: None,
            daily_limit: 50,
            reputation: 50,
            warmup_status: WarmupStatus::NotStarted,
            warmup_settings: None,
            warmup_started_at: None,
            is_active: true,
            dns_health: None,
        }
    }

    #[test]
    fn message_carries_compliance_headers() {
        let outgoing = OutgoingMessage::new(Address::new("bob@prospect.com"), "Hello", "Hi Bob");
        let message =
            SmtpMailer::build_message(&account(), &outgoing, "<mid-1@example.com>").unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("X-Mailer: Ember Mailer"));
        assert!(formatted.contains("List-Unsubscribe: <mailto:unsubscribe@example.com>"));
        assert!(formatted.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click"));
        assert!(!formatted.contains(WARMUP_HEADER));
    }

    #[test]
    fn warmup_message_carries_correlation_header() {
        let mut outgoing =
            OutgoingMessage::new(Address::new("peer@other.com"), "Quick check-in", "Hey");
        outgoing.warmup_ref = Some("wm-42".to_string());

        let message =
            SmtpMailer::build_message(&account(), &outgoing, "<mid-2@example.com>").unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("X-Ember-Ref: wm-42"));
        // The subject stays clean; correlation is header-only.
        assert!(formatted.contains("Subject: Quick check-in"));
    }

    #[test]
    fn reply_sets_threading_headers() {
        let mut outgoing =
            OutgoingMessage::new(Address::new("bob@prospect.com"), "Re: Hello", "Thanks");
        outgoing.in_reply_to = Some("<orig@example.com>".to_string());

        let message =
            SmtpMailer::build_message(&account(), &outgoing, "<mid-3@example.com>").unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("In-Reply-To: <orig@example.com>"));
        assert!(formatted.contains("References: <orig@example.com>"));
    }

    #[test]
    fn html_builds_multipart_alternative() {
        let mut outgoing = OutgoingMessage::new(Address::new("bob@prospect.com"), "Hi", "text");
        outgoing.html = Some("<p>html</p>".to_string());

        let message =
            SmtpMailer::build_message(&account(), &outgoing, "<mid-4@example.com>").unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("<p>html</p>"));
    }

    #[test]
    fn incomplete_smtp_settings_rejected() {
        let mailer = SmtpMailer::new(Duration::from_secs(30));
        let mut acct = account();
        acct.smtp.host.clear();

        let err = mailer.build_mailer(&acct).unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[test]
    fn invalid_recipient_rejected() {
        let outgoing = OutgoingMessage::new(Address::new("not an address"), "Hi", "text");
        let err = SmtpMailer::build_message(&account(), &outgoing, "<mid-5@example.com>")
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
