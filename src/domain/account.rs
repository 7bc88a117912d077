//! Sending-account domain types.
//!
//! Represents the operator-owned mailboxes used for outreach and warmup,
//! including their SMTP/IMAP settings, deliverability reputation, and
//! warmup progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Reputation score bounds. Scores are always clamped into this range.
pub const REPUTATION_MIN: i32 = 0;
pub const REPUTATION_MAX: i32 = 100;

/// An email account owned by the operator.
///
/// Accounts are mutated by the warmup controller (status, reputation) and
/// the deliverability guard (reputation); everything else is operator
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAccount {
    /// Unique identifier for this account.
    pub id: AccountId,
    /// Email address for this account.
    pub email: String,
    /// Display name used in the From header.
    pub display_name: Option<String>,
    /// Mail provider behind this account.
    pub provider: MailProviderKind,
    /// SMTP submission settings.
    pub smtp: SmtpSettings,
    /// IMAP settings. Host/credentials fall back to SMTP values when absent.
    pub imap: Option<ImapSettings>,
    /// Maximum outbound emails per day for this account.
    pub daily_limit: u32,
    /// Deliverability reputation in [0, 100].
    pub reputation: u8,
    /// Warmup progress for this account.
    pub warmup_status: WarmupStatus,
    /// Warmup configuration, present once warmup has been set up.
    pub warmup_settings: Option<WarmupSettings>,
    /// When warmup first started sending, used for the ramp-up curve.
    pub warmup_started_at: Option<DateTime<Utc>>,
    /// Whether the account participates in sending and sync at all.
    ///
    /// Cleared on authentication failure until the operator reconfigures
    /// credentials.
    pub is_active: bool,
    /// Latest DNS health check result for the account's domain.
    pub dns_health: Option<DnsHealth>,
}

impl EmailAccount {
    /// Returns the domain part of the account's address.
    pub fn domain(&self) -> &str {
        self.email.rsplit('@').next().unwrap_or(&self.email)
    }

    /// Applies a reputation delta, clamping the result to [0, 100].
    pub fn adjust_reputation(&mut self, delta: i32) {
        let adjusted = (self.reputation as i32 + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
        self.reputation = adjusted as u8;
    }

    /// Effective IMAP settings, falling back to the SMTP host with the
    /// standard IMAPS port when none are configured.
    pub fn imap_settings(&self) -> ImapSettings {
        self.imap.clone().unwrap_or_else(|| ImapSettings {
            host: self.smtp.host.clone(),
            port: 993,
            use_tls: true,
        })
    }
}

/// Mail provider behind an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProviderKind {
    /// Gmail / Google Workspace via IMAP+SMTP.
    Gmail,
    /// Microsoft 365 / Outlook via IMAP+SMTP.
    Outlook,
    /// Any other standard IMAP/SMTP provider.
    Custom,
}

/// SMTP submission settings for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port (465 for implicit TLS, 587 for STARTTLS).
    pub port: u16,
    /// Login username, usually the email address.
    pub username: String,
    /// Password or app-specific password.
    pub password: String,
}

impl SmtpSettings {
    /// Whether the settings are complete enough to attempt a send.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// IMAP settings for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapSettings {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (typically 993).
    pub port: u16,
    /// Whether to use implicit TLS.
    pub use_tls: bool,
}

/// Warmup progress for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupStatus {
    /// Warmup has never run for this account.
    NotStarted,
    /// Warmup is actively sending.
    InProgress,
    /// Warmup was started and then paused by the operator or a spam alert.
    Paused,
    /// Sent volume and reputation both crossed the completion thresholds.
    Completed,
}

/// Per-account warmup configuration.
///
/// Defaults mirror a conservative 30-day ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSettings {
    /// Whether warmup sending is enabled for this account.
    pub enabled: bool,
    /// Warmup emails per day at the start of the ramp.
    pub daily_warmup_emails: u32,
    /// Days over which volume ramps from the starting value to the maximum.
    pub ramp_up_days: u32,
    /// Warmup emails per day at the top of the ramp.
    pub max_daily_emails: u32,
    /// Maximum warmup sends per hour.
    pub hourly_rate: u32,
    /// Whether to automatically reply to inbound warmup mail.
    pub auto_reply: bool,
    /// Maximum number of messages in one warmup thread.
    pub max_thread_length: u32,
    /// Upper bound in minutes on the randomized delay before an auto-reply.
    pub reply_delay_minutes: u32,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_warmup_emails: 5,
            ramp_up_days: 30,
            max_daily_emails: 40,
            hourly_rate: 5,
            auto_reply: true,
            max_thread_length: 3,
            reply_delay_minutes: 30,
        }
    }
}

/// Result of a DNS health check for an account's domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsHealth {
    /// Domain that was checked.
    pub domain: String,
    /// Whether MX records resolve.
    pub mx: bool,
    /// Whether an SPF TXT record (`v=spf1`) exists.
    pub spf: bool,
    /// Whether a DKIM record was found under a common selector.
    pub dkim: bool,
    /// Whether a DMARC record (`v=dmarc1`) exists at `_dmarc.`.
    pub dmarc: bool,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl DnsHealth {
    /// Whether the domain is eligible for warmup. MX is required; SPF,
    /// DKIM, and DMARC are recorded but advisory.
    pub fn is_sendable(&self) -> bool {
        self.mx
    }
}
