//! Inbound message classification.
//!
//! Pure, side-effect-free classification of a fetched message into one of
//! four buckets, given only the message itself and an index of what we
//! previously sent. Heuristics are evaluated in a fixed priority order:
//! bounce and warmup signals are highly specific and must not be shadowed
//! by the looser subject matching used for campaign replies.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};

use super::Address;

/// Classification of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A delivery failure notification.
    Bounce,
    /// A reply within a warmup exchange between operator accounts.
    WarmupReply,
    /// A reply from a lead to a campaign email.
    CampaignReply,
    /// None of the above; stored without further action.
    Unrelated,
}

/// Parsed view of an inbound message, as handed to the classifier.
///
/// Built by the inbox synchronizer from the raw RFC 5322 source; carries
/// only what classification and persistence need.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Message-ID header, when present.
    pub message_id: Option<String>,
    /// In-Reply-To header values.
    pub in_reply_to: Vec<String>,
    /// References header values.
    pub references: Vec<String>,
    /// Sender.
    pub from: Address,
    /// Recipients.
    pub to: Vec<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: Option<String>,
    /// Date header.
    pub date: Option<DateTime<Utc>>,
    /// Value of the warmup correlation header, when present.
    pub warmup_ref: Option<String>,
    /// Whether the content type indicates a delivery status notification
    /// (`multipart/report; report-type=delivery-status`).
    pub is_delivery_status: bool,
}

/// Index of previously sent mail, used to recognize replies.
///
/// Built per account from the send log and warmup records before a sync
/// batch runs, so classification itself stays pure.
#[derive(Debug, Clone, Default)]
pub struct SentIndex {
    message_ids: HashSet<String>,
    subjects: HashSet<String>,
    warmup_pairs: HashSet<(String, String)>,
}

impl SentIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sent Message-ID.
    pub fn add_message_id(&mut self, message_id: impl AsRef<str>) {
        self.message_ids
            .insert(normalize_message_id(message_id.as_ref()));
    }

    /// Records a sent subject line.
    pub fn add_subject(&mut self, subject: &str) {
        self.subjects.insert(normalize_subject(subject));
    }

    /// Records a warmup (sender, recipient) account pair.
    pub fn add_warmup_pair(&mut self, from: &str, to: &str) {
        self.warmup_pairs
            .insert((from.to_lowercase(), to.to_lowercase()));
    }

    /// Whether the given Message-ID was sent by us.
    pub fn contains_message_id(&self, message_id: &str) -> bool {
        self.message_ids
            .contains(&normalize_message_id(message_id))
    }

    /// Whether the given subject, normalized, matches a sent subject.
    pub fn contains_subject(&self, subject: &str) -> bool {
        self.subjects.contains(&normalize_subject(subject))
    }

    /// Whether (from, to) matches a recorded warmup exchange in either
    /// direction.
    pub fn is_warmup_pair(&self, from: &str, to: &str) -> bool {
        let from = from.to_lowercase();
        let to = to.to_lowercase();
        self.warmup_pairs.contains(&(from.clone(), to.clone()))
            || self.warmup_pairs.contains(&(to, from))
    }
}

/// Strips angle brackets and whitespace from a Message-ID.
fn normalize_message_id(id: &str) -> String {
    id.trim().trim_matches(|c| c == '<' || c == '>').to_string()
}

/// Lowercases a subject and strips any leading reply/forward prefixes.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim().to_lowercase();
    loop {
        let stripped = s
            .strip_prefix("re:")
            .or_else(|| s.strip_prefix("fwd:"))
            .or_else(|| s.strip_prefix("fw:"));
        match stripped {
            Some(rest) => s = rest.trim_start().to_string(),
            None => break,
        }
    }
    s
}

/// Whether the subject carries a reply prefix.
fn has_reply_prefix(subject: &str) -> bool {
    let s = subject.trim().to_lowercase();
    s.starts_with("re:")
}

/// Message classifier with pre-compiled pattern sets.
///
/// Construction compiles the bounce heuristics once; [`classify`](Self::classify)
/// is then pure and cheap per message.
pub struct MessageClassifier {
    bounce_sender_re: RegexSet,
    bounce_subject_re: RegexSet,
}

impl MessageClassifier {
    /// Creates a classifier with the built-in bounce patterns.
    pub fn new() -> Self {
        let bounce_sender_re = RegexSet::new([
            r"(?i)^mailer-daemon@",
            r"(?i)^postmaster@",
            r"(?i)^mail-delivery",
            r"(?i)^microsoftexchange",
        ])
        .expect("bounce sender patterns are valid");

        let bounce_subject_re = RegexSet::new([
            r"(?i)delivery status notification",
            r"(?i)undelivered mail returned",
            r"(?i)mail delivery failed",
            r"(?i)message not delivered",
            r"(?i)delivery has failed",
            r"(?i)returned mail",
            r"(?i)failure notice",
            r"(?i)\bundeliverable\b",
        ])
        .expect("bounce subject patterns are valid");

        Self {
            bounce_sender_re,
            bounce_subject_re,
        }
    }

    /// Classifies one inbound message against the sent index.
    ///
    /// Priority order: Bounce, WarmupReply, CampaignReply, Unrelated.
    pub fn classify(&self, msg: &InboundEnvelope, index: &SentIndex) -> Classification {
        if self.is_bounce(msg) {
            return Classification::Bounce;
        }
        if self.is_warmup_reply(msg, index) {
            return Classification::WarmupReply;
        }
        if self.is_campaign_reply(msg, index) {
            return Classification::CampaignReply;
        }
        Classification::Unrelated
    }

    fn is_bounce(&self, msg: &InboundEnvelope) -> bool {
        if msg.is_delivery_status {
            return true;
        }
        if self.bounce_sender_re.is_match(&msg.from.email) {
            return true;
        }
        self.bounce_subject_re.is_match(&msg.subject)
    }

    fn is_warmup_reply(&self, msg: &InboundEnvelope, index: &SentIndex) -> bool {
        if msg.warmup_ref.is_some() {
            return true;
        }
        msg.to
            .iter()
            .any(|to| index.is_warmup_pair(&msg.from.email, &to.email))
    }

    fn is_campaign_reply(&self, msg: &InboundEnvelope, index: &SentIndex) -> bool {
        for id in msg.in_reply_to.iter().chain(msg.references.iter()) {
            if index.contains_message_id(id) {
                return true;
            }
        }
        has_reply_prefix(&msg.subject) && index.contains_subject(&msg.subject)
    }
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new()
    }
}
