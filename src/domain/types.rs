//! Core identifier types for domain entities.
//!
//! These newtype wrappers provide type safety for entity identifiers,
//! preventing accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

id_type! {
    /// Unique identifier for an email account.
    AccountId
}

id_type! {
    /// Unique identifier for a campaign.
    CampaignId
}

id_type! {
    /// Unique identifier for a lead.
    LeadId
}

id_type! {
    /// RFC 5322 Message-ID header value.
    ///
    /// This is the unique identifier assigned by the originating mail system,
    /// used for threading via In-Reply-To and References headers, and as the
    /// global deduplication key for stored inbox messages.
    MessageId
}

id_type! {
    /// Unique identifier for an email thread (conversation).
    ThreadId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_display() {
        let id = AccountId("acct-1".to_string());
        assert_eq!(id.to_string(), "acct-1");
    }

    #[test]
    fn campaign_id_equality() {
        let id1 = CampaignId::from("camp-1");
        let id2 = CampaignId::from("camp-1".to_string());
        assert_eq!(id1, id2);
    }

    #[test]
    fn lead_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(LeadId::from("lead-1"));
        assert!(set.contains(&LeadId::from("lead-1")));
    }

    #[test]
    fn message_id_from_str() {
        let id: MessageId = "<unique@example.com>".into();
        assert_eq!(id.0, "<unique@example.com>");
    }

    #[test]
    fn thread_id_clone() {
        let id = ThreadId::from("thread-1");
        let cloned = id.clone();
        assert_eq!(id, cloned);
    }
}
