//! End-to-end engine tests over the in-memory store.
//!
//! These drive the assembled engine with scripted transports: a recording
//! SMTP transport and an IMAP client that serves canned mailboxes. Each
//! test exercises one of the engine's externally observable guarantees;
//! unit tests inside the service modules cover the finer-grained logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc, Weekday};
use pretty_assertions::assert_eq;

use ember::config::{EngineSettings, RetryPolicy};
use ember::domain::{
    AccountId, Campaign, CampaignId, CampaignStats, CampaignStatus, EmailAccount, Lead, LeadId,
    LeadStatus, MailProviderKind, MessageId, SendKind, SendStatus, SendingSchedule, SequenceStatus,
    SequenceStep, SmtpSettings, ThrottleSettings, WarmupEmailStatus, WarmupStatus,
};
use ember::providers::{
    DnsResolver, FetchBatch, FetchQuery, ImapClient, MailTransport, OutgoingMessage, RawMessage,
    SendReceipt, TransportError, TransportResult,
};
use ember::services::{InboxFilter, Pagination, TrafficClass};
use ember::storage::MemoryStore;
use ember::Engine;

// ============================================================================
// Scripted infrastructure
// ============================================================================

/// Records every submission and hands out sequential message ids.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    counter: Mutex<u32>,
}

impl RecordingTransport {
    fn sent_messages(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(
        &self,
        account: &EmailAccount,
        message: &OutgoingMessage,
    ) -> TransportResult<SendReceipt> {
        let n = {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            *counter
        };
        self.sent
            .lock()
            .unwrap()
            .push((account.email.clone(), message.clone()));
        Ok(SendReceipt {
            message_id: MessageId::from(format!("<m{}@{}>", n, account.domain())),
        })
    }
}

/// Serves canned mailboxes keyed by account address.
#[derive(Default)]
struct ScriptedImap {
    mailboxes: Mutex<HashMap<String, Vec<RawMessage>>>,
    fail_next: Mutex<bool>,
}

impl ScriptedImap {
    fn push_message(&self, account_email: &str, uid: u32, raw: String) {
        self.mailboxes
            .lock()
            .unwrap()
            .entry(account_email.to_string())
            .or_default()
            .push(RawMessage {
                uid,
                body: raw.into_bytes(),
                internal_date: Some(Utc::now()),
            });
    }

    fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl ImapClient for ScriptedImap {
    async fn fetch_since(
        &self,
        account: &EmailAccount,
        mailbox: &str,
        query: FetchQuery,
    ) -> TransportResult<FetchBatch> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(TransportError::Connection("scripted failure".to_string()));
        }
        if mailbox != "INBOX" {
            return Ok(FetchBatch {
                uid_validity: Some(1),
                messages: vec![],
            });
        }

        let all = self
            .mailboxes
            .lock()
            .unwrap()
            .get(&account.email)
            .cloned()
            .unwrap_or_default();

        let mut messages: Vec<RawMessage> = match query {
            FetchQuery::SinceUid(last) => all.into_iter().filter(|m| m.uid > last).collect(),
            FetchQuery::SinceDate(_) => all,
        };
        messages.sort_by_key(|m| m.uid);

        Ok(FetchBatch {
            uid_validity: Some(1),
            messages,
        })
    }
}

/// Always-healthy DNS.
struct OkDns;

#[async_trait]
impl DnsResolver for OkDns {
    async fn resolve_mx(&self, _domain: &str) -> TransportResult<Vec<String>> {
        Ok(vec!["mx.example.com.".to_string()])
    }

    async fn resolve_txt(&self, name: &str) -> TransportResult<Vec<String>> {
        if name.starts_with("_dmarc.") {
            Ok(vec!["v=DMARC1; p=none".to_string()])
        } else {
            Ok(vec!["v=spf1 -all".to_string()])
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    // Fast, single-attempt retries keep tests deterministic.
    settings.retry = RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::from_millis(1),
        jitter: 0.0,
    };
    settings
}

fn account(id: &str, email: &str, daily_limit: u32) -> EmailAccount {
    EmailAccount {
        id: AccountId::from(id),
        email: email.to_string(),
        display_name: None,
        provider: MailProviderKind::Custom,
        smtp: SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: email.to_string(),
            password: "pw".to_string(),
        },
        imap: None,
        daily_limit,
        reputation: 50,
        warmup_status: WarmupStatus::NotStarted,
        warmup_settings: None,
        warmup_started_at: None,
        is_active: true,
        dns_health: None,
    }
}

fn always_open_schedule() -> SendingSchedule {
    SendingSchedule {
        utc_offset_minutes: 0,
        working_days: vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ],
        start_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
    }
}

fn campaign(id: &str, account_ids: Vec<AccountId>, steps: Vec<SequenceStep>) -> Campaign {
    Campaign {
        id: CampaignId::from(id),
        name: format!("campaign {}", id),
        status: CampaignStatus::Active,
        sequence: steps,
        schedule: always_open_schedule(),
        throttle: ThrottleSettings {
            emails_per_hour: 0,
            delay_between_emails_secs: 0,
            randomize_delay: false,
            separate_warmup_pool: false,
        },
        account_ids,
        open_tracking: false,
        stats: CampaignStats::default(),
        created_at: Utc::now(),
    }
}

fn step(number: u32, delay_days: u32) -> SequenceStep {
    SequenceStep {
        step_number: number,
        subject: "Quick question, {{first_name}}".to_string(),
        content: "Hi {{first_name}}, does this resonate?".to_string(),
        delay_days,
        conditions: None,
        is_active: true,
    }
}

fn lead(n: u32, campaign_id: &str, domain: &str) -> Lead {
    let mut lead = Lead::new(
        LeadId::from(format!("lead-{}", n)),
        CampaignId::from(campaign_id),
        format!("prospect{}@{}", n, domain),
    );
    lead.first_name = Some(format!("Prospect{}", n));
    lead
}

struct Harness {
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    imap: Arc<ScriptedImap>,
    engine: Arc<Engine>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(RecordingTransport::default());
    let imap = Arc::new(ScriptedImap::default());
    let engine = Engine::new(
        Arc::clone(&store),
        Arc::clone(&transport) as Arc<dyn MailTransport>,
        Arc::clone(&imap) as Arc<dyn ImapClient>,
        Arc::new(OkDns),
        settings(),
    );
    Harness {
        store,
        transport,
        imap,
        engine,
    }
}

fn reply_raw(from: &str, to: &str, in_reply_to: &str, subject: &str) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\n\
         Message-ID: <reply-{from}@remote>\r\nIn-Reply-To: {in_reply_to}\r\n\r\n\
         Thanks for reaching out, tell me more."
    )
}

// ============================================================================
// Throttle cap
// ============================================================================

#[tokio::test]
async fn daily_cap_admits_fifty_of_sixty() {
    let h = harness();
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;
    h.store
        .insert_campaign(campaign(
            "camp-1",
            vec![AccountId::from("acct-1")],
            vec![step(1, 0)],
        ))
        .await;
    for n in 0..60 {
        h.store.insert_lead(lead(n, "camp-1", "prospect.example")).await;
    }

    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 50);
    assert_eq!(report.deferred, 10);
    assert_eq!(h.transport.sent_messages().len(), 50);

    // Re-running the same day admits nothing further.
    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.deferred, 10);

    let campaign = h.store.campaign(&CampaignId::from("camp-1")).await.unwrap();
    assert_eq!(campaign.stats.sent, 50);
}

// ============================================================================
// Blacklist enforcement
// ============================================================================

#[tokio::test]
async fn blacklisted_domain_is_never_sent_to() {
    let h = harness();
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;
    h.store
        .insert_campaign(campaign(
            "camp-1",
            vec![AccountId::from("acct-1")],
            vec![step(1, 0)],
        ))
        .await;
    // Seed-blacklisted disposable domain.
    h.store.insert_lead(lead(1, "camp-1", "mailinator.com")).await;
    h.store.insert_lead(lead(2, "camp-1", "prospect.example")).await;

    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.blacklisted, 1);

    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.to.email.ends_with("prospect.example"));
}

#[tokio::test]
async fn warmup_skips_blacklisted_partner_domain() {
    let h = harness();
    let mut warming = account("acct-1", "alice@example.com", 50);
    warming.warmup_settings = Some(Default::default());
    h.store.insert_account(warming).await;
    // The only partner lives on a seed-blacklisted domain.
    h.store.insert_account(account("acct-2", "peer@mailinator.com", 50)).await;

    h.engine.start_warmup(&AccountId::from("acct-1")).await.unwrap();
    let report = h.engine.run_warmup_now().await.unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(report.blacklisted, 1);
    assert!(h.transport.sent_messages().is_empty());
}

// ============================================================================
// Sync: dedup and cursor
// ============================================================================

#[tokio::test]
async fn overlapping_syncs_dedup_and_keep_cursor_monotonic() {
    let h = harness();
    let acct = AccountId::from("acct-1");
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;

    for uid in 1..=3u32 {
        h.imap.push_message(
            "alice@example.com",
            uid,
            format!(
                "From: someone{uid}@remote.example\r\nTo: alice@example.com\r\n\
                 Subject: hello {uid}\r\nMessage-ID: <msg-{uid}@remote.example>\r\n\r\nhi"
            ),
        );
    }

    let outcome = h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(h.store.messages().await.len(), 3);

    let state = h.store.sync_state(&acct).await.unwrap();
    assert_eq!(state.last_uid, Some(3));

    // Force a full overlap: drop the cursor so the same UID range is
    // fetched again. Nothing is stored twice and the cursor never moves
    // backward.
    let mut rewound = state.clone();
    rewound.last_uid = None;
    use ember::services::SyncStorage;
    SyncStorage::upsert_sync_state(h.store.as_ref(), &rewound)
        .await
        .unwrap();

    let outcome = h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(h.store.messages().await.len(), 3, "no duplicates stored");

    let state = h.store.sync_state(&acct).await.unwrap();
    assert_eq!(state.last_uid, Some(3));
}

#[tokio::test]
async fn failed_sync_keeps_cursor_and_records_error() {
    let h = harness();
    let acct = AccountId::from("acct-1");
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;

    for uid in 1..=2u32 {
        h.imap.push_message(
            "alice@example.com",
            uid,
            format!(
                "From: someone@remote.example\r\nTo: alice@example.com\r\n\
                 Subject: hello\r\nMessage-ID: <msg-{uid}@remote.example>\r\n\r\nhi"
            ),
        );
    }
    h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(h.store.sync_state(&acct).await.unwrap().last_uid, Some(2));

    h.imap.fail_next();
    let err = h.engine.sync_inbox_now(&acct).await;
    assert!(err.is_err());

    let state = h.store.sync_state(&acct).await.unwrap();
    assert_eq!(state.last_uid, Some(2), "cursor untouched by the failure");
    assert!(state.error_message.is_some());

    // The next pass resumes from the confirmed cursor.
    h.imap.push_message(
        "alice@example.com",
        3,
        "From: someone@remote.example\r\nTo: alice@example.com\r\n\
         Subject: hello\r\nMessage-ID: <msg-3@remote.example>\r\n\r\nhi"
            .to_string(),
    );
    let outcome = h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(h.store.sync_state(&acct).await.unwrap().last_uid, Some(3));
}

// ============================================================================
// Reply and bounce feedback
// ============================================================================

#[tokio::test]
async fn campaign_reply_absorbs_lead_and_stops_sequencing() {
    let h = harness();
    let acct = AccountId::from("acct-1");
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;
    h.store
        .insert_campaign(campaign(
            "camp-1",
            vec![acct.clone()],
            vec![step(1, 0), step(2, 0)],
        ))
        .await;
    h.store.insert_lead(lead(1, "camp-1", "prospect.example")).await;

    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();
    assert_eq!(report.sent, 1);

    // The prospect replies to the message we just sent.
    let sent_id = h.store.send_records().await[0]
        .message_id
        .clone()
        .unwrap();
    h.imap.push_message(
        "alice@example.com",
        1,
        reply_raw(
            "prospect1@prospect.example",
            "alice@example.com",
            &sent_id.0,
            "Re: Quick question, Prospect1",
        ),
    );

    let outcome = h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(outcome.replies_found, 1);

    let lead = h.store.lead(&LeadId::from("lead-1")).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Replied);
    assert_eq!(lead.sequence_status, SequenceStatus::Replied);

    // Step 2 is due by delay but never sends.
    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(h.transport.sent_messages().len(), 1);

    let campaign = h.store.campaign(&CampaignId::from("camp-1")).await.unwrap();
    assert_eq!(campaign.stats.replied, 1);
}

#[tokio::test]
async fn bounce_absorbs_lead_and_updates_stats() {
    let h = harness();
    let acct = AccountId::from("acct-1");
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;
    h.store
        .insert_campaign(campaign(
            "camp-1",
            vec![acct.clone()],
            vec![step(1, 0), step(2, 0)],
        ))
        .await;
    h.store.insert_lead(lead(1, "camp-1", "gone.example")).await;

    h.engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();

    h.imap.push_message(
        "alice@example.com",
        1,
        "From: MAILER-DAEMON@mx.example.com\r\nTo: alice@example.com\r\n\
         Subject: Undelivered Mail Returned to Sender (prospect1@gone.example)\r\n\
         Message-ID: <dsn-1@mx.example.com>\r\n\r\n\
         Delivery to prospect1@gone.example failed permanently."
            .to_string(),
    );

    let outcome = h.engine.sync_inbox_now(&acct).await.unwrap();
    assert_eq!(outcome.bounces_found, 1);

    let lead = h.store.lead(&LeadId::from("lead-1")).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Bounced);
    assert_eq!(lead.sequence_status, SequenceStatus::Bounced);

    // Bounced is absorbing: no further sends, ever.
    let report = h
        .engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();
    assert_eq!(report.sent, 0);

    let campaign = h.store.campaign(&CampaignId::from("camp-1")).await.unwrap();
    assert_eq!(campaign.stats.bounced, 1);
    assert_eq!(campaign.stats.delivered, 0);

    // The sender's reputation took the bounce penalty.
    let sender = h.store.account(&acct).await.unwrap();
    assert!(sender.reputation < 50);
}

// ============================================================================
// Warmup round trip
// ============================================================================

#[tokio::test]
async fn warmup_round_trip_credits_reputation_via_sync() {
    let h = harness();
    let a = AccountId::from("acct-a");
    let b = AccountId::from("acct-b");

    let mut warming = account("acct-a", "a@one.example", 10);
    warming.warmup_settings = Some(ember::domain::WarmupSettings {
        auto_reply: false,
        ..Default::default()
    });
    h.store.insert_account(warming).await;
    h.store.insert_account(account("acct-b", "b@two.example", 50)).await;

    h.engine.start_warmup(&a).await.unwrap();
    let report = h.engine.run_warmup_now().await.unwrap();
    assert_eq!(report.sent, 1);

    // Exactly one sent warmup record exists.
    let warmups = h.store.warmup_emails().await;
    assert_eq!(warmups.len(), 1);
    assert_eq!(warmups[0].status, WarmupEmailStatus::Sent);
    assert_eq!(warmups[0].from_account_id, a);
    assert_eq!(warmups[0].to_account_id, b);

    // A's budget was charged once; B's was not.
    let shared = ThrottleSettings::default();
    let now = Utc::now();
    assert_eq!(
        h.engine.throttler().sent_today(&a, TrafficClass::Warmup, &shared, now),
        1
    );
    assert_eq!(
        h.engine.throttler().sent_today(&b, TrafficClass::Warmup, &shared, now),
        0
    );

    // A moved to in-progress; B's reputation is untouched so far.
    assert_eq!(
        h.store.account(&a).await.unwrap().warmup_status,
        WarmupStatus::InProgress
    );
    assert_eq!(h.store.account(&b).await.unwrap().reputation, 50);

    // B replies; A's sync classifies it and credits A's reputation.
    let warmup_mid = warmups[0].message_id.clone().unwrap();
    h.imap.push_message(
        "a@one.example",
        1,
        reply_raw(
            "b@two.example",
            "a@one.example",
            &warmup_mid.0,
            "Re: warmup",
        ),
    );

    let reputation_before = h.store.account(&a).await.unwrap().reputation;
    h.engine.sync_inbox_now(&a).await.unwrap();

    let warmups = h.store.warmup_emails().await;
    assert!(warmups[0].replied_at.is_some(), "reply credited");
    assert!(
        h.store.account(&a).await.unwrap().reputation > reputation_before,
        "reply raised the sender's reputation"
    );
    assert_eq!(
        h.store.account(&b).await.unwrap().reputation,
        50,
        "the replying account is unchanged"
    );

    // The stored message is flagged as warmup traffic and hidden by the
    // default operator filter.
    let visible = h
        .engine
        .list_inbox(
            &a,
            &InboxFilter {
                is_warmup: Some(false),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert!(visible.is_empty());
}

// ============================================================================
// Manual reply
// ============================================================================

#[tokio::test]
async fn manual_reply_threads_and_logs() {
    let h = harness();
    let acct = AccountId::from("acct-1");
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;

    h.imap.push_message(
        "alice@example.com",
        1,
        "From: Bob <bob@remote.example>\r\nTo: alice@example.com\r\n\
         Subject: Question about pricing\r\nMessage-ID: <q1@remote.example>\r\n\r\n\
         How much does it cost?"
            .to_string(),
    );
    h.engine.sync_inbox_now(&acct).await.unwrap();

    let record = h
        .engine
        .send_manual_reply(
            &acct,
            &MessageId::from("q1@remote.example"),
            "It starts at $49.".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(record.kind, SendKind::Manual);
    assert_eq!(record.status, SendStatus::Sent);
    assert_eq!(record.to, "bob@remote.example");
    assert!(record.subject.starts_with("Re: "));

    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.in_reply_to.as_deref(),
        Some("q1@remote.example")
    );
}

// ============================================================================
// Analytics
// ============================================================================

#[tokio::test]
async fn campaign_analytics_reflect_stats() {
    let h = harness();
    h.store.insert_account(account("acct-1", "alice@example.com", 50)).await;
    h.store
        .insert_campaign(campaign(
            "camp-1",
            vec![AccountId::from("acct-1")],
            vec![step(1, 0)],
        ))
        .await;
    for n in 0..4 {
        h.store.insert_lead(lead(n, "camp-1", "prospect.example")).await;
    }

    h.engine
        .run_campaign_now(&CampaignId::from("camp-1"))
        .await
        .unwrap();

    let analytics = h
        .engine
        .campaign_analytics(&CampaignId::from("camp-1"))
        .await
        .unwrap();
    assert_eq!(analytics.sent, 4);
    assert_eq!(analytics.delivered, 4);
    assert_eq!(analytics.open_rate, 0.0);
}
