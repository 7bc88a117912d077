//! Send throttling.
//!
//! The [`Throttler`] is the single piece of shared mutable state in the
//! engine. Both the campaign sequencer and the warmup controller ask it
//! for admission before every send; it enforces per-account daily and
//! hourly caps, the campaign's working-hours window, and a randomized
//! minimum gap between consecutive sends from one account.
//!
//! Admission is always deferral, never drop: a denied send reports the
//! next instant it could be admitted, and the caller retries on its next
//! tick.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{AccountId, SendingSchedule, ThrottleSettings};

/// Which budget a send draws from.
///
/// With [`ThrottleSettings::separate_warmup_pool`] unset (the default),
/// warmup and campaign traffic compete for the same per-account budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Cold-outreach campaign sends.
    Campaign,
    /// Warmup sends between operator accounts.
    Warmup,
}

/// Per-account limits supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct AccountLimits {
    /// Maximum sends per day.
    pub daily_limit: u32,
    /// Maximum sends per hour.
    pub emails_per_hour: u32,
}

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The send may proceed now.
    Granted,
    /// The send must wait until at least the given instant.
    Deferred {
        /// Earliest instant a retry could succeed.
        until: DateTime<Utc>,
    },
}

impl Admission {
    /// Whether the send was admitted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Counter window for one (account, pool) pair.
#[derive(Debug, Clone, Default)]
struct Window {
    day: Option<NaiveDate>,
    sent_today: u32,
    hour_start: Option<DateTime<Utc>>,
    sent_this_hour: u32,
    /// Earliest next send, set from the inter-send delay.
    next_allowed_at: Option<DateTime<Utc>>,
}

impl Window {
    /// Rolls the day/hour windows forward if `now` has left them.
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.sent_today = 0;
        }

        let hour_start = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if self.hour_start != Some(hour_start) {
            self.hour_start = Some(hour_start);
            self.sent_this_hour = 0;
        }
    }
}

struct ThrottlerInner {
    windows: HashMap<(AccountId, TrafficClass), Window>,
    rng: StdRng,
}

/// Cross-cutting rate limiter shared by the sequencer and the warmup
/// controller.
///
/// Internally a mutex around per-account counter windows; all methods are
/// synchronous and cheap, safe to call from any worker task.
pub struct Throttler {
    inner: Mutex<ThrottlerInner>,
}

impl Throttler {
    /// Creates a throttler with an OS-seeded jitter source.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a throttler with an explicit jitter source, for
    /// deterministic tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(ThrottlerInner {
                windows: HashMap::new(),
                rng,
            }),
        }
    }

    fn pool(class: TrafficClass, settings: &ThrottleSettings) -> TrafficClass {
        if settings.separate_warmup_pool {
            class
        } else {
            TrafficClass::Campaign
        }
    }

    /// Asks whether `account_id` may send now.
    ///
    /// Checks, in order: the sending-schedule window, the daily cap, the
    /// hourly cap, and the inter-send delay. The first check to fail
    /// produces a deferral with the earliest instant it could pass.
    pub fn admit(
        &self,
        account_id: &AccountId,
        class: TrafficClass,
        limits: &AccountLimits,
        schedule: Option<&SendingSchedule>,
        settings: &ThrottleSettings,
        now: DateTime<Utc>,
    ) -> Admission {
        if let Some(schedule) = schedule {
            if !schedule.is_open(now) {
                return Admission::Deferred {
                    until: schedule.next_open(now),
                };
            }
        }

        let pool = Self::pool(class, settings);
        let mut inner = self.inner.lock().expect("throttler lock poisoned");
        let window = inner
            .windows
            .entry((account_id.clone(), pool))
            .or_default();
        window.roll(now);

        if limits.daily_limit > 0 && window.sent_today >= limits.daily_limit {
            let midnight = next_midnight(now);
            let until = match schedule {
                Some(s) => s.next_open(midnight),
                None => midnight,
            };
            return Admission::Deferred { until };
        }

        if limits.emails_per_hour > 0 && window.sent_this_hour >= limits.emails_per_hour {
            let next_hour = window
                .hour_start
                .map(|h| h + ChronoDuration::hours(1))
                .unwrap_or(now);
            return Admission::Deferred { until: next_hour };
        }

        if let Some(next_allowed) = window.next_allowed_at {
            if now < next_allowed {
                return Admission::Deferred {
                    until: next_allowed,
                };
            }
        }

        Admission::Granted
    }

    /// Records a completed send, charging the account's budget and
    /// scheduling the next allowed instant from the inter-send delay.
    pub fn record_send(
        &self,
        account_id: &AccountId,
        class: TrafficClass,
        settings: &ThrottleSettings,
        now: DateTime<Utc>,
    ) {
        let pool = Self::pool(class, settings);
        let mut inner = self.inner.lock().expect("throttler lock poisoned");

        let delay_secs = settings.delay_between_emails_secs;
        let jittered = if settings.randomize_delay && delay_secs > 0 {
            // Up to 50% extra, so cadence never looks machine-regular.
            let extra = inner.rng.gen_range(0..=delay_secs / 2);
            delay_secs + extra
        } else {
            delay_secs
        };

        let window = inner
            .windows
            .entry((account_id.clone(), pool))
            .or_default();
        window.roll(now);
        window.sent_today += 1;
        window.sent_this_hour += 1;
        if jittered > 0 {
            window.next_allowed_at = Some(now + ChronoDuration::seconds(jittered as i64));
        }
    }

    /// The earliest instant a send for this account could be admitted,
    /// ignoring caps that depend on a concrete send request.
    pub fn next_available_slot(
        &self,
        account_id: &AccountId,
        class: TrafficClass,
        schedule: Option<&SendingSchedule>,
        settings: &ThrottleSettings,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let pool = Self::pool(class, settings);
        let inner = self.inner.lock().expect("throttler lock poisoned");

        let mut slot = now;
        if let Some(window) = inner.windows.get(&(account_id.clone(), pool)) {
            if let Some(next_allowed) = window.next_allowed_at {
                slot = slot.max(next_allowed);
            }
        }
        if let Some(schedule) = schedule {
            slot = schedule.next_open(slot);
        }
        slot
    }

    /// Sends recorded today for an account's pool. Used by tests and
    /// analytics.
    pub fn sent_today(
        &self,
        account_id: &AccountId,
        class: TrafficClass,
        settings: &ThrottleSettings,
        now: DateTime<Utc>,
    ) -> u32 {
        let pool = Self::pool(class, settings);
        let mut inner = self.inner.lock().expect("throttler lock poisoned");
        match inner.windows.get_mut(&(account_id.clone(), pool)) {
            Some(window) => {
                window.roll(now);
                window.sent_today
            }
            None => 0,
        }
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new()
    }
}

fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn throttler() -> Throttler {
        Throttler::with_rng(StdRng::seed_from_u64(7))
    }

    fn no_delay() -> ThrottleSettings {
        ThrottleSettings {
            emails_per_hour: 0,
            delay_between_emails_secs: 0,
            randomize_delay: false,
            separate_warmup_pool: false,
        }
    }

    fn acct() -> AccountId {
        AccountId::from("acct-1")
    }

    // Wednesday, inside business hours.
    fn wednesday_10am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 10, 0, 0).unwrap()
    }

    #[test]
    fn admits_under_all_caps() {
        let t = throttler();
        let limits = AccountLimits {
            daily_limit: 50,
            emails_per_hour: 10,
        };
        let admission = t.admit(
            &acct(),
            TrafficClass::Campaign,
            &limits,
            None,
            &no_delay(),
            wednesday_10am(),
        );
        assert!(admission.is_granted());
    }

    #[test]
    fn daily_cap_admits_exactly_limit() {
        let t = throttler();
        let settings = no_delay();
        let limits = AccountLimits {
            daily_limit: 50,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        let mut granted = 0;
        let mut deferred = 0;
        for _ in 0..60 {
            match t.admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now) {
                Admission::Granted => {
                    granted += 1;
                    t.record_send(&acct(), TrafficClass::Campaign, &settings, now);
                }
                Admission::Deferred { until } => {
                    deferred += 1;
                    // Deferred to the next day, not dropped.
                    assert!(until > now);
                    assert_eq!(until.date_naive(), now.date_naive() + ChronoDuration::days(1));
                }
            }
        }
        assert_eq!(granted, 50);
        assert_eq!(deferred, 10);
    }

    #[test]
    fn daily_counter_resets_next_day() {
        let t = throttler();
        let settings = no_delay();
        let limits = AccountLimits {
            daily_limit: 1,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        assert!(t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now)
            .is_granted());
        t.record_send(&acct(), TrafficClass::Campaign, &settings, now);
        assert!(!t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now)
            .is_granted());

        let tomorrow = now + ChronoDuration::days(1);
        assert!(t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, tomorrow)
            .is_granted());
    }

    #[test]
    fn hourly_cap_defers_to_next_hour() {
        let t = throttler();
        let settings = no_delay();
        let limits = AccountLimits {
            daily_limit: 100,
            emails_per_hour: 2,
        };
        let now = wednesday_10am();

        for _ in 0..2 {
            assert!(t
                .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now)
                .is_granted());
            t.record_send(&acct(), TrafficClass::Campaign, &settings, now);
        }

        match t.admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now) {
            Admission::Deferred { until } => {
                assert_eq!(until, Utc.with_ymd_and_hms(2024, 6, 12, 11, 0, 0).unwrap());
            }
            Admission::Granted => panic!("expected hourly deferral"),
        }

        let next_hour = Utc.with_ymd_and_hms(2024, 6, 12, 11, 0, 0).unwrap();
        assert!(t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, next_hour)
            .is_granted());
    }

    #[test]
    fn schedule_window_defers_outside_hours() {
        let t = throttler();
        let settings = no_delay();
        let limits = AccountLimits {
            daily_limit: 50,
            emails_per_hour: 10,
        };
        let schedule = SendingSchedule::business_hours();
        // Saturday.
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();

        match t.admit(
            &acct(),
            TrafficClass::Campaign,
            &limits,
            Some(&schedule),
            &settings,
            now,
        ) {
            Admission::Deferred { until } => assert!(until > now),
            Admission::Granted => panic!("expected schedule deferral"),
        }
    }

    #[test]
    fn inter_send_delay_enforced() {
        let t = throttler();
        let settings = ThrottleSettings {
            emails_per_hour: 0,
            delay_between_emails_secs: 60,
            randomize_delay: false,
            separate_warmup_pool: false,
        };
        let limits = AccountLimits {
            daily_limit: 0,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        t.record_send(&acct(), TrafficClass::Campaign, &settings, now);

        match t.admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now) {
            Admission::Deferred { until } => {
                assert_eq!(until, now + ChronoDuration::seconds(60));
            }
            Admission::Granted => panic!("expected delay deferral"),
        }

        let later = now + ChronoDuration::seconds(61);
        assert!(t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, later)
            .is_granted());
    }

    #[test]
    fn randomized_delay_adds_jitter() {
        let t = throttler();
        let settings = ThrottleSettings {
            emails_per_hour: 0,
            delay_between_emails_secs: 60,
            randomize_delay: true,
            separate_warmup_pool: false,
        };
        let now = wednesday_10am();

        t.record_send(&acct(), TrafficClass::Campaign, &settings, now);
        let slot = t.next_available_slot(&acct(), TrafficClass::Campaign, None, &settings, now);
        let gap = (slot - now).num_seconds();
        assert!((60..=90).contains(&gap), "gap {} outside jitter range", gap);
    }

    #[test]
    fn shared_pool_charges_both_classes() {
        let t = throttler();
        let settings = no_delay(); // separate_warmup_pool = false
        let limits = AccountLimits {
            daily_limit: 1,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        t.record_send(&acct(), TrafficClass::Warmup, &settings, now);

        // Campaign traffic sees the warmup send in the shared budget.
        assert!(!t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now)
            .is_granted());
    }

    #[test]
    fn separate_pools_have_independent_budgets() {
        let t = throttler();
        let settings = ThrottleSettings {
            separate_warmup_pool: true,
            ..no_delay()
        };
        let limits = AccountLimits {
            daily_limit: 1,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        t.record_send(&acct(), TrafficClass::Warmup, &settings, now);

        assert!(t
            .admit(&acct(), TrafficClass::Campaign, &limits, None, &settings, now)
            .is_granted());
        assert!(!t
            .admit(&acct(), TrafficClass::Warmup, &limits, None, &settings, now)
            .is_granted());
    }

    #[test]
    fn accounts_do_not_share_budgets() {
        let t = throttler();
        let settings = no_delay();
        let limits = AccountLimits {
            daily_limit: 1,
            emails_per_hour: 0,
        };
        let now = wednesday_10am();

        t.record_send(&acct(), TrafficClass::Campaign, &settings, now);

        let other = AccountId::from("acct-2");
        assert!(t
            .admit(&other, TrafficClass::Campaign, &limits, None, &settings, now)
            .is_granted());
    }
}
