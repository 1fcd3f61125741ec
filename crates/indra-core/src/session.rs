//! Trading session and expiry calendar for Indian index options.
//!
//! All session math happens in the exchange timezone (Asia/Kolkata).
//! Cash session: 09:15 - 15:30 IST, Monday through Friday. The engine
//! force-exits intraday positions at 15:20 and rolls the live expiry at
//! 15:30 on expiry day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Cash market open, IST.
pub const MARKET_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 15, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Cash market close, IST.
pub const MARKET_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Forced intraday exit time, IST.
pub const EOD_EXIT: NaiveTime = match NaiveTime::from_hms_opt(15, 20, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Time at which the live expiry rolls to the next cycle on expiry day.
pub const EXPIRY_ROLLOVER: NaiveTime = MARKET_CLOSE;

/// Expiry cadence for a symbol's option series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRule {
    /// Weekly contracts expiring on the given weekday.
    Weekly(Weekday),
    /// Monthly contracts expiring on the last Thursday of the month.
    MonthlyLastThursday,
}

impl ExpiryRule {
    /// The rule currently listed for a symbol.
    pub fn for_symbol(symbol: crate::IndexSymbol) -> Self {
        match symbol {
            crate::IndexSymbol::Nifty => Self::Weekly(Weekday::Thu),
            crate::IndexSymbol::Sensex => Self::Weekly(Weekday::Tue),
        }
    }
}

/// Current wall-clock time in the exchange timezone.
pub fn now_ist() -> DateTime<Tz> {
    Utc::now().with_timezone(&Kolkata)
}

/// Whether the cash session is open at the given exchange-local time.
pub fn is_market_open_at(at: DateTime<Tz>) -> bool {
    let weekday = at.weekday();
    if weekday == Weekday::Sat || weekday == Weekday::Sun {
        return false;
    }
    let t = at.time();
    t >= MARKET_OPEN && t < MARKET_CLOSE
}

/// Minutes elapsed since market open; 0 before the bell.
pub fn minutes_since_open(at: DateTime<Tz>) -> i64 {
    let open = at.date_naive().and_time(MARKET_OPEN);
    let open = match Kolkata.from_local_datetime(&open).single() {
        Some(dt) => dt,
        None => return 0,
    };
    (at - open).num_minutes().max(0)
}

/// The live expiry date for a rule as of `at`.
///
/// The next qualifying date >= today; on expiry day itself, today until
/// the 15:30 rollover, the next cycle after.
pub fn current_expiry(rule: ExpiryRule, at: DateTime<Tz>) -> NaiveDate {
    let today = at.date_naive();
    let candidate = next_expiry_on_or_after(rule, today);
    if candidate == today && at.time() >= EXPIRY_ROLLOVER {
        next_expiry_on_or_after(rule, today + Duration::days(1))
    } else {
        candidate
    }
}

/// The next few expiry cycles after `from`, used as REST fallbacks when the
/// broker returns an empty chain for the computed date.
pub fn fallback_expiries(rule: ExpiryRule, from: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(count);
    let mut cursor = from;
    for _ in 0..count {
        cursor = next_expiry_on_or_after(rule, cursor + Duration::days(1));
        out.push(cursor);
    }
    out
}

/// Calendar days from `today` until `expiry` (can be zero on expiry day).
pub fn days_to_expiry(expiry: NaiveDate, at: DateTime<Tz>) -> i64 {
    (expiry - at.date_naive()).num_days()
}

fn next_expiry_on_or_after(rule: ExpiryRule, from: NaiveDate) -> NaiveDate {
    match rule {
        ExpiryRule::Weekly(weekday) => next_weekday_on_or_after(from, weekday),
        ExpiryRule::MonthlyLastThursday => {
            let this_month = last_thursday(from.year(), from.month());
            if this_month >= from {
                this_month
            } else {
                let (y, m) = if from.month() == 12 {
                    (from.year() + 1, 1)
                } else {
                    (from.year(), from.month() + 1)
                };
                last_thursday(y, m)
            }
        }
    }
}

fn next_weekday_on_or_after(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() + 7 - from.weekday().num_days_from_monday()) % 7;
    from + Duration::days(ahead as i64)
}

fn last_thursday(year: i32, month: u32) -> NaiveDate {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // Walk back from the last day of the month.
    let mut d = NaiveDate::from_ymd_opt(ny, nm, 1)
        .expect("valid first-of-month")
        .pred_opt()
        .expect("valid last-of-month");
    while d.weekday() != Weekday::Thu {
        d = d.pred_opt().expect("valid predecessor date");
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Kolkata.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_session_bounds() {
        // 2026-03-24 is a Tuesday.
        assert!(!is_market_open_at(ist(2026, 3, 24, 9, 14)));
        assert!(is_market_open_at(ist(2026, 3, 24, 9, 15)));
        assert!(is_market_open_at(ist(2026, 3, 24, 15, 29)));
        assert!(!is_market_open_at(ist(2026, 3, 24, 15, 30)));
        // Weekend.
        assert!(!is_market_open_at(ist(2026, 3, 28, 10, 0)));
    }

    #[test]
    fn test_minutes_since_open() {
        assert_eq!(minutes_since_open(ist(2026, 3, 24, 9, 15)), 0);
        assert_eq!(minutes_since_open(ist(2026, 3, 24, 10, 0)), 45);
        assert_eq!(minutes_since_open(ist(2026, 3, 24, 8, 0)), 0);
    }

    #[test]
    fn test_weekly_thursday_expiry() {
        // 2026-03-24 (Tue): next Thursday is 2026-03-26.
        let rule = ExpiryRule::Weekly(Weekday::Thu);
        assert_eq!(current_expiry(rule, ist(2026, 3, 24, 10, 0)), date(2026, 3, 26));
    }

    #[test]
    fn test_expiry_day_rollover_boundary() {
        let rule = ExpiryRule::Weekly(Weekday::Thu);
        // On expiry day (2026-03-26, Thu) before 15:30: today.
        assert_eq!(current_expiry(rule, ist(2026, 3, 26, 15, 29)), date(2026, 3, 26));
        // At 15:30 sharp: flips to next week.
        assert_eq!(current_expiry(rule, ist(2026, 3, 26, 15, 30)), date(2026, 4, 2));
    }

    #[test]
    fn test_sensex_tuesday_expiry() {
        let rule = ExpiryRule::for_symbol(crate::IndexSymbol::Sensex);
        // 2026-03-26 (Thu): next Tuesday is 2026-03-31.
        assert_eq!(current_expiry(rule, ist(2026, 3, 26, 10, 0)), date(2026, 3, 31));
    }

    #[test]
    fn test_monthly_last_thursday() {
        let rule = ExpiryRule::MonthlyLastThursday;
        // March 2026's last Thursday is the 26th.
        assert_eq!(current_expiry(rule, ist(2026, 3, 10, 10, 0)), date(2026, 3, 26));
        // After it passes, April's is the 30th.
        assert_eq!(current_expiry(rule, ist(2026, 3, 27, 10, 0)), date(2026, 4, 30));
        // December rolls into January.
        assert_eq!(current_expiry(rule, ist(2026, 12, 31, 16, 0)), date(2027, 1, 28));
    }

    #[test]
    fn test_fallback_expiries() {
        let rule = ExpiryRule::Weekly(Weekday::Thu);
        let fallbacks = fallback_expiries(rule, date(2026, 3, 26), 3);
        assert_eq!(fallbacks, vec![date(2026, 4, 2), date(2026, 4, 9), date(2026, 4, 16)]);
    }

    #[test]
    fn test_days_to_expiry() {
        assert_eq!(days_to_expiry(date(2026, 3, 26), ist(2026, 3, 24, 10, 0)), 2);
        assert_eq!(days_to_expiry(date(2026, 3, 26), ist(2026, 3, 26, 10, 0)), 0);
    }
}
