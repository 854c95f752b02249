use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use proptest::prelude::*;
use rstest::rstest;

use cronloop::cron::CronExpression;

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01
    (946_684_800i64..4_102_444_800i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

proptest! {
    #[test]
    fn every_minute_matches_everything(ts in timestamp()) {
        let expr = CronExpression::parse("* * * * *").unwrap();
        prop_assert!(expr.matches(&ts));
    }

    #[test]
    fn matching_ignores_seconds(ts in timestamp(), minute in 0u32..60) {
        let expr = CronExpression::parse(&format!("{minute} * * * *")).unwrap();
        let start_of_minute = ts.with_second(0).unwrap();
        prop_assert_eq!(expr.matches(&ts), expr.matches(&start_of_minute));
        prop_assert_eq!(expr.matches(&ts), ts.minute() == minute);
    }

    #[test]
    fn next_due_is_strictly_later_and_matches(
        ts in timestamp(),
        expr in prop::sample::select(vec![
            "* * * * *",
            "*/15 * * * *",
            "0 1 * * *",
            "30 9 * * 1-5",
            "0 0 1 * *",
            "0 12 13 * 5",
        ]),
    ) {
        let expr = CronExpression::parse(expr).unwrap();
        let next = expr.next_due_after(&ts).unwrap();
        prop_assert!(next > ts);
        prop_assert_eq!(next.second(), 0);
        prop_assert!(expr.matches(&next));

        // No earlier whole minute in between fires
        let mut probe = ts.with_second(0).unwrap() + Duration::minutes(1);
        while probe < next {
            prop_assert!(!expr.matches(&probe));
            probe += Duration::minutes(1);
            if probe - ts > Duration::days(2) {
                break;
            }
        }
    }

    #[test]
    fn restricted_day_fields_are_ored(ts in timestamp()) {
        let expr = CronExpression::parse("* * 13 * 5").unwrap();
        let friday = ts.weekday().num_days_from_sunday() == 5;
        prop_assert_eq!(expr.matches(&ts), ts.day() == 13 || friday);
    }

    #[test]
    fn parsing_is_deterministic(minute in 0u32..60, hour in 0u32..24, step in 1u32..30) {
        let text = format!("{minute} {hour} */{step} * *");
        let first = CronExpression::parse(&text).unwrap();
        let second: CronExpression = text.parse().unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.to_string(), text);
    }
}

#[rstest]
#[case("0 1 * * *", 1, 0, true)]
#[case("0 1 * * *", 1, 5, false)]
#[case("*/5 * * * *", 3, 25, true)]
#[case("*/5 * * * *", 3, 26, false)]
#[case("0-10/5 * * * *", 0, 10, true)]
#[case("0 9-17 * * *", 18, 0, false)]
#[case("0 0 * * tue", 0, 0, true)]
#[case("0 0 * * 0,6", 0, 0, false)]
#[case("0 0 * jan *", 0, 0, true)]
fn fixed_examples(#[case] expr: &str, #[case] hour: u32, #[case] minute: u32, #[case] expected: bool) {
    // 2024-01-02 is a Tuesday
    let at = Utc.with_ymd_and_hms(2024, 1, 2, hour, minute, 0).unwrap();
    assert_eq!(CronExpression::parse(expr).unwrap().matches(&at), expected, "{expr} at {at}");
}

#[rstest]
#[case("")]
#[case("* * * *")]
#[case("* * * * * *")]
#[case("60 * * * *")]
#[case("* 24 * * *")]
#[case("* * 0 * *")]
#[case("* * * 13 *")]
#[case("*/0 * * * *")]
#[case("5-1 * * * *")]
#[case("a * * * *")]
fn rejects_malformed(#[case] expr: &str) {
    assert!(CronExpression::parse(expr).is_err(), "{expr:?} should be rejected");
}

#[test]
fn first_of_month_or_sunday() {
    let expr = CronExpression::parse("0 0 1 * 0").unwrap();
    // Thursday the 1st
    assert!(expr.matches(&Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()));
    // Sunday the 7th
    assert!(expr.matches(&Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()));
    // Tuesday the 2nd
    assert!(!expr.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
    // Sunday written as 7
    let seven = CronExpression::parse("0 0 * * 7").unwrap();
    assert!(seven.matches(&Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()));
}

#[test]
fn impossible_date_never_fires() {
    let expr = CronExpression::parse("0 0 30 2 *").unwrap();
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(expr.next_due_after(&from), None);
}

#[test]
fn oversized_step_fires_only_at_its_start() {
    let expr = CronExpression::parse("59/4294967295 * * * *").unwrap();
    assert!(expr.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 3, 59, 0).unwrap()));
    assert!(!expr.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap()));
    assert!(!expr.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 3, 58, 0).unwrap()));
}
