//! Cron utility functions for displaying next scheduled times
//!
//! These are informational only; the scheduler itself never computes fire
//! times, it polls.

use chrono::{DateTime, TimeZone};
use std::time::Duration;

use crate::cron::CronExpression;

/// Next time `cron_expression` fires after `from`
///
/// # Returns
/// * `Some(DateTime)` - The next scheduled time if the expression is valid
/// * `None` - If the expression is invalid or never fires
pub fn calculate_next_scheduled_time<Tz: TimeZone>(
    cron_expression: &str,
    from: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    CronExpression::parse(cron_expression)
        .ok()?
        .next_due_after(from)
}

/// Like [`calculate_next_scheduled_time`] but reports invalid expressions
///
/// # Returns
/// * `Ok(Some(DateTime))` - The next scheduled time
/// * `Ok(None)` - Valid cron but no future schedules
/// * `Err(String)` - Invalid cron expression with error message
pub fn calculate_next_scheduled_time_validated<Tz: TimeZone>(
    cron_expression: &str,
    from: &DateTime<Tz>,
) -> Result<Option<DateTime<Tz>>, String> {
    CronExpression::parse(cron_expression)
        .map(|schedule| schedule.next_due_after(from))
        .map_err(|e| format!("Invalid cron expression '{cron_expression}': {e}"))
}

/// Human-readable distance from `from` to `next`, e.g. `in 2h 5m`
pub fn format_time_until<Tz: TimeZone>(from: &DateTime<Tz>, next: &DateTime<Tz>) -> String {
    let seconds = next.clone().signed_duration_since(from.clone()).num_seconds();
    if seconds <= 0 {
        return "now".to_string();
    }
    // Minute resolution is all a cron schedule offers
    let rounded = (seconds as u64).div_ceil(60) * 60;
    format!("in {}", humantime::format_duration(Duration::from_secs(rounded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_valid_cron_expression() {
        let next = calculate_next_scheduled_time("0 */6 * * *", &at(1, 0, 0));
        assert_eq!(next, Some(at(6, 0, 0)));
    }

    #[test]
    fn test_invalid_cron_expression() {
        assert!(calculate_next_scheduled_time("invalid", &at(1, 0, 0)).is_none());
    }

    #[test]
    fn test_validated_cron_expression() {
        let result = calculate_next_scheduled_time_validated("0 12 * * *", &at(1, 0, 0));
        assert_eq!(result, Ok(Some(at(12, 0, 0))));

        let result = calculate_next_scheduled_time_validated("invalid", &at(1, 0, 0));
        assert!(result.unwrap_err().contains("Invalid cron expression"));
    }

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(&at(1, 0, 0), &at(3, 5, 0)), "in 2h 5m");
        assert_eq!(format_time_until(&at(1, 0, 30), &at(1, 1, 0)), "in 1m");
        assert_eq!(format_time_until(&at(1, 0, 0), &at(1, 0, 0)), "now");
    }
}
