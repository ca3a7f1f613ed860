//! Cron expression parsing and next-occurrence computation for `Schedule`
//! entities, grounded in the cron/chrono-tz next-fire-time idiom.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

/// Validates `cron_expression`/`timezone`, returning an error naming which
/// one is invalid so callers (e.g. `quarantine`) can log a clear reason.
pub fn validate_cron(cron_expression: &str, timezone: &str) -> Result<()> {
    CronSchedule::from_str(cron_expression)
        .with_context(|| format!("invalid cron expression '{cron_expression}'"))?;
    timezone
        .parse::<Tz>()
        .map_err(|_| anyhow!("invalid timezone '{timezone}'"))?;
    Ok(())
}

/// Computes the next fire time strictly after `from`, in the schedule's
/// timezone, returned back in UTC for storage.
pub fn next_occurrence_after(cron_expression: &str, timezone: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule =
        CronSchedule::from_str(cron_expression).with_context(|| format!("invalid cron expression '{cron_expression}'"))?;
    let tz: Tz = timezone.parse().map_err(|_| anyhow!("invalid timezone '{timezone}'"))?;
    let from_in_tz = tz
        .from_utc_datetime(&from.naive_utc());
    let next = schedule
        .after(&from_in_tz)
        .next()
        .ok_or_else(|| anyhow!("cron expression '{cron_expression}' has no future occurrence"))?;
    Ok(next.with_timezone(&Utc))
}
