//! Cron-driven repeatable jobs.
//!
//! Definitions are keyed by `(queue, name, pattern, timezone)` and are
//! idempotent to re-registration. A scheduler task materializes a waiting
//! job each time a pattern fires; the materialized job carries a dedup key
//! derived from the fire time, so concurrent processes sharing one database
//! enqueue each tick at most once.

use crate::config::QueueSettings;
use crate::error::{QueueError, QueueResult};
use crate::store::{DueRepeatable, JobStore};
use crate::types::{AddJobOptions, JobEvent, JobTransition};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Parse a cron pattern, accepting the five-field form (the `cron` crate
/// itself wants a seconds field, so five-field input gets one prepended).
pub(crate) fn parse_pattern(pattern: &str) -> QueueResult<cron::Schedule> {
    let fields = pattern.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {pattern}")
    } else {
        pattern.to_string()
    };
    cron::Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCronPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn parse_timezone(timezone: &str) -> QueueResult<Tz> {
    timezone
        .parse()
        .map_err(|_| QueueError::InvalidTimezone(timezone.to_string()))
}

/// Next fire instant strictly after `after`, in UTC.
pub(crate) fn next_fire(
    pattern: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> QueueResult<Option<DateTime<Utc>>> {
    let schedule = parse_pattern(pattern)?;
    let tz = parse_timezone(timezone)?;
    let local = after.with_timezone(&tz);
    Ok(schedule.after(&local).next().map(|t| t.with_timezone(&Utc)))
}

/// One scheduler pass: enqueue every due definition and advance its
/// `next_fire_at`. Split out of the loop for testability.
pub(crate) async fn materialize_due(
    store: &JobStore,
    settings: &QueueSettings,
    events: &HashMap<String, broadcast::Sender<JobEvent>>,
    now: DateTime<Utc>,
) -> QueueResult<usize> {
    let due = store.due_repeatables(now).await?;
    let mut fired = 0;

    for def in due {
        let Some(config) = settings.queue(&def.queue) else {
            warn!(queue = %def.queue, name = %def.name, "Repeatable job targets unknown queue");
            continue;
        };

        let opts = AddJobOptions {
            job_id: Some(format!(
                "repeat:{}:{}:{}",
                def.name,
                def.pattern,
                def.next_fire_at.timestamp()
            )),
            ..Default::default()
        };
        let job_id = store
            .add(config, &def.name, def.payload.clone(), &opts)
            .await?;

        if let Some(sender) = events.get(&def.queue) {
            let _ = sender.send(JobEvent {
                queue: def.queue.clone(),
                job_id,
                name: def.name.clone(),
                transition: JobTransition::Waiting,
                error: None,
            });
        }

        advance(store, &def, now).await?;
        fired += 1;
    }

    Ok(fired)
}

async fn advance(store: &JobStore, def: &DueRepeatable, now: DateTime<Utc>) -> QueueResult<()> {
    match next_fire(&def.pattern, &def.timezone, now) {
        Ok(Some(next)) => store.advance_repeatable(def, next).await,
        Ok(None) => {
            // Pattern has no future occurrences; drop the definition.
            warn!(name = %def.name, pattern = %def.pattern, "Repeatable pattern exhausted, removing");
            store
                .remove_repeatable(&def.queue, &def.name, &def.pattern, &def.timezone)
                .await?;
            Ok(())
        }
        Err(e) => {
            warn!(name = %def.name, pattern = %def.pattern, error = %e, "Repeatable pattern no longer parses, removing");
            store
                .remove_repeatable(&def.queue, &def.name, &def.pattern, &def.timezone)
                .await?;
            Ok(())
        }
    }
}

/// Background loop driving [`materialize_due`] until shutdown.
pub(crate) async fn run_scheduler(
    store: Arc<JobStore>,
    settings: QueueSettings,
    events: HashMap<String, broadcast::Sender<JobEvent>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(settings.repeat_poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    debug!("Repeatable-job scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(e) = materialize_due(&store, &settings, &events, Utc::now()).await {
                    warn!(error = %e, "Repeatable-job scheduler pass failed");
                }
            }
        }
    }

    debug!("Repeatable-job scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_patterns_are_accepted() {
        assert!(parse_pattern("*/10 * * * *").is_ok());
        assert!(parse_pattern("0 3 * * *").is_ok());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        let err = parse_pattern("not a cron").unwrap_err();
        assert!(matches!(err, QueueError::InvalidCronPattern { .. }));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = parse_timezone("Mars/Olympus_Mons").unwrap_err();
        assert!(matches!(err, QueueError::InvalidTimezone(_)));
    }

    #[test]
    fn next_fire_respects_timezone() {
        // 03:00 in New York during DST is 07:00 UTC.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let next = next_fire("0 3 * * *", "America/New_York", after)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_is_strictly_after_the_reference_instant() {
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap();
        let next = next_fire("0 3 * * *", "UTC", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap());
    }
}
