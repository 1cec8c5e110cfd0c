//! Daily trigger for the subscriber sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveTime, TimeZone};
use tracing::{error, info};

use crate::api::{ActionResolver, HostSurfaces};
use crate::like::DailySweep;

/// Next instant strictly after `now` whose local time is `at`.
///
/// A local time skipped by a DST jump fires an hour later that day.
pub fn next_fire<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();

    for _ in 0..3 {
        let naive = day.and_time(at);
        let candidate = match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => tz
                .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest(),
        };
        if let Some(t) = candidate.filter(|t| t > now) {
            return t;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    now.clone() + chrono::Duration::days(1)
}

/// Whether today's fire time has already passed at `now`.
pub fn missed_today<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> bool {
    now.time() >= at
}

/// Runs the sweep every day at `at` (host local time), forever.
pub async fn run_daily(sweep: Arc<DailySweep>, surfaces: HostSurfaces, at: NaiveTime, catch_up: bool) {
    if catch_up && missed_today(&chrono::Local::now(), at) {
        info!("[schedule] Started after {at}, running today's sweep now");
        fire(&sweep, &surfaces).await;
    }

    loop {
        let now = chrono::Local::now();
        let next = next_fire(&now, at);
        let wait = (next.clone() - now).to_std().unwrap_or(Duration::from_secs(1));
        info!("[schedule] Next sweep at {next} (in {}s)", wait.as_secs());

        tokio::time::sleep(wait).await;
        fire(&sweep, &surfaces).await;
    }
}

async fn fire(sweep: &DailySweep, surfaces: &HostSurfaces) {
    // No event context: only the HTTP API and the global link are candidates
    let resolver = ActionResolver::new(surfaces.candidates());
    match sweep.run(&resolver).await {
        Ok(outcome) => info!("[schedule] Sweep finished: {outcome:?}"),
        Err(e) => error!("[schedule] Sweep failed: {e}"),
    }
}
