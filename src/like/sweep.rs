use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{info, warn};

use super::{LikeOutcome, LikeService};
use crate::api::ActionCaller;
use crate::store::{Change, ConfigStore, StoreError};

/// Source of "today" for the once-per-day guard.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Host-local calendar date
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    /// `last_like_date` is already today
    AlreadyRan,
    /// Nothing to do; the date is deliberately not recorded so a
    /// subscription made later today still gets its sweep
    NoSubscribers,
    Completed { liked: usize, failed: usize },
}

/// Likes every subscriber once per calendar day.
pub struct DailySweep {
    store: ConfigStore,
    likes: LikeService,
    clock: Arc<dyn Clock>,
    pacing: Duration,
}

impl DailySweep {
    pub fn new(store: ConfigStore, likes: LikeService, clock: Arc<dyn Clock>, pacing: Duration) -> Self {
        Self {
            store,
            likes,
            clock,
            pacing,
        }
    }

    /// Runs the sweep unless it already ran today.
    ///
    /// Individual failures don't stop the sweep; the date is recorded once
    /// every subscriber has been tried.
    pub async fn run(&self, api: &dyn ActionCaller) -> Result<SweepOutcome, StoreError> {
        let today = self.clock.today().format("%Y-%m-%d").to_string();
        let doc = self.store.snapshot().await?;

        if doc.last_like_date == today {
            info!("[sweep] Already ran today ({today}), skipping");
            return Ok(SweepOutcome::AlreadyRan);
        }
        if doc.subscribed_users.is_empty() {
            info!("[sweep] No subscribers, nothing to do");
            return Ok(SweepOutcome::NoSubscribers);
        }

        info!("[sweep] Starting daily sweep for {} subscribers", doc.subscribed_users.len());
        let (mut liked, mut failed) = (0usize, 0usize);

        for (i, raw_id) in doc.subscribed_users.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let Ok(user_id) = raw_id.trim().parse::<i64>() else {
                warn!("[sweep] Skipping non-numeric subscriber id {raw_id:?}");
                failed += 1;
                continue;
            };

            let report = self.likes.like_user(api, user_id).await;
            match report.outcome {
                LikeOutcome::Success { total } => {
                    info!("[sweep] {} ({}): +{total}", report.user_id, report.username);
                    liked += 1;
                }
                other => {
                    info!("[sweep] {} ({}): {other:?}", report.user_id, report.username);
                    failed += 1;
                }
            }
        }

        self.store
            .update(move |doc| {
                doc.last_like_date = today;
                Change::Changed(())
            })
            .await?;

        info!("[sweep] Done: {liked} liked, {failed} not liked");
        Ok(SweepOutcome::Completed { liked, failed })
    }
}
