//! Liking a user: the per-user retry policy and the daily subscriber sweep.

pub mod sweep;
pub mod templates;

pub use sweep::{DailySweep, SystemClock};

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{Action, ActionCaller, ActionError};
use crate::config::LikeConfig;
use crate::store::{ConfigStore, TemplateKind};

/// Display name used when the host can't tell us who the target is
pub const UNKNOWN_USER: &str = "未知用户";
pub const PERMISSION_DENIED_REPLY: &str = "你设了权限不许陌生人赞你";
pub const FAILED_REPLY: &str = "点赞失败了呢...";

/// How a like operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LikeOutcome {
    Success { total: u32 },
    /// Daily cap reached for this target
    RateLimited,
    PermissionDenied,
    /// Any other refusal, usually a non-contact target
    Stranger,
    /// Nothing went through and no reason was given
    Failed,
}

/// Outcome plus the reply text to send
#[derive(Debug, Clone)]
pub struct LikeReport {
    pub user_id: i64,
    pub username: String,
    pub outcome: LikeOutcome,
    pub reply: String,
}

/// Applies the like retry policy for one target at a time.
#[derive(Clone)]
pub struct LikeService {
    store: ConfigStore,
    attempts: u32,
    batch_size: u32,
}

impl LikeService {
    pub fn new(store: ConfigStore, config: &LikeConfig) -> Self {
        Self {
            store,
            attempts: config.attempts,
            batch_size: config.batch_size,
        }
    }

    /// Nickname of `user_id`, or a placeholder if the lookup fails.
    pub async fn display_name(&self, api: &dyn ActionCaller, user_id: i64) -> String {
        match api
            .call(Action::GetStrangerInfo, json!({ "user_id": user_id }))
            .await
        {
            Ok(info) => nickname_of(&info).unwrap_or_else(|| UNKNOWN_USER.to_string()),
            Err(e) => {
                warn!("[like] Failed to fetch info for {user_id}: {e}");
                UNKNOWN_USER.to_string()
            }
        }
    }

    /// Sends up to `attempts` batches of likes, stopping at the first refusal.
    ///
    /// Attempts run one after another: the platform enforces its own daily
    /// cap, so parallel requests would only hit it sooner.
    pub async fn like_user(&self, api: &dyn ActionCaller, user_id: i64) -> LikeReport {
        let username = self.display_name(api, user_id).await;
        let mut total = 0u32;

        for attempt in 1..=self.attempts {
            let params = json!({ "user_id": user_id, "times": self.batch_size });
            match api.call(Action::SendLike, params).await {
                // A host may acknowledge with a bare `false`
                Ok(Value::Bool(false)) => {
                    warn!("[like] Attempt {attempt} for {user_id} returned false");
                }
                Ok(_) => total += self.batch_size,
                Err(e) => {
                    info!("[like] Attempt {attempt} for {user_id} stopped: {e}");
                    return self.refused(user_id, username, e).await;
                }
            }
        }

        if total > 0 {
            let reply = self
                .render(
                    TemplateKind::Success,
                    &[("username", username.clone()), ("total_likes", total.to_string())],
                )
                .await;
            info!("[like] Liked {user_id} ({username}) {total} times");
            LikeReport {
                user_id,
                username,
                outcome: LikeOutcome::Success { total },
                reply,
            }
        } else {
            LikeReport {
                user_id,
                username,
                outcome: LikeOutcome::Failed,
                reply: FAILED_REPLY.to_string(),
            }
        }
    }

    async fn refused(&self, user_id: i64, username: String, error: ActionError) -> LikeReport {
        let (outcome, reply) = match error {
            ActionError::RateLimited(_) => (
                LikeOutcome::RateLimited,
                self.render(TemplateKind::Limit, &[("username", username.clone())])
                    .await,
            ),
            ActionError::PermissionDenied(_) => (
                LikeOutcome::PermissionDenied,
                PERMISSION_DENIED_REPLY.to_string(),
            ),
            ActionError::Unknown { .. } => (
                LikeOutcome::Stranger,
                self.render(TemplateKind::Stranger, &[("username", username.clone())])
                    .await,
            ),
            ActionError::NoApiSurface { .. } => (LikeOutcome::Failed, FAILED_REPLY.to_string()),
        };
        LikeReport {
            user_id,
            username,
            outcome,
            reply,
        }
    }

    async fn render(&self, kind: TemplateKind, params: &[(&str, String)]) -> String {
        let templates = match self.store.snapshot().await {
            Ok(doc) => doc.reply_templates.get(kind).to_vec(),
            Err(e) => {
                warn!("[like] Templates unavailable: {e}");
                Vec::new()
            }
        };
        templates::pick_and_render(&templates, params, &mut rand::thread_rng())
    }
}

/// `nickname` (or `nick`) of a stranger-info payload, possibly nested in `data`.
fn nickname_of(info: &Value) -> Option<String> {
    let direct = ["nickname", "nick"]
        .iter()
        .find_map(|key| info.get(*key).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(String::from);
    direct.or_else(|| info.get("data").and_then(nickname_of))
}
