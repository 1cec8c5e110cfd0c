//! Chat commands.
//!
//! Routes are tried in table order. A handler may pass on a message it
//! matched (white-list miss, no @ targets...), in which case the next
//! matching route gets a chance.

use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{Action, ActionCaller};
use crate::config::Config;
use crate::like::LikeService;
use crate::onebot::MessageEvent;
use crate::store::{Change, ConfigStore};

pub const ALREADY_SUBSCRIBED: &str = "你已经订阅点赞了哦~";
pub const SUBSCRIBED: &str = "订阅成功！我将每天自动为你点赞";
pub const NOT_SUBSCRIBED: &str = "你还没有订阅点赞哦~";
pub const UNSUBSCRIBED: &str = "已取消订阅！我将不再自动给你点赞";
pub const NO_SUBSCRIBERS: &str = "当前没有订阅点赞的用户哦~";
pub const NO_LIKES: &str = "暂无有效的点赞信息";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    LikeMe,
    LikeMentioned,
    Subscribe,
    Unsubscribe,
    ListSubscribers,
    WhoLikedMe,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Anyone,
    Master,
}

struct Route {
    pattern: Regex,
    command: Command,
    permission: Permission,
}

/// What a handler did with a message
#[derive(Debug, PartialEq)]
pub enum Handled {
    Reply(String),
    /// Not for this handler; keep matching
    Pass,
}

pub struct Router {
    routes: Vec<Route>,
    store: ConfigStore,
    likes: LikeService,
    config: Config,
}

impl Router {
    pub fn new(config: &Config, store: ConfigStore, likes: LikeService) -> Result<Self> {
        let table = [
            (r"^#赞我$", Command::LikeMe, Permission::Anyone),
            (r"^#赞.*", Command::LikeMentioned, Permission::Anyone),
            (r"^#订阅点赞$", Command::Subscribe, Permission::Anyone),
            (r"^#取消订阅点赞$", Command::Unsubscribe, Permission::Anyone),
            (r"^#订阅点赞列表$", Command::ListSubscribers, Permission::Anyone),
            (r"^#谁赞了bot$", Command::WhoLikedMe, Permission::Master),
            (
                r"^#点赞配置(?:\s+(\S+)(?:\s+([\s\S]+))?)?$",
                Command::Settings,
                Permission::Master,
            ),
        ];

        let routes = table
            .into_iter()
            .map(|(pattern, command, permission)| {
                Ok(Route {
                    pattern: Regex::new(pattern)?,
                    command,
                    permission,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            routes,
            store,
            likes,
            config: config.clone(),
        })
    }

    /// Runs the first handler that takes the message. Returns the reply, if any.
    pub async fn dispatch(&self, event: &MessageEvent, api: &dyn ActionCaller) -> Result<Option<String>> {
        let text = event.text();
        if !text.starts_with('#') {
            return Ok(None);
        }

        for route in &self.routes {
            let Some(captures) = route.pattern.captures(&text) else {
                continue;
            };
            if route.permission == Permission::Master && !self.config.is_master(event.user_id) {
                info!("[cmd] {:?} from {} ignored: not a master", route.command, event.user_id);
                continue;
            }

            let args: Vec<Option<String>> = captures
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect();

            info!("[cmd] {:?} from {}", route.command, event.user_id);
            match self.run(route.command, event, api, &args).await? {
                Handled::Reply(reply) => return Ok(Some(reply)),
                Handled::Pass => continue,
            }
        }
        Ok(None)
    }

    async fn run(
        &self,
        command: Command,
        event: &MessageEvent,
        api: &dyn ActionCaller,
        args: &[Option<String>],
    ) -> Result<Handled> {
        match command {
            Command::LikeMe => self.like_me(event, api).await,
            Command::LikeMentioned => self.like_mentioned(event, api).await,
            Command::Subscribe => self.subscribe(event).await,
            Command::Unsubscribe => self.unsubscribe(event).await,
            Command::ListSubscribers => self.list_subscribers().await,
            Command::WhoLikedMe => self.who_liked_me(api).await,
            Command::Settings => {
                let path = args.first().cloned().flatten();
                let value = args.get(1).cloned().flatten();
                self.settings(path, value).await
            }
        }
    }

    async fn white_listed(&self, event: &MessageEvent) -> Result<bool> {
        let doc = self.store.snapshot().await?;
        Ok(doc.allows_group(event.group_id()))
    }

    // ── Like commands ─────────────────────────────────────

    async fn like_me(&self, event: &MessageEvent, api: &dyn ActionCaller) -> Result<Handled> {
        if !self.white_listed(event).await? {
            return Ok(Handled::Pass);
        }
        let report = self.likes.like_user(api, event.user_id).await;
        Ok(Handled::Reply(report.reply))
    }

    async fn like_mentioned(&self, event: &MessageEvent, api: &dyn ActionCaller) -> Result<Handled> {
        if !self.white_listed(event).await? {
            return Ok(Handled::Pass);
        }
        let targets = event.mentioned_users();
        if targets.is_empty() {
            return Ok(Handled::Pass);
        }

        let mut replies = Vec::with_capacity(targets.len());
        for user_id in targets {
            replies.push(self.likes.like_user(api, user_id).await.reply);
        }
        Ok(Handled::Reply(replies.join("\n")))
    }

    // ── Subscriptions ─────────────────────────────────────

    async fn subscribe(&self, event: &MessageEvent) -> Result<Handled> {
        let user_id = event.user_id.to_string();
        let added = self
            .store
            .update(move |doc| {
                if doc.subscribe(&user_id) {
                    Change::Changed(true)
                } else {
                    Change::Unchanged(false)
                }
            })
            .await?;
        Ok(Handled::Reply(
            if added { SUBSCRIBED } else { ALREADY_SUBSCRIBED }.to_string(),
        ))
    }

    async fn unsubscribe(&self, event: &MessageEvent) -> Result<Handled> {
        let user_id = event.user_id.to_string();
        let removed = self
            .store
            .update(move |doc| {
                if doc.unsubscribe(&user_id) {
                    Change::Changed(true)
                } else {
                    Change::Unchanged(false)
                }
            })
            .await?;
        Ok(Handled::Reply(
            if removed { UNSUBSCRIBED } else { NOT_SUBSCRIBED }.to_string(),
        ))
    }

    async fn list_subscribers(&self) -> Result<Handled> {
        let doc = self.store.snapshot().await?;
        if doc.subscribed_users.is_empty() {
            return Ok(Handled::Reply(NO_SUBSCRIBERS.to_string()));
        }
        Ok(Handled::Reply(format!(
            "当前订阅点赞的用户ID列表：\n{}",
            doc.subscribed_users.join("\n")
        )))
    }

    // ── Master commands ───────────────────────────────────

    async fn who_liked_me(&self, api: &dyn ActionCaller) -> Result<Handled> {
        let entries = match api.call(Action::GetProfileLike, json!({})).await {
            Ok(data) => profile_likes(&data),
            Err(e) => {
                warn!("[cmd] Failed to fetch profile likes: {e}");
                Vec::new()
            }
        };

        let lines: Vec<String> = entries
            .iter()
            .map(|(nick, count)| format!("【{nick}】赞了我{count}次"))
            .collect();
        if lines.is_empty() {
            return Ok(Handled::Reply(NO_LIKES.to_string()));
        }
        Ok(Handled::Reply(lines.join("\n")))
    }

    async fn settings(&self, path: Option<String>, value: Option<String>) -> Result<Handled> {
        let Some(path) = path else {
            return Ok(Handled::Reply(
                "用法：#点赞配置 <配置项> [新值]\n配置项：enable_white_list, white_list_groups, \
                 subscribed_users, last_like_date, reply_templates.success, \
                 reply_templates.limit, reply_templates.stranger"
                    .to_string(),
            ));
        };

        let Some(raw) = value else {
            let doc = self.store.snapshot().await?;
            let reply = match doc.get_path(&path) {
                Some(v) => format!("{path}:\n{}", serde_yaml::to_string(&v)?.trim_end()),
                None => format!("没有这个配置项：{path}"),
            };
            return Ok(Handled::Reply(reply));
        };

        let new_value: serde_yaml::Value = match serde_yaml::from_str(&raw) {
            Ok(v) => v,
            Err(e) => return Ok(Handled::Reply(format!("无法解析新值：{e}"))),
        };
        let target = path.clone();
        let result = self
            .store
            .update(move |doc| match doc.set_path(&target, new_value) {
                Ok(()) => Change::Changed(Ok(())),
                Err(e) => Change::Unchanged(Err(e)),
            })
            .await?;

        Ok(Handled::Reply(match result {
            Ok(()) => {
                info!("[cmd] Setting {path} updated");
                format!("已更新 {path}")
            }
            Err(e) => format!("更新失败：{e}"),
        }))
    }
}

/// `(nick, count)` pairs from a `get_profile_like` payload, dropping
/// entries without a nickname or with no likes.
fn profile_likes(data: &Value) -> Vec<(String, u64)> {
    let data = data.get("data").unwrap_or(data);
    let infos = data
        .pointer("/favoriteInfo/userInfos")
        .or_else(|| data.get("userInfos"))
        .and_then(Value::as_array);

    infos
        .into_iter()
        .flatten()
        .filter_map(|info| {
            let nick = info.get("nick").and_then(Value::as_str)?;
            let count = info.get("count").and_then(Value::as_u64)?;
            (!nick.is_empty() && count > 0).then(|| (nick.to_string(), count))
        })
        .collect()
}
