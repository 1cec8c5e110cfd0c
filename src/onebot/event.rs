/// OneBot v11 frame parsing.
/// Only the subset the bot needs: message events with segment arrays,
/// lifecycle meta events and action response envelopes.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Where a message came from, and therefore where a reply goes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTarget {
    Private { user_id: i64 },
    Group { group_id: i64 },
}

/// One segment of a OneBot message array
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// `qq` is `None` for `@all`
    At { qq: Option<i64> },
    Other(String),
}

/// Parsed incoming chat message
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub self_id: i64,
    pub user_id: i64,
    pub target: ChatTarget,
    pub segments: Vec<Segment>,
    pub sender_nickname: Option<String>,
}

impl MessageEvent {
    /// Concatenated text segments, trimmed. Commands are matched against this.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            if let Segment::Text(t) = seg {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Users mentioned with `@`, excluding the bot itself and `@all`.
    pub fn mentioned_users(&self) -> Vec<i64> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::At { qq: Some(qq) } if *qq != self.self_id => Some(*qq),
                _ => None,
            })
            .collect()
    }

    pub fn group_id(&self) -> Option<i64> {
        match self.target {
            ChatTarget::Group { group_id } => Some(group_id),
            ChatTarget::Private { .. } => None,
        }
    }
}

/// A frame received on the WebSocket link
#[derive(Debug)]
pub enum Frame {
    Message(MessageEvent),
    /// `meta_event` lifecycle connect
    Lifecycle { self_id: i64 },
    Response(ApiResponse),
    Ignored,
}

/// Action response envelope, shared by the WebSocket and HTTP transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub wording: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

/// Why the platform refused an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Daily like cap for this target reached
    RateLimited,
    /// Target does not accept likes from strangers
    PermissionDenied,
    Unknown,
}

/// A `status: failed` answer, classified once at the protocol boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFailure {
    pub kind: FailureKind,
    pub retcode: i64,
    pub message: String,
}

impl FailureKind {
    /// NapCat reports these conditions only through human-readable text,
    /// e.g. "点赞失败 今日同一好友点赞数已达上限".
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if text.contains("已达") || text.contains("上限") || lower.contains("limit") {
            FailureKind::RateLimited
        } else if text.contains("权限") || lower.contains("permission") {
            FailureKind::PermissionDenied
        } else {
            FailureKind::Unknown
        }
    }
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok" || (self.status.is_empty() && self.retcode == 0)
    }

    /// Splits the envelope into its payload or a classified failure.
    pub fn into_result(self) -> Result<Value, ApiFailure> {
        if self.is_ok() {
            return Ok(self.data);
        }
        let message = if self.wording.is_empty() {
            self.message
        } else if self.message.is_empty() || self.message == self.wording {
            self.wording
        } else {
            format!("{} ({})", self.message, self.wording)
        };
        Err(ApiFailure {
            kind: FailureKind::classify(&message),
            retcode: self.retcode,
            message,
        })
    }
}

/// Builds an action request frame
pub fn build_action(action: &str, params: &Value, echo: &str) -> String {
    json!({
        "action": action,
        "params": params,
        "echo": echo,
    })
    .to_string()
}

/// Builds the `send_msg` params for a plain-text reply
pub fn build_reply_params(target: &ChatTarget, text: &str) -> Value {
    let message = json!([{ "type": "text", "data": { "text": text } }]);
    match target {
        ChatTarget::Private { user_id } => json!({
            "message_type": "private",
            "user_id": user_id,
            "message": message,
        }),
        ChatTarget::Group { group_id } => json!({
            "message_type": "group",
            "group_id": group_id,
            "message": message,
        }),
    }
}

/// Parses one text frame from the link.
pub fn parse_frame(raw: &str) -> Result<Frame, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;

    if let Some(post_type) = value.get("post_type").and_then(Value::as_str) {
        return Ok(match post_type {
            "message" => parse_message(&value).map_or(Frame::Ignored, Frame::Message),
            "meta_event" => {
                let is_connect = value.get("meta_event_type").and_then(Value::as_str)
                    == Some("lifecycle")
                    && value.get("sub_type").and_then(Value::as_str) == Some("connect");
                match as_id(value.get("self_id")) {
                    Some(self_id) if is_connect => Frame::Lifecycle { self_id },
                    _ => Frame::Ignored,
                }
            }
            _ => Frame::Ignored,
        });
    }

    if value.get("echo").is_some() || value.get("retcode").is_some() {
        let response: ApiResponse = serde_json::from_value(value)?;
        return Ok(Frame::Response(response));
    }

    Ok(Frame::Ignored)
}

fn parse_message(value: &Value) -> Option<MessageEvent> {
    let self_id = as_id(value.get("self_id"))?;
    let user_id = as_id(value.get("user_id"))?;
    let target = match value.get("message_type").and_then(Value::as_str)? {
        "group" => ChatTarget::Group {
            group_id: as_id(value.get("group_id"))?,
        },
        "private" => ChatTarget::Private { user_id },
        _ => return None,
    };

    let segments = match value.get("message") {
        Some(Value::Array(items)) => items.iter().map(parse_segment).collect(),
        // String-format messages carry no structured @ mentions
        Some(Value::String(s)) => vec![Segment::Text(s.clone())],
        _ => Vec::new(),
    };

    let sender_nickname = value
        .get("sender")
        .and_then(|s| s.get("nickname"))
        .and_then(Value::as_str)
        .map(String::from);

    Some(MessageEvent {
        self_id,
        user_id,
        target,
        segments,
        sender_nickname,
    })
}

fn parse_segment(item: &Value) -> Segment {
    let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
    let data = item.get("data");
    match kind {
        "text" => Segment::Text(
            data.and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        "at" => Segment::At {
            qq: as_id(data.and_then(|d| d.get("qq"))),
        },
        other => Segment::Other(other.to_string()),
    }
}

/// OneBot hosts disagree on whether ids are numbers or strings.
pub fn as_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
