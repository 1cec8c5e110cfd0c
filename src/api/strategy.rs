//! Call strategies: one per way of reaching the OneBot host.

use async_trait::async_trait;
use serde_json::Value;

use super::Action;
use crate::onebot::{ApiFailure, HttpApi, LinkSlot, OneBotError, OneBotLink};

/// How a single candidate failed.
#[derive(Debug)]
pub enum CallError {
    /// The surface was reached but the call failed in transit.
    /// The resolver records it and moves on.
    Transport(String),
    /// The host answered `failed`. Final: another surface would reach
    /// the same platform and get the same verdict.
    Rejected(ApiFailure),
}

impl From<OneBotError> for CallError {
    fn from(e: OneBotError) -> Self {
        CallError::Transport(e.to_string())
    }
}

/// One way of invoking host actions.
#[async_trait]
pub trait CallStrategy: Send + Sync {
    /// Name used in logs and in `NoApiSurface` reports
    fn name(&self) -> &str;

    /// Whether this candidate can run `action` at all.
    /// Inapplicable candidates are skipped without being recorded.
    fn applicable(&self, action: Action) -> bool;

    /// What the surface looks like right now (diagnostics only).
    fn describe(&self) -> String;

    /// Runs the action. `Ok(None)` means the surface is absent.
    async fn invoke(&self, action: Action, params: &Value) -> Result<Option<Value>, CallError>;
}

fn settle(response: crate::onebot::ApiResponse) -> Result<Option<Value>, CallError> {
    response.into_result().map(Some).map_err(CallError::Rejected)
}

/// Generic dispatch over a WebSocket link
pub struct SocketDispatch {
    name: &'static str,
    link: Option<OneBotLink>,
}

impl SocketDispatch {
    pub fn new(name: &'static str, link: Option<OneBotLink>) -> Self {
        Self { name, link }
    }
}

#[async_trait]
impl CallStrategy for SocketDispatch {
    fn name(&self) -> &str {
        self.name
    }

    fn applicable(&self, _action: Action) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.link
            .as_ref()
            .map_or_else(|| "absent".to_string(), OneBotLink::describe)
    }

    async fn invoke(&self, action: Action, params: &Value) -> Result<Option<Value>, CallError> {
        let Some(link) = self.link.as_ref().filter(|l| !l.is_closed()) else {
            return Ok(None);
        };
        settle(link.call(action.as_str(), params.clone()).await?)
    }
}

/// A dedicated HTTP API method for exactly one action
pub struct HttpEndpoint {
    name: String,
    action: Action,
    api: Option<HttpApi>,
}

impl HttpEndpoint {
    pub fn new(action: Action, api: Option<HttpApi>) -> Self {
        Self {
            name: format!("http.{}", action.as_str()),
            action,
            api,
        }
    }
}

#[async_trait]
impl CallStrategy for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn applicable(&self, action: Action) -> bool {
        action == self.action
    }

    fn describe(&self) -> String {
        self.api
            .as_ref()
            .map_or_else(|| "absent".to_string(), |api| format!("http {}", api.base_url()))
    }

    async fn invoke(&self, action: Action, params: &Value) -> Result<Option<Value>, CallError> {
        let Some(api) = &self.api else {
            return Ok(None);
        };
        let response = match action {
            Action::SendLike => {
                let user_id = user_id_param(params)?;
                let times = params
                    .get("times")
                    .and_then(Value::as_u64)
                    .and_then(|t| u32::try_from(t).ok())
                    .unwrap_or(1);
                api.send_like(user_id, times).await?
            }
            Action::GetStrangerInfo => api.get_stranger_info(user_id_param(params)?).await?,
            Action::GetProfileLike => api.get_profile_like().await?,
        };
        settle(response)
    }
}

fn user_id_param(params: &Value) -> Result<i64, CallError> {
    crate::onebot::event::as_id(params.get("user_id"))
        .ok_or_else(|| CallError::Transport("missing numeric user_id param".to_string()))
}

/// The connections visible to one call.
///
/// `event` is the link that delivered the message being handled; it is
/// `None` for scheduled work. `global` is the process-wide current link.
#[derive(Clone)]
pub struct HostSurfaces {
    pub event: Option<OneBotLink>,
    pub global: LinkSlot,
    pub http: Option<HttpApi>,
}

impl HostSurfaces {
    pub fn new(global: LinkSlot, http: Option<HttpApi>) -> Self {
        Self {
            event: None,
            global,
            http,
        }
    }

    /// Same surfaces, seen from inside an event delivered on `link`.
    pub fn with_event(&self, link: OneBotLink) -> Self {
        Self {
            event: Some(link),
            ..self.clone()
        }
    }

    /// Candidates in priority order, built fresh for each call.
    ///
    /// The global link is left out when it is the event's own link, so a
    /// stalled socket is not waited on twice.
    pub fn candidates(&self) -> Vec<Box<dyn CallStrategy>> {
        let global = self
            .global
            .current()
            .filter(|link| !self.event.as_ref().is_some_and(|event| event.same_link(link)));
        vec![
            Box::new(SocketDispatch::new("event.socket", self.event.clone())),
            Box::new(HttpEndpoint::new(Action::SendLike, self.http.clone())),
            Box::new(HttpEndpoint::new(Action::GetStrangerInfo, self.http.clone())),
            Box::new(HttpEndpoint::new(Action::GetProfileLike, self.http.clone())),
            Box::new(SocketDispatch::new("global.socket", global)),
        ]
    }
}
