//! Host action calls.
//!
//! The bot does not know up front which of its connections to the OneBot
//! host will answer a given action. [`ActionResolver`] walks an ordered
//! list of [`CallStrategy`] candidates and returns the first answer;
//! callers only see a payload or a typed [`ActionError`].

pub mod resolver;
pub mod strategy;

pub use resolver::ActionResolver;
pub use strategy::HostSurfaces;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::onebot::{ApiFailure, FailureKind};

/// The closed set of host actions the bot uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    SendLike,
    GetStrangerInfo,
    GetProfileLike,
}

impl Action {
    /// OneBot action name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendLike => "send_like",
            Action::GetStrangerInfo => "get_stranger_info",
            Action::GetProfileLike => "get_profile_like",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that was tried and failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// No candidate produced an answer
    #[error("no api surface for {action}, attempted: {}", format_attempts(.attempts))]
    NoApiSurface {
        action: Action,
        attempts: Vec<Attempt>,
    },
    /// Platform daily cap reached
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Target refuses likes from non-contacts
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("host refused (retcode {retcode}): {message}")]
    Unknown { retcode: i64, message: String },
}

impl From<ApiFailure> for ActionError {
    fn from(failure: ApiFailure) -> Self {
        match failure.kind {
            FailureKind::RateLimited => ActionError::RateLimited(failure.message),
            FailureKind::PermissionDenied => ActionError::PermissionDenied(failure.message),
            FailureKind::Unknown => ActionError::Unknown {
                retcode: failure.retcode,
                message: failure.message,
            },
        }
    }
}

fn format_attempts(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "none".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.name, a.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Anything that can run a host action.
///
/// Implemented by [`ActionResolver`]; the like service and command handlers
/// depend on this trait only.
#[async_trait]
pub trait ActionCaller: Send + Sync {
    async fn call(&self, action: Action, params: Value) -> Result<Value, ActionError>;
}
