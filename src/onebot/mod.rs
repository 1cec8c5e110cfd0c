pub mod event;
pub mod http;
pub mod socket;

pub use event::{ApiFailure, ApiResponse, FailureKind, MessageEvent};
pub use http::HttpApi;
pub use socket::{LinkEvent, OneBotLink};

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::config::OneBotConfig;

/// Errors raised by the OneBot transports.
#[derive(Debug, thiserror::Error)]
pub enum OneBotError {
    /// Bad URL or other local misconfiguration
    #[error("configuration error: {0}")]
    Config(String),
    /// The host refused our access token
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("{0}")]
    Transient(String),
    #[error("link closed before a response arrived")]
    Closed,
    #[error("no response to {action} within {secs}s")]
    Timeout { action: String, secs: u64 },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl OneBotError {
    /// Permanent errors stop the reconnection loop.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, OneBotError::Config(_) | OneBotError::Auth(_))
    }
}

/// Process-wide slot holding the current WebSocket link, if any.
///
/// The reconnection loop fills it on connect and clears it on disconnect;
/// action calls made outside of an event (the daily sweep) go through it.
#[derive(Clone, Default)]
pub struct LinkSlot {
    inner: Arc<RwLock<Option<OneBotLink>>>,
}

impl LinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, link: OneBotLink) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(link);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }

    /// The current link, if one is up.
    pub fn current(&self) -> Option<OneBotLink> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|link| !link.is_closed())
    }
}

/// Opens the forward WebSocket link described by the config.
pub async fn connect(
    config: &OneBotConfig,
) -> Result<(mpsc::UnboundedReceiver<LinkEvent>, OneBotLink), OneBotError> {
    socket::connect(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors_not_retriable() {
        assert!(!OneBotError::Config("bad url".into()).is_retriable());
        assert!(!OneBotError::Auth("401".into()).is_retriable());
        assert!(OneBotError::Transient("refused".into()).is_retriable());
        assert!(OneBotError::Closed.is_retriable());
    }

    #[test]
    fn test_empty_slot_has_no_link() {
        let slot = LinkSlot::new();
        assert!(slot.current().is_none());
        slot.clear();
        assert!(slot.current().is_none());
    }
}
