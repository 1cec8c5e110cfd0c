use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::commands::Router;
use crate::api::{ActionResolver, HostSurfaces};
use crate::onebot::{LinkEvent, OneBotLink};

/// The bot runtime.
///
/// Receives OneBot events, routes commands, and sends replies back
/// over the link the message arrived on.
pub struct BotRuntime {
    router: Router,
    surfaces: HostSurfaces,
    start_time: std::time::Instant,
}

impl BotRuntime {
    pub fn new(router: Router, surfaces: HostSurfaces) -> Self {
        Self {
            router,
            surfaces,
            start_time: std::time::Instant::now(),
        }
    }

    /// Main event loop for one link. Returns why the link went down.
    ///
    /// Messages are handled one at a time, so document mutations from
    /// two commands never interleave.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<LinkEvent>, link: OneBotLink) -> String {
        info!("[bot] Runtime started, waiting for messages...");

        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Connected { self_id } => {
                    info!("[bot] Online as {self_id}");
                }
                LinkEvent::Message(msg) => {
                    debug!(
                        "[bot] Message from {} ({}): {}",
                        msg.user_id,
                        msg.sender_nickname.as_deref().unwrap_or("?"),
                        msg.text()
                    );
                    let resolver =
                        ActionResolver::new(self.surfaces.with_event(link.clone()).candidates());

                    let reply = match self.router.dispatch(&msg, &resolver).await {
                        Ok(Some(reply)) => reply,
                        Ok(None) => continue,
                        Err(e) => {
                            error!("[bot] Error handling message from {}: {e:#}", msg.user_id);
                            continue;
                        }
                    };

                    if let Err(e) = link.send_reply(&msg.target, &reply).await {
                        warn!("[bot] Failed to send reply to {:?}: {e}", msg.target);
                    }
                }
                LinkEvent::Closed(reason) => {
                    let uptime = self.start_time.elapsed().as_secs();
                    info!("[bot] Link closed after {uptime}s of runtime uptime");
                    return reason;
                }
            }
        }

        "event channel closed".to_string()
    }
}
