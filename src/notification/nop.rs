use super::event::{EventMeta, SessionEvent, SessionListener};
use async_trait::async_trait;

// The Null Object used when nothing subscribed to session telemetry.
#[derive(Debug)]
pub struct NopListener;

#[async_trait]
impl SessionListener for NopListener {
    async fn receive_session_event(&self, _: SessionEvent, _: EventMeta) {}
}
