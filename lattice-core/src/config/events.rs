use tracing::{debug, info};

use crate::config::Config;
use crate::error::LatticeError;
use crate::event::{ConfigEvent, EventKind, KEY_ESCAPE, PointerButtons};
use crate::net::LOCAL_PEER;
use crate::protocol::Payload;
use crate::session::Command;

impl Config {
    /// Queue an event as if a peer had sent it.
    pub fn send_event(&self, event: &ConfigEvent) -> Result<(), LatticeError> {
        self.session
            .dispatch(Command::new(LOCAL_PEER, event.to_command(0)?))
    }

    /// Wait for the next event, applying replies that arrive meanwhile.
    pub async fn next_event(&mut self) -> Result<ConfigEvent, LatticeError> {
        self.pump_until("next_event", |config| !config.events.is_empty())
            .await?;
        self.events.pop_front().ok_or(LatticeError::ChannelClosed)
    }

    /// The next event if one has already arrived.
    pub fn try_next_event(&mut self) -> Option<ConfigEvent> {
        while let Some(queued) = self.event_queue.try_recv() {
            self.invoke(queued);
        }
        self.events.pop_front()
    }

    /// Apply every pending event.
    pub fn handle_events(&mut self) {
        while let Some(event) = self.try_next_event() {
            if !self.handle_event(&event) {
                debug!("ignored event {:?}", event.kind);
            }
        }
    }

    /// Default reaction to an event. Returns `true` if it was consumed.
    ///
    /// Closing a window, pressing escape or pressing exactly the first
    /// three pointer buttons together stops the run.
    pub fn handle_event(&mut self, event: &ConfigEvent) -> bool {
        let chord = PointerButtons::BUTTON1 | PointerButtons::BUTTON2 | PointerButtons::BUTTON3;
        let stop = match &event.kind {
            EventKind::WindowClose => true,
            EventKind::KeyPress { key } => *key == KEY_ESCAPE,
            EventKind::PointerButtonPress { .. } => event.buttons() == chord,
            _ => false,
        };
        if stop {
            info!("stop requested by {:?} from {}", event.kind, event.originator);
            self.running = false;
        }
        stop
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::net::PeerTable;
    use crate::node::DefaultNodeFactory;

    async fn running_config() -> Config {
        let mut config = Config::new(Arc::new(PeerTable::new()), Box::new(DefaultNodeFactory));
        config.start_init(1).await.unwrap();
        config.finish_init().await.unwrap();
        config
    }

    #[tokio::test]
    async fn sent_events_come_back_in_order() {
        let mut config = running_config().await;
        config.send_event(&ConfigEvent::key_press(0, 'a' as u32)).unwrap();
        config.send_event(&ConfigEvent::key_press(0, 'b' as u32)).unwrap();

        assert_eq!(
            config.next_event().await.unwrap(),
            ConfigEvent::key_press(0, 'a' as u32)
        );
        assert_eq!(
            config.try_next_event(),
            Some(ConfigEvent::key_press(0, 'b' as u32))
        );
        assert_eq!(config.try_next_event(), None);
    }

    #[tokio::test]
    async fn escape_stops_the_run_at_the_next_frame() {
        let mut config = running_config().await;
        config.send_event(&ConfigEvent::key_press(3, KEY_ESCAPE)).unwrap();
        assert!(config.is_running());

        config.start_frame(0, vec![]).unwrap();
        config.finish_frame().await.unwrap();
        assert!(!config.is_running());
    }

    #[tokio::test]
    async fn stop_events() {
        let mut config = running_config().await;
        assert!(!config.handle_event(&ConfigEvent::key_press(0, 'q' as u32)));
        assert!(config.is_running());

        let two = PointerButtons::BUTTON1 | PointerButtons::BUTTON3;
        assert!(!config.handle_event(&ConfigEvent::pointer_press(0, 1, 1, two)));

        let chord = two | PointerButtons::BUTTON2;
        let four = chord | PointerButtons::BUTTON4;
        assert!(!config.handle_event(&ConfigEvent::pointer_press(0, 1, 1, four)));
        assert!(config.is_running());

        assert!(config.handle_event(&ConfigEvent::pointer_press(0, 1, 1, chord)));
        assert!(!config.is_running());

        let mut config = running_config().await;
        assert!(config.handle_event(&ConfigEvent::window_close(2)));
        assert!(!config.is_running());
    }

    #[tokio::test]
    async fn exit_discards_pending_events() {
        let mut config = running_config().await;
        config.send_event(&ConfigEvent::key_press(0, 'x' as u32)).unwrap();
        assert!(config.exit().await.unwrap());
        assert_eq!(config.try_next_event(), None);
    }
}
