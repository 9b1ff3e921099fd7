//! Websocket rooms fed by the outbox dispatcher.
//!
//! Each [`Channel`] maps to a broadcast room. The dispatcher publishes
//! committed effects here and every websocket subscribed to the room
//! forwards them to its client.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gamevault_core::{Channel, Effect};
use gamevault_engine::{Notifier, NotifyError};
use tokio::sync::broadcast;

/// Messages buffered per room before slow clients start lagging.
const ROOM_CAPACITY: usize = 256;

/// Broadcast rooms keyed by channel.
#[derive(Debug, Default)]
pub struct RealtimeHub {
    rooms: DashMap<Channel, broadcast::Sender<Arc<str>>>,
}

impl RealtimeHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `channel`, creating the room on first use.
    #[must_use]
    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<Arc<str>> {
        self.rooms
            .entry(channel)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Number of rooms with a live sender.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl Notifier for RealtimeHub {
    async fn deliver(&self, channel: &Channel, effect: &Effect) -> Result<(), NotifyError> {
        let message: Arc<str> = serde_json::to_string(effect)?.into();

        let Some(room) = self.rooms.get(channel) else {
            tracing::debug!(effect = effect.name(), "no subscribers for effect");
            return Ok(());
        };
        if room.send(message).is_err() {
            // Every receiver has gone away.
            drop(room);
            self.rooms.remove_if(channel, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamevault_core::UserId;

    #[tokio::test]
    async fn delivers_to_the_player_room_only() {
        let hub = RealtimeHub::new();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let mut alice_rx = hub.subscribe(Channel::Player(alice));
        let mut bob_rx = hub.subscribe(Channel::Player(bob));

        let effect = Effect::AchievementUnlocked {
            user_id: alice,
            achievement: "first_win".into(),
        };
        hub.deliver(&effect.channel(), &effect).await.unwrap();

        let message = alice_rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(json["event"], "achievement_unlocked");
        assert_eq!(json["achievement"], "first_win");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_rooms_are_pruned() {
        let hub = RealtimeHub::new();
        let user_id = UserId::generate();
        drop(hub.subscribe(Channel::Player(user_id)));
        assert_eq!(hub.room_count(), 1);

        let effect = Effect::WalletUpdated {
            user_id,
            coins: 1,
            gems: 0,
        };
        hub.deliver(&effect.channel(), &effect).await.unwrap();
        assert_eq!(hub.room_count(), 0);
    }
}
