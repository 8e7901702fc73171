use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use uuid::Uuid;

use crate::protocol::SyncMessage;

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    tx: UnboundedSender<String>,
}

/// The set of views that can hear each other: one per browsing context
/// group. Channels opened under the same name on the same hub are connected.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new handle on the channel called `name`.
    pub fn open(&self, name: &str) -> BroadcastChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock()
            .entry(name.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!("opened channel {:?} ({})", name, id);
        BroadcastChannel {
            hub: self.clone(),
            name: name.to_string(),
            id,
            rx,
        }
    }

    /// Number of open handles on `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, name: &str, from: Uuid, frame: &str) -> usize {
        let mut channels = self.lock();
        let Some(subscribers) = channels.get_mut(name) else {
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if sub.id == from {
                return true;
            }
            match sub.tx.send(frame.to_string()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    fn unsubscribe(&self, name: &str, id: Uuid) {
        let mut channels = self.lock();
        if let Some(subscribers) = channels.get_mut(name) {
            subscribers.retain(|sub| sub.id != id);
            if subscribers.is_empty() {
                channels.remove(name);
            }
        }
    }
}

/// One view's subscription to a named channel.
///
/// Messages posted here reach every other open handle with the same name,
/// never this one. Each receiver sees messages in post order. Nothing is
/// queued for handles opened after the post. Dropping or closing the handle
/// unsubscribes it.
#[derive(Debug)]
pub struct BroadcastChannel {
    hub: BroadcastHub,
    name: String,
    id: Uuid,
    rx: UnboundedReceiver<String>,
}

impl BroadcastChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `message` to the other subscribers; returns how many got it.
    pub fn post(&self, message: &SyncMessage) -> usize {
        match serde_json::to_string(message) {
            Ok(frame) => {
                let delivered = self.hub.deliver(&self.name, self.id, &frame);
                debug!(
                    "posted {} for {:?} to {} peer(s)",
                    message.kind(),
                    message.lesson_key().as_str(),
                    delivered
                );
                delivered
            }
            Err(e) => {
                warn!("could not encode {}: {}", message.kind(), e);
                0
            }
        }
    }

    /// Sends a raw frame as-is. Receivers drop frames that do not decode.
    pub fn post_raw(&self, frame: &str) -> usize {
        self.hub.deliver(&self.name, self.id, frame)
    }

    /// Waits for the next decodable message. `None` once the channel is shut.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            let frame = self.rx.recv().await?;
            if let Some(message) = decode(&frame) {
                return Some(message);
            }
        }
    }

    /// Next already-queued message, without waiting.
    pub fn try_recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    if let Some(message) = decode(&frame) {
                        return Some(message);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    pub fn close(self) {
        // Drop does the unsubscribe.
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.name, self.id);
        debug!("closed channel {:?} ({})", self.name, self.id);
    }
}

fn decode(frame: &str) -> Option<SyncMessage> {
    match serde_json::from_str(frame) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("dropping undecodable sync message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::LessonKey;

    #[test]
    fn post_skips_sender_and_other_names() {
        let hub = BroadcastHub::new();
        let mut a = hub.open("sync");
        let mut b = hub.open("sync");
        let mut other = hub.open("elsewhere");

        let message = SyncMessage::request(&LessonKey::new("lesson-1"));
        assert_eq!(a.post(&message), 1);
        assert_eq!(b.try_recv(), Some(message));
        assert_eq!(a.try_recv(), None);
        assert_eq!(other.try_recv(), None);
    }

    #[test]
    fn closed_handles_stop_receiving() {
        let hub = BroadcastHub::new();
        let a = hub.open("sync");
        let b = hub.open("sync");
        assert_eq!(hub.subscriber_count("sync"), 2);
        b.close();
        assert_eq!(hub.subscriber_count("sync"), 1);
        assert_eq!(a.post(&SyncMessage::request(&LessonKey::new("x"))), 0);
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let hub = BroadcastHub::new();
        let a = hub.open("sync");
        let mut b = hub.open("sync");
        a.post_raw("{\"type\":\"PING\"}");
        let message = SyncMessage::request(&LessonKey::new("lesson-1"));
        a.post(&message);
        assert_eq!(b.try_recv(), Some(message));
    }
}
