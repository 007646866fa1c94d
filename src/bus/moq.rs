//! Bus client over a moq relay.
//!
//! Topic `t` published by client `c` is the broadcast `events/t/c` with a single
//! [`EVENT_TRACK`](crate::EVENT_TRACK); every frame is one message. Subscribing to `t` watches
//! announcements under `events/t/` and forwards frames from every publisher.
//!
//! Each client also announces `presence/c` and writes a [`PresenceFrame`] carrying its last will.
//! When a peer's presence broadcast goes away without a departing frame the peer is treated as
//! lost, and its will is delivered locally if the will topic is subscribed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use moq_lite::{BroadcastConsumer, BroadcastProducer, OriginConsumer, OriginProducer, Session, Track, TrackProducer};
use prost::Message;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{BusConnection, BusError, BusMessage, BusOptions, LastWill, MessageBus, QoS};
use crate::{EVENT_TRACK, PRESENCE_TRACK, connect_bidirectional, event_broadcast_path, presence_broadcast_path};

const EVENT_ROOT: &str = "events/";
const PRESENCE_ROOT: &str = "presence/";

/// Presence record announced by every relay client.
#[derive(Clone, PartialEq, Message)]
pub struct PresenceFrame {
    #[prost(string, tag = "1")]
    pub client_id: String,
    #[prost(string, tag = "2")]
    pub will_topic: String,
    #[prost(bytes = "vec", tag = "3")]
    pub will_payload: Vec<u8>,
    /// Set in the final frame of a clean disconnect.
    #[prost(bool, tag = "4")]
    pub departing: bool,
}

impl PresenceFrame {
    fn new(client_id: &str, will: Option<&LastWill>, departing: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            will_topic: will.map(|w| w.topic.clone()).unwrap_or_default(),
            will_payload: will.map(|w| w.payload.to_vec()).unwrap_or_default(),
            departing,
        }
    }

    fn will(&self) -> Option<LastWill> {
        (!self.will_topic.is_empty()).then(|| LastWill {
            topic: self.will_topic.clone(),
            payload: Bytes::from(self.will_payload.clone()),
        })
    }
}

struct Publication {
    _broadcast: BroadcastProducer,
    track: TrackProducer,
}

struct Relay {
    _session: Session,
    producer: OriginProducer,
    consumer: OriginConsumer,
    publications: HashMap<String, Publication>,
    presence: Publication,
}

pub struct MoqBus {
    client_id: String,
    will: Option<LastWill>,
    relay: Mutex<Option<Relay>>,
    subscribed: Arc<Mutex<HashSet<String>>>,
    inbound: mpsc::UnboundedSender<BusMessage>,
    watchers: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for MoqBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoqBus")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl MoqBus {
    /// Connect to the relay at `options.address` and announce presence.
    ///
    /// The relay session is not re-established if it drops.
    pub async fn connect(options: BusOptions) -> Result<BusConnection, BusError> {
        let (session, producer, consumer) =
            connect_bidirectional(&options.address)
                .await
                .map_err(|e| BusError::Connect {
                    address: options.address.clone(),
                    reason: format!("{e:#}"),
                })?;

        let presence_path = presence_broadcast_path(&options.client_id);
        let mut presence = publication(&producer, &presence_path, PRESENCE_TRACK)?;
        let frame = PresenceFrame::new(&options.client_id, options.will.as_ref(), false);
        presence.track.write_frame(frame.encode_to_vec());

        let (inbound, receiver) = mpsc::unbounded_channel();
        let subscribed = Arc::new(Mutex::new(HashSet::new()));
        let mut watchers = JoinSet::new();

        let presence_root = consumer
            .with_root(PRESENCE_ROOT)
            .ok_or_else(|| BusError::PathUnavailable {
                path: PRESENCE_ROOT.to_string(),
            })?;
        watchers.spawn(watch_presence(
            options.client_id.clone(),
            presence_root,
            Arc::clone(&subscribed),
            inbound.clone(),
        ));

        info!(
            client_id = %options.client_id,
            relay = %options.address,
            clean_session = options.clean_session,
            "Connected to relay"
        );

        let bus = MoqBus {
            client_id: options.client_id,
            will: options.will,
            relay: Mutex::new(Some(Relay {
                _session: session,
                producer,
                consumer,
                publications: HashMap::new(),
                presence,
            })),
            subscribed,
            inbound,
            watchers: Mutex::new(watchers),
        };

        Ok(BusConnection {
            bus: Arc::new(bus),
            inbound: receiver,
        })
    }

    fn disconnected(&self) -> BusError {
        BusError::Disconnected {
            client_id: self.client_id.clone(),
        }
    }
}

impl MessageBus for MoqBus {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        let relay = self.relay.lock().expect("relay lock poisoned");
        let relay = relay.as_ref().ok_or_else(|| self.disconnected())?;

        let newly_added = self
            .subscribed
            .lock()
            .expect("subscription lock poisoned")
            .insert(topic.to_string());
        if !newly_added {
            return Ok(());
        }

        let root = format!("{EVENT_ROOT}{topic}/");
        let announcements = relay
            .consumer
            .with_root(&root)
            .ok_or(BusError::PathUnavailable { path: root })?;

        self.watchers
            .lock()
            .expect("watcher lock poisoned")
            .spawn(watch_topic(
                topic.to_string(),
                announcements,
                self.inbound.clone(),
            ));
        debug!(client_id = %self.client_id, topic, ?qos, "Subscribed");
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let mut relay = self.relay.lock().expect("relay lock poisoned");
        let relay = relay.as_mut().ok_or_else(|| self.disconnected())?;

        if !relay.publications.contains_key(topic) {
            let path = event_broadcast_path(topic, &self.client_id);
            let created = publication(&relay.producer, &path, EVENT_TRACK)?;
            relay.publications.insert(topic.to_string(), created);
        }
        if let Some(publication) = relay.publications.get_mut(topic) {
            publication.track.write_frame(payload);
        }
        Ok(())
    }

    fn disconnect(&self) {
        let relay = self.relay.lock().expect("relay lock poisoned").take();
        let Some(mut relay) = relay else {
            return;
        };

        let frame = PresenceFrame::new(&self.client_id, self.will.as_ref(), true);
        relay.presence.track.write_frame(frame.encode_to_vec());
        self.watchers
            .lock()
            .expect("watcher lock poisoned")
            .abort_all();
        drop(relay);

        info!(client_id = %self.client_id, "Disconnected from relay");
    }
}

fn publication(producer: &OriginProducer, path: &str, track: &str) -> Result<Publication, BusError> {
    let mut broadcast = producer
        .create_broadcast(path)
        .ok_or_else(|| BusError::PathUnavailable {
            path: path.to_string(),
        })?;
    let track = broadcast.create_track(Track::new(track));
    Ok(Publication {
        _broadcast: broadcast,
        track,
    })
}

/// Publisher id from a path relative to `events/<topic>/`.
///
/// Deeper paths belong to topics nested under this one and are not ours.
fn direct_publisher(relative: &str) -> Option<&str> {
    (!relative.is_empty() && !relative.contains('/')).then_some(relative)
}

async fn watch_topic(
    topic: String,
    mut announcements: OriginConsumer,
    inbound: mpsc::UnboundedSender<BusMessage>,
) {
    let mut readers = JoinSet::new();
    loop {
        match announcements.announced().await {
            Some((path, Some(broadcast))) => {
                let Some(publisher) = direct_publisher(path.as_str()) else {
                    continue;
                };
                debug!(topic = %topic, publisher, "Publisher announced");
                readers.spawn(forward_frames(topic.clone(), broadcast, inbound.clone()));
            }
            Some((path, None)) => {
                debug!(topic = %topic, publisher = %path.as_str(), "Publisher departed");
            }
            None => {
                debug!(topic = %topic, "Announcement stream closed");
                break;
            }
        }
    }
    readers.shutdown().await;
}

async fn forward_frames(
    topic: String,
    broadcast: BroadcastConsumer,
    inbound: mpsc::UnboundedSender<BusMessage>,
) {
    let mut track = broadcast.subscribe_track(&Track::new(EVENT_TRACK));
    loop {
        match track.next_group().await {
            Ok(Some(mut group)) => {
                while let Ok(Some(frame)) = group.read_frame().await {
                    let message = BusMessage {
                        topic: topic.clone(),
                        payload: Bytes::copy_from_slice(frame.as_ref()),
                    };
                    if inbound.send(message).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Event track error");
                break;
            }
        }
    }
}

async fn watch_presence(
    client_id: String,
    mut announcements: OriginConsumer,
    subscribed: Arc<Mutex<HashSet<String>>>,
    inbound: mpsc::UnboundedSender<BusMessage>,
) {
    let peers: Arc<DashMap<String, PresenceFrame, ahash::RandomState>> = Arc::new(DashMap::default());
    let mut readers = JoinSet::new();

    loop {
        match announcements.announced().await {
            Some((path, Some(broadcast))) => {
                let peer = path.to_string();
                if peer == client_id {
                    continue;
                }
                readers.spawn(track_presence(peer, broadcast, Arc::clone(&peers)));
            }
            Some((path, None)) => {
                let peer = path.to_string();
                let Some((_, frame)) = peers.remove(&peer) else {
                    continue;
                };
                if frame.departing {
                    debug!(peer = %peer, "Peer left cleanly");
                    continue;
                }
                warn!(peer = %peer, "Peer connection lost");

                let Some(will) = frame.will() else {
                    continue;
                };
                let wanted = subscribed
                    .lock()
                    .expect("subscription lock poisoned")
                    .contains(&will.topic);
                if wanted {
                    let _ = inbound.send(BusMessage {
                        topic: will.topic,
                        payload: will.payload,
                    });
                }
            }
            None => break,
        }
    }
    readers.shutdown().await;
}

async fn track_presence(
    peer: String,
    broadcast: BroadcastConsumer,
    peers: Arc<DashMap<String, PresenceFrame, ahash::RandomState>>,
) {
    let mut track = broadcast.subscribe_track(&Track::new(PRESENCE_TRACK));
    while let Ok(Some(mut group)) = track.next_group().await {
        while let Ok(Some(frame)) = group.read_frame().await {
            match PresenceFrame::decode(frame.as_ref()) {
                Ok(frame) => {
                    peers.insert(peer.clone(), frame);
                }
                Err(e) => warn!(peer = %peer, error = %e, "Undecodable presence frame"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_publisher_ignores_nested_topics() {
        assert_eq!(direct_publisher("component-a"), Some("component-a"));
        assert_eq!(direct_publisher("sub/component-a"), None);
        assert_eq!(direct_publisher(""), None);
    }

    #[test]
    fn test_presence_frame_carries_will() {
        let will = LastWill::connection_lost(12);
        let frame = PresenceFrame::new("c1", Some(&will), false);
        let decoded = PresenceFrame::decode(frame.encode_to_vec().as_slice()).unwrap();

        assert!(!decoded.departing);
        assert_eq!(decoded.will(), Some(will));
        assert_eq!(PresenceFrame::new("c2", None, true).will(), None);
    }
}
