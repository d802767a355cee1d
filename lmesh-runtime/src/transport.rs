//! Radio transport
//!
//! A transport listens on one channel at a time and hands every received
//! message to an observer callback. Sending only enqueues; frames go on air at
//! the transport's own cadence. Nothing about ordering or delivery is promised.
//!
//! [`SimulatedMedium`] stands in for the radio: stations attach to it, and
//! each frame reaches every other station listening on the same channel with
//! the reception probability of that directed link.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use lmesh_core::{ChannelInfo, Message};

use crate::config::SimulationConfig;

/// Callback invoked with every message received on the listened channel
pub type Observer = Arc<dyn Fn(ChannelInfo, Message) + Send + Sync>;

/// Radio capability of a node
pub trait Transport: Send + Sync {
    /// Listen on `channel`, replacing any previous listener
    fn listen(&self, channel: &ChannelInfo, observer: Observer);

    /// Queue a message for transmission on `channel`
    fn enqueue(&self, channel: &ChannelInfo, message: Message);
}

#[derive(Default)]
struct MediumState {
    /// Station identity to its current listener
    listeners: HashMap<u64, (ChannelInfo, Observer)>,
    /// Reception probability, keyed by (sender, receiver)
    reception: HashMap<(u64, u64), f64>,
    /// Frames put on air
    frames: u64,
}

/// Shared simulated radio medium
#[derive(Clone)]
pub struct SimulatedMedium {
    config: SimulationConfig,
    state: Arc<RwLock<MediumState>>,
}

impl SimulatedMedium {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MediumState::default())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MediumState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MediumState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a station and return its transport
    ///
    /// Must be called within a tokio runtime; the transport's sender task
    /// lives as long as the transport.
    pub fn attach(&self, identity: u64) -> SimulatedTransport {
        let (outbox, mut queue) = mpsc::unbounded_channel::<(ChannelInfo, Message)>();
        let medium = self.clone();
        let airtime = self.config.airtime();

        tokio::spawn(async move {
            while let Some((channel, message)) = queue.recv().await {
                tokio::time::sleep(airtime).await;
                medium.broadcast(identity, &channel, message);
            }
            debug!(identity, "Station sender stopped");
        });

        SimulatedTransport {
            identity,
            medium: self.clone(),
            outbox,
        }
    }

    /// Remove a station's listener
    pub fn detach(&self, identity: u64) {
        self.write().listeners.remove(&identity);
    }

    /// Set the probability that `receiver` hears `sender`
    pub fn set_reception(&self, sender: u64, receiver: u64, probability: f64) {
        self.write()
            .reception
            .insert((sender, receiver), probability.clamp(0.0, 1.0));
    }

    /// Symmetric link between two stations
    pub fn connect(&self, a: u64, b: u64, probability: f64) {
        self.set_reception(a, b, probability);
        self.set_reception(b, a, probability);
    }

    pub fn reception(&self, sender: u64, receiver: u64) -> f64 {
        self.read()
            .reception
            .get(&(sender, receiver))
            .copied()
            .unwrap_or(self.config.default_reception)
    }

    /// Number of frames put on air so far
    pub fn frames(&self) -> u64 {
        self.read().frames
    }

    fn broadcast(&self, sender: u64, channel: &ChannelInfo, message: Message) {
        let receivers: Vec<Observer> = {
            let mut state = self.write();
            state.frames += 1;
            let mut rng = rand::thread_rng();
            state
                .listeners
                .iter()
                .filter(|(&station, (listened, _))| station != sender && listened == channel)
                .filter(|(&station, _)| {
                    let probability = state
                        .reception
                        .get(&(sender, station))
                        .copied()
                        .unwrap_or(self.config.default_reception);
                    rng.gen::<f64>() < probability
                })
                .map(|(_, (_, observer))| Arc::clone(observer))
                .collect()
        };

        trace!(sender, %channel, %message, receivers = receivers.len(), "Frame on air");
        for observer in receivers {
            observer(channel.clone(), message.clone());
        }
    }
}

/// One station's handle on the simulated medium
pub struct SimulatedTransport {
    identity: u64,
    medium: SimulatedMedium,
    outbox: mpsc::UnboundedSender<(ChannelInfo, Message)>,
}

impl SimulatedTransport {
    pub fn identity(&self) -> u64 {
        self.identity
    }
}

impl Transport for SimulatedTransport {
    fn listen(&self, channel: &ChannelInfo, observer: Observer) {
        debug!(identity = self.identity, %channel, "Listening");
        self.medium
            .write()
            .listeners
            .insert(self.identity, (channel.clone(), observer));
    }

    fn enqueue(&self, channel: &ChannelInfo, message: Message) {
        if self.outbox.send((channel.clone(), message)).is_err() {
            debug!(identity = self.identity, "Sender task gone, frame dropped");
        }
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.medium.detach(self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmesh_core::{Header, MessageType};
    use std::sync::Mutex;
    use std::time::Duration;

    fn recorder() -> (Observer, Arc<Mutex<Vec<Message>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let observer: Observer = Arc::new(move |_, message| sink.lock().unwrap().push(message));
        (observer, received)
    }

    fn hello(counter: u8) -> Message {
        Message::new(Header::encode(MessageType::Hello, 1, counter), vec![])
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_follows_links() {
        let medium = SimulatedMedium::new(SimulationConfig::default());
        let channel = ChannelInfo::new("test");
        let a = medium.attach(1);
        let b = medium.attach(2);
        let c = medium.attach(3);
        medium.connect(1, 2, 1.0);

        let (observer_b, heard_b) = recorder();
        let (observer_c, heard_c) = recorder();
        b.listen(&channel, observer_b);
        c.listen(&channel, observer_c);

        a.enqueue(&channel, hello(0));
        a.enqueue(&channel, hello(1));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(heard_b.lock().unwrap().len(), 2);
        assert!(heard_c.lock().unwrap().is_empty());
        assert_eq!(medium.frames(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_separate() {
        let medium = SimulatedMedium::new(SimulationConfig {
            default_reception: 1.0,
            ..Default::default()
        });
        let a = medium.attach(1);
        let b = medium.attach(2);

        let (observer, heard) = recorder();
        b.listen(&ChannelInfo::rendezvous(), observer);
        a.enqueue(&ChannelInfo::new("mesh"), hello(0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(heard.lock().unwrap().is_empty());

        a.enqueue(&ChannelInfo::rendezvous(), hello(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(heard.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_take_airtime() {
        let medium = SimulatedMedium::new(SimulationConfig {
            airtime_ms: 100,
            default_reception: 1.0,
        });
        let a = medium.attach(1);
        let b = medium.attach(2);
        let (observer, heard) = recorder();
        b.listen(&ChannelInfo::new("mesh"), observer);

        for counter in 0..3 {
            a.enqueue(&ChannelInfo::new("mesh"), hello(counter));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(heard.lock().unwrap().len(), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(heard.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_transport_detaches() {
        let medium = SimulatedMedium::new(SimulationConfig::default());
        let a = medium.attach(1);
        let (observer, _) = recorder();
        a.listen(&ChannelInfo::new("mesh"), observer);
        assert_eq!(medium.read().listeners.len(), 1);
        drop(a);
        assert!(medium.read().listeners.is_empty());
    }
}
