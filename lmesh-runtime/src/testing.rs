//! Test doubles for node collaborators

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lmesh_core::{ChannelInfo, CorrespondenceRegister, Message, SharedCorrespondence};

use crate::client::{ControllerClient, NodeSnapshot};
use crate::error::ClientError;
use crate::transport::{Observer, Transport};

/// Transport that records every enqueued frame and the current listener
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ChannelInfo, Message)>>,
    listening: Mutex<Option<ChannelInfo>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(ChannelInfo, Message)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn listening(&self) -> Option<ChannelInfo> {
        self.listening.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn listen(&self, channel: &ChannelInfo, _observer: Observer) {
        *self.listening.lock().unwrap() = Some(channel.clone());
    }

    fn enqueue(&self, channel: &ChannelInfo, message: Message) {
        self.sent.lock().unwrap().push((channel.clone(), message));
    }
}

/// Controller client answering from a script
pub struct ScriptedController {
    linked: AtomicBool,
    channel: ChannelInfo,
    address: u8,
    replies: Mutex<VecDeque<Vec<String>>>,
    fed: Mutex<Vec<Message>>,
    registers: Mutex<HashMap<u8, SharedCorrespondence>>,
}

impl ScriptedController {
    /// A controller reachable from the node, allocating `address`
    pub fn linked(channel: &str, address: u8) -> Self {
        Self {
            linked: AtomicBool::new(true),
            channel: ChannelInfo::new(channel),
            address,
            replies: Mutex::default(),
            fed: Mutex::default(),
            registers: Mutex::default(),
        }
    }

    pub fn unlinked() -> Self {
        let controller = Self::linked("unused", 1);
        controller.set_linked(false);
        controller
    }

    pub fn set_linked(&self, linked: bool) {
        self.linked.store(linked, Ordering::SeqCst);
    }

    /// Queue the commands returned by the next feed
    pub fn reply(&self, commands: Vec<String>) {
        self.replies.lock().unwrap().push_back(commands);
    }

    pub fn fed(&self) -> Vec<Message> {
        self.fed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControllerClient for ScriptedController {
    async fn heartbeat(&self, _snapshot: &NodeSnapshot) -> Result<Option<ChannelInfo>, ClientError> {
        Ok(self.linked.load(Ordering::SeqCst).then(|| self.channel.clone()))
    }

    async fn allocate_address(&self, _identity: u64, _mediator: Option<u8>) -> Result<u8, ClientError> {
        Ok(self.address)
    }

    async fn correspondence(&self, address: u8) -> Result<SharedCorrespondence, ClientError> {
        let mut registers = self.registers.lock().unwrap();
        Ok(registers
            .entry(address)
            .or_insert_with(|| CorrespondenceRegister::to(address).shared())
            .clone())
    }

    async fn feed(&self, _controller_identity: u64, message: &Message) -> Result<Vec<String>, ClientError> {
        self.fed.lock().unwrap().push(message.clone());
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
    }
}
