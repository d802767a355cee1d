//! Node state machine
//!
//! A node is an actor: every timer, received frame and external request
//! arrives as a [`NodeEvent`] in its mailbox and is handled to completion
//! before the next one. The lifecycle is
//!
//! ```text
//! Down --wake--> Controller                      (direct controller link)
//! Down --wake--> Seeking --rendezvous--> Joining --invite--> Node
//! Node | Controller --link anomaly--> Error --supervisor--> Down
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use lmesh_core::payload::{decode_trace_announcements, encode_link_report, encode_trace_announcements};
use lmesh_core::routing::apply_delta;
use lmesh_core::wire::{DOWNWARDS_KEY, RESOLVED_BIT, UNASSIGNED};
use lmesh_core::{
    lock_register, ChannelInfo, Command, CorrespondenceRegister, ForwardingCache, Header, Invite,
    JoinReport, JoinRequest, LinkQualityRegister, Message, MessageType, NodeStatus,
};

use crate::client::{ControllerClient, DataSink, NodeSnapshot};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::scheduler::{Scheduler, Task};
use crate::transport::{Observer, Transport};

/// Everything a node reacts to
#[derive(Debug)]
pub enum NodeEvent {
    /// Scheduled work, tagged with the epoch it was scheduled in
    Task { epoch: u64, task: Task },
    /// A frame heard on `channel`
    Received { channel: ChannelInfo, message: Message },
    /// Application data to send upward
    FeedData(Vec<u8>),
    Snapshot(oneshot::Sender<NodeSnapshot>),
    Shutdown,
}

/// Capabilities a node is composed with
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub controller: Arc<dyn ControllerClient>,
    pub data_sink: Option<Arc<dyn DataSink>>,
}

/// Channels shared between a node and its supervisor
#[derive(Clone)]
pub(crate) struct Wiring {
    pub mailbox: mpsc::UnboundedSender<NodeEvent>,
    pub epoch: Arc<AtomicU64>,
    pub status: Arc<watch::Sender<NodeStatus>>,
}

/// Why a node incarnation stopped
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Exit {
    Shutdown,
    Fatal(String),
}

/// One incarnation of a mesh node
pub struct Node {
    config: NodeConfig,
    collaborators: Collaborators,
    scheduler: Scheduler,
    mailbox: mpsc::UnboundedSender<NodeEvent>,
    status_tx: Arc<watch::Sender<NodeStatus>>,

    status: NodeStatus,
    address: u8,
    /// Operating channel of the mesh
    channel: Option<ChannelInfo>,
    /// Channel the transport currently delivers from
    listening: Option<ChannelInfo>,
    data_sink_connected: bool,

    cache: ForwardingCache,
    link_quality: LinkQualityRegister,
    /// Counter of this node's Hellos
    hello: CorrespondenceRegister,
    /// Upward sending counter, and receiving side of downward messages to this node
    uplink: Option<CorrespondenceRegister>,
    /// Routing keys this node forwards
    routing: BTreeSet<u8>,
    /// Hellos heard per joining identity
    join_counters: HashMap<u64, u32>,
    /// Tracing headers to announce, with the number of Hellos that carried them
    announcements: BTreeMap<Header, u32>,
}

impl Node {
    /// Standalone node posting its own tasks to `mailbox`
    pub fn new(config: NodeConfig, collaborators: Collaborators, mailbox: mpsc::UnboundedSender<NodeEvent>) -> Self {
        let (status, _) = watch::channel(NodeStatus::Down);
        Self::with_wiring(
            config,
            collaborators,
            Wiring {
                mailbox,
                epoch: Arc::new(AtomicU64::new(0)),
                status: Arc::new(status),
            },
        )
    }

    pub(crate) fn with_wiring(config: NodeConfig, collaborators: Collaborators, wiring: Wiring) -> Self {
        wiring.status.send_replace(NodeStatus::Down);
        Self {
            cache: ForwardingCache::new(config.cache_capacity),
            link_quality: LinkQualityRegister::new(config.link_quality.clone()),
            hello: CorrespondenceRegister::from(UNASSIGNED),
            scheduler: Scheduler::new(wiring.mailbox.clone(), wiring.epoch),
            mailbox: wiring.mailbox,
            status_tx: wiring.status,
            config,
            collaborators,
            status: NodeStatus::Down,
            address: UNASSIGNED,
            channel: None,
            listening: None,
            data_sink_connected: false,
            uplink: None,
            routing: BTreeSet::new(),
            join_counters: HashMap::new(),
            announcements: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> u64 {
        self.config.identity
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Assigned address, none before joining
    pub fn address(&self) -> Option<u8> {
        (self.address != UNASSIGNED).then_some(self.address)
    }

    pub fn routing(&self) -> &BTreeSet<u8> {
        &self.routing
    }

    pub fn channel(&self) -> Option<&ChannelInfo> {
        self.channel.as_ref()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            identity: self.identity(),
            status: self.status,
            address: self.address(),
            links: self.link_quality.estimate_all(0.0),
            routing: self.routing.clone(),
        }
    }

    /// Schedule the first wake
    pub fn start(&mut self) {
        self.scheduler.schedule(Task::Wake, self.config.wake_delay());
    }

    /// Cancel all work and go down
    pub fn stop(&mut self) {
        info!(identity = self.identity(), "Shutting down");
        self.scheduler.cancel_all();
        self.set_status(NodeStatus::Down);
    }

    /// Handle events until shutdown or a fatal error
    pub(crate) async fn run(&mut self, mailbox: &mut mpsc::UnboundedReceiver<NodeEvent>) -> Exit {
        while let Some(event) = mailbox.recv().await {
            if matches!(event, NodeEvent::Shutdown) {
                return Exit::Shutdown;
            }
            match self.handle(event).await {
                Ok(()) => {}
                Err(NodeError::Fatal(reason)) => return Exit::Fatal(reason),
                Err(error) => warn!(identity = self.identity(), %error, "Event dropped"),
            }
        }
        Exit::Shutdown
    }

    /// Handle one event to completion
    pub async fn handle(&mut self, event: NodeEvent) -> Result<(), NodeError> {
        match event {
            NodeEvent::Task { epoch, task } => {
                if !self.scheduler.is_current(epoch) {
                    debug!(?task, "Stale task dropped");
                    return Ok(());
                }
                self.run_task(task).await
            }
            NodeEvent::Received { channel, message } => {
                if self.listening.as_ref() != Some(&channel) {
                    return Ok(());
                }
                self.receive(&channel, message).await
            }
            NodeEvent::FeedData(data) => self.feed_data(data).await,
            NodeEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            NodeEvent::Shutdown => {
                self.stop();
                Ok(())
            }
        }
    }

    async fn run_task(&mut self, task: Task) -> Result<(), NodeError> {
        match task {
            Task::Wake => self.wake().await,
            Task::StatusCheck => self.status_check().await,
            Task::Hello => {
                let hello = self.generate_hello();
                self.emit(hello).await
            }
            Task::Rendezvous => self.send_rendezvous(),
            Task::LinkReport => match self.generate_link_report() {
                Some(report) => self.emit(report).await,
                None => Ok(()),
            },
            Task::JoinTimeout => {
                if self.status == NodeStatus::Joining {
                    debug!(identity = self.identity(), "No invite received, joining again");
                    self.join()?;
                }
                Ok(())
            }
            Task::JoinReport { identity } => self.report_join(identity).await,
            Task::Invite {
                assigned,
                message,
                attempt,
            } => self.invite(assigned, message, attempt).await,
            Task::Emit(message) => self.emit(message).await,
        }
    }

    fn set_status(&mut self, status: NodeStatus) {
        if self.status != status {
            info!(identity = self.identity(), from = %self.status, to = %status, "Status changed");
        }
        self.status = status;
        self.status_tx.send_replace(status);
    }

    /// Enter the Error state and tear everything down
    fn fatal(&mut self, reason: &str) -> Result<(), NodeError> {
        error!(identity = self.identity(), reason, "Fatal node error");
        self.set_status(NodeStatus::Error);
        self.scheduler.cancel_all();
        Err(NodeError::Fatal(reason.to_string()))
    }

    fn listen(&mut self, channel: ChannelInfo) {
        let mailbox = self.mailbox.clone();
        let observer: Observer = Arc::new(move |channel, message| {
            let _ = mailbox.send(NodeEvent::Received { channel, message });
        });
        self.collaborators.transport.listen(&channel, observer);
        self.listening = Some(channel);
    }

    fn transmit(&self, message: Message) -> Result<(), NodeError> {
        let channel = self.channel.as_ref().ok_or(NodeError::ChannelUnset)?;
        self.collaborators.transport.enqueue(channel, message);
        Ok(())
    }

    async fn data_sink_heartbeat(&mut self) {
        self.data_sink_connected = match &self.collaborators.data_sink {
            Some(sink) => sink.heartbeat().await,
            None => false,
        };
    }

    // ----- lifecycle -----

    /// Pick the initial role from controller reachability
    pub async fn wake(&mut self) -> Result<(), NodeError> {
        if self.status.is_alive() {
            warn!(identity = self.identity(), status = %self.status, "Wake on live node ignored");
            return Ok(());
        }
        debug!(identity = self.identity(), "Waking up");
        self.data_sink_heartbeat().await;

        let snapshot = self.snapshot();
        let heartbeat = self.collaborators.controller.heartbeat(&snapshot).await;
        match heartbeat {
            Ok(Some(channel)) => {
                self.channel = Some(channel);
                let allocated = self
                    .collaborators
                    .controller
                    .allocate_address(self.identity(), None)
                    .await;
                match allocated {
                    Ok(address) => {
                        self.init_node(address, true);
                        Ok(())
                    }
                    Err(error) => self.fatal(&format!("address allocation failed: {error}")),
                }
            }
            Ok(None) => {
                self.seek();
                Ok(())
            }
            Err(error) => {
                warn!(identity = self.identity(), %error, "Controller heartbeat failed, seeking");
                self.seek();
                Ok(())
            }
        }
    }

    fn seek(&mut self) {
        debug!(identity = self.identity(), "Seeking a mesh");
        self.address = UNASSIGNED;
        self.set_status(NodeStatus::Seeking);
        self.listen(ChannelInfo::rendezvous());
    }

    fn join(&mut self) -> Result<(), NodeError> {
        let Some(channel) = self.channel.clone() else {
            return self.fatal("mesh channel not set");
        };
        debug!(identity = self.identity(), %channel, "Joining");

        self.address = UNASSIGNED;
        self.set_status(NodeStatus::Joining);
        self.hello = CorrespondenceRegister::from(UNASSIGNED);
        self.listen(channel);

        let request = JoinRequest {
            identity: self.identity(),
        }
        .encode();
        for _ in 0..self.config.join_volley {
            let hello = self.hello.pack_and_increment(MessageType::Hello, request.clone());
            self.transmit(hello)?;
        }

        self.scheduler.schedule(Task::JoinTimeout, self.config.join_timeout());
        Ok(())
    }

    fn init_node(&mut self, address: u8, controller: bool) {
        info!(identity = self.identity(), address, controller, "Initialised");
        self.scheduler.cancel_all();

        let policy = self.config.loss_policy;
        self.address = address;
        self.hello = CorrespondenceRegister::from(address).with_policy(policy);
        self.uplink = Some(CorrespondenceRegister::from(address).with_policy(policy));
        self.link_quality = LinkQualityRegister::new(self.config.link_quality.clone());
        self.join_counters.clear();
        self.set_status(if controller {
            NodeStatus::Controller
        } else {
            NodeStatus::Node
        });

        let config = &self.config;
        let periodic = [
            (Task::Rendezvous, config.rendezvous_period_ms, config.rendezvous_delay_ms),
            (Task::StatusCheck, config.status_check_period_ms, config.status_check_delay_ms),
            (Task::Hello, config.hello_period_ms, config.hello_delay_ms),
            (Task::LinkReport, config.link_report_period_ms, config.link_report_delay_ms),
        ];
        for (task, period, delay) in periodic {
            self.scheduler.schedule_periodic(
                task,
                std::time::Duration::from_millis(period),
                std::time::Duration::from_millis(delay),
            );
        }

        if let Some(channel) = self.channel.clone() {
            self.listen(channel);
        }
    }

    /// Verify the controller link still matches the node's role
    pub async fn status_check(&mut self) -> Result<(), NodeError> {
        debug!(identity = self.identity(), status = %self.status, "Status check");
        let snapshot = self.snapshot();
        match self.status {
            NodeStatus::Node => {
                let heartbeat = self.collaborators.controller.heartbeat(&snapshot).await;
                if let Ok(Some(_)) = heartbeat {
                    return self.fatal("unexpected controller link");
                }
                self.data_sink_heartbeat().await;
            }
            NodeStatus::Controller => {
                let heartbeat = self.collaborators.controller.heartbeat(&snapshot).await;
                match heartbeat {
                    Ok(Some(channel)) => self.channel = Some(channel),
                    Ok(None) => return self.fatal("controller link lost"),
                    Err(error) => return self.fatal(&format!("controller link lost: {error}")),
                }
                self.data_sink_heartbeat().await;
            }
            _ => {}
        }
        Ok(())
    }

    // ----- outbound -----

    /// Dispatch an outbound message
    ///
    /// Hellos, traces and resends go straight on air. Everything else takes
    /// the regular pipeline.
    pub async fn emit(&mut self, message: Message) -> Result<(), NodeError> {
        if message.is(MessageType::Hello) || message.is(MessageType::Trace) || message.is(MessageType::Resend) {
            debug!(%message, "Sending uncached");
            return self.transmit(message);
        }
        self.dispatch(message).await
    }

    /// Data goes to an attached sink, upward traffic at the root goes to the
    /// controller, the rest is cached and sent on the mesh.
    async fn dispatch(&mut self, message: Message) -> Result<(), NodeError> {
        if message.is(MessageType::Data) && self.data_sink_connected {
            if let Some(sink) = self.collaborators.data_sink.clone() {
                info!(%message, "Feeding data sink");
                let lost = sink.feed(&message).await?;
                let routing_address = message.header.routing_address();
                self.register_tracing_headers(lost.into_iter().map(|counter| Header::tracing(routing_address, counter)));
                return Ok(());
            }
        }

        if message.is(MessageType::Upwards) && self.status == NodeStatus::Controller {
            debug!(%message, "Feeding controller");
            let commands = self.collaborators.controller.feed(self.identity(), &message).await?;
            if commands.is_empty() {
                debug!("Controller up to date");
            }
            for command in commands {
                if let Err(error) = self.interpret(&command).await {
                    warn!(%command, %error, "Controller command failed");
                }
            }
            return Ok(());
        }

        info!(%message, "Sending");
        self.cache.store(message.clone());
        self.transmit(message)
    }

    /// Execute one textual controller command
    pub async fn interpret(&mut self, line: &str) -> Result<(), NodeError> {
        debug!(command = line, "Interpreting");
        let command: Command = line.parse()?;
        let target = command.target();

        match command {
            Command::Invite { assigned, identity, .. } => {
                let register = self.collaborators.controller.correspondence(target).await?;
                let payload = Invite { assigned, identity }.encode();
                let message = lock_register(&register).pack_and_increment(MessageType::DownwardsJoin, payload);
                if target == self.address {
                    for _ in 0..self.config.join_volley {
                        self.cache.store(message.clone());
                        self.transmit(message.clone())?;
                    }
                } else {
                    self.scheduler.spawn(Task::Emit(message));
                }
            }
            Command::Trace { counters, .. } => {
                if !self.config.tracing_enabled {
                    return Ok(());
                }
                let register = self.collaborators.controller.correspondence(target).await?;
                let message = lock_register(&register).pack(MessageType::Trace, counters);
                self.scheduler.spawn(Task::Emit(message));
            }
            Command::Update { keys, .. } => {
                if target == self.address {
                    apply_delta(&mut self.routing, &keys);
                } else {
                    let register = self.collaborators.controller.correspondence(target).await?;
                    let message = lock_register(&register).pack_and_increment(MessageType::DownwardsRouting, keys);
                    self.scheduler.spawn(Task::Emit(message));
                }
            }
        }
        Ok(())
    }

    fn send_rendezvous(&self) -> Result<(), NodeError> {
        let channel = self.channel.as_ref().ok_or(NodeError::ChannelUnset)?;
        debug!(%channel, "Rendezvous broadcast");
        let message = Message::new(Header(0), channel.to_rendezvous_payload());
        self.collaborators.transport.enqueue(&ChannelInfo::rendezvous(), message);
        Ok(())
    }

    /// Next Hello, carrying as many trace announcements as fit
    ///
    /// The least announced headers go first so a backlog rotates through the volley.
    fn generate_hello(&mut self) -> Message {
        let mut carried = Vec::new();
        if self.config.tracing_enabled {
            let fit = self.config.announcements_per_hello();
            let mut pending: Vec<(u32, Header)> =
                self.announcements.iter().map(|(&header, &sent)| (sent, header)).collect();
            pending.sort_unstable();
            for (_, header) in pending.into_iter().take(fit) {
                if let Some(sent) = self.announcements.get_mut(&header) {
                    *sent += 1;
                }
                carried.push(header);
            }
            let volley = self.config.tracing_volley;
            self.announcements.retain(|_, sent| *sent < volley);
        }
        self.hello
            .pack_and_increment(MessageType::Hello, encode_trace_announcements(&carried))
    }

    /// Close the link quality window and pack the report on the uplink
    fn generate_link_report(&mut self) -> Option<Message> {
        let links = self.link_quality.breakpoint_all(self.config.report_threshold);
        let uplink = self.uplink.as_mut()?;
        Some(uplink.pack_and_increment(MessageType::UpwardsRouting, encode_link_report(&links)))
    }

    async fn report_join(&mut self, identity: u64) -> Result<(), NodeError> {
        let heard = self.join_counters.remove(&identity).unwrap_or(0);
        let report = JoinReport::from_volley(heard, self.config.join_volley, identity);
        let Some(uplink) = self.uplink.as_mut() else {
            return Ok(());
        };
        info!(identity, heard, "Reporting join volley");
        let message = uplink.pack_and_increment(MessageType::UpwardsJoin, report.encode());
        self.emit(message).await
    }

    async fn invite(&mut self, assigned: u8, message: Message, attempt: u32) -> Result<(), NodeError> {
        if self.link_quality.knows(assigned) {
            debug!(assigned, "Invited node is alive");
            return Ok(());
        }
        if attempt >= self.config.max_invite_attempts {
            warn!(assigned, attempt, "Invited node never answered");
            return Ok(());
        }
        self.emit(message.clone()).await?;
        self.scheduler.schedule(
            Task::Invite {
                assigned,
                message,
                attempt: attempt + 1,
            },
            self.config.invite_response_timeout(),
        );
        Ok(())
    }

    /// Pack application data on the uplink
    pub async fn feed_data(&mut self, data: Vec<u8>) -> Result<(), NodeError> {
        if data.len() > self.config.max_payload {
            warn!(len = data.len(), max = self.config.max_payload, "Data too long, dropped");
            return Ok(());
        }
        let Some(uplink) = self.uplink.as_mut() else {
            debug!(status = %self.status, "Data dropped before joining");
            return Ok(());
        };
        let message = uplink.pack_and_increment(MessageType::Data, data);
        self.emit(message).await
    }

    // ----- inbound -----

    async fn receive(&mut self, channel: &ChannelInfo, message: Message) -> Result<(), NodeError> {
        match self.status {
            NodeStatus::Seeking if channel.is_rendezvous() => {
                let mesh = ChannelInfo::from_rendezvous_payload(&message.payload)?;
                info!(identity = self.identity(), channel = %mesh, "Mesh found");
                self.channel = Some(mesh);
                self.join()
            }
            NodeStatus::Joining => {
                self.handle_while_joining(message);
                Ok(())
            }
            NodeStatus::Node => self.handle_as_node(message).await,
            NodeStatus::Controller => self.handle_as_controller(message).await,
            _ => Ok(()),
        }
    }

    fn handle_while_joining(&mut self, message: Message) {
        if !message.is(MessageType::DownwardsJoin) || !message.has_payload() {
            return;
        }
        match Invite::decode(&message.payload) {
            Ok(invite) if invite.identity == self.identity() => self.init_node(invite.assigned, false),
            Ok(_) => {}
            Err(error) => warn!(%error, %message, "Malformed invite"),
        }
    }

    async fn handle_as_node(&mut self, message: Message) -> Result<(), NodeError> {
        match message.header.pure_type()? {
            MessageType::Hello => self.handle_hello(message),
            MessageType::Join => self.handle_join(message).await,
            MessageType::Routing => self.handle_routing(message).await,
            MessageType::Trace => self.handle_trace(message).await,
            _ => self.handle_default(message).await,
        }
    }

    async fn handle_as_controller(&mut self, message: Message) -> Result<(), NodeError> {
        match message.header.pure_type()? {
            MessageType::Hello => self.handle_hello(message),
            MessageType::Trace => self.handle_trace(message).await,
            _ if message.header.is_downwards() => Ok(()),
            _ => {
                if !message.header.is_resend() && self.cache.holds(&message) {
                    debug!(%message, "Duplicate dropped");
                    return Ok(());
                }
                self.cache.store(message.clone());
                self.dispatch(message).await
            }
        }
    }

    fn handle_hello(&mut self, message: Message) -> Result<(), NodeError> {
        let sender = message.header.node_address();
        if sender == self.address {
            warn!(address = sender, "Received own hello");
            return Ok(());
        }

        if sender == UNASSIGNED {
            let request = match JoinRequest::decode(&message.payload) {
                Ok(request) => request,
                Err(_) => {
                    warn!(%message, "Short join request");
                    return Ok(());
                }
            };
            let heard = self.join_counters.entry(request.identity).or_insert(0);
            if *heard == 0 {
                self.scheduler.schedule(
                    Task::JoinReport {
                        identity: request.identity,
                    },
                    self.config.join_report_delay(),
                );
            }
            *heard += 1;
            return Ok(());
        }

        self.link_quality.observe(&message);
        if self.config.tracing_enabled && message.has_payload() {
            let headers = decode_trace_announcements(&message.payload)?;
            self.register_tracing_headers(headers);
        }
        Ok(())
    }

    async fn handle_join(&mut self, message: Message) -> Result<(), NodeError> {
        if !message.header.is_downwards() {
            return self.handle_default(message).await;
        }
        let invite = Invite::decode(&message.payload)?;

        if message.header.node_address() == self.address {
            self.register_downlink(message.header);
            self.routing.insert(invite.assigned);
            self.routing.insert(invite.assigned | DOWNWARDS_KEY);
            self.scheduler.spawn(Task::Invite {
                assigned: invite.assigned,
                message,
                attempt: 0,
            });
            Ok(())
        } else if self.should_forward(&message) {
            self.routing.insert(invite.assigned);
            self.routing.insert(invite.assigned | DOWNWARDS_KEY);
            self.emit(message).await
        } else {
            self.handle_default(message).await
        }
    }

    async fn handle_routing(&mut self, message: Message) -> Result<(), NodeError> {
        if message.header.is_downwards() && message.header.node_address() == self.address {
            self.register_downlink(message.header);
            apply_delta(&mut self.routing, &message.payload);
            debug!(routing = ?self.routing, "Routing updated");
            Ok(())
        } else {
            self.handle_default(message).await
        }
    }

    async fn handle_trace(&mut self, message: Message) -> Result<(), NodeError> {
        if !self.config.tracing_enabled {
            return Ok(());
        }
        debug!(%message, "Trace received");

        let mut unresolved = Vec::new();
        for &counter in &message.payload {
            match self.cache.restore(message.header.tracing_header(counter)) {
                Some(restored) => self.emit(restored).await?,
                None => unresolved.push(counter),
            }
        }

        if !unresolved.is_empty() && message.header.node_address() != self.address {
            self.handle_default(Message::new(message.header, unresolved)).await?;
        }
        Ok(())
    }

    async fn handle_default(&mut self, message: Message) -> Result<(), NodeError> {
        let forward = self.should_forward(&message);
        self.cache.store(message.clone());
        if forward {
            self.emit(message).await
        } else {
            Ok(())
        }
    }

    fn should_forward(&self, message: &Message) -> bool {
        self.routing.contains(&message.header.routing_address())
            && (message.header.is_resend() || !self.cache.holds(message))
    }

    /// Account for a downward message addressed to this node
    fn register_downlink(&mut self, header: Header) {
        let Some(uplink) = self.uplink.as_mut() else {
            return;
        };
        let lost = uplink.register_and_list_losses(header);
        let address = self.address | DOWNWARDS_KEY;
        self.register_tracing_headers(lost.into_iter().map(|counter| Header::tracing(address, counter)));
    }

    /// Resend what can be restored, announce what cannot
    fn register_tracing_headers(&mut self, headers: impl IntoIterator<Item = Header>) {
        if !self.config.tracing_enabled {
            return;
        }
        for header in headers {
            if header.bits() & RESOLVED_BIT != 0 {
                // relay a resolution only for losses this node was announcing
                if self.announcements.remove(&header.without_multipurpose()).is_some() {
                    self.announcements.entry(header).or_insert(0);
                }
                continue;
            }

            let resolved = header.with_resolved();
            if self.announcements.contains_key(&resolved) {
                continue;
            }
            if let Some(restored) = self.cache.restore(header) {
                debug!(tracing = %header, "Lost message restored");
                self.announcements.remove(&header);
                self.announcements.insert(resolved, 0);
                self.scheduler.spawn(Task::Emit(restored));
            } else if header.address() != self.address {
                self.announcements.entry(header).or_insert(0);
            }
        }
    }
}
