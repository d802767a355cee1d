//! Deferred and periodic node work
//!
//! All waiting in the protocol (join timeouts, invite retries, periodic
//! broadcasts) is expressed as tasks that are posted back into the node's own
//! mailbox once due. Nothing ever blocks inside a handler.
//!
//! Every posted task carries the scheduling epoch. Cancelling bumps the epoch,
//! so tasks already sitting in the mailbox are recognised as stale and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use lmesh_core::Message;

use crate::node::NodeEvent;

/// Work a node schedules for itself
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Query controller reachability and pick the initial role
    Wake,
    StatusCheck,
    Hello,
    Rendezvous,
    LinkReport,
    /// No invite arrived within the join timeout
    JoinTimeout,
    /// Report the join volley heard from `identity`
    JoinReport { identity: u64 },
    /// Resend an invite until the new node is heard
    Invite { assigned: u8, message: Message, attempt: u32 },
    /// Dispatch a message through the emit pipeline
    Emit(Message),
}

/// Posts tasks into a node mailbox, now, later or periodically
pub struct Scheduler {
    mailbox: mpsc::UnboundedSender<NodeEvent>,
    epoch: Arc<AtomicU64>,
    handles: Vec<AbortHandle>,
}

impl Scheduler {
    pub fn new(mailbox: mpsc::UnboundedSender<NodeEvent>, epoch: Arc<AtomicU64>) -> Self {
        Self {
            mailbox,
            epoch,
            handles: Vec::new(),
        }
    }

    /// Current scheduling epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether a task posted in `epoch` is still wanted
    pub fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch()
    }

    /// Post a task for immediate handling
    pub fn spawn(&self, task: Task) {
        let event = NodeEvent::Task {
            epoch: self.epoch(),
            task,
        };
        // a closed mailbox means the node is gone
        let _ = self.mailbox.send(event);
    }

    /// Post a task once `delay` has elapsed
    pub fn schedule(&mut self, task: Task, delay: Duration) {
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(NodeEvent::Task { epoch, task });
        });
        self.track(handle.abort_handle());
    }

    /// Post a task every `period`, first after `delay`
    pub fn schedule_periodic(&mut self, task: Task, period: Duration, delay: Duration) {
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch();
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let event = NodeEvent::Task {
                    epoch,
                    task: task.clone(),
                };
                if mailbox.send(event).is_err() {
                    break;
                }
            }
        });
        self.track(handle.abort_handle());
    }

    /// Cancel every scheduled task and invalidate the ones already posted
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Scheduled tasks that have not fired or finished yet
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    fn track(&mut self, handle: AbortHandle) {
        self.handles.retain(|handle| !handle.is_finished());
        self.handles.push(handle);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
