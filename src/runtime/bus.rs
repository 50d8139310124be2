//! Routes messages to actor inboxes.
//!
//! One bounded channel per actor. A sender pushes its messages in outbox
//! order onto the receiver's channel, so messages between any pair of actors
//! arrive in the order they were sent.

use crate::actor::{ActorId, ActorMsg};
use crate::error::{ActorFlowError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Clone)]
pub struct MessageBus {
    inboxes: Vec<Sender<ActorMsg>>,
}

impl MessageBus {
    /// Create a bus with `actors` inboxes of `capacity` each. Returns the
    /// receiving ends in actor id order.
    pub fn new(actors: usize, capacity: usize) -> (Self, Vec<Receiver<ActorMsg>>) {
        let (inboxes, receivers): (Vec<Sender<ActorMsg>>, Vec<Receiver<ActorMsg>>) =
            (0..actors).map(|_| bounded(capacity)).unzip();
        (Self { inboxes }, receivers)
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    /// Blocks while the destination inbox is full.
    pub fn send(&self, msg: ActorMsg) -> Result<()> {
        let dst = msg.dst();
        let inbox = self
            .inboxes
            .get(dst.index())
            .ok_or_else(|| ActorFlowError::Channel(format!("no inbox for {dst}")))?;
        inbox
            .send(msg)
            .map_err(|_| ActorFlowError::Channel(format!("inbox of {dst} is closed")))
    }

    /// Send without blocking. Returns whether the message was queued.
    pub fn try_send(&self, msg: ActorMsg) -> bool {
        self.inboxes
            .get(msg.dst().index())
            .is_some_and(|inbox| inbox.try_send(msg).is_ok())
    }

    /// Send every message, in order. Stops at the first failure.
    pub fn dispatch(&self, msgs: Vec<ActorMsg>) -> Result<()> {
        for msg in msgs {
            self.send(msg)?;
        }
        Ok(())
    }

    /// Messages currently waiting for `actor`.
    pub fn queued(&self, actor: ActorId) -> usize {
        self.inboxes.get(actor.index()).map_or(0, Sender::len)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("inboxes", &self.inboxes.len())
            .finish()
    }
}
