use tokio::sync::mpsc::UnboundedSender;

use crate::core::handle::RevisionHandle;

/// What a subscriber did with an offered handle.
#[derive(Debug)]
pub enum Acceptance {
    /// Ownership taken; the subscriber now releases the handle.
    Taken,
    /// Not interested; ownership comes back to the emitter.
    Declined(RevisionHandle),
}

pub trait Subscriber: Send + Sync {
    fn accept(&self, handle: RevisionHandle) -> Acceptance;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// Index of the subscriber (in registration order) that took the handle.
    Delivered { subscriber: usize },
    /// Nobody took it. The emitter already released it.
    Unclaimed,
}

/// Offers each published handle to the registered subscribers, first taker wins.
#[derive(Default)]
pub struct ResourceEmitter {
    subscribers: Vec<Box<dyn Subscriber>>,
}

impl ResourceEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&self, handle: RevisionHandle) -> Publication {
        let mut handle = handle;
        for (i, subscriber) in self.subscribers.iter().enumerate() {
            match subscriber.accept(handle) {
                Acceptance::Taken => return Publication::Delivered { subscriber: i },
                Acceptance::Declined(back) => handle = back,
            }
        }

        if let Err(e) = handle.release() {
            tracing::warn!(revision = %handle.revision(), "failed to release unclaimed handle: {e}");
        }
        Publication::Unclaimed
    }
}

/// Hands handles over to whatever sits on the other end of a channel.
pub struct ChannelSubscriber {
    tx: UnboundedSender<RevisionHandle>,
}

impl ChannelSubscriber {
    pub fn new(tx: UnboundedSender<RevisionHandle>) -> Self {
        Self { tx }
    }
}

impl Subscriber for ChannelSubscriber {
    fn accept(&self, handle: RevisionHandle) -> Acceptance {
        // the receiver is gone, give the handle back
        match self.tx.send(handle) {
            Ok(()) => Acceptance::Taken,
            Err(e) => Acceptance::Declined(e.0),
        }
    }
}
