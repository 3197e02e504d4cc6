//! Publish/subscribe channel between the ingestion side, control surfaces and
//! every per-monitor controller.
//!
//! Publishing goes through [`Publisher`], which may live on any thread and
//! only enqueues. Subscriber callbacks run exclusively on the thread that owns
//! the [`EventBus`] when it calls [`EventBus::dispatch_pending`].

use crate::model::{DanmakuId, DanmakuRecord};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum DanmakuEvent {
    Spawn(Arc<DanmakuRecord>),
    Recall(DanmakuId),
}

impl DanmakuEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DanmakuEvent::Spawn(_) => EventKind::Spawn,
            DanmakuEvent::Recall(_) => EventKind::Recall,
        }
    }

    pub fn id(&self) -> DanmakuId {
        match self {
            DanmakuEvent::Spawn(record) => record.id(),
            DanmakuEvent::Recall(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Spawn,
    Recall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Thread-safe handle for putting events on the bus.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: Sender<DanmakuEvent>,
}

impl Publisher {
    /// Returns `false` once the owning bus has been dropped.
    pub fn publish(&self, event: DanmakuEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn spawn(&self, record: DanmakuRecord) -> bool {
        self.publish(DanmakuEvent::Spawn(Arc::new(record)))
    }

    pub fn recall(&self, id: DanmakuId) -> bool {
        self.publish(DanmakuEvent::Recall(id))
    }
}

/// Per-callback context handed to a subscriber while it runs.
pub struct Delivery<'a> {
    current: SubscriptionId,
    tx: &'a Sender<DanmakuEvent>,
    removed: Vec<SubscriptionId>,
}

impl Delivery<'_> {
    pub fn subscription(&self) -> SubscriptionId {
        self.current
    }

    pub fn unsubscribe_self(&mut self) {
        self.removed.push(self.current);
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.removed.push(id);
    }

    /// Queues behind everything already pending; never delivered inline.
    pub fn publish(&self, event: DanmakuEvent) {
        let _ = self.tx.send(event);
    }
}

pub type Handler = Box<dyn FnMut(&DanmakuEvent, &mut Delivery<'_>)>;

struct Slot {
    id: SubscriptionId,
    kind: EventKind,
    handler: Option<Handler>,
}

pub struct EventBus {
    tx: Sender<DanmakuEvent>,
    rx: Receiver<DanmakuEvent>,
    slots: Vec<Slot>,
    next_subscription: u64,
    closed: bool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            slots: Vec::new(),
            next_subscription: 1,
            closed: false,
        }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher {
            tx: self.tx.clone(),
        }
    }

    pub fn publish(&self, event: DanmakuEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&DanmakuEvent, &mut Delivery<'_>) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        if self.closed {
            tracing::debug!(?kind, "subscribe on closed bus ignored");
            return id;
        }
        self.slots.push(Slot {
            id,
            kind,
            handler: Some(Box::new(handler)),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        before != self.slots.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drains the queue, delivering each event to the subscribers registered
    /// for its kind. Events published by handlers are picked up in the same
    /// call, after the event that produced them. Returns the number of events
    /// delivered.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.closed {
                        continue;
                    }
                    self.dispatch_one(&event);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }

    fn dispatch_one(&mut self, event: &DanmakuEvent) {
        let kind = event.kind();
        let snapshot: Vec<SubscriptionId> = self
            .slots
            .iter()
            .filter(|slot| slot.kind == kind)
            .map(|slot| slot.id)
            .collect();
        tracing::trace!(?kind, id = %event.id(), subscribers = snapshot.len(), "dispatching");

        for id in snapshot {
            // Removed earlier in this pass.
            let Some(index) = self.slots.iter().position(|slot| slot.id == id) else {
                continue;
            };
            let Some(mut handler) = self.slots[index].handler.take() else {
                continue;
            };

            let mut delivery = Delivery {
                current: id,
                tx: &self.tx,
                removed: Vec::new(),
            };
            handler(event, &mut delivery);
            let removed = delivery.removed;

            if removed.contains(&id) {
                drop(handler);
            } else if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
                slot.handler = Some(handler);
            }
            if !removed.is_empty() {
                self.slots.retain(|slot| !removed.contains(&slot.id));
            }
        }
    }

    /// Drops every subscriber and discards anything still queued. Later
    /// publishes are accepted but never delivered.
    pub fn shutdown(&mut self) {
        self.closed = true;
        self.slots.clear();
        while self.rx.try_recv().is_ok() {}
        tracing::debug!("event bus shut down");
    }
}
