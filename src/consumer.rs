use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::AppError;

/// Something that wants to hear about value changes on a line.
///
/// `update` carries no payload: the consumer re-reads the line itself. It may be invoked more
/// than once for a single physical transition.
pub trait Consumer: Send + Sync {
    fn update(&self);
}

impl<F> Consumer for F
where
    F: Fn() + Send + Sync,
{
    fn update(&self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConsumerId(u64);

type Subscribers = Vec<(ConsumerId, Arc<dyn Consumer>)>;

/// Maps line offsets to the consumers observing or owning them.
///
/// Inputs fan out to any number of subscribers; an output line has at most one owner.
#[derive(Default)]
pub struct ConsumerRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<FxHashMap<u32, Subscribers>>,
    owners: Mutex<FxHashMap<u32, ConsumerId>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer_id(&self) -> ConsumerId {
        ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe(&self, offset: u32, consumer: Arc<dyn Consumer>) -> ConsumerId {
        let id = self.consumer_id();
        self.subscribe_with(offset, id, consumer);
        id
    }

    pub fn subscribe_with(&self, offset: u32, id: ConsumerId, consumer: Arc<dyn Consumer>) {
        self.subscribers
            .write()
            .entry(offset)
            .or_default()
            .push((id, consumer));
    }

    pub fn unsubscribe(&self, offset: u32, id: ConsumerId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&offset) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&offset);
        }
        removed
    }

    /// Drops every subscription and output claim held by `id`.
    pub fn unsubscribe_all(&self, id: ConsumerId) {
        self.subscribers.write().retain(|_, list| {
            list.retain(|(sub, _)| *sub != id);
            !list.is_empty()
        });
        self.owners.lock().retain(|_, owner| *owner != id);
    }

    pub fn subscribers(&self, offset: u32) -> usize {
        self.subscribers
            .read()
            .get(&offset)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invokes every consumer subscribed to `offset` and returns how many were invoked.
    pub fn notify(&self, offset: u32) -> usize {
        // callbacks run outside the lock so they may (un)subscribe
        let targets: Subscribers = match self.subscribers.read().get(&offset) {
            Some(list) => list.clone(),
            None => return 0,
        };
        debug!("notifying {} consumer(s) of line {offset}", targets.len());
        for (_, consumer) in &targets {
            consumer.update();
        }
        targets.len()
    }

    pub fn claim_output(&self, offset: u32, id: ConsumerId) -> Result<(), AppError> {
        let mut owners = self.owners.lock();
        match owners.get(&offset) {
            Some(owner) if *owner != id => Err(AppError::LineInUse(offset)),
            _ => {
                owners.insert(offset, id);
                Ok(())
            }
        }
    }

    pub fn release_output(&self, offset: u32, id: ConsumerId) -> bool {
        let mut owners = self.owners.lock();
        if owners.get(&offset) == Some(&id) {
            owners.remove(&offset);
            true
        } else {
            false
        }
    }

    pub fn output_owner(&self, offset: u32) -> Option<ConsumerId> {
        self.owners.lock().get(&offset).copied()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
        self.owners.lock().clear();
    }
}
