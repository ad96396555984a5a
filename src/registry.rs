//! Subscription registry.
//!
//! Subscriptions are kept in registration order. Removal during a dispatch pass
//! only tombstones the slot so indices held by the running pass stay valid; the
//! dispatcher compacts once the pass is over.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shortcut::EventSpec;

/// Opaque identifier returned by a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How matches of a subscription are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The callback runs for every match.
    Immediate,
    /// The callback runs when a matched element finishes loading.
    OnLoad,
}

/// A registered interest in mutations.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Kind spec as given at registration.
    pub event: EventSpec,
    /// Primitive kinds after shortcut expansion.
    pub kinds: Vec<String>,
    /// Selector as given, with a leading local marker stripped.
    pub selector: String,
    /// Selector actually matched against nodes.
    pub full_selector: String,
    pub delivery: Delivery,
    pub created_at: DateTime<Utc>,
}

/// Callback shape stored in the registry.
pub(crate) type SharedCallback<M> = Rc<RefCell<Box<dyn FnMut(M, &Subscription)>>>;

pub(crate) struct Entry<M> {
    pub(crate) subscription: Rc<Subscription>,
    pub(crate) callback: SharedCallback<M>,
    active: Rc<Cell<bool>>,
}

impl<M> Entry<M> {
    /// Builds an entry around a caller-held flag, so work the callback
    /// hands out elsewhere can see when the subscription goes away.
    pub(crate) fn with_active(
        subscription: Subscription,
        callback: Box<dyn FnMut(M, &Subscription)>,
        active: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            subscription: Rc::new(subscription),
            callback: Rc::new(RefCell::new(callback)),
            active,
        }
    }

    /// False once the subscription has been removed.
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }
}

impl<M> Clone for Entry<M> {
    fn clone(&self) -> Self {
        Self {
            subscription: Rc::clone(&self.subscription),
            callback: Rc::clone(&self.callback),
            active: Rc::clone(&self.active),
        }
    }
}

pub(crate) struct Registry<M> {
    slots: Vec<Option<Entry<M>>>,
    live: usize,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }
}

impl<M> Registry<M> {
    pub(crate) fn push(&mut self, entry: Entry<M>) {
        self.slots.push(Some(entry));
        self.live += 1;
    }

    /// Tombstone the slot holding `id`.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let found = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|e| e.subscription.id == id));
        match found {
            Some(slot) => {
                if let Some(entry) = slot.take() {
                    entry.active.set(false);
                }
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    /// Entry at `index`, if that slot is live.
    pub(crate) fn get(&self, index: usize) -> Option<Entry<M>> {
        self.slots.get(index).and_then(|slot| slot.clone())
    }

    /// Number of slots, tombstones included.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn compact(&mut self) {
        self.slots.retain(Option::is_some);
    }

    pub(crate) fn clear(&mut self) {
        for entry in self.slots.iter().flatten() {
            entry.active.set(false);
        }
        self.slots.clear();
        self.live = 0;
    }

    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.slots
            .iter()
            .flatten()
            .map(|e| (*e.subscription).clone())
            .collect()
    }
}
