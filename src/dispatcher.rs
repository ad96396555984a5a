//! Mutation dispatcher.
//!
//! A [`Dispatcher`] owns one observer on one root node and a registry of
//! subscriptions. Each delivered batch is processed with observation paused:
//! records in delivery order, subscriptions in registration order, callbacks
//! invoked synchronously. Observation resumes once the whole batch is done.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::config::DispatcherConfig;
use crate::error::{ReadyError, ReadyResult};
use crate::host::{Host, Observer};
use crate::mutation::{MutationRecord, Payload, Scalar};
use crate::registry::{Delivery, Entry, Registry, Subscription, SubscriptionId};
use crate::shortcut::{EventSpec, ShortcutExpander};

/// What a dispatcher watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<N> {
    /// Watch the whole document; the selector becomes the base selector and
    /// mutation targets are not filtered.
    Selector(String),
    /// Watch the subtree of this node; mutation targets must match the
    /// subscription selector.
    Node(N),
}

impl<N> From<&str> for Target<N> {
    fn from(selector: &str) -> Self {
        Self::Selector(selector.to_string())
    }
}

impl<N> From<String> for Target<N> {
    fn from(selector: String) -> Self {
        Self::Selector(selector)
    }
}

/// The value handed to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matched<N> {
    /// Element that was already in the document when the subscription was
    /// registered. There is no mutation record for it.
    Existing(N),
    /// Element from a node-list payload that passed the selector.
    Element(N),
    /// Single-valued payload, passed through without selector filtering.
    Scalar(Scalar<N>),
}

impl<N> Matched<N> {
    /// The node carried by this match, if any.
    #[must_use]
    pub const fn node(&self) -> Option<&N> {
        match self {
            Self::Existing(n) | Self::Element(n) => Some(n),
            Self::Scalar(s) => s.as_node(),
        }
    }

    /// The matched element; `None` for scalar payloads.
    #[must_use]
    pub fn into_element(self) -> Option<N> {
        match self {
            Self::Existing(n) | Self::Element(n) => Some(n),
            Self::Scalar(_) => None,
        }
    }

    /// True for elements found by the registration scan.
    #[must_use]
    pub const fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

struct State<H: Host> {
    registry: Registry<Matched<H::Node>>,
    observer: Option<H::Observer>,
    observing: bool,
    dispatch_depth: usize,
    stopped: bool,
}

struct Inner<H: Host> {
    host: H,
    root: H::Node,
    base_selector: String,
    watching_element: bool,
    config: DispatcherConfig,
    expander: ShortcutExpander,
    state: RefCell<State<H>>,
}

impl<H: Host> Inner<H> {
    /// Split a registration selector into (stored selector, full selector).
    fn resolve_selector(&self, selector: &str) -> (String, String) {
        if let Some(local) = selector.strip_prefix(self.config.local_marker) {
            return (local.to_string(), local.to_string());
        }
        let full = match (self.base_selector.is_empty(), selector.is_empty()) {
            (_, true) => self.base_selector.clone(),
            (true, false) => selector.to_string(),
            (false, false) => format!("{} {selector}", self.base_selector),
        };
        (selector.to_string(), full)
    }

    fn selector_matches(&self, node: &H::Node, selector: &str) -> bool {
        selector.is_empty() || self.host.matches(node, selector)
    }

    fn is_matching_element(&self, node: &H::Node, selector: &str) -> bool {
        self.host.is_element(node) && self.selector_matches(node, selector)
    }
}

/// Element appeared / element loaded notifications for one DOM subtree.
///
/// Handles are cheap to clone and share state. The dispatcher is single
/// threaded: callbacks run synchronously on the thread that delivers batches
/// and may freely call back into the dispatcher.
pub struct Dispatcher<H: Host> {
    inner: Rc<Inner<H>>,
}

impl<H: Host> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: Host> fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Dispatcher")
            .field("root", &self.inner.root)
            .field("base_selector", &self.inner.base_selector)
            .field("watching_element", &self.inner.watching_element)
            .field("subscriptions", &state.registry.len())
            .field("observing", &state.observing)
            .field("stopped", &state.stopped)
            .finish()
    }
}

/// Non-owning dispatcher handle, for use inside callbacks.
pub struct WeakDispatcher<H: Host> {
    inner: Weak<Inner<H>>,
}

impl<H: Host> Clone for WeakDispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<H: Host> WeakDispatcher<H> {
    /// The dispatcher, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Dispatcher<H>> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl<H: Host> Dispatcher<H> {
    /// Create a dispatcher with the default configuration and start observing.
    ///
    /// With [`Target::Selector`] the selector is the base selector and
    /// `base_selector` is ignored.
    pub fn new(
        host: H,
        target: impl Into<Target<H::Node>>,
        base_selector: Option<&str>,
    ) -> ReadyResult<Self> {
        Self::with_config(host, target, base_selector, DispatcherConfig::default())
    }

    /// Create a dispatcher and start observing.
    pub fn with_config(
        host: H,
        target: impl Into<Target<H::Node>>,
        base_selector: Option<&str>,
        config: DispatcherConfig,
    ) -> ReadyResult<Self> {
        let (root, base_selector, watching_element) = match target.into() {
            Target::Selector(selector) => {
                if let Some(ignored) = base_selector {
                    debug!(ignored, "base selector ignored when watching by selector");
                }
                (host.document(), selector, false)
            }
            Target::Node(node) => {
                if node != host.document() && !host.is_element(&node) {
                    return Err(ReadyError::invalid_target(format!(
                        "{node:?} is neither an element nor the document"
                    )));
                }
                (node, base_selector.unwrap_or_default().to_string(), true)
            }
        };

        if !base_selector.is_empty() {
            host.validate_selector(&base_selector)?;
        }

        let expander = config.expander();
        let inner = Rc::new_cyclic(|weak: &Weak<Inner<H>>| {
            let weak = Weak::clone(weak);
            let observer = host.create_observer(Box::new(move |records: Vec<MutationRecord<H::Node>>| {
                if let Some(inner) = weak.upgrade() {
                    Dispatcher { inner }.dispatch(records);
                }
            }));
            Inner {
                host,
                root,
                base_selector,
                watching_element,
                config,
                expander,
                state: RefCell::new(State {
                    registry: Registry::default(),
                    observer: Some(observer),
                    observing: false,
                    dispatch_depth: 0,
                    stopped: false,
                }),
            }
        });

        let dispatcher = Self { inner };
        debug!(
            root = ?dispatcher.inner.root,
            base_selector = %dispatcher.inner.base_selector,
            watching_element = dispatcher.inner.watching_element,
            "dispatcher created"
        );
        dispatcher.start();
        Ok(dispatcher)
    }

    /// Register `callback` for `event` on elements matching `selector`.
    ///
    /// A selector starting with the local marker is used as-is; any other
    /// selector is appended to the base selector. When the expanded kinds
    /// include those of the `ready` shortcut, elements already in the document
    /// are reported right away as [`Matched::Existing`].
    pub fn on<F>(&self, event: impl Into<EventSpec>, selector: &str, callback: F) -> ReadyResult<SubscriptionId>
    where
        F: FnMut(Matched<H::Node>, &Subscription) + 'static,
    {
        self.register(
            event.into(),
            selector,
            Delivery::Immediate,
            Box::new(callback),
            Rc::new(Cell::new(true)),
        )
    }

    /// [`on`](Self::on) without a selector of its own.
    pub fn on_any<F>(&self, event: impl Into<EventSpec>, callback: F) -> ReadyResult<SubscriptionId>
    where
        F: FnMut(Matched<H::Node>, &Subscription) + 'static,
    {
        self.on(event, "", callback)
    }

    /// Register `callback` to run when matched elements finish loading.
    ///
    /// Every element the subscription matches gets a load listener; earlier
    /// listeners on the element keep running first. Scalar payloads and
    /// elements that cannot load are ignored.
    pub fn on_load<F>(&self, event: impl Into<EventSpec>, selector: &str, callback: F) -> ReadyResult<SubscriptionId>
    where
        F: FnMut(H::Node, &Subscription) + 'static,
    {
        let callback = Rc::new(RefCell::new(callback));
        let live = Rc::new(Cell::new(true));
        let host = self.inner.host.clone();
        let listener_live = Rc::clone(&live);
        let install = move |matched: Matched<H::Node>, subscription: &Subscription| {
            let Some(node) = matched.into_element() else {
                return;
            };
            // Listeners outlive the subscription; they hold only a weak callback
            // and go quiet once it is removed.
            let callback = Rc::downgrade(&callback);
            let live = Rc::clone(&listener_live);
            let subscription = subscription.clone();
            let loaded = node.clone();
            let installed = host.listen_load(
                &node,
                Box::new(move || {
                    if !live.get() {
                        return;
                    }
                    let Some(callback) = callback.upgrade() else {
                        return;
                    };
                    let Ok(mut running) = callback.try_borrow_mut() else {
                        warn!(id = %subscription.id, "load callback re-entered while running; skipped");
                        return;
                    };
                    let running = &mut *running;
                    running(loaded.clone(), &subscription);
                }),
            );
            if !installed {
                trace!(node = ?node, "element cannot report loading");
            }
        };
        self.register(event.into(), selector, Delivery::OnLoad, Box::new(install), live)
    }

    /// [`on_load`](Self::on_load) without a selector of its own.
    pub fn on_load_any<F>(&self, event: impl Into<EventSpec>, callback: F) -> ReadyResult<SubscriptionId>
    where
        F: FnMut(H::Node, &Subscription) + 'static,
    {
        self.on_load(event, "", callback)
    }

    /// Remove a subscription. Returns false for unknown ids.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            if state.stopped {
                return false;
            }
            let removed = state.registry.remove(id);
            if removed && state.dispatch_depth == 0 {
                state.registry.compact();
            }
            removed
        };
        if removed {
            debug!(%id, "subscription removed");
        }
        removed
    }

    /// (Re)start observing the root.
    pub fn start(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.stopped {
            warn!("start() called on a stopped dispatcher");
            return;
        }
        if let Some(observer) = &state.observer {
            observer.observe(&self.inner.root, &self.inner.config.observe);
        }
        state.observing = true;
    }

    /// Stop observing; subscriptions are kept.
    pub fn pause(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.stopped {
            warn!("pause() called on a stopped dispatcher");
            return;
        }
        if let Some(observer) = &state.observer {
            observer.disconnect();
        }
        state.observing = false;
    }

    /// Stop observing and release every subscription. Terminal.
    pub fn stop(&self) {
        let (observer, registry) = {
            let mut state = self.inner.state.borrow_mut();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.observing = false;
            let mut registry = std::mem::take(&mut state.registry);
            registry.clear();
            (state.observer.take(), registry)
        };
        if let Some(observer) = observer {
            observer.disconnect();
        }
        // Callbacks may own dispatcher handles; release them outside the borrow.
        drop(registry);
        debug!("dispatcher stopped");
    }

    /// A handle that does not keep the dispatcher alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakDispatcher<H> {
        WeakDispatcher {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether the observer is currently connected.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        self.inner.state.borrow().observing
    }

    /// True once [`stop`](Self::stop) has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.state.borrow().stopped
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().registry.len()
    }

    /// True when no subscription is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live subscriptions, in registration order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.borrow().registry.subscriptions()
    }

    /// Selector prepended to every non-local subscription selector.
    #[must_use]
    pub fn base_selector(&self) -> &str {
        &self.inner.base_selector
    }

    /// The observed node.
    #[must_use]
    pub fn root(&self) -> &H::Node {
        &self.inner.root
    }

    /// Whether mutation targets are filtered by the subscription selector.
    #[must_use]
    pub fn is_watching_element(&self) -> bool {
        self.inner.watching_element
    }

    /// The host this dispatcher runs in.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    fn register(
        &self,
        event: EventSpec,
        selector: &str,
        delivery: Delivery,
        callback: Box<dyn FnMut(Matched<H::Node>, &Subscription)>,
        active: Rc<Cell<bool>>,
    ) -> ReadyResult<SubscriptionId> {
        if self.is_stopped() {
            return Err(ReadyError::Stopped);
        }

        let (selector, full_selector) = self.inner.resolve_selector(selector);
        if !full_selector.is_empty() {
            self.inner.host.validate_selector(&full_selector)?;
        }

        let kinds = self.inner.expander.expand(event.names());
        let subscription = Subscription {
            id: SubscriptionId::new(),
            event,
            kinds,
            selector,
            full_selector,
            delivery,
            created_at: Utc::now(),
        };
        let entry = Entry::with_active(subscription, callback, active);
        let id = entry.subscription.id;
        self.inner.state.borrow_mut().registry.push(entry.clone());

        debug!(
            %id,
            event = %entry.subscription.event,
            kinds = ?entry.subscription.kinds,
            full_selector = %entry.subscription.full_selector,
            "subscription registered"
        );

        if self.inner.expander.includes_ready(&entry.subscription.kinds) {
            self.scan_existing(&entry);
        }

        Ok(id)
    }

    /// Report elements already in the document to a new subscription.
    fn scan_existing(&self, entry: &Entry<Matched<H::Node>>) {
        let subscription = &entry.subscription;
        let selector = if subscription.full_selector.is_empty() {
            "*"
        } else {
            subscription.full_selector.as_str()
        };
        let existing = self.inner.host.query_selector_all(selector);
        trace!(id = %subscription.id, matches = existing.len(), "scanning existing elements");

        for node in existing {
            if !entry.is_active() {
                break;
            }
            invoke(entry, Matched::Existing(node));
        }
    }

    fn dispatch(&self, records: Vec<MutationRecord<H::Node>>) {
        if self.is_stopped() {
            return;
        }

        self.pause();
        let pass = DispatchPass::enter(&self.inner);
        trace!(records = records.len(), "dispatching mutation batch");

        for record in &records {
            // Subscriptions added by callbacks join at the next record.
            let slot_count = self.inner.state.borrow().registry.slot_count();
            for index in 0..slot_count {
                let Some(entry) = self.inner.state.borrow().registry.get(index) else {
                    continue;
                };
                self.dispatch_record(record, &entry);
            }
        }

        // A panicking callback unwinds past this point and leaves observation paused.
        drop(pass);
        if !self.is_stopped() {
            self.start();
        }
    }

    fn dispatch_record(&self, record: &MutationRecord<H::Node>, entry: &Entry<Matched<H::Node>>) {
        let subscription = &entry.subscription;
        let kinds: Vec<_> = record
            .kinds()
            .into_iter()
            .filter(|kind| subscription.kinds.iter().any(|k| k == kind.as_str()))
            .collect();

        for kind in kinds {
            if self.inner.watching_element
                && !self.inner.selector_matches(&record.target, &subscription.full_selector)
            {
                continue;
            }

            match record.payload(kind) {
                Some(Payload::Nodes(nodes)) => {
                    for node in nodes {
                        if !entry.is_active() {
                            return;
                        }
                        if self.inner.is_matching_element(node, &subscription.full_selector) {
                            invoke(entry, Matched::Element(node.clone()));
                        }
                    }
                }
                Some(Payload::Scalar(value)) => {
                    if !entry.is_active() {
                        return;
                    }
                    invoke(entry, Matched::Scalar(value));
                }
                None => {}
            }
        }
    }
}

/// Tracks nesting of dispatch passes; compacts the registry when the
/// outermost pass ends, including by unwinding.
struct DispatchPass<'a, H: Host> {
    inner: &'a Inner<H>,
}

impl<'a, H: Host> DispatchPass<'a, H> {
    fn enter(inner: &'a Inner<H>) -> Self {
        inner.state.borrow_mut().dispatch_depth += 1;
        Self { inner }
    }
}

impl<H: Host> Drop for DispatchPass<'_, H> {
    fn drop(&mut self) {
        let Ok(mut state) = self.inner.state.try_borrow_mut() else {
            return;
        };
        state.dispatch_depth = state.dispatch_depth.saturating_sub(1);
        if state.dispatch_depth == 0 {
            state.registry.compact();
        }
    }
}

fn invoke<N>(entry: &Entry<Matched<N>>, matched: Matched<N>) {
    match entry.callback.try_borrow_mut() {
        Ok(mut callback) => {
            let callback = &mut *callback;
            callback(matched, entry.subscription.as_ref());
        }
        Err(_) => warn!(id = %entry.subscription.id, "callback re-entered while running; skipped"),
    }
}
