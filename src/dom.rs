//! In-memory DOM host.
//!
//! [`MemoryDom`] keeps an HTML tree parsed by `scraper` and emulates the
//! subtree mutation observer: every mutation queues a record on each connected
//! observer whose root covers the mutated node, and [`MemoryDom::flush`]
//! delivers the queued records as one batch per observer. Disconnecting an
//! observer drops its queued records, so changes made while a dispatcher is
//! paused are never delivered to it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ego_tree::{NodeId, NodeRef, Tree};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{trace, warn};

use crate::config::ObserveOptions;
use crate::error::{ReadyError, ReadyResult};
use crate::host::{BatchCallback, Host, LoadHandler, Observer};
use crate::mutation::{MutationRecord, RecordType};

/// Upper bound on delivery rounds in one [`MemoryDom::flush`].
pub const MAX_FLUSH_ROUNDS: usize = 64;

type SharedBatchCallback = Rc<RefCell<BatchCallback<NodeId>>>;
type SharedLoadHandler = Rc<RefCell<LoadHandler>>;

struct ObserverSlot {
    callback: SharedBatchCallback,
    target: Option<(NodeId, ObserveOptions)>,
    pending: Vec<MutationRecord<NodeId>>,
}

impl ObserverSlot {
    /// Whether a change of `record_type` on `node` is reported to this observer.
    fn covers(&self, tree: &Tree<Node>, node: NodeId, record_type: RecordType) -> bool {
        let Some((root, options)) = &self.target else {
            return false;
        };
        let wanted = match record_type {
            RecordType::ChildList => options.child_list,
            RecordType::Attributes => options.attributes,
            RecordType::CharacterData => options.character_data,
        };
        if !wanted {
            return false;
        }
        if node == *root {
            return true;
        }
        options.subtree
            && tree
                .get(node)
                .is_some_and(|n| n.ancestors().any(|a| a.id() == *root))
    }
}

struct DomState {
    html: Html,
    selectors: HashMap<String, Selector>,
    observers: Vec<Option<ObserverSlot>>,
    load_listeners: HashMap<NodeId, Vec<SharedLoadHandler>>,
}

impl DomState {
    fn node(&self, id: NodeId) -> ReadyResult<NodeRef<'_, Node>> {
        self.html
            .tree
            .get(id)
            .ok_or_else(|| ReadyError::UnknownNode { node: format!("{id:?}") })
    }

    /// The node, provided it is still reachable from the document.
    fn attached(&self, id: NodeId) -> ReadyResult<NodeRef<'_, Node>> {
        let node = self.node(id)?;
        let root = self.html.tree.root().id();
        if node.id() == root || node.ancestors().any(|a| a.id() == root) {
            Ok(node)
        } else {
            Err(ReadyError::UnknownNode {
                node: format!("{id:?} (detached)"),
            })
        }
    }

    fn compile(&mut self, selector: &str) -> ReadyResult<Selector> {
        if let Some(compiled) = self.selectors.get(selector) {
            return Ok(compiled.clone());
        }
        let compiled = Selector::parse(selector)
            .map_err(|e| ReadyError::invalid_selector(selector, e.to_string()))?;
        self.selectors.insert(selector.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Take the load listeners of `id` and everything below it.
    ///
    /// Detached nodes never load, so their listeners are released. Callers drop
    /// the returned handlers after releasing the state borrow.
    fn take_listeners(&mut self, id: NodeId) -> Vec<SharedLoadHandler> {
        if self.load_listeners.is_empty() {
            return Vec::new();
        }
        let Some(node) = self.html.tree.get(id) else {
            return Vec::new();
        };
        let subtree: Vec<NodeId> = node.descendants().map(|n| n.id()).collect();
        subtree
            .iter()
            .filter_map(|id| self.load_listeners.remove(id))
            .flatten()
            .collect()
    }

    /// Queue a record on every observer covering `node`.
    ///
    /// `build` receives the observer's options so old values are only recorded
    /// where they were asked for.
    fn queue<F>(&mut self, node: NodeId, record_type: RecordType, build: F)
    where
        F: Fn(&ObserveOptions) -> MutationRecord<NodeId>,
    {
        let tree = &self.html.tree;
        for slot in self.observers.iter_mut().flatten() {
            if !slot.covers(tree, node, record_type) {
                continue;
            }
            if let Some((_, options)) = &slot.target {
                let record = build(options);
                slot.pending.push(record);
            }
        }
    }
}

/// Copy `source` and its descendants under `parent`.
fn graft(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) -> Option<NodeId> {
    let id = tree.get_mut(parent)?.append(source.value().clone()).id();
    for child in source.children() {
        graft(tree, id, child);
    }
    Some(id)
}

/// In-memory document implementing [`Host`].
///
/// Node handles are `ego_tree` ids into the document tree. Handles are cheap
/// to clone and share one document.
#[derive(Clone)]
pub struct MemoryDom {
    state: Rc<RefCell<DomState>>,
}

impl fmt::Debug for MemoryDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MemoryDom")
            .field("nodes", &state.html.tree.nodes().count())
            .field("observers", &state.observers.iter().flatten().count())
            .finish()
    }
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::parse("")
    }
}

impl MemoryDom {
    /// Parse a full HTML document.
    #[must_use]
    pub fn parse(html: &str) -> Self {
        Self {
            state: Rc::new(RefCell::new(DomState {
                html: Html::parse_document(html),
                selectors: HashMap::new(),
                observers: Vec::new(),
                load_listeners: HashMap::new(),
            })),
        }
    }

    /// The document node.
    #[must_use]
    pub fn document(&self) -> NodeId {
        self.state.borrow().html.tree.root().id()
    }

    /// First element matching `selector`, in document order.
    pub fn query_selector(&self, selector: &str) -> ReadyResult<Option<NodeId>> {
        let compiled = self.state.borrow_mut().compile(selector)?;
        let state = self.state.borrow();
        let found = state
            .html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| compiled.matches(el))
            .map(|el| el.id());
        Ok(found)
    }

    /// Every element matching `selector`, in document order. An unparsable
    /// selector matches nothing.
    #[must_use]
    pub fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        let Ok(compiled) = self.state.borrow_mut().compile(selector) else {
            return Vec::new();
        };
        let state = self.state.borrow();
        state
            .html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| compiled.matches(el))
            .map(|el| el.id())
            .collect()
    }

    /// Parse `html` as a fragment and append its top-level nodes to `parent`.
    ///
    /// Queues one child list record on `parent` and returns the new top-level
    /// nodes.
    pub fn append_html(&self, parent: NodeId, html: &str) -> ReadyResult<Vec<NodeId>> {
        let fragment = Html::parse_fragment(html);
        let mut state = self.state.borrow_mut();
        let previous_sibling = state.attached(parent)?.last_child().map(|n| n.id());

        // The fragment parser wraps content in an <html> element.
        let source = fragment
            .tree
            .root()
            .children()
            .find(|n| n.value().is_element())
            .ok_or_else(|| ReadyError::invalid_target("fragment has no root element"))?;

        let mut added = Vec::new();
        for child in source.children() {
            if let Some(id) = graft(&mut state.html.tree, parent, child) {
                added.push(id);
            }
        }
        if added.is_empty() {
            return Ok(added);
        }

        trace!(parent = ?parent, added = added.len(), "nodes appended");
        state.queue(parent, RecordType::ChildList, |_| {
            MutationRecord::child_list(parent, added.clone(), Vec::new(), previous_sibling, None)
        });
        Ok(added)
    }

    /// Detach `node` from its parent.
    pub fn remove(&self, node: NodeId) -> ReadyResult<()> {
        let mut state = self.state.borrow_mut();
        let (parent, previous_sibling, next_sibling) = {
            let current = state.attached(node)?;
            let parent = current.parent().ok_or_else(|| ReadyError::UnknownNode {
                node: format!("{node:?} (document cannot be removed)"),
            })?;
            (
                parent.id(),
                current.prev_sibling().map(|n| n.id()),
                current.next_sibling().map(|n| n.id()),
            )
        };

        // Queue before detaching so observers below the parent still cover it.
        state.queue(parent, RecordType::ChildList, |_| {
            MutationRecord::child_list(parent, Vec::new(), vec![node], previous_sibling, next_sibling)
        });
        let released = state.take_listeners(node);
        if let Some(mut current) = state.html.tree.get_mut(node) {
            current.detach();
        }
        drop(state);
        drop(released);
        Ok(())
    }

    /// Set an attribute on an element, replacing any previous value.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> ReadyResult<()> {
        let mut state = self.state.borrow_mut();
        let element = state
            .attached(node)?
            .value()
            .as_element()
            .cloned()
            .ok_or_else(|| ReadyError::UnknownNode {
                node: format!("{node:?} (not an element)"),
            })?;

        let old_value = element.attr(name).map(str::to_string);
        let mut replaced = false;
        let mut attributes: Vec<Attribute> = element
            .attrs
            .iter()
            .map(|(qual, current)| {
                if &*qual.local == name {
                    replaced = true;
                    Attribute {
                        name: qual.clone(),
                        value: value.into(),
                    }
                } else {
                    Attribute {
                        name: qual.clone(),
                        value: current.clone(),
                    }
                }
            })
            .collect();
        if !replaced {
            attributes.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                value: value.into(),
            });
        }

        // Rebuild so the element's cached id and classes are recomputed.
        let rebuilt = Element::new(element.name.clone(), attributes);
        if let Some(mut current) = state.html.tree.get_mut(node) {
            *current.value() = Node::Element(rebuilt);
        }

        state.queue(node, RecordType::Attributes, |options| {
            let old = if options.attribute_old_value {
                old_value.clone()
            } else {
                None
            };
            MutationRecord::attributes(node, name, old)
        });
        Ok(())
    }

    /// Replace the text of a text node, or the children of an element with a
    /// single text node.
    pub fn set_text(&self, node: NodeId, text: &str) -> ReadyResult<()> {
        let mut state = self.state.borrow_mut();
        let current = state.attached(node)?;

        if let Some(old) = current.value().as_text() {
            let old = String::from(&**old);
            if let Some(mut current) = state.html.tree.get_mut(node) {
                *current.value() = Node::Text(Text { text: text.into() });
            }
            state.queue(node, RecordType::CharacterData, |options| {
                let old = if options.character_data_old_value {
                    Some(old.clone())
                } else {
                    None
                };
                MutationRecord::character_data(node, old)
            });
            return Ok(());
        }

        if !current.value().is_element() {
            return Err(ReadyError::UnknownNode {
                node: format!("{node:?} (neither text nor element)"),
            });
        }
        let removed: Vec<NodeId> = current.children().map(|n| n.id()).collect();
        let added = {
            let Some(mut element) = state.html.tree.get_mut(node) else {
                return Ok(());
            };
            element.append(Node::Text(Text { text: text.into() })).id()
        };
        let mut released = Vec::new();
        for child in &removed {
            released.extend(state.take_listeners(*child));
            if let Some(mut child) = state.html.tree.get_mut(*child) {
                child.detach();
            }
        }

        state.queue(node, RecordType::ChildList, |_| {
            MutationRecord::child_list(node, vec![added], removed.clone(), None, None)
        });
        drop(state);
        drop(released);
        Ok(())
    }

    /// Run the load listeners of `node` in installation order.
    ///
    /// Returns how many listeners ran.
    pub fn fire_load(&self, node: NodeId) -> usize {
        let listeners = self
            .state
            .borrow()
            .load_listeners
            .get(&node)
            .cloned()
            .unwrap_or_default();

        let mut fired = 0;
        for listener in listeners {
            match listener.try_borrow_mut() {
                Ok(mut handler) => {
                    let handler = &mut *handler;
                    handler();
                    fired += 1;
                }
                Err(_) => warn!(node = ?node, "load listener re-entered while running; skipped"),
            }
        }
        fired
    }

    /// Deliver queued records, one batch per observer.
    ///
    /// Records queued by callbacks are delivered in further rounds, up to
    /// [`MAX_FLUSH_ROUNDS`]. Returns the number of records delivered.
    ///
    /// Records still queued after the last round stay queued: [`pending`]
    /// reports them and the next `flush` delivers them.
    ///
    /// [`pending`]: Self::pending
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_FLUSH_ROUNDS {
            let slots = self.state.borrow().observers.len();
            let mut progressed = false;
            for slot in 0..slots {
                let Some((callback, records)) = self.take_batch(slot) else {
                    continue;
                };
                progressed = true;
                delivered += records.len();
                trace!(slot, records = records.len(), "delivering mutation batch");
                let Ok(mut running) = callback.try_borrow_mut() else {
                    warn!(slot, "observer callback re-entered while running; batch dropped");
                    continue;
                };
                let running = &mut *running;
                running(records);
            }
            if !progressed {
                return delivered;
            }
        }
        if self.pending() > 0 {
            warn!(rounds = MAX_FLUSH_ROUNDS, pending = self.pending(), "flush stopped with records queued");
        }
        delivered
    }

    /// Number of records queued across all observers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .borrow()
            .observers
            .iter()
            .flatten()
            .map(|slot| slot.pending.len())
            .sum()
    }

    /// Lowercase tag name of an element.
    #[must_use]
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        let state = self.state.borrow();
        let name = state.html.tree.get(node)?.value().as_element()?.name().to_string();
        Some(name)
    }

    /// Attribute value of an element.
    #[must_use]
    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        let state = self.state.borrow();
        let value = state.html.tree.get(node)?.value().as_element()?.attr(name)?.to_string();
        Some(value)
    }

    /// Text of a text node, or the concatenated descendant text of an element.
    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<String> {
        let state = self.state.borrow();
        let current = state.html.tree.get(node)?;
        if let Some(text) = current.value().as_text() {
            return Some(String::from(&**text));
        }
        ElementRef::wrap(current).map(|el| el.text().collect())
    }

    /// Serialized HTML of an element, or of the whole document.
    #[must_use]
    pub fn html(&self, node: NodeId) -> Option<String> {
        let state = self.state.borrow();
        if node == state.html.tree.root().id() {
            return Some(state.html.html());
        }
        ElementRef::wrap(state.html.tree.get(node)?).map(|el| el.html())
    }

    fn take_batch(&self, slot: usize) -> Option<(SharedBatchCallback, Vec<MutationRecord<NodeId>>)> {
        let mut state = self.state.borrow_mut();
        let observer = state.observers.get_mut(slot)?.as_mut()?;
        if observer.pending.is_empty() || observer.callback.try_borrow_mut().is_err() {
            return None;
        }
        Some((Rc::clone(&observer.callback), std::mem::take(&mut observer.pending)))
    }
}

/// Observer handle created by [`MemoryDom`]. Dropping it disconnects.
pub struct MemoryObserver {
    state: Weak<RefCell<DomState>>,
    slot: usize,
}

impl fmt::Debug for MemoryObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObserver").field("slot", &self.slot).finish()
    }
}

impl MemoryObserver {
    fn with_slot(&self, f: impl FnOnce(&mut ObserverSlot)) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Ok(mut state) = state.try_borrow_mut() else {
            warn!(slot = self.slot, "document busy; observer change ignored");
            return;
        };
        if let Some(Some(slot)) = state.observers.get_mut(self.slot) {
            f(slot);
        }
    }
}

impl Observer<NodeId> for MemoryObserver {
    fn observe(&self, root: &NodeId, options: &ObserveOptions) {
        let root = *root;
        let options = *options;
        self.with_slot(|slot| slot.target = Some((root, options)));
    }

    fn disconnect(&self) {
        self.with_slot(|slot| {
            slot.target = None;
            slot.pending.clear();
        });
    }
}

impl Drop for MemoryObserver {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if let Ok(mut state) = state.try_borrow_mut() {
            if let Some(slot) = state.observers.get_mut(self.slot) {
                *slot = None;
            }
        };
    }
}

impl Host for MemoryDom {
    type Node = NodeId;
    type Observer = MemoryObserver;

    fn document(&self) -> NodeId {
        Self::document(self)
    }

    fn is_element(&self, node: &NodeId) -> bool {
        self.state
            .borrow()
            .html
            .tree
            .get(*node)
            .is_some_and(|n| n.value().is_element())
    }

    fn validate_selector(&self, selector: &str) -> ReadyResult<()> {
        self.state.borrow_mut().compile(selector).map(|_| ())
    }

    fn matches(&self, node: &NodeId, selector: &str) -> bool {
        let Ok(compiled) = self.state.borrow_mut().compile(selector) else {
            return false;
        };
        let state = self.state.borrow();
        state
            .html
            .tree
            .get(*node)
            .and_then(ElementRef::wrap)
            .is_some_and(|el| compiled.matches(&el))
    }

    fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        Self::query_selector_all(self, selector)
    }

    fn create_observer(&self, callback: BatchCallback<NodeId>) -> MemoryObserver {
        let mut state = self.state.borrow_mut();
        let slot = ObserverSlot {
            callback: Rc::new(RefCell::new(callback)),
            target: None,
            pending: Vec::new(),
        };
        let index = match state.observers.iter().position(Option::is_none) {
            Some(free) => {
                state.observers[free] = Some(slot);
                free
            }
            None => {
                state.observers.push(Some(slot));
                state.observers.len() - 1
            }
        };
        MemoryObserver {
            state: Rc::downgrade(&self.state),
            slot: index,
        }
    }

    fn listen_load(&self, node: &NodeId, handler: LoadHandler) -> bool {
        if !self.is_element(node) {
            return false;
        }
        let mut state = self.state.borrow_mut();
        if state.attached(*node).is_err() {
            return false;
        }
        state
            .load_listeners
            .entry(*node)
            .or_default()
            .push(Rc::new(RefCell::new(handler)));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::mutation::{MutationKind, Payload};

    const PAGE: &str = r#"<html><body><div id="app"><p class="a">one</p><p class="b">two</p></div></body></html>"#;

    fn collecting_observer(dom: &MemoryDom) -> (MemoryObserver, Rc<RefCell<Vec<Vec<MutationRecord<NodeId>>>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let observer = dom.create_observer(Box::new(move |records: Vec<MutationRecord<NodeId>>| {
            sink.borrow_mut().push(records);
        }));
        (observer, seen)
    }

    #[test]
    fn query_in_document_order() {
        let dom = MemoryDom::parse(PAGE);
        let ps = dom.query_selector_all("#app p");
        assert_eq!(ps.len(), 2);
        assert_eq!(dom.attr(ps[0], "class").as_deref(), Some("a"));
        assert_eq!(dom.attr(ps[1], "class").as_deref(), Some("b"));
        assert_eq!(dom.query_selector("p.b").unwrap(), Some(ps[1]));
        assert!(dom.query_selector("section").unwrap().is_none());
    }

    #[test]
    fn invalid_selector() {
        let dom = MemoryDom::parse(PAGE);
        assert!(dom.query_selector("p[").unwrap_err().is_selector());
        assert!(dom.query_selector_all("p[").is_empty());
        assert!(dom.validate_selector("div >").is_err());
        assert!(dom.validate_selector("body div.widget").is_ok());
    }

    #[test]
    fn append_queues_child_list_record() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let (observer, seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::default());

        let added = dom.append_html(app, r#"<span class="x">hi</span><em>yo</em>"#).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(dom.tag_name(added[0]).as_deref(), Some("span"));
        assert_eq!(dom.pending(), 1);

        assert_eq!(dom.flush(), 1);
        let batches = seen.borrow();
        let record = &batches[0][0];
        assert_eq!(record.target, app);
        assert_eq!(record.added_nodes, added);
        assert!(record.previous_sibling.is_some());
        assert!(matches!(record.payload(MutationKind::AddedNodes), Some(Payload::Nodes(n)) if n.len() == 2));
        assert_eq!(dom.query_selector_all("span.x"), vec![added[0]]);
    }

    #[test]
    fn observer_scope_respects_subtree_flag() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let p = dom.query_selector("p.a").unwrap().unwrap();
        let (observer, _seen) = collecting_observer(&dom);
        let shallow = ObserveOptions {
            subtree: false,
            ..ObserveOptions::default()
        };
        observer.observe(&app, &shallow);

        dom.append_html(p, "<b>deep</b>").unwrap();
        assert_eq!(dom.pending(), 0);
        dom.append_html(app, "<b>direct</b>").unwrap();
        assert_eq!(dom.pending(), 1);
    }

    #[test]
    fn disconnect_drops_pending_records() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let (observer, seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::default());

        dom.append_html(app, "<i></i>").unwrap();
        observer.disconnect();
        dom.append_html(app, "<i></i>").unwrap();
        assert_eq!(dom.pending(), 0);
        assert_eq!(dom.flush(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn remove_detaches_and_records_siblings() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let b = dom.query_selector("p.b").unwrap().unwrap();
        let (observer, seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::default());

        dom.remove(a).unwrap();
        dom.flush();
        let record = seen.borrow()[0][0].clone();
        assert_eq!(record.removed_nodes, vec![a]);
        assert_eq!(record.next_sibling, Some(b));
        assert!(record.previous_sibling.is_none());
        assert!(dom.query_selector("p.a").unwrap().is_none());

        assert!(matches!(dom.remove(a), Err(ReadyError::UnknownNode { .. })));
        assert!(dom.remove(dom.document()).is_err());
    }

    #[test]
    fn set_attribute_rebuilds_element() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let (observer, seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::everything());

        dom.set_attribute(a, "class", "a widget").unwrap();
        dom.set_attribute(a, "data-x", "1").unwrap();
        assert_eq!(dom.query_selector_all("p.widget"), vec![a]);
        assert_eq!(dom.attr(a, "data-x").as_deref(), Some("1"));

        dom.flush();
        let batch = seen.borrow()[0].clone();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].attribute_name.as_deref(), Some("class"));
        assert_eq!(batch[0].old_value.as_deref(), Some("a"));
        assert!(batch[1].old_value.is_none());
    }

    #[test]
    fn attribute_changes_need_attribute_option() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let (observer, _seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::default());
        dom.set_attribute(a, "title", "t").unwrap();
        assert_eq!(dom.pending(), 0);
    }

    #[test]
    fn set_text_on_text_and_element() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let (observer, seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::everything());

        dom.set_text(a, "uno").unwrap();
        assert_eq!(dom.text(a).as_deref(), Some("uno"));
        dom.flush();
        let record = seen.borrow()[0][0].clone();
        assert_eq!(record.record_type, RecordType::ChildList);
        assert_eq!(record.removed_nodes.len(), 1);

        let text_node = record.added_nodes[0];
        dom.set_text(text_node, "eins").unwrap();
        dom.flush();
        let record = seen.borrow()[1][0].clone();
        assert_eq!(record.record_type, RecordType::CharacterData);
        assert_eq!(record.old_value.as_deref(), Some("uno"));
        assert_eq!(dom.text(a).as_deref(), Some("eins"));
    }

    #[test]
    fn load_listeners_chain_in_order() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Rc::clone(&order);
            assert!(dom.listen_load(&a, Box::new(move || order.borrow_mut().push(tag))));
        }
        assert!(!dom.listen_load(&dom.document(), Box::new(|| {})));

        assert_eq!(dom.fire_load(a), 2);
        assert_eq!(*order.borrow(), vec!["first", "second"]);
        assert_eq!(dom.fire_load(dom.document()), 0);
    }

    #[test]
    fn detached_nodes_release_load_listeners() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let a = dom.query_selector("p.a").unwrap().unwrap();
        let b = dom.query_selector("p.b").unwrap().unwrap();
        let fired = Rc::new(RefCell::new(0));
        for node in [app, a, b] {
            let fired = Rc::clone(&fired);
            assert!(dom.listen_load(&node, Box::new(move || *fired.borrow_mut() += 1)));
        }

        dom.remove(a).unwrap();
        assert_eq!(dom.fire_load(a), 0);
        assert!(!dom.listen_load(&a, Box::new(|| {})));
        assert_eq!(dom.state.borrow().load_listeners.len(), 2);

        // Replacing the children of #app detaches <p class="b">.
        dom.set_text(app, "gone").unwrap();
        assert_eq!(dom.fire_load(b), 0);
        assert_eq!(dom.state.borrow().load_listeners.len(), 1);
        assert_eq!(dom.fire_load(app), 1);
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn flush_leaves_overflow_for_next_call() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let writer = dom.clone();
        let observer = dom.create_observer(Box::new(move |_records: Vec<MutationRecord<NodeId>>| {
            writer.append_html(app, "<i></i>").unwrap();
        }));
        observer.observe(&dom.document(), &ObserveOptions::default());

        dom.append_html(app, "<i></i>").unwrap();
        assert_eq!(dom.flush(), MAX_FLUSH_ROUNDS);
        assert_eq!(dom.pending(), 1);

        assert_eq!(dom.flush(), MAX_FLUSH_ROUNDS);
        assert_eq!(dom.pending(), 1);
        observer.disconnect();
        assert_eq!(dom.pending(), 0);
    }

    #[test]
    fn dropping_observer_frees_slot() {
        let dom = MemoryDom::parse(PAGE);
        let app = dom.query_selector("#app").unwrap().unwrap();
        let (observer, _seen) = collecting_observer(&dom);
        observer.observe(&dom.document(), &ObserveOptions::default());
        drop(observer);
        dom.append_html(app, "<i></i>").unwrap();
        assert_eq!(dom.pending(), 0);

        let (again, _seen) = collecting_observer(&dom);
        assert_eq!(again.slot, 0);
    }

    #[test]
    fn html_serialization() {
        let dom = MemoryDom::parse(PAGE);
        let a = dom.query_selector("p.a").unwrap().unwrap();
        assert_eq!(dom.html(a).as_deref(), Some(r#"<p class="a">one</p>"#));
        assert!(dom.html(dom.document()).unwrap().contains("<body>"));
    }
}
