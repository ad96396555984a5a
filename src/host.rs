//! Host abstraction.
//!
//! The dispatcher never touches a DOM directly. Everything it needs from the
//! environment (the mutation observation primitive, CSS selector matching, a
//! document-wide scan and element load notifications) goes through [`Host`].
//! [`crate::dom::MemoryDom`] is the in-process implementation.

use std::fmt;

use crate::config::ObserveOptions;
use crate::error::ReadyResult;
use crate::mutation::MutationRecord;

/// Receives every batch delivered to an observer.
pub type BatchCallback<N> = Box<dyn FnMut(Vec<MutationRecord<N>>)>;

/// Invoked when an element finishes loading.
pub type LoadHandler = Box<dyn FnMut()>;

/// Handle on a native subtree-mutation observer.
///
/// Observing again replaces the previous root and options. Disconnecting drops
/// any records not yet delivered.
pub trait Observer<N> {
    /// Start delivering batches for changes under `root`.
    fn observe(&self, root: &N, options: &ObserveOptions);

    /// Stop delivering batches.
    fn disconnect(&self);
}

/// The environment a dispatcher runs in.
///
/// Handles are cheap to clone and share one underlying document.
pub trait Host: Clone + 'static {
    /// Node handle.
    type Node: Clone + PartialEq + fmt::Debug + 'static;

    /// Observation handle created by [`Host::create_observer`].
    type Observer: Observer<Self::Node> + 'static;

    /// The document node.
    fn document(&self) -> Self::Node;

    /// Whether `node` exists and is an element.
    fn is_element(&self, node: &Self::Node) -> bool;

    /// Check that `selector` parses as a CSS selector group.
    fn validate_selector(&self, selector: &str) -> ReadyResult<()>;

    /// CSS selector match. Non-elements and unparsable selectors never match.
    fn matches(&self, node: &Self::Node, selector: &str) -> bool;

    /// Every element of the document matching `selector`, in document order.
    fn query_selector_all(&self, selector: &str) -> Vec<Self::Node>;

    /// Create an observer that hands each delivered batch to `callback`.
    fn create_observer(&self, callback: BatchCallback<Self::Node>) -> Self::Observer;

    /// Install a load listener on `node`, keeping earlier listeners.
    ///
    /// Returns false when the node cannot report loading.
    fn listen_load(&self, node: &Self::Node, handler: LoadHandler) -> bool;
}
