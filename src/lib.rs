//! # fastready - element appeared notifications on top of subtree mutation observation
//!
//! A [`Dispatcher`] watches one DOM subtree through a single native mutation
//! observer and routes each change to subscriptions keyed by a mutation kind and a
//! CSS selector. Kind specs may use shortcuts: `#ready` expands to `addedNodes`,
//! and subscribing to it also reports elements that already exist.
//!
//! ## Core Concepts
//!
//! - **Host**: the environment that provides observation, selector matching and
//!   load notifications ([`Host`], with [`MemoryDom`] as the in-memory host)
//! - **Subscription**: kinds, a selector and a callback, identified by a
//!   [`SubscriptionId`]
//! - **Dispatch**: each batch of mutation records is processed with observation
//!   paused, so changes made by callbacks are not reported back
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fastready::{Dispatcher, MemoryDom};
//!
//! let dom = MemoryDom::parse("<body><main></main></body>");
//! let ready = Dispatcher::new(dom.clone(), "main", None)?;
//!
//! ready.on("#ready", "div.widget", |matched, _sub| {
//!     println!("widget: {:?}", matched.node());
//! })?;
//!
//! let main = dom.query_selector("main")?.unwrap();
//! dom.append_html(main, r#"<div class="widget"></div>"#)?;
//! dom.flush();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod dom;
pub mod error;
pub mod host;
pub mod mutation;
pub mod registry;
pub mod shortcut;

// Re-export primary types at crate root for convenience
pub use config::{DispatcherConfig, ObserveOptions, DEFAULT_LOCAL_MARKER};
pub use dispatcher::{Dispatcher, Matched, Target, WeakDispatcher};
pub use dom::{MemoryDom, MemoryObserver};
pub use error::{ReadyError, ReadyResult};
pub use host::{BatchCallback, Host, LoadHandler, Observer};
pub use mutation::{MutationKind, MutationRecord, Payload, RecordType, Scalar};
pub use registry::{Delivery, Subscription, SubscriptionId};
pub use shortcut::{EventSpec, ShortcutExpander, ShortcutTable, DEFAULT_SHORTCUT_SYMBOL, READY};

/// Node handle of the in-memory host.
pub use ego_tree::NodeId;
