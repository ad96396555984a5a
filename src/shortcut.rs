//! Shortcut expansion for event kind specs.
//!
//! A kind spec is one or more kind names. Names prefixed with the shortcut
//! symbol (`#` by default) refer to an entry in a [`ShortcutTable`] and expand to
//! that entry's primitive kinds. Expansion is a single level: the expanded names
//! are never looked up again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the built-in "element appeared" shortcut.
pub const READY: &str = "ready";

/// Default prefix marking a shortcut reference.
pub const DEFAULT_SHORTCUT_SYMBOL: char = '#';

/// Named aliases for lists of primitive kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortcutTable(BTreeMap<String, Vec<String>>);

impl ShortcutTable {
    /// An empty table. Every shortcut reference expands to nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Add or replace a shortcut.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .insert(name.into(), kinds.into_iter().map(Into::into).collect());
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with<I, S>(mut self, name: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, kinds);
        self
    }

    /// Kinds for a shortcut name (without the symbol).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ShortcutTable {
    fn default() -> Self {
        Self::empty().with(READY, ["addedNodes"])
    }
}

/// Kind names as given to a registration call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSpec(Vec<String>);

impl EventSpec {
    /// The names in the order given.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for EventSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl From<&str> for EventSpec {
    fn from(name: &str) -> Self {
        Self(vec![name.to_string()])
    }
}

impl From<String> for EventSpec {
    fn from(name: String) -> Self {
        Self(vec![name])
    }
}

impl From<Vec<String>> for EventSpec {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<Vec<&str>> for EventSpec {
    fn from(names: Vec<&str>) -> Self {
        Self(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for EventSpec {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|s| (*s).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for EventSpec {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Expands shortcut references using a table and a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutExpander {
    symbol: char,
    table: ShortcutTable,
}

impl ShortcutExpander {
    #[must_use]
    pub fn new(symbol: char, table: ShortcutTable) -> Self {
        Self { symbol, table }
    }

    #[must_use]
    pub const fn symbol(&self) -> char {
        self.symbol
    }

    #[must_use]
    pub fn table(&self) -> &ShortcutTable {
        &self.table
    }

    /// Flatten `names` into primitive kinds, in first-seen order.
    ///
    /// Duplicates are kept. Empty names, a bare symbol, and unknown shortcuts
    /// contribute nothing.
    #[must_use]
    pub fn expand<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut out = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name.is_empty() {
                continue;
            }
            let Some(shortcut) = name.strip_prefix(self.symbol) else {
                out.push(name.to_string());
                continue;
            };
            if shortcut.is_empty() {
                continue;
            }
            if let Some(kinds) = self.table.get(shortcut) {
                out.extend(kinds.iter().cloned());
            }
        }
        out
    }

    /// Whether already-expanded `kinds` contain a primitive kind of the
    /// `ready` shortcut. False when the table has no `ready` entry.
    #[must_use]
    pub fn includes_ready(&self, kinds: &[String]) -> bool {
        self.table
            .get(READY)
            .is_some_and(|ready| ready.iter().any(|k| kinds.contains(k)))
    }
}

impl Default for ShortcutExpander {
    fn default() -> Self {
        Self::new(DEFAULT_SHORTCUT_SYMBOL, ShortcutTable::default())
    }
}
