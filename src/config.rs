//! Dispatcher configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReadyError, ReadyResult};
use crate::shortcut::{ShortcutExpander, ShortcutTable, DEFAULT_SHORTCUT_SYMBOL};

/// Default prefix marking a selector that is used as-is, without the base selector.
pub const DEFAULT_LOCAL_MARKER: char = '&';

/// Which changes the observation primitive reports.
///
/// Mirrors the options of a DOM `MutationObserver::observe` call.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub attribute_old_value: bool,
    pub character_data_old_value: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attributes: false,
            character_data: false,
            attribute_old_value: false,
            character_data_old_value: false,
        }
    }
}

impl ObserveOptions {
    /// Child list, attribute and character data changes across the subtree,
    /// with old values recorded.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            child_list: true,
            subtree: true,
            attributes: true,
            character_data: true,
            attribute_old_value: true,
            character_data_old_value: true,
        }
    }
}

/// Per-dispatcher configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub shortcut_symbol: char,
    pub local_marker: char,
    pub shortcuts: ShortcutTable,
    pub observe: ObserveOptions,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            shortcut_symbol: DEFAULT_SHORTCUT_SYMBOL,
            local_marker: DEFAULT_LOCAL_MARKER,
            shortcuts: ShortcutTable::default(),
            observe: ObserveOptions::default(),
        }
    }
}

impl DispatcherConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ReadyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> ReadyResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ReadyError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }

    /// Configuration without any shortcuts.
    #[must_use]
    pub fn without_shortcuts() -> Self {
        Self {
            shortcuts: ShortcutTable::empty(),
            ..Self::default()
        }
    }

    pub(crate) fn expander(&self) -> ShortcutExpander {
        ShortcutExpander::new(self.shortcut_symbol, self.shortcuts.clone())
    }
}
