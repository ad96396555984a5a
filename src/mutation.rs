//! Mutation records as delivered by the host observation primitive.
//!
//! A record exposes a fixed set of named kinds (`addedNodes`, `target`, ...).
//! Which kinds are present depends on the record type and on which optional
//! fields carry a value. Each kind resolves to a [`Payload`], either a node list
//! or a single scalar value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The type of change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordType {
    /// Children were added to or removed from the target.
    ChildList,
    /// An attribute of the target changed.
    Attributes,
    /// The text content of a character data node changed.
    CharacterData,
}

impl RecordType {
    /// DOM name of the record type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChildList => "childList",
            Self::Attributes => "attributes",
            Self::CharacterData => "characterData",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primitive mutation kind, named after the record field it reads.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Type,
    Target,
    AddedNodes,
    RemovedNodes,
    PreviousSibling,
    NextSibling,
    AttributeName,
    OldValue,
}

impl MutationKind {
    /// Every kind, in the order records report them.
    pub const ALL: [Self; 8] = [
        Self::Type,
        Self::Target,
        Self::AddedNodes,
        Self::RemovedNodes,
        Self::PreviousSibling,
        Self::NextSibling,
        Self::AttributeName,
        Self::OldValue,
    ];

    /// Field name used in kind specs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Target => "target",
            Self::AddedNodes => "addedNodes",
            Self::RemovedNodes => "removedNodes",
            Self::PreviousSibling => "previousSibling",
            Self::NextSibling => "nextSibling",
            Self::AttributeName => "attributeName",
            Self::OldValue => "oldValue",
        }
    }

    /// Look up a kind by its field name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-valued payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar<N> {
    Node(N),
    Text(String),
}

impl<N> Scalar<N> {
    /// The node, if this scalar is one.
    #[must_use]
    pub const fn as_node(&self) -> Option<&N> {
        match self {
            Self::Node(n) => Some(n),
            Self::Text(_) => None,
        }
    }

    /// The text, if this scalar is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Node(_) => None,
            Self::Text(t) => Some(t),
        }
    }
}

/// Payload of one kind on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<'a, N> {
    /// Ordered node list; each element node is tested against the selector.
    Nodes(&'a [N]),
    /// Single value; handed to the callback without selector filtering.
    Scalar(Scalar<N>),
}

/// One observed change.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub record_type: RecordType,
    pub target: N,
    pub added_nodes: Vec<N>,
    pub removed_nodes: Vec<N>,
    pub previous_sibling: Option<N>,
    pub next_sibling: Option<N>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl<N: Clone> MutationRecord<N> {
    /// A child-list record.
    #[must_use]
    pub fn child_list(
        target: N,
        added_nodes: Vec<N>,
        removed_nodes: Vec<N>,
        previous_sibling: Option<N>,
        next_sibling: Option<N>,
    ) -> Self {
        Self {
            record_type: RecordType::ChildList,
            target,
            added_nodes,
            removed_nodes,
            previous_sibling,
            next_sibling,
            attribute_name: None,
            old_value: None,
        }
    }

    /// An attribute record.
    #[must_use]
    pub fn attributes(target: N, attribute_name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            record_type: RecordType::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: Some(attribute_name.into()),
            old_value,
        }
    }

    /// A character data record.
    #[must_use]
    pub fn character_data(target: N, old_value: Option<String>) -> Self {
        Self {
            record_type: RecordType::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: None,
            old_value,
        }
    }

    /// Kinds present on this record, in reporting order.
    #[must_use]
    pub fn kinds(&self) -> Vec<MutationKind> {
        MutationKind::ALL
            .into_iter()
            .filter(|k| self.has_kind(*k))
            .collect()
    }

    /// Whether `kind` carries a value on this record.
    #[must_use]
    pub fn has_kind(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::Type | MutationKind::Target => true,
            MutationKind::AddedNodes | MutationKind::RemovedNodes => {
                self.record_type == RecordType::ChildList
            }
            MutationKind::PreviousSibling => self.previous_sibling.is_some(),
            MutationKind::NextSibling => self.next_sibling.is_some(),
            MutationKind::AttributeName => self.attribute_name.is_some(),
            MutationKind::OldValue => self.old_value.is_some(),
        }
    }

    /// Payload for `kind`, or `None` when the kind is absent.
    #[must_use]
    pub fn payload(&self, kind: MutationKind) -> Option<Payload<'_, N>> {
        if !self.has_kind(kind) {
            return None;
        }
        let payload = match kind {
            MutationKind::Type => Payload::Scalar(Scalar::Text(self.record_type.as_str().to_string())),
            MutationKind::Target => Payload::Scalar(Scalar::Node(self.target.clone())),
            MutationKind::AddedNodes => Payload::Nodes(&self.added_nodes),
            MutationKind::RemovedNodes => Payload::Nodes(&self.removed_nodes),
            MutationKind::PreviousSibling => Payload::Scalar(Scalar::Node(self.previous_sibling.clone()?)),
            MutationKind::NextSibling => Payload::Scalar(Scalar::Node(self.next_sibling.clone()?)),
            MutationKind::AttributeName => Payload::Scalar(Scalar::Text(self.attribute_name.clone()?)),
            MutationKind::OldValue => Payload::Scalar(Scalar::Text(self.old_value.clone()?)),
        };
        Some(payload)
    }
}
