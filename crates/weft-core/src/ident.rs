// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for the grammar graph.

/// Strongly typed identifier for a node in the grammar graph.
///
/// A `NodeId` is a dense index into the owning [`crate::Graph`] arena. Ids are
/// never reused within a graph: nodes are only destroyed when the whole graph
/// is dropped, so a `NodeId` obtained from a graph stays valid for that
/// graph's lifetime.
///
/// Ids are *not* portable across graphs. Cloning a whole graph preserves
/// indices (the copy dictionary is the identity), but cloning a subgraph into
/// the same arena produces fresh ids for every copied node.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    /// Constructs an id from a raw arena index.
    ///
    /// Callers must guarantee the index refers to a live slot of the graph
    /// this id will be used with.
    #[must_use]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "arena overflow");
        #[allow(clippy::cast_possible_truncation)]
        Self(index as u32)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier for a shared entanglement set (see [`crate::Graph::entangle`]).
///
/// Entangle ids index a side table owned by the graph; they are meaningless
/// outside it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntangleId(pub(crate) u32);

impl EntangleId {
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Label of the default configuration every node starts with.
///
/// Alternate configurations can be added per node; each maps to an
/// independent contents variant.
pub const MAIN_CONF: &str = "MAIN";
