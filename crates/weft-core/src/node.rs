// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The node record: naming, configurations, graph-local metadata.
//!
//! A node is a named vertex of the grammar graph. It maps configuration
//! labels to contents variants (the `MAIN` configuration always exists),
//! and carries the metadata that belongs to the identity rather than to a
//! particular contents: depth, fuzz priority, semantics tags, a private
//! payload, and the entanglement handle.

use std::collections::{BTreeMap, BTreeSet};

use crate::contents::Contents;
use crate::ident::{EntangleId, MAIN_CONF};

/// A named vertex of the grammar graph.
///
/// Nodes are owned by their [`crate::Graph`] arena and referenced by
/// [`crate::NodeId`] everywhere else; child lists, argument bindings, and
/// sync targets all store ids, never embedded nodes.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) confs: BTreeMap<String, Contents>,
    pub(crate) active: String,
    pub(crate) depth: u32,
    pub(crate) fuzz_weight: u8,
    pub(crate) semantics: Option<BTreeSet<String>>,
    pub(crate) private: Option<Vec<u8>>,
    pub(crate) entangled: Option<EntangleId>,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let mut confs = BTreeMap::new();
        confs.insert(MAIN_CONF.to_owned(), Contents::empty());
        Self {
            name: name.into(),
            confs,
            active: MAIN_CONF.to_owned(),
            depth: 0,
            fuzz_weight: 1,
            semantics: None,
            private: None,
            entangled: None,
        }
    }

    /// The node's name (unique among siblings under one parent and
    /// configuration).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active configuration label.
    #[must_use]
    pub fn active_conf(&self) -> &str {
        &self.active
    }

    /// All configuration labels, in sorted order.
    pub fn conf_labels(&self) -> impl Iterator<Item = &str> {
        self.confs.keys().map(String::as_str)
    }

    /// Distance from the root this node was last rooted at.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Fuzz-priority weight consumed by external strategies.
    #[must_use]
    pub fn fuzz_weight(&self) -> u8 {
        self.fuzz_weight
    }

    /// Semantics tags, if any were attached.
    #[must_use]
    pub fn semantics(&self) -> Option<&BTreeSet<String>> {
        self.semantics.as_ref()
    }

    /// Private payload bytes, if any were attached.
    #[must_use]
    pub fn private(&self) -> Option<&[u8]> {
        self.private.as_deref()
    }

    /// The entanglement handle, when this node is part of a shared set.
    #[must_use]
    pub fn entangle_handle(&self) -> Option<EntangleId> {
        self.entangled
    }

    /// Contents of the active configuration.
    ///
    /// Invariant: the active label always maps to an entry — constructors
    /// install `MAIN` and configuration switches are validated.
    #[must_use]
    pub fn contents(&self) -> &Contents {
        debug_assert!(self.confs.contains_key(&self.active));
        &self.confs[self.active.as_str()]
    }

    /// Contents of a specific configuration.
    #[must_use]
    pub fn contents_of(&self, conf: &str) -> Option<&Contents> {
        self.confs.get(conf)
    }

    pub(crate) fn contents_mut(&mut self) -> &mut Contents {
        debug_assert!(self.confs.contains_key(&self.active));
        let active = self.active.clone();
        self.confs
            .entry(active)
            .or_insert_with(Contents::empty)
    }
}
