// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph queries: path addressing and node search.
//!
//! External fuzz strategies locate nodes by slash-joined name paths or by
//! semantics tags rather than by raw ids. Traversal follows the *realized*
//! tree when a container has been frozen (so instance clones are
//! reachable), and falls back to the definition structure otherwise.

use rustc_hash::FxHashSet;

use crate::contents::ContentsKind;
use crate::graph::Graph;
use crate::ident::NodeId;

impl Graph {
    /// Children of `id` for display/search traversal: realized instances
    /// when frozen, descriptor structure otherwise.
    pub(crate) fn traversal_children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt
                .frozen
                .as_ref()
                .map_or_else(|| nt.all_child_nodes(), |f| f.children.clone()),
            ContentsKind::Gen(g) => g.produced.map_or_else(Vec::new, |p| vec![p]),
            _ => Vec::new(),
        }
    }

    /// Slash-joined name path from `root` to `target`, when `target` is
    /// reachable (first match in traversal order wins).
    #[must_use]
    pub fn path_of(&self, root: NodeId, target: NodeId) -> Option<String> {
        let mut visited = FxHashSet::default();
        self.path_walk(root, target, &mut visited)
            .map(|segments| segments.join("/"))
    }

    fn path_walk(
        &self,
        at: NodeId,
        target: NodeId,
        visited: &mut FxHashSet<NodeId>,
    ) -> Option<Vec<String>> {
        if !visited.insert(at) {
            return None;
        }
        let name = self.node(at).name().to_owned();
        if at == target {
            return Some(vec![name]);
        }
        for child in self.traversal_children(at) {
            if let Some(mut rest) = self.path_walk(child, target, visited) {
                rest.insert(0, name);
                return Some(rest);
            }
        }
        None
    }

    /// All nodes reachable from `root` whose name equals `name`, in
    /// traversal order.
    #[must_use]
    pub fn find_by_name(&self, root: NodeId, name: &str) -> Vec<NodeId> {
        self.collect_matching(root, &|g, id| g.node(id).name() == name)
    }

    /// All nodes reachable from `root` carrying the semantics tag `tag`.
    #[must_use]
    pub fn find_by_semantics(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.collect_matching(root, &|g, id| {
            g.node(id)
                .semantics()
                .is_some_and(|tags| tags.contains(tag))
        })
    }

    fn collect_matching(
        &self,
        root: NodeId,
        pred: &dyn Fn(&Graph, NodeId) -> bool,
    ) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if pred(self, id) {
                out.push(id);
            }
            // Depth-first, definition order: push children reversed.
            let mut children = self.traversal_children(id);
            children.reverse();
            stack.extend(children);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonterm::ChildSpec;
    use crate::vt::testing::FixedBytes;

    fn tree(graph: &mut Graph) -> (NodeId, NodeId, NodeId) {
        let leaf = graph.add("leaf");
        graph.set_values(leaf, Box::new(FixedBytes::new(*b"v")));
        let inner = graph.add("inner");
        let _ = graph.set_subnodes_ordered(inner, vec![ChildSpec::one(leaf)]);
        let root = graph.add("root");
        let _ = graph.set_subnodes_ordered(root, vec![ChildSpec::one(inner)]);
        (root, inner, leaf)
    }

    #[test]
    fn path_follows_the_definition_structure_before_freezing() {
        let mut graph = Graph::new();
        let (root, _, leaf) = tree(&mut graph);
        assert_eq!(
            graph.path_of(root, leaf),
            Some("root/inner/leaf".to_owned())
        );
    }

    #[test]
    fn search_by_name_spans_realized_instances() {
        let mut graph = Graph::new();
        let leaf = graph.add("leaf");
        graph.set_values(leaf, Box::new(FixedBytes::new(*b"v")));
        let root = graph.add("root");
        let _ = graph.set_subnodes_ordered(root, vec![ChildSpec::ranged(leaf, 3, 3)]);
        graph.set_attr(root, crate::attrs::Attr::Determinist);
        let _ = graph.freeze(root);
        // Three instances share the descriptor name: the descriptor plus
        // two expansion clones.
        assert_eq!(graph.find_by_name(root, "leaf").len(), 3);
    }

    #[test]
    fn search_by_semantics_tag() {
        let mut graph = Graph::new();
        let (root, inner, _) = tree(&mut graph);
        graph.set_semantics(inner, ["header"]);
        assert_eq!(graph.find_by_semantics(root, "header"), vec![inner]);
        assert!(graph.find_by_semantics(root, "missing").is_empty());
    }
}
