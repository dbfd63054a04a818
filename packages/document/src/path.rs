//! # Path Resolution
//!
//! Nodes are addressed by slash-joined id paths. A slash appears only at an
//! *instance boundary* (the root of an instantiated subtree). Everything
//! mirrored inside one boundary shares a flat scope, so a deep mirrored
//! descendant is still addressed as `boundary/id`.
//!
//! Two predicates drive the scheme:
//!
//! - a node is **unique** when its id was freshly assigned (no prototype, or
//!   the id differs from its immediate prototype's id). Unique nodes are
//!   globally addressable and reset the path prefix.
//! - a node is an **instance boundary** when it has a prototype and its id
//!   differs from the id at the root of its prototype lineage. Paths grow a
//!   segment below a boundary; below anything else the last segment is
//!   replaced.
//!
//! A mirrored copy of an instance keeps the instance's id, so it is not
//! unique (it needs its outer boundary as a prefix) yet still a boundary
//! (its own mirrored children need a fresh segment).

use std::collections::HashSet;

use crate::node::NodeKey;
use crate::session::Session;

/// Replace the last segment of `path` with `id`, keeping the boundary
/// prefix.
pub(crate) fn replace_last_segment(path: &str, id: &str) -> String {
    match path.rfind('/') {
        Some(pos) => format!("{}{}", &path[..pos + 1], id),
        None => id.to_string(),
    }
}

/// First segment of a path.
pub(crate) fn first_segment(path: &str) -> &str {
    match path.find('/') {
        Some(pos) => &path[..pos],
        None => path,
    }
}

/// Last segment of a path.
pub(crate) fn last_segment(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

impl Session {
    /// Whether the node carries its own fresh id. Unique nodes are globally
    /// addressable.
    pub fn is_unique(&self, key: NodeKey) -> bool {
        self.data_unique(self.node(key))
    }

    /// Id at the far end of the prototype chain.
    fn lineage_root_id(&self, key: NodeKey) -> String {
        let mut current = key;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return self.node(current).id.clone();
            }
            match &self.node(current).prototype {
                Some(link) if self.contains(link.node) => current = link.node,
                _ => return self.node(current).id.clone(),
            }
        }
    }

    /// Whether paths gain a new segment below this node.
    pub fn is_instance_boundary(&self, key: NodeKey) -> bool {
        let node = self.node(key);
        node.prototype.is_some() && node.id != self.lineage_root_id(key)
    }

    /// Fully qualified path of a node. The viewport root has the empty path.
    pub fn node_path(&self, key: NodeKey) -> String {
        if key == self.root() {
            return String::new();
        }
        if self.is_unique(key) {
            return self.node(key).id.clone();
        }
        let id = self.node(key).id.clone();
        let Some(parent) = self.node(key).parent() else {
            return id;
        };
        if parent == self.root() {
            return id;
        }
        if self.is_instance_boundary(parent) {
            format!("{}/{}", self.node_path(parent), id)
        } else {
            replace_last_segment(&self.node_path(parent), &id)
        }
    }

    /// Shortest re-resolvable path of `key` below `base`, as used for
    /// override document keys. `None` when `key` is `base` itself or not
    /// below it.
    pub fn relative_path(&self, key: NodeKey, base: NodeKey) -> Option<String> {
        if key == base {
            return None;
        }
        let id = self.node(key).id.clone();
        let parent = self.node(key).parent()?;
        if parent == base {
            return Some(id);
        }
        let prefix = self.relative_path(parent, base)?;
        if self.is_instance_boundary(parent) {
            Some(format!("{prefix}/{id}"))
        } else {
            Some(replace_last_segment(&prefix, &id))
        }
    }

    /// Resolve a fully qualified path to a live node.
    pub fn resolve_path(&self, path: &str) -> Option<NodeKey> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('/');
        let mut current = self.lookup_unique(segments.next()?)?;
        for segment in segments {
            current = self.find_in_scope(current, segment)?;
        }
        Some(current)
    }

    /// Resolve a path relative to `base`, using only boundary-scoped
    /// search (no global index).
    pub fn resolve_relative(&self, base: NodeKey, path: &str) -> Option<NodeKey> {
        if path.is_empty() {
            return None;
        }
        let mut current = base;
        for segment in path.split('/') {
            current = self.find_in_scope(current, segment)?;
        }
        Some(current)
    }

    /// Re-derive the fully qualified form of a path. Idempotent:
    /// `canonicalize(canonicalize(p)) == canonicalize(p)`.
    pub fn canonicalize(&self, path: &str) -> Option<String> {
        let key = self.resolve_path(path)?;
        Some(self.node_path(key))
    }

    /// Re-derive an override key relative to `base`.
    pub fn canonicalize_relative(&self, base: NodeKey, path: &str) -> Option<String> {
        let key = self.resolve_relative(base, path)?;
        self.relative_path(key, base)
    }

    /// Depth-first search for `id` inside one boundary scope. Descent stops
    /// at nested instance boundaries and at unique children; both start
    /// scopes of their own and need their own path segment.
    fn find_in_scope(&self, scope: NodeKey, id: &str) -> Option<NodeKey> {
        let mut stack: Vec<NodeKey> = self.node(scope).children().to_vec();
        while let Some(key) = stack.pop() {
            if !self.contains(key) {
                continue;
            }
            if self.node(key).id == id {
                return Some(key);
            }
            if !self.is_instance_boundary(key) && !self.is_unique(key) {
                stack.extend(self.node(key).children().iter().copied());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{default_properties, NodeType, PrototypeLink};
    use crate::session::UpdateBlock;

    /// proto "card" with child "label"; instance "card-1" mirroring both.
    fn build_instance_fixture(session: &mut Session) -> (NodeKey, NodeKey, NodeKey, NodeKey) {
        let mut block = UpdateBlock::default();
        let root = session.root();

        let card = session.create_node(
            &mut block,
            "card",
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.attach_child(&mut block, root, card, None);
        let label = session.create_node(
            &mut block,
            "label",
            NodeType::Text,
            default_properties(NodeType::Text),
        );
        session.attach_child(&mut block, card, label, None);

        let inst = session.create_node(
            &mut block,
            "card-1",
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.attach_child(&mut block, root, inst, None);
        session.set_prototype(&mut block, inst, Some(PrototypeLink::new(card)));
        let inst_label = session.create_node(
            &mut block,
            "label",
            NodeType::Text,
            default_properties(NodeType::Text),
        );
        session.attach_child(&mut block, inst, inst_label, None);
        session.set_prototype(&mut block, inst_label, Some(PrototypeLink::new(label)));

        (card, label, inst, inst_label)
    }

    #[test]
    fn test_unique_nodes_resolve_by_bare_id() {
        let mut session = Session::new();
        let (card, label, inst, _) = build_instance_fixture(&mut session);
        assert_eq!(session.resolve_path("card"), Some(card));
        assert_eq!(session.resolve_path("label"), Some(label));
        assert_eq!(session.resolve_path("card-1"), Some(inst));
    }

    #[test]
    fn test_mirrored_descendants_resolve_through_boundary() {
        let mut session = Session::new();
        let (_, _, inst, inst_label) = build_instance_fixture(&mut session);
        assert_eq!(session.resolve_path("card-1/label"), Some(inst_label));
        assert_eq!(session.node_path(inst_label), "card-1/label");
        assert_eq!(session.node_path(inst), "card-1");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let mut session = Session::new();
        build_instance_fixture(&mut session);
        for path in ["card", "card-1", "card-1/label", "label"] {
            let once = session.canonicalize(path).unwrap();
            let twice = session.canonicalize(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_unresolvable_path_is_none() {
        let mut session = Session::new();
        build_instance_fixture(&mut session);
        assert!(session.resolve_path("nope").is_none());
        assert!(session.resolve_path("card-1/nope").is_none());
        assert!(session.canonicalize("").is_none());
    }

    #[test]
    fn test_relative_path_matches_override_keying() {
        let mut session = Session::new();
        let (_, _, inst, inst_label) = build_instance_fixture(&mut session);
        assert_eq!(
            session.relative_path(inst_label, inst),
            Some("label".to_string())
        );
        assert_eq!(session.resolve_relative(inst, "label"), Some(inst_label));
    }

    #[test]
    fn test_segment_helpers() {
        assert_eq!(replace_last_segment("a/b", "c"), "a/c");
        assert_eq!(replace_last_segment("a", "c"), "c");
        assert_eq!(first_segment("a/b/c"), "a");
        assert_eq!(last_segment("a/b/c"), "c");
        assert_eq!(first_segment("solo"), "solo");
    }
}
