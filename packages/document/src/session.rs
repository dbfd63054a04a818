//! # Document Session
//!
//! One open document: the node arena, the id and instance indices, variable
//! and connection stores, the undo stack, and the collaborator hooks. A
//! `Session` is an explicit value passed by reference into every operation;
//! there is no global state.
//!
//! ## Transactions
//!
//! Every mutating primitive applies a value-level [`Patch`] and records its
//! inverse into the caller's [`UpdateBlock`]. Aborting a block replays the
//! recorded inverses in reverse, which makes every batch all-or-nothing
//! without copy-on-write. Committing a block with undo enabled hands the
//! same inverse list to the undo stack, so rollback, undo and redo are one
//! mechanism.
//!
//! ## Property observation
//!
//! Writing a property on a prototype cascades to every instance that has
//! not overridden that key, transitively. The cascade happens at the
//! primitive level and records one patch per affected node, so undo restores
//! each copy exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeKey, NodeType, PropertyKey, PrototypeLink, Value};
use crate::undo_stack::{PatchBatch, UndoStack};
use crate::variables::VariableStore;

/// Layout collaborator. The session only notifies; geometry flows back
/// through [`Session::layout_commit_size`] / [`Session::layout_commit_position`].
pub trait LayoutEngine {
    fn invalidate_layout(&mut self, node: NodeKey) {
        let _ = node;
    }
    fn update_layout(&mut self) {}
}

/// Renderer collaborator, notified of structural changes for highlight
/// feedback. Purely advisory.
pub trait Renderer {
    fn node_changed(&mut self, node: NodeKey) {
        let _ = node;
    }
}

/// Host-side caches cleared on every document open.
pub trait CacheHost {
    fn clear_caches(&mut self) {}
}

struct Noop;

impl LayoutEngine for Noop {}
impl Renderer for Noop {}
impl CacheHost for Noop {}

/// Collaborator seams with no-op defaults.
pub struct Hooks {
    pub layout: Box<dyn LayoutEngine>,
    pub renderer: Box<dyn Renderer>,
    pub caches: Box<dyn CacheHost>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            layout: Box::new(Noop),
            renderer: Box::new(Noop),
            caches: Box::new(Noop),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Hooks { .. }")
    }
}

/// An advisory edge drawn between two nodes, addressed by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub source: ConnectionEnd,
    pub target: ConnectionEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEnd {
    pub path: String,
    pub anchor: String,
}

/// A single reversible field write. Applying a patch yields its inverse.
#[derive(Debug, Clone)]
pub enum Patch {
    Create {
        key: NodeKey,
        node: Box<Node>,
    },
    Destroy {
        key: NodeKey,
    },
    Attach {
        parent: NodeKey,
        child: NodeKey,
        index: usize,
    },
    Detach {
        parent: NodeKey,
        child: NodeKey,
    },
    SetProperty {
        node: NodeKey,
        key: PropertyKey,
        /// `None` removes the entry.
        value: Option<Value>,
    },
    SetOverridden {
        node: NodeKey,
        key: PropertyKey,
        overridden: bool,
    },
    SetChildrenOverridden {
        node: NodeKey,
        value: bool,
    },
    SetPrototype {
        node: NodeKey,
        link: Option<PrototypeLink>,
    },
    SetReusable {
        node: NodeKey,
        value: bool,
    },
    SetConnections {
        connections: Vec<Connection>,
    },
}

/// Inverse patches recorded by one batch of mutations, in forward order.
#[derive(Debug, Default)]
pub struct UpdateBlock {
    pub(crate) patches: Vec<Patch>,
    pub(crate) description: Option<String>,
}

impl UpdateBlock {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub(crate) fn record(&mut self, patch: Patch) {
        self.patches.push(patch);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Record the batch on the undo stack.
    pub undo: bool,
}

/// One open document.
pub struct Session {
    slots: Vec<Option<Node>>,
    root: NodeKey,
    /// Globally addressable id to node. Mirrored instance descendants are
    /// not in here; they resolve through their boundary ancestor.
    unique_index: HashMap<String, NodeKey>,
    /// Prototype to the nodes mirroring it. Owned here, never in the node.
    instance_index: HashMap<NodeKey, BTreeSet<NodeKey>>,
    pub variables: VariableStore,
    connections: Vec<Connection>,
    pub(crate) undo_stack: UndoStack,
    pub hooks: Hooks,
    file_path: Option<PathBuf>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let root = Node::new("viewport", NodeType::Frame);
        Self {
            slots: vec![Some(root)],
            root: NodeKey(0),
            unique_index: HashMap::new(),
            instance_index: HashMap::new(),
            variables: VariableStore::new(),
            connections: Vec::new(),
            undo_stack: UndoStack::new(),
            hooks: Hooks::default(),
            file_path: None,
        }
    }

    /// The synthetic viewport node owning all top-level children.
    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.slots
            .get(key.0 as usize)
            .map(Option::is_some)
            .unwrap_or(false)
    }

    pub fn try_node(&self, key: NodeKey) -> Option<&Node> {
        self.slots.get(key.0 as usize)?.as_ref()
    }

    /// Panics on a stale key; callers re-resolve by path across operations
    /// that may delete nodes.
    pub fn node(&self, key: NodeKey) -> &Node {
        self.try_node(key).expect("stale node key")
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> &mut Node {
        self.slots
            .get_mut(key.0 as usize)
            .and_then(Option::as_mut)
            .expect("stale node key")
    }

    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeKey(i as u32), n)))
    }

    pub fn child_index(&self, parent: NodeKey, child: NodeKey) -> Option<usize> {
        self.node(parent).children.iter().position(|&c| c == child)
    }

    pub fn instances_of(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.instance_index
            .get(&key)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub(crate) fn set_file_path(&mut self, path: Option<PathBuf>) {
        self.file_path = path;
    }

    /// Whether the node carries its own identity (fresh id) instead of one
    /// mirrored from its prototype.
    pub(crate) fn data_unique(&self, node: &Node) -> bool {
        match &node.prototype {
            None => true,
            Some(link) => self
                .try_node(link.node)
                .map(|proto| proto.id != node.id)
                .unwrap_or(true),
        }
    }

    // ---- transactions ----

    pub fn begin_update(&self) -> UpdateBlock {
        UpdateBlock::default()
    }

    /// Commit a finished block. With `undo` set the inverse list lands on
    /// the undo stack; otherwise the changes simply stand.
    pub fn commit(&mut self, block: UpdateBlock, options: CommitOptions) {
        if block.patches.is_empty() {
            return;
        }
        tracing::debug!("committing update: {} patch(es)", block.patches.len());
        if options.undo {
            self.undo_stack.push(PatchBatch {
                patches: block.patches,
                description: block.description,
            });
        }
    }

    /// Revert everything the block recorded, in reverse order.
    pub fn rollback(&mut self, block: UpdateBlock) {
        for patch in block.patches.into_iter().rev() {
            self.apply_patch(patch);
        }
        self.hooks.layout.update_layout();
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_stack.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        let Some(batch) = self.undo_stack.pop_undo() else {
            return false;
        };
        let mut inverse = Vec::with_capacity(batch.patches.len());
        for patch in batch.patches.into_iter().rev() {
            inverse.push(self.apply_patch(patch));
        }
        self.undo_stack.push_redo(PatchBatch {
            patches: inverse,
            description: batch.description,
        });
        self.hooks.layout.update_layout();
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(batch) = self.undo_stack.pop_redo() else {
            return false;
        };
        let mut inverse = Vec::with_capacity(batch.patches.len());
        for patch in batch.patches.into_iter().rev() {
            inverse.push(self.apply_patch(patch));
        }
        self.undo_stack.push_undone(PatchBatch {
            patches: inverse,
            description: batch.description,
        });
        self.hooks.layout.update_layout();
        true
    }

    fn perform(&mut self, block: &mut UpdateBlock, patch: Patch) {
        let inverse = self.apply_patch(patch);
        block.record(inverse);
    }

    /// Apply one patch and return its inverse. Index maintenance (unique
    /// ids, instance back-references) happens here so undo and redo stay in
    /// sync with the live graph.
    pub(crate) fn apply_patch(&mut self, patch: Patch) -> Patch {
        match patch {
            Patch::Create { key, node } => {
                let idx = key.0 as usize;
                if idx >= self.slots.len() {
                    self.slots.resize_with(idx + 1, || None);
                }
                self.index_node(key, &node);
                self.slots[idx] = Some(*node);
                Patch::Destroy { key }
            }
            Patch::Destroy { key } => {
                let node = self.slots[key.0 as usize]
                    .take()
                    .expect("destroying vacant node slot");
                self.unindex_node(key, &node);
                Patch::Create {
                    key,
                    node: Box::new(node),
                }
            }
            Patch::Attach {
                parent,
                child,
                index,
            } => {
                let children = &mut self.node_mut(parent).children;
                let index = index.min(children.len());
                children.insert(index, child);
                self.node_mut(child).parent = Some(parent);
                Patch::Detach { parent, child }
            }
            Patch::Detach { parent, child } => {
                let children = &mut self.node_mut(parent).children;
                let index = children.iter().position(|&c| c == child).unwrap_or(0);
                if index < children.len() && children[index] == child {
                    children.remove(index);
                }
                self.node_mut(child).parent = None;
                Patch::Attach {
                    parent,
                    child,
                    index,
                }
            }
            Patch::SetProperty { node, key, value } => {
                let properties = &mut self.node_mut(node).properties;
                let previous = match value {
                    Some(v) => properties.insert(key, v),
                    None => properties.remove(&key),
                };
                Patch::SetProperty {
                    node,
                    key,
                    value: previous,
                }
            }
            Patch::SetOverridden {
                node,
                key,
                overridden,
            } => {
                let previous = match self.node_mut(node).prototype.as_mut() {
                    Some(link) => {
                        let previous = if overridden {
                            !link.overridden.insert(key)
                        } else {
                            link.overridden.remove(&key)
                        };
                        previous
                    }
                    None => overridden,
                };
                Patch::SetOverridden {
                    node,
                    key,
                    overridden: previous,
                }
            }
            Patch::SetChildrenOverridden { node, value } => {
                let previous = match self.node_mut(node).prototype.as_mut() {
                    Some(link) => std::mem::replace(&mut link.children_overridden, value),
                    None => value,
                };
                Patch::SetChildrenOverridden {
                    node,
                    value: previous,
                }
            }
            Patch::SetPrototype { node, link } => {
                let previous = self.node(node).prototype.clone();
                let id = self.node(node).id.clone();
                if let Some(old) = &previous {
                    if let Some(set) = self.instance_index.get_mut(&old.node) {
                        set.remove(&node);
                        if set.is_empty() {
                            self.instance_index.remove(&old.node);
                        }
                    }
                }
                self.node_mut(node).prototype = link.clone();
                if let Some(new) = &link {
                    self.instance_index.entry(new.node).or_default().insert(node);
                }
                let unique = self.data_unique(self.node(node));
                if unique {
                    self.claim_unique(id, node);
                } else if self.unique_index.get(&id) == Some(&node) {
                    self.unique_index.remove(&id);
                }
                Patch::SetPrototype {
                    node,
                    link: previous,
                }
            }
            Patch::SetReusable { node, value } => {
                let previous = std::mem::replace(&mut self.node_mut(node).reusable, value);
                Patch::SetReusable {
                    node,
                    value: previous,
                }
            }
            Patch::SetConnections { connections } => {
                let previous = std::mem::replace(&mut self.connections, connections);
                Patch::SetConnections {
                    connections: previous,
                }
            }
        }
    }

    fn index_node(&mut self, key: NodeKey, node: &Node) {
        if let Some(link) = &node.prototype {
            self.instance_index.entry(link.node).or_default().insert(key);
        }
        if self.data_unique(node) {
            self.claim_unique(node.id.clone(), key);
        }
    }

    /// Register a globally addressable id, without clobbering a live owner.
    /// An entry is only taken over when its current holder is gone or no
    /// longer unique.
    fn claim_unique(&mut self, id: String, key: NodeKey) {
        let existing = self.unique_index.get(&id).copied();
        match existing {
            Some(existing) if existing != key => {
                let stale =
                    !self.contains(existing) || !self.data_unique(self.node(existing));
                if stale {
                    self.unique_index.insert(id, key);
                }
            }
            _ => {
                self.unique_index.insert(id, key);
            }
        }
    }

    fn unindex_node(&mut self, key: NodeKey, node: &Node) {
        if let Some(link) = &node.prototype {
            if let Some(set) = self.instance_index.get_mut(&link.node) {
                set.remove(&key);
                if set.is_empty() {
                    self.instance_index.remove(&link.node);
                }
            }
        }
        self.instance_index.remove(&key);
        if self.unique_index.get(&node.id) == Some(&key) {
            self.unique_index.remove(&node.id);
            // Hand the id to a surviving unique holder. Swap-style
            // operations briefly keep the old and the rebuilt node alive at
            // the same time; whichever outlives the other owns the id.
            let heir = self.slots.iter().enumerate().find_map(|(i, slot)| {
                let candidate = slot.as_ref()?;
                let candidate_key = NodeKey(i as u32);
                (candidate_key != self.root
                    && candidate.id == node.id
                    && self.data_unique(candidate))
                .then_some(candidate_key)
            });
            if let Some(heir) = heir {
                self.unique_index.insert(node.id.clone(), heir);
            }
        }
    }

    pub(crate) fn lookup_unique(&self, id: &str) -> Option<NodeKey> {
        self.unique_index.get(id).copied()
    }

    // ---- mutating primitives ----

    pub fn create_node(
        &mut self,
        block: &mut UpdateBlock,
        id: impl Into<String>,
        node_type: NodeType,
        properties: BTreeMap<PropertyKey, Value>,
    ) -> NodeKey {
        let key = NodeKey(self.slots.len() as u32);
        let mut node = Node::new(id, node_type);
        node.properties = properties;
        self.perform(
            block,
            Patch::Create {
                key,
                node: Box::new(node),
            },
        );
        key
    }

    pub fn attach_child(
        &mut self,
        block: &mut UpdateBlock,
        parent: NodeKey,
        child: NodeKey,
        index: Option<usize>,
    ) {
        let len = self.node(parent).children.len();
        let index = index.unwrap_or(len).min(len);
        self.perform(
            block,
            Patch::Attach {
                parent,
                child,
                index,
            },
        );
        self.hooks.layout.invalidate_layout(parent);
    }

    pub fn detach_child(&mut self, block: &mut UpdateBlock, child: NodeKey) {
        if let Some(parent) = self.node(child).parent {
            self.perform(block, Patch::Detach { parent, child });
            self.hooks.layout.invalidate_layout(parent);
        }
    }

    /// User-level property write: marks the key overridden when the node has
    /// a prototype, then writes with instance cascade.
    pub fn set_property(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        key: PropertyKey,
        value: Option<Value>,
    ) {
        if self.node(node).prototype.is_some() && !self.node(node).is_overridden(key) {
            self.perform(
                block,
                Patch::SetOverridden {
                    node,
                    key,
                    overridden: true,
                },
            );
        }
        self.write_property(block, node, key, value);
    }

    /// Write a property and propagate it to every instance that has not
    /// overridden the key, transitively.
    pub(crate) fn write_property(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        key: PropertyKey,
        value: Option<Value>,
    ) {
        self.perform(
            block,
            Patch::SetProperty {
                node,
                key,
                value: value.clone(),
            },
        );
        if key.affects_layout() {
            self.hooks.layout.invalidate_layout(node);
        }
        let instances: Vec<NodeKey> = self
            .instance_index
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for instance in instances {
            if self.contains(instance) && !self.node(instance).is_overridden(key) {
                self.write_property(block, instance, key, value.clone());
            }
        }
    }

    pub fn set_children_overridden(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        value: bool,
    ) {
        if self.node(node).children_overridden() == value {
            return;
        }
        self.perform(block, Patch::SetChildrenOverridden { node, value });
    }

    pub fn set_prototype(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        link: Option<PrototypeLink>,
    ) {
        self.perform(block, Patch::SetPrototype { node, link });
    }

    pub fn set_reusable(&mut self, block: &mut UpdateBlock, node: NodeKey, value: bool) {
        if self.node(node).reusable == value {
            return;
        }
        self.perform(block, Patch::SetReusable { node, value });
    }

    pub fn add_connection(&mut self, block: &mut UpdateBlock, connection: Connection) {
        let mut next = self.connections.clone();
        next.push(connection);
        self.perform(block, Patch::SetConnections { connections: next });
    }

    pub fn clear_connections(&mut self, block: &mut UpdateBlock) {
        if self.connections.is_empty() {
            return;
        }
        self.perform(
            block,
            Patch::SetConnections {
                connections: Vec::new(),
            },
        );
    }

    /// Detach and destroy a subtree. Destruction is idempotent; prototype
    /// links from surviving instances into the subtree are detached first.
    pub fn remove_subtree(&mut self, block: &mut UpdateBlock, key: NodeKey) {
        if !self.contains(key) {
            return;
        }
        let mut subtree = Vec::new();
        self.collect_subtree(key, &mut subtree);
        let members: HashSet<NodeKey> = subtree.iter().copied().collect();

        let mut orphaned: Vec<NodeKey> = Vec::new();
        for &node in &subtree {
            if let Some(set) = self.instance_index.get(&node) {
                orphaned.extend(set.iter().copied().filter(|i| !members.contains(i)));
            }
        }

        self.detach_child(block, key);
        for &node in subtree.iter().rev() {
            if self.contains(node) {
                self.perform(block, Patch::Destroy { key: node });
            }
        }
        for instance in orphaned {
            if self.contains(instance) {
                self.set_prototype(block, instance, None);
            }
        }
    }

    pub fn clear_children(&mut self, block: &mut UpdateBlock, parent: NodeKey) {
        let children = self.node(parent).children.clone();
        for child in children {
            self.remove_subtree(block, child);
        }
    }

    pub(crate) fn collect_subtree(&self, key: NodeKey, out: &mut Vec<NodeKey>) {
        out.push(key);
        for &child in &self.node(key).children {
            if self.contains(child) {
                self.collect_subtree(child, out);
            }
        }
    }

    // ---- layout commit contract ----

    /// Geometry write-back from the layout engine. Bypasses override
    /// tracking and patch recording.
    pub fn layout_commit_size(&mut self, node: NodeKey, width: f64, height: f64) {
        if self.contains(node) {
            let properties = &mut self.node_mut(node).properties;
            properties.insert(PropertyKey::Width, Value::Number(width));
            properties.insert(PropertyKey::Height, Value::Number(height));
        }
    }

    /// See [`Session::layout_commit_size`].
    pub fn layout_commit_position(&mut self, node: NodeKey, x: f64, y: f64) {
        if self.contains(node) {
            let properties = &mut self.node_mut(node).properties;
            properties.insert(PropertyKey::X, Value::Number(x));
            properties.insert(PropertyKey::Y, Value::Number(y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::default_properties;

    fn frame(session: &mut Session, block: &mut UpdateBlock, id: &str) -> NodeKey {
        let key = session.create_node(
            block,
            id,
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.attach_child(block, session.root(), key, None);
        key
    }

    #[test]
    fn test_create_and_rollback_leaves_no_trace() {
        let mut session = Session::new();
        let before = session.node_count();

        let mut block = session.begin_update();
        let key = frame(&mut session, &mut block, "a");
        assert!(session.contains(key));

        session.rollback(block);
        assert!(!session.contains(key));
        assert_eq!(session.node_count(), before);
        assert!(session.lookup_unique("a").is_none());
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut session = Session::new();
        let mut block = session.begin_update();
        let key = frame(&mut session, &mut block, "a");
        session.commit(block, CommitOptions { undo: true });

        assert!(session.undo());
        assert!(!session.contains(key));
        assert!(session.redo());
        assert!(session.contains(key));
        assert_eq!(session.node(key).id, "a");
        assert_eq!(session.lookup_unique("a"), Some(key));
    }

    #[test]
    fn test_property_write_cascades_to_instances() {
        let mut session = Session::new();
        let mut block = session.begin_update();
        let proto = frame(&mut session, &mut block, "proto");
        let inst = session.create_node(
            &mut block,
            "inst",
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.attach_child(&mut block, session.root(), inst, None);
        session.set_prototype(&mut block, inst, Some(PrototypeLink::new(proto)));

        session.set_property(
            &mut block,
            proto,
            PropertyKey::Width,
            Some(Value::Number(120.0)),
        );
        assert_eq!(
            session.node(inst).property(PropertyKey::Width),
            Some(&Value::Number(120.0))
        );

        // An overridden key stops inheriting.
        session.set_property(
            &mut block,
            inst,
            PropertyKey::Width,
            Some(Value::Number(80.0)),
        );
        session.set_property(
            &mut block,
            proto,
            PropertyKey::Width,
            Some(Value::Number(300.0)),
        );
        assert_eq!(
            session.node(inst).property(PropertyKey::Width),
            Some(&Value::Number(80.0))
        );
        assert!(session.node(inst).is_overridden(PropertyKey::Width));
    }

    #[test]
    fn test_remove_subtree_is_idempotent_and_detaches_instances() {
        let mut session = Session::new();
        let mut block = session.begin_update();
        let proto = frame(&mut session, &mut block, "proto");
        let inst = session.create_node(
            &mut block,
            "inst",
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.attach_child(&mut block, session.root(), inst, None);
        session.set_prototype(&mut block, inst, Some(PrototypeLink::new(proto)));

        session.remove_subtree(&mut block, proto);
        session.remove_subtree(&mut block, proto);
        assert!(!session.contains(proto));
        assert!(session.contains(inst));
        assert!(session.node(inst).prototype().is_none());
    }

    #[test]
    fn test_mirrored_ids_are_not_globally_indexed() {
        let mut session = Session::new();
        let mut block = session.begin_update();
        let proto = frame(&mut session, &mut block, "card");
        let mirror = session.create_node(
            &mut block,
            "card",
            NodeType::Frame,
            default_properties(NodeType::Frame),
        );
        session.set_prototype(&mut block, mirror, Some(PrototypeLink::new(proto)));
        assert_eq!(session.lookup_unique("card"), Some(proto));
    }
}
