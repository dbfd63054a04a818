//! # Tree Mutation Operations
//!
//! The four transactional entry points: [`Session::insert_nodes`],
//! [`Session::move_nodes`], [`Session::replace_node`] and
//! [`Session::copy_node`]. They share one shape:
//!
//! 1. resolve the target parent by canonicalized path and reject structural
//!    edits inside a non-overridden instance subtree;
//! 2. build a scratch identity map: collect literal ids (duplicates raise),
//!    then instantiate depth-first, resolving `ref` entries against
//!    already-resolved prototypes with a grey-set cycle check;
//! 3. rebuild every dependent instance of every affected node so the
//!    structural change propagates unless locally overridden;
//! 4. commit: attach new nodes, swap rebuilt dependents in place, delete
//!    replaced subtrees, nudge layout and the renderer;
//! 5. on any error, delete everything in the scratch map and re-raise. No
//!    partial mutation is observable; the surrounding update block then
//!    rolls back incidental field writes.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value as JsonValue};

use crate::errors::{DataWarning, DocumentError, Warnings};
use crate::JsonMap;
use crate::node::{unique_id, NodeKey, PrototypeLink};
use crate::path::{first_segment, last_segment, replace_last_segment};
use crate::session::{Connection, ConnectionEnd, Session, UpdateBlock};

/// Assign ids where missing, recursively through children, ref children and
/// descendant fragments.
pub(crate) fn assign_missing_ids(value: &mut JsonValue) {
    walk_node_data(value, &mut |obj| {
        let missing = obj
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::is_empty)
            .unwrap_or(true);
        if missing {
            obj.insert("id".to_string(), json!(unique_id()));
        }
    });
}

/// Visit every node-data object reachable from `value`, in document order.
pub(crate) fn walk_node_data(value: &mut JsonValue, visit: &mut dyn FnMut(&mut JsonMap)) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    visit(obj);
    let ty = obj
        .get("type")
        .and_then(JsonValue::as_str)
        .unwrap_or("")
        .to_string();
    match ty.as_str() {
        "frame" | "group" => {
            if let Some(JsonValue::Array(children)) = obj.get_mut("children") {
                for child in children {
                    walk_node_data(child, visit);
                }
            }
        }
        "ref" => {
            if obj.get("children").map(JsonValue::is_array).unwrap_or(false) {
                if let Some(JsonValue::Array(children)) = obj.get_mut("children") {
                    for child in children {
                        walk_node_data(child, visit);
                    }
                }
            } else if let Some(JsonValue::Object(descendants)) = obj.get_mut("descendants") {
                for fragment in descendants.values_mut() {
                    let is_full_node = fragment
                        .as_object()
                        .map(|f| f.contains_key("type"))
                        .unwrap_or(false);
                    if is_full_node {
                        walk_node_data(fragment, visit);
                    } else if let Some(JsonValue::Array(children)) = fragment
                        .as_object_mut()
                        .and_then(|f| f.get_mut("children"))
                    {
                        for child in children {
                            walk_node_data(child, visit);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Collect every literal id in the input into `map`. Duplicate ids and ids
/// containing a slash raise.
pub(crate) fn collect_ids(
    value: &JsonValue,
    map: &mut HashMap<String, JsonMap>,
) -> Result<(), DocumentError> {
    let Some(obj) = value.as_object() else {
        return Err(DocumentError::MalformedDocument(
            "node data must be an object".to_string(),
        ));
    };
    let id = obj
        .get("id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| DocumentError::MalformedDocument("node data missing an id".to_string()))?
        .to_string();
    if id.contains('/') {
        return Err(DocumentError::InvalidId(id));
    }
    if map.contains_key(&id) {
        return Err(DocumentError::DuplicateId(id));
    }
    map.insert(id, obj.clone());

    let ty = obj.get("type").and_then(JsonValue::as_str).unwrap_or("");
    match ty {
        "frame" | "group" => {
            if let Some(children) = obj.get("children").and_then(JsonValue::as_array) {
                for child in children {
                    collect_ids(child, map)?;
                }
            }
        }
        "ref" => {
            if let Some(children) = obj.get("children").and_then(JsonValue::as_array) {
                for child in children {
                    collect_ids(child, map)?;
                }
            } else if let Some(descendants) = obj.get("descendants").and_then(JsonValue::as_object)
            {
                for fragment in descendants.values() {
                    let Some(frag) = fragment.as_object() else {
                        continue;
                    };
                    if frag.contains_key("type") {
                        collect_ids(fragment, map)?;
                    } else if let Some(children) =
                        frag.get("children").and_then(JsonValue::as_array)
                    {
                        for child in children {
                            collect_ids(child, map)?;
                        }
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_connection(obj: &JsonMap) -> Option<Connection> {
    let end = |name: &str| -> Option<ConnectionEnd> {
        let e = obj.get(name)?.as_object()?;
        Some(ConnectionEnd {
            path: e.get("path")?.as_str()?.to_string(),
            anchor: e
                .get("anchor")
                .and_then(JsonValue::as_str)
                .unwrap_or("center")
                .to_string(),
        })
    };
    Some(Connection {
        id: obj.get("id")?.as_str()?.to_string(),
        source: end("source")?,
        target: end("target")?,
    })
}

/// Merge `source`'s override payload into `target` where `target` has no
/// entry of its own. Structural identity keys stay untouched.
fn merge_absent(target: &mut JsonMap, source: &JsonMap) {
    for (key, value) in source {
        match key.as_str() {
            "id" | "type" | "ref" | "reusable" => continue,
            "descendants" => {
                let Some(src) = value.as_object() else {
                    continue;
                };
                let entry = target
                    .entry("descendants".to_string())
                    .or_insert_with(|| JsonValue::Object(JsonMap::new()));
                if let Some(dst) = entry.as_object_mut() {
                    for (k, v) in src {
                        dst.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            _ => {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
}

/// New-root splice: while rebuilding dependents of the insertion parent, the
/// parent's child list is seen with the new roots already in place.
#[derive(Debug, Clone)]
struct SpliceContext {
    parent: NodeKey,
    index: usize,
    roots: Vec<String>,
}

/// Scratch identity map builder shared by insert and replace.
struct ScratchBuilder<'a> {
    session: &'a mut Session,
    block: &'a mut UpdateBlock,
    warnings: &'a mut Warnings,
    /// Literal input data by id.
    data: HashMap<String, JsonMap>,
    /// Existing instances scheduled for re-derivation, by id.
    dependents: HashMap<String, NodeKey>,
    /// Resolved nodes by id.
    built: HashMap<String, NodeKey>,
    /// Grey set for the reference-cycle walk.
    resolving: HashSet<String>,
    /// Every node created so far, for error cleanup.
    created: Vec<NodeKey>,
    splice: Option<SpliceContext>,
}

impl<'a> ScratchBuilder<'a> {
    fn new(
        session: &'a mut Session,
        block: &'a mut UpdateBlock,
        warnings: &'a mut Warnings,
        data: HashMap<String, JsonMap>,
        dependents: HashMap<String, NodeKey>,
        splice: Option<SpliceContext>,
    ) -> Self {
        Self {
            session,
            block,
            warnings,
            data,
            dependents,
            built: HashMap::new(),
            resolving: HashSet::new(),
            created: Vec::new(),
            splice,
        }
    }

    fn run(&mut self, ids: &[String]) -> Result<(), DocumentError> {
        for id in ids {
            self.resolve_entry(id)?;
        }
        Ok(())
    }

    fn create(
        &mut self,
        id: &str,
        node_type: crate::node::NodeType,
        properties: std::collections::BTreeMap<crate::node::PropertyKey, crate::node::Value>,
    ) -> NodeKey {
        let key = self.session.create_node(self.block, id, node_type, properties);
        self.created.push(key);
        key
    }

    /// Resolve one id: build it from input data, or rebuild it as a
    /// dependent instance, or conclude it's an existing node and leave it.
    fn resolve_entry(&mut self, id: &str) -> Result<(), DocumentError> {
        if self.resolving.contains(id) {
            return Err(DocumentError::ReferenceCycle(id.to_string()));
        }
        if self.built.contains_key(id) {
            return Ok(());
        }
        self.resolving.insert(id.to_string());
        let result = self.resolve_entry_inner(id);
        self.resolving.remove(id);
        result
    }

    fn resolve_entry_inner(&mut self, id: &str) -> Result<(), DocumentError> {
        if let Some(entry) = self.data.get(id).cloned() {
            let ty = entry.get("type").and_then(JsonValue::as_str).unwrap_or("");
            if ty == "connection" {
                return Ok(());
            }
            if ty == "ref" {
                return self.build_ref(entry);
            }

            let Some((node_type, properties)) = self.session.parse_node_data(&entry, self.warnings)
            else {
                self.warnings.report(DataWarning::MalformedNode(id.to_string()));
                return Ok(());
            };
            let key = self.create(id, node_type, properties);
            let reusable = entry
                .get("reusable")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            self.session.set_reusable(self.block, key, reusable);
            self.built.insert(id.to_string(), key);

            if node_type.allows_children() {
                if let Some(children) = entry.get("children").and_then(JsonValue::as_array) {
                    for child in children.clone() {
                        let Some(cid) = child.get("id").and_then(JsonValue::as_str) else {
                            continue;
                        };
                        self.resolve_entry(cid)?;
                        match self.built.get(cid).copied() {
                            Some(built) => {
                                self.session.attach_child(self.block, key, built, None)
                            }
                            None => self.warnings.report(DataWarning::MissingChild {
                                parent: id.to_string(),
                                child: cid.to_string(),
                            }),
                        }
                    }
                }
            }
            Ok(())
        } else if let Some(&dependent) = self.dependents.get(id) {
            if self.session.node(dependent).prototype().is_none() {
                return Err(DocumentError::MissingPrototype(id.to_string()));
            }
            let doc = self.session.collect_overrides(dependent)?;
            // Register the collected document's literal ids (unique children
            // serialized whole) so refs can find them.
            collect_ids(&JsonValue::Object(doc.clone()), &mut self.data)?;
            self.build_ref(doc)
        } else {
            // An existing node that isn't being rebuilt.
            Ok(())
        }
    }

    fn build_ref(&mut self, doc: JsonMap) -> Result<(), DocumentError> {
        let id = doc
            .get("id")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(reference) = doc.get("ref").and_then(JsonValue::as_str).map(str::to_string)
        else {
            self.warnings.report(DataWarning::MalformedNode(id));
            return Ok(());
        };

        self.resolve_entry(first_segment(&reference))?;
        let proto = self
            .built
            .get(reference.as_str())
            .copied()
            .or_else(|| self.session.resolve_path(&reference));
        let Some(proto) = proto else {
            self.warnings.report(DataWarning::InvalidRef(reference));
            return Ok(());
        };

        let mut doc = doc;
        self.session
            .canonicalize_descendants(proto, &mut doc, self.warnings);
        if let Some(root) = self.build_from_source(proto, &doc, None)? {
            self.session.ensure_prototype_reusable(self.block, root);
        }
        Ok(())
    }

    /// Clone `source` depth-first, attaching each clone to its source as
    /// prototype and applying the override fragment addressed by `rel`.
    fn build_from_source(
        &mut self,
        source: NodeKey,
        doc: &JsonMap,
        rel: Option<&str>,
    ) -> Result<Option<NodeKey>, DocumentError> {
        let mut source = source;
        // A source scheduled for re-derivation is cloned from its rebuilt
        // form, so nested dependents compose.
        let source_id = self.session.node(source).id.clone();
        if self.dependents.get(&source_id) == Some(&source) {
            self.resolve_entry(&source_id)?;
            if let Some(&rebuilt) = self.built.get(&source_id) {
                source = rebuilt;
            }
        }

        let doc_id = doc
            .get("id")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let fragment: Option<JsonMap> = match rel {
            None => Some(doc.clone()),
            Some(rel) => doc
                .get("descendants")
                .and_then(JsonValue::as_object)
                .and_then(|d| d.get(rel))
                .and_then(JsonValue::as_object)
                .cloned(),
        };

        if rel.is_some() {
            if let Some(frag) = fragment.as_ref() {
                if frag.contains_key("type") {
                    // A full node stored at this position replaces the
                    // mirror outright (a unique child).
                    let Some(fid) = frag.get("id").and_then(JsonValue::as_str).map(str::to_string)
                    else {
                        return Ok(None);
                    };
                    self.resolve_entry(&fid)?;
                    return Ok(self.built.get(&fid).copied());
                }
            }
        }

        let frag_children: Option<Vec<JsonValue>> = fragment
            .as_ref()
            .and_then(|f| f.get("children"))
            .and_then(JsonValue::as_array)
            .cloned();

        let new_id = match rel {
            Some(rel) => last_segment(rel).to_string(),
            None => doc_id.clone(),
        };
        let node_type = self.session.node(source).node_type;
        let properties = self.session.node(source).properties.clone();
        let key = self.create(&new_id, node_type, properties);
        if rel.is_none() {
            self.built.insert(doc_id, key);
        }

        let mut link = PrototypeLink::new(source);
        link.children_overridden = frag_children.is_some();
        self.session.set_prototype(self.block, key, Some(link));
        if rel.is_none() {
            let reusable = doc
                .get("reusable")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            self.session.set_reusable(self.block, key, reusable);
        }
        if let Some(frag) = &fragment {
            self.session
                .apply_fragment_properties(self.block, key, frag, self.warnings);
        }

        if let Some(children) = frag_children {
            for child in &children {
                let Some(cid) = child.get("id").and_then(JsonValue::as_str) else {
                    continue;
                };
                self.resolve_entry(cid)?;
                match self.built.get(cid).copied() {
                    Some(built) => self.session.attach_child(self.block, key, built, None),
                    None => self.warnings.report(DataWarning::MissingChild {
                        parent: new_id.clone(),
                        child: cid.to_string(),
                    }),
                }
            }
        } else {
            let source_children: Vec<NodeKey> =
                if self.splice.as_ref().map(|s| s.parent) == Some(source) {
                    let ctx = self.splice.clone().expect("splice context present");
                    let mut list = self.session.node(source).children().to_vec();
                    let mut inserted = Vec::new();
                    for root in &ctx.roots {
                        self.resolve_entry(root)?;
                        if let Some(&built) = self.built.get(root) {
                            inserted.push(built);
                        }
                    }
                    let at = ctx.index.min(list.len());
                    list.splice(at..at, inserted);
                    list
                } else {
                    self.session.node(source).children().to_vec()
                };

            for child_source in source_children {
                if !self.session.contains(child_source) {
                    continue;
                }
                let child_id = self.session.node(child_source).id.clone();
                let child_rel = match rel {
                    None => child_id.clone(),
                    Some(prefix) => {
                        if self.session.is_unique(child_source) {
                            child_id.clone()
                        } else if self.session.is_instance_boundary(key) {
                            format!("{prefix}/{child_id}")
                        } else {
                            replace_last_segment(prefix, &child_id)
                        }
                    }
                };
                if let Some(built) = self.build_from_source(child_source, doc, Some(&child_rel))? {
                    self.session.attach_child(self.block, key, built, None);
                }
            }
        }
        Ok(Some(key))
    }
}

/// One entry of a [`Session::move_nodes`] batch. `parent: None` addresses
/// the document root; `index: None` appends.
#[derive(Debug, Clone)]
pub struct NodeMove {
    pub node: String,
    pub parent: Option<String>,
    pub index: Option<usize>,
}

impl Session {
    fn resolve_parent(&self, path: Option<&str>) -> Result<NodeKey, DocumentError> {
        match path {
            None => Ok(self.root()),
            Some(p) => {
                let canonical = self.canonicalize(p).unwrap_or_else(|| p.to_string());
                self.resolve_path(&canonical)
                    .ok_or_else(|| DocumentError::MissingParent(p.to_string()))
            }
        }
    }

    fn parent_label(&self, path: Option<&str>) -> String {
        path.unwrap_or("viewport").to_string()
    }

    fn guard_structural_parent(
        &self,
        parent: NodeKey,
        label: &str,
    ) -> Result<(), DocumentError> {
        let node = self.node(parent);
        if node.prototype().is_some() && !node.children().is_empty() && !node.children_overridden()
        {
            return Err(DocumentError::InstanceDescendant(label.to_string()));
        }
        if parent != self.root() && !node.node_type.allows_children() {
            return Err(DocumentError::ChildrenNotAllowed {
                parent: label.to_string(),
                node_type: node.node_type,
            });
        }
        Ok(())
    }

    fn check_index(
        &self,
        parent: NodeKey,
        label: &str,
        index: Option<usize>,
    ) -> Result<(), DocumentError> {
        if let Some(index) = index {
            let children = self.node(parent).children().len();
            if index > children {
                return Err(DocumentError::InvalidIndex {
                    parent: label.to_string(),
                    index,
                    children,
                });
            }
        }
        Ok(())
    }

    /// Transitive set of instances affected by a structural change at
    /// `start`: every unique instance of the node, of those instances, and
    /// of every ancestor.
    pub(crate) fn dependent_instances(
        &self,
        start: NodeKey,
        seen: &mut HashSet<NodeKey>,
        out: &mut HashMap<String, NodeKey>,
    ) {
        if !seen.insert(start) {
            return;
        }
        let instances: Vec<NodeKey> = self.instances_of(start).collect();
        for instance in instances {
            if self.contains(instance) && self.is_unique(instance) {
                out.insert(self.node(instance).id.clone(), instance);
                self.dependent_instances(instance, seen, out);
            }
        }
        if let Some(parent) = self.node(start).parent() {
            self.dependent_instances(parent, seen, out);
        }
    }

    fn swap_in_place(
        &mut self,
        block: &mut UpdateBlock,
        old: NodeKey,
        new: NodeKey,
    ) -> Result<(), DocumentError> {
        let Some(parent) = self.node(old).parent() else {
            return Err(DocumentError::MalformedDocument(format!(
                "no parent for node '{}'",
                self.node(old).id
            )));
        };
        let index = self.child_index(parent, old);
        self.detach_child(block, old);
        self.attach_child(block, parent, new, index);
        Ok(())
    }

    /// Mark the prototypes referenced from `root`'s subtree reusable.
    pub(crate) fn ensure_prototype_reusable(&mut self, block: &mut UpdateBlock, root: NodeKey) {
        let mut subtree = Vec::new();
        self.collect_subtree(root, &mut subtree);
        for key in subtree {
            let proto = self.node(key).prototype().map(|l| l.node);
            if let Some(proto) = proto {
                if self.contains(proto) && !self.node(proto).reusable {
                    self.set_reusable(block, proto, true);
                }
            }
        }
    }

    fn cleanup_scratch(&mut self, block: &mut UpdateBlock, created: &[NodeKey]) {
        for &key in created {
            if self.contains(key) {
                self.remove_subtree(block, key);
            }
        }
    }

    /// Insert a batch of node data under `parent_path` (the document root
    /// when `None`), rebuilding dependent instances of the parent.
    ///
    /// Returns the keys of the inserted roots. On error every scratch node
    /// is deleted before the error propagates.
    pub fn insert_nodes(
        &mut self,
        block: &mut UpdateBlock,
        parent_path: Option<&str>,
        index: Option<usize>,
        data: &[JsonValue],
        warnings: &mut Warnings,
    ) -> Result<Vec<NodeKey>, DocumentError> {
        let label = self.parent_label(parent_path);
        let parent = self.resolve_parent(parent_path)?;
        self.guard_structural_parent(parent, &label)?;
        self.check_index(parent, &label, index)?;
        if self.node(parent).prototype().is_some() && !self.node(parent).children_overridden() {
            self.set_children_overridden(block, parent, true);
        }

        let mut data: Vec<JsonValue> = data.to_vec();
        for entry in &mut data {
            assign_missing_ids(entry);
        }

        let mut id_map: HashMap<String, JsonMap> = HashMap::new();
        for entry in &data {
            collect_ids(entry, &mut id_map)?;
        }
        for id in id_map.keys() {
            if self.resolve_path(id).is_some() {
                return Err(DocumentError::DuplicateId(id.clone()));
            }
        }

        let mut seen = HashSet::new();
        let mut dependents = HashMap::new();
        self.dependent_instances(parent, &mut seen, &mut dependents);

        let roots: Vec<String> = data
            .iter()
            .filter_map(|d| d.get("id").and_then(JsonValue::as_str).map(str::to_string))
            .collect();
        let connections: Vec<Connection> = data
            .iter()
            .filter_map(JsonValue::as_object)
            .filter(|o| o.get("type").and_then(JsonValue::as_str) == Some("connection"))
            .filter_map(parse_connection)
            .collect();

        let splice = SpliceContext {
            parent,
            index: index.unwrap_or_else(|| self.node(parent).children().len()),
            roots: roots.clone(),
        };
        let run_ids: Vec<String> = roots
            .iter()
            .cloned()
            .chain(dependents.keys().cloned())
            .collect();

        let (built, created, run_result) = {
            let mut builder = ScratchBuilder::new(
                self,
                block,
                warnings,
                id_map,
                dependents.clone(),
                Some(splice),
            );
            let result = builder.run(&run_ids);
            (
                std::mem::take(&mut builder.built),
                std::mem::take(&mut builder.created),
                result,
            )
        };
        if let Err(err) = run_result {
            self.cleanup_scratch(block, &created);
            return Err(err);
        }

        let commit = (|| -> Result<Vec<NodeKey>, DocumentError> {
            let mut attached = Vec::new();
            for (offset, root) in roots.iter().enumerate() {
                if let Some(&key) = built.get(root) {
                    self.attach_child(block, parent, key, index.map(|i| i + offset));
                    attached.push(key);
                }
            }
            for (dep_id, &old) in &dependents {
                if let Some(&new) = built.get(dep_id) {
                    self.swap_in_place(block, old, new)?;
                }
            }
            for (dep_id, &old) in &dependents {
                if built.contains_key(dep_id) {
                    self.remove_subtree(block, old);
                }
            }
            self.hooks.layout.update_layout();
            for &key in &attached {
                self.hooks.renderer.node_changed(key);
            }
            for connection in connections {
                self.add_connection(block, connection);
            }
            Ok(attached)
        })();

        match commit {
            Ok(keys) => Ok(keys),
            Err(err) => {
                self.cleanup_scratch(block, &created);
                Err(err)
            }
        }
    }

    /// Reparent existing nodes. No creation happens; the instance-descendant
    /// guard and the surrounding update block provide the
    /// success-or-fully-reverted contract.
    pub fn move_nodes(
        &mut self,
        block: &mut UpdateBlock,
        moves: &[NodeMove],
    ) -> Result<(), DocumentError> {
        for request in moves {
            let path = self
                .canonicalize(&request.node)
                .unwrap_or_else(|| request.node.clone());
            let node = self
                .resolve_path(&path)
                .ok_or_else(|| DocumentError::MissingNode(request.node.clone()))?;
            // Detaching from a mirrored child list is as structural as
            // attaching to one.
            if let Some(source) = self.node(node).parent() {
                if self.node(source).prototype().is_some()
                    && !self.node(source).children_overridden()
                {
                    return Err(DocumentError::InstanceDescendant(self.node_path(source)));
                }
            }
            let label = self.parent_label(request.parent.as_deref());
            let parent = self.resolve_parent(request.parent.as_deref())?;
            self.guard_structural_parent(parent, &label)?;

            let mut ancestor = Some(parent);
            while let Some(current) = ancestor {
                if current == node {
                    return Err(DocumentError::MoveCycle(request.node.clone()));
                }
                ancestor = self.node(current).parent();
            }

            if self.node(parent).prototype().is_some() && !self.node(parent).children_overridden()
            {
                self.set_children_overridden(block, parent, true);
            }
            self.detach_child(block, node);
            self.attach_child(block, parent, node, request.index);
            self.hooks.renderer.node_changed(node);
        }
        self.hooks.layout.update_layout();
        Ok(())
    }

    /// Replace one subtree with freshly built data, inheriting the replaced
    /// node's overrides (incoming values win) and rebuilding dependents.
    pub fn replace_node(
        &mut self,
        block: &mut UpdateBlock,
        target_path: &str,
        data: JsonValue,
        warnings: &mut Warnings,
    ) -> Result<NodeKey, DocumentError> {
        let path = self
            .canonicalize(target_path)
            .unwrap_or_else(|| target_path.to_string());
        let target = self
            .resolve_path(&path)
            .ok_or_else(|| DocumentError::MissingNode(target_path.to_string()))?;
        if target == self.root() {
            return Err(DocumentError::MalformedDocument(
                "cannot replace the document root".to_string(),
            ));
        }
        self.hooks.renderer.node_changed(target);

        let mut data = data;
        assign_missing_ids(&mut data);

        // Inherit the replaced node's overrides under the incoming data.
        if self.node(target).prototype().is_some()
            && data.get("type").and_then(JsonValue::as_str) == Some("ref")
        {
            let collected = self.collect_overrides(target)?;
            if let Some(obj) = data.as_object_mut() {
                merge_absent(obj, &collected);
            }
        }

        let mut subtree = Vec::new();
        self.collect_subtree(target, &mut subtree);
        let subtree_set: HashSet<NodeKey> = subtree.iter().copied().collect();
        let subtree_paths: HashSet<String> =
            subtree.iter().map(|&k| self.node_path(k)).collect();

        let mut id_map: HashMap<String, JsonMap> = HashMap::new();
        collect_ids(&data, &mut id_map)?;
        for id in id_map.keys() {
            if !subtree_paths.contains(id) && self.resolve_path(id).is_some() {
                return Err(DocumentError::DuplicateId(id.clone()));
            }
        }
        let data_id = data
            .get("id")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        // Replaced nodes lose reusable unless the incoming data re-asserts it.
        for &key in &subtree {
            let keep = id_map
                .get(&self.node(key).id)
                .and_then(|m| m.get("reusable"))
                .and_then(JsonValue::as_bool)
                .unwrap_or(false);
            if !keep {
                self.set_reusable(block, key, false);
            }
        }

        let mut seen = HashSet::new();
        let mut dependents = HashMap::new();
        for &key in &subtree {
            self.dependent_instances(key, &mut seen, &mut dependents);
        }
        dependents.retain(|_, key| !subtree_set.contains(key));

        let run_ids: Vec<String> = std::iter::once(data_id.clone())
            .chain(dependents.keys().cloned())
            .collect();

        let (built, created, run_result) = {
            let mut builder =
                ScratchBuilder::new(self, block, warnings, id_map, dependents.clone(), None);
            let result = builder.run(&run_ids);
            (
                std::mem::take(&mut builder.built),
                std::mem::take(&mut builder.created),
                result,
            )
        };
        if let Err(err) = run_result {
            self.cleanup_scratch(block, &created);
            return Err(err);
        }

        let commit = (|| -> Result<NodeKey, DocumentError> {
            let new = built
                .get(&data_id)
                .copied()
                .ok_or_else(|| DocumentError::EmptyReplacement(path.clone()))?;
            self.swap_in_place(block, target, new)?;
            for (dep_id, &old) in &dependents {
                if let Some(&rebuilt) = built.get(dep_id) {
                    self.swap_in_place(block, old, rebuilt)?;
                }
            }
            self.remove_subtree(block, target);
            for (dep_id, &old) in &dependents {
                if built.contains_key(dep_id) {
                    self.remove_subtree(block, old);
                }
            }
            self.hooks.layout.update_layout();
            self.hooks.renderer.node_changed(new);
            Ok(new)
        })();

        match commit {
            Ok(new) => Ok(new),
            Err(err) => {
                self.cleanup_scratch(block, &created);
                Err(err)
            }
        }
    }

    /// Instantiate a fresh subtree from an existing node as prototype,
    /// assign it a new unique id, then apply an override document to it.
    ///
    /// `doc` addresses the source node through its `id` entry; the remaining
    /// entries are the override payload for the copy.
    pub fn copy_node(
        &mut self,
        block: &mut UpdateBlock,
        parent_path: Option<&str>,
        index: Option<usize>,
        doc: JsonValue,
        warnings: &mut Warnings,
    ) -> Result<NodeKey, DocumentError> {
        let label = self.parent_label(parent_path);
        let parent = self.resolve_parent(parent_path)?;
        self.guard_structural_parent(parent, &label)?;
        self.check_index(parent, &label, index)?;
        if self.node(parent).prototype().is_some() && !self.node(parent).children_overridden() {
            self.set_children_overridden(block, parent, true);
        }

        let Some(mut doc_map) = doc.as_object().cloned() else {
            return Err(DocumentError::MalformedDocument(
                "copy document must be an object".to_string(),
            ));
        };
        let source_ref = doc_map
            .get("id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                DocumentError::MalformedDocument("copy document missing source id".to_string())
            })?
            .to_string();
        let source_path = self
            .canonicalize(&source_ref)
            .unwrap_or_else(|| source_ref.clone());
        let source = self
            .resolve_path(&source_path)
            .ok_or_else(|| DocumentError::MissingNode(source_ref.clone()))?;

        self.canonicalize_descendants(source, &mut doc_map, warnings);
        doc_map.remove("id");

        let clone = self.instantiate_subtree(block, source, &unique_id());
        let commit = (|| -> Result<NodeKey, DocumentError> {
            self.attach_child(block, parent, clone, index);
            self.apply_overrides(block, clone, &JsonValue::Object(doc_map.clone()), warnings)?;
            self.ensure_prototype_reusable(block, clone);
            self.hooks.layout.update_layout();
            self.hooks.renderer.node_changed(clone);
            Ok(clone)
        })();

        match commit {
            Ok(key) => Ok(key),
            Err(err) => {
                self.remove_subtree(block, clone);
                Err(err)
            }
        }
    }

    /// Clone a subtree, attaching every clone to its source as prototype.
    pub(crate) fn instantiate_subtree(
        &mut self,
        block: &mut UpdateBlock,
        source: NodeKey,
        root_id: &str,
    ) -> NodeKey {
        let node_type = self.node(source).node_type;
        let properties = self.node(source).properties.clone();
        let key = self.create_node(block, root_id, node_type, properties);
        self.set_prototype(block, key, Some(PrototypeLink::new(source)));
        let children = self.node(source).children().to_vec();
        for child in children {
            let child_id = self.node(child).id.clone();
            let built = self.instantiate_subtree(block, child, &child_id);
            self.attach_child(block, key, built, None);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, PropertyKey, Value};
    use crate::session::CommitOptions;

    fn insert(
        session: &mut Session,
        parent: Option<&str>,
        index: Option<usize>,
        data: JsonValue,
    ) -> Result<Vec<NodeKey>, DocumentError> {
        let mut block = session.begin_update();
        let mut warnings = Warnings::new();
        let entries = match data {
            JsonValue::Array(list) => list,
            single => vec![single],
        };
        let result = session.insert_nodes(&mut block, parent, index, &entries, &mut warnings);
        match &result {
            Ok(_) => session.commit(block, CommitOptions { undo: true }),
            Err(_) => session.rollback(block),
        }
        result
    }

    #[test]
    fn test_insert_frame_with_children_at_index_zero() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([{ "id": "existing", "type": "rectangle" }]),
        )
        .unwrap();

        let keys = insert(
            &mut session,
            None,
            Some(0),
            json!([{
                "type": "frame",
                "children": [
                    { "type": "rectangle", "width": 10.0 },
                    { "type": "rectangle", "width": 20.0 }
                ]
            }]),
        )
        .unwrap();
        assert_eq!(keys.len(), 1);

        let root = session.root();
        assert_eq!(session.node(root).children()[0], keys[0]);
        let frame = session.node(keys[0]);
        assert_eq!(frame.node_type, NodeType::Frame);
        assert_eq!(frame.children().len(), 2);
        // Missing ids were generated.
        assert!(!frame.id.is_empty());
        let first = session.node(frame.children()[0]);
        let second = session.node(frame.children()[1]);
        assert_eq!(first.property(PropertyKey::Width), Some(&Value::Number(10.0)));
        assert_eq!(second.property(PropertyKey::Width), Some(&Value::Number(20.0)));
    }

    #[test]
    fn test_duplicate_id_raises_and_rolls_back() {
        let mut session = Session::new();
        insert(&mut session, None, None, json!([{ "id": "a", "type": "rectangle" }])).unwrap();
        let before = session.node_count();

        let err = insert(&mut session, None, None, json!([{ "id": "a", "type": "rectangle" }]));
        assert!(matches!(err, Err(DocumentError::DuplicateId(id)) if id == "a"));
        assert_eq!(session.node_count(), before);
    }

    #[test]
    fn test_ref_cycle_raises_and_leaves_graph_unmodified() {
        let mut session = Session::new();
        let before = session.node_count();
        let err = insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "a", "type": "ref", "ref": "b" },
                { "id": "b", "type": "ref", "ref": "a" }
            ]),
        );
        assert!(matches!(err, Err(DocumentError::ReferenceCycle(_))));
        assert_eq!(session.node_count(), before);
        assert!(session.resolve_path("a").is_none());
        assert!(session.resolve_path("b").is_none());
    }

    #[test]
    fn test_invalid_index_raises() {
        let mut session = Session::new();
        let err = insert(
            &mut session,
            None,
            Some(3),
            json!([{ "type": "rectangle" }]),
        );
        assert!(matches!(err, Err(DocumentError::InvalidIndex { index: 3, .. })));
    }

    #[test]
    fn test_instance_creation_and_prototype_edit_propagation() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "card", "type": "frame", "children": [
                    { "id": "title", "type": "text", "content": "Card" }
                ]},
                { "id": "card-1", "type": "ref", "ref": "card" }
            ]),
        )
        .unwrap();

        let instance = session.resolve_path("card-1").unwrap();
        assert_eq!(session.node(instance).children().len(), 1);
        let mirrored = session.resolve_path("card-1/title").unwrap();
        assert_eq!(
            session.node(mirrored).property(PropertyKey::Content),
            Some(&Value::Text("Card".into()))
        );
        // Creating the instance marked the prototype reusable.
        let card = session.resolve_path("card").unwrap();
        assert!(session.node(card).reusable);

        // Editing the prototype cascades to the non-overriding mirror.
        let title = session.resolve_path("title").unwrap();
        let mut block = session.begin_update();
        session.set_property(
            &mut block,
            title,
            PropertyKey::Content,
            Some(Value::Text("Hello".into())),
        );
        session.commit(block, CommitOptions { undo: true });
        assert_eq!(
            session.node(mirrored).property(PropertyKey::Content),
            Some(&Value::Text("Hello".into()))
        );
    }

    #[test]
    fn test_structural_insert_rebuilds_dependent_instances() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "card", "type": "frame", "children": [
                    { "id": "title", "type": "text" }
                ]},
                { "id": "card-1", "type": "ref", "ref": "card" }
            ]),
        )
        .unwrap();

        insert(
            &mut session,
            Some("card"),
            None,
            json!([{ "id": "badge", "type": "rectangle" }]),
        )
        .unwrap();

        // The instance was re-derived and mirrors the new child.
        let instance = session.resolve_path("card-1").unwrap();
        assert_eq!(session.node(instance).children().len(), 2);
        let mirrored_badge = session.resolve_path("card-1/badge").unwrap();
        assert_eq!(session.node(mirrored_badge).node_type, NodeType::Rectangle);
    }

    #[test]
    fn test_insert_into_instance_without_children_override_rejected() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "card", "type": "frame", "children": [
                    { "id": "title", "type": "text" }
                ]},
                { "id": "card-1", "type": "ref", "ref": "card" }
            ]),
        )
        .unwrap();

        let err = insert(
            &mut session,
            Some("card-1"),
            None,
            json!([{ "id": "extra", "type": "rectangle" }]),
        );
        assert!(matches!(err, Err(DocumentError::InstanceDescendant(_))));
    }

    #[test]
    fn test_move_nodes_reparents_and_rejects_cycles() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "a", "type": "frame", "children": [
                    { "id": "inner", "type": "frame" }
                ]},
                { "id": "b", "type": "rectangle" }
            ]),
        )
        .unwrap();

        let mut block = session.begin_update();
        session
            .move_nodes(
                &mut block,
                &[NodeMove {
                    node: "b".into(),
                    parent: Some("a".into()),
                    index: Some(0),
                }],
            )
            .unwrap();
        session.commit(block, CommitOptions { undo: true });

        let a = session.resolve_path("a").unwrap();
        let b = session.resolve_path("b").unwrap();
        assert_eq!(session.node(a).children()[0], b);

        let mut block = session.begin_update();
        let err = session.move_nodes(
            &mut block,
            &[NodeMove {
                node: "a".into(),
                parent: Some("inner".into()),
                index: None,
            }],
        );
        session.rollback(block);
        assert!(matches!(err, Err(DocumentError::MoveCycle(_))));
    }

    #[test]
    fn test_move_out_of_instance_rejected() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "card", "type": "frame", "children": [
                    { "id": "title", "type": "text" }
                ]},
                { "id": "card-1", "type": "ref", "ref": "card" }
            ]),
        )
        .unwrap();

        let mut block = session.begin_update();
        let err = session.move_nodes(
            &mut block,
            &[NodeMove {
                node: "card-1/title".into(),
                parent: None,
                index: None,
            }],
        );
        session.rollback(block);
        assert!(matches!(err, Err(DocumentError::InstanceDescendant(_))));
    }

    #[test]
    fn test_replace_preserves_local_overrides() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([
                { "id": "card", "type": "frame", "width": 100.0, "children": [] },
                { "id": "card-1", "type": "ref", "ref": "card",
                  "width": 40.0, "opacity": 0.5, "name": "special" }
            ]),
        )
        .unwrap();

        let instance = session.resolve_path("card-1").unwrap();
        assert!(session.node(instance).is_overridden(PropertyKey::Width));

        // Replace with a plain ref to the same prototype; the three local
        // overrides survive the swap.
        let mut block = session.begin_update();
        let mut warnings = Warnings::new();
        let new = session
            .replace_node(
                &mut block,
                "card-1",
                json!({ "id": "card-1", "type": "ref", "ref": "card" }),
                &mut warnings,
            )
            .unwrap();
        session.commit(block, CommitOptions { undo: true });

        let node = session.node(new);
        assert_eq!(node.property(PropertyKey::Width), Some(&Value::Number(40.0)));
        assert_eq!(node.property(PropertyKey::Opacity), Some(&Value::Number(0.5)));
        assert_eq!(
            node.property(PropertyKey::Name),
            Some(&Value::Text("special".into()))
        );
        assert!(node.is_overridden(PropertyKey::Width));
    }

    #[test]
    fn test_copy_node_creates_instance_with_fresh_id() {
        let mut session = Session::new();
        insert(
            &mut session,
            None,
            None,
            json!([{ "id": "card", "type": "frame", "children": [
                { "id": "title", "type": "text" }
            ]}]),
        )
        .unwrap();

        let mut block = session.begin_update();
        let mut warnings = Warnings::new();
        let copy = session
            .copy_node(
                &mut block,
                None,
                None,
                json!({ "id": "card", "opacity": 0.25 }),
                &mut warnings,
            )
            .unwrap();
        session.commit(block, CommitOptions { undo: true });

        let card = session.resolve_path("card").unwrap();
        let node = session.node(copy);
        assert_ne!(node.id, "card");
        assert_eq!(node.prototype().map(|l| l.node), Some(card));
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.property(PropertyKey::Opacity), Some(&Value::Number(0.25)));
        assert!(session.node(card).reusable);
    }

    #[test]
    fn test_atomicity_cleanup_on_partial_failure() {
        let mut session = Session::new();
        insert(&mut session, None, None, json!([{ "id": "live", "type": "rectangle" }])).unwrap();
        let before = session.node_count();

        // The first entry builds fine, then the second hits a cycle. The
        // scratch nodes must be gone even before the block is rolled back.
        let mut block = session.begin_update();
        let mut warnings = Warnings::new();
        let err = session.insert_nodes(
            &mut block,
            None,
            None,
            &[
                json!({ "id": "fresh", "type": "frame", "children": [
                    { "id": "fresh-child", "type": "rectangle" }
                ]}),
                json!({ "id": "loop", "type": "ref", "ref": "loop" }),
            ],
            &mut warnings,
        );
        assert!(matches!(err, Err(DocumentError::ReferenceCycle(_))));
        assert_eq!(session.node_count(), before);
        assert!(session.resolve_path("fresh").is_none());
        assert!(session.resolve_path("fresh-child").is_none());

        session.rollback(block);
        assert_eq!(session.node_count(), before);
    }

    #[test]
    fn test_unknown_ref_target_is_recoverable() {
        let mut session = Session::new();
        let mut block = session.begin_update();
        let mut warnings = Warnings::new();
        let keys = session
            .insert_nodes(
                &mut block,
                None,
                None,
                &[json!({ "id": "ghost", "type": "ref", "ref": "missing" })],
                &mut warnings,
            )
            .unwrap();
        session.commit(block, CommitOptions { undo: false });
        assert!(keys.is_empty());
        assert_eq!(
            warnings.iter().next(),
            Some(&DataWarning::InvalidRef("missing".into()))
        );
    }
}
