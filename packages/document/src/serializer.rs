//! # Document Serializer
//!
//! Maps the versioned JSON file format to and from the live node graph.
//!
//! Opening clears process-wide state (undo history, variable bindings, host
//! caches) so every load is a clean slate, then runs inside one reversible
//! update block: any failure rolls the block back and the previous document
//! stays in place. Recoverable data problems never fail the load; they
//! surface in the returned [`OpenReport`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value as JsonValue};

use crate::errors::{DataWarning, DocumentError, Warnings};
use crate::JsonMap;
use crate::mutations::{assign_missing_ids, walk_node_data};
use crate::node::{default_properties, NodeKey};
use crate::overrides::serialize_property;
use crate::session::{CommitOptions, Session, UpdateBlock};
use crate::variables::{VariableType, VariableValue};

/// Current file format version.
pub const FORMAT_VERSION: &str = "0.2";

/// Non-fatal problems encountered while opening a document.
#[derive(Debug, Default)]
pub struct OpenReport {
    pub warnings: Vec<DataWarning>,
}

impl OpenReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Upgrade an older document in place. Unknown versions are left untouched
/// and rejected by the caller.
fn migrate_document(value: &mut JsonValue) {
    let version = value
        .get("version")
        .and_then(JsonValue::as_str)
        .unwrap_or("")
        .to_string();
    if version != "0.1" {
        return;
    }
    if let Some(JsonValue::Array(children)) = value.get_mut("children") {
        for child in children {
            walk_node_data(child, &mut |obj| {
                // 0.1 used `radius` and `text` for what 0.2 calls
                // `cornerRadius` and `content`.
                if let Some(radius) = obj.remove("radius") {
                    obj.entry("cornerRadius".to_string()).or_insert(radius);
                }
                if let Some(text) = obj.remove("text") {
                    obj.entry("content".to_string()).or_insert(text);
                }
            });
        }
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert("version".to_string(), json!(FORMAT_VERSION));
    }
}

/// A frame whose single child is a ref to its own id is a serialization
/// shortcut; the child list collapses away.
fn collapse_self_refs(value: &mut JsonValue) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    if let Some(children) = obj.get("children").and_then(JsonValue::as_array) {
        let collapse = !children.is_empty()
            && children
                .first()
                .and_then(JsonValue::as_object)
                .map(|c| {
                    c.get("type").and_then(JsonValue::as_str) == Some("ref")
                        && c.get("id").and_then(JsonValue::as_str).is_some()
                        && c.get("id").and_then(JsonValue::as_str)
                            == c.get("ref").and_then(JsonValue::as_str)
                })
                .unwrap_or(false);
        if collapse {
            obj.remove("children");
        } else if let Some(JsonValue::Array(children)) = obj.get_mut("children") {
            for child in children {
                collapse_self_refs(child);
            }
        }
    }
    if obj.get("type").and_then(JsonValue::as_str) == Some("ref") {
        if let Some(JsonValue::Object(descendants)) = obj.get_mut("descendants") {
            for fragment in descendants.values_mut() {
                collapse_self_refs(fragment);
            }
        }
    }
}

impl Session {
    /// Open a document from raw text. An empty string opens a blank
    /// document.
    pub fn open(&mut self, raw: &str, path: Option<PathBuf>) -> Result<OpenReport, DocumentError> {
        let value: JsonValue = if raw.trim().is_empty() {
            json!({ "version": FORMAT_VERSION, "children": [] })
        } else {
            serde_json::from_str(raw)?
        };
        self.open_value(value, path)
    }

    /// Open a pre-parsed document value.
    pub fn open_value(
        &mut self,
        mut value: JsonValue,
        path: Option<PathBuf>,
    ) -> Result<OpenReport, DocumentError> {
        if value.get("version").and_then(JsonValue::as_str) != Some(FORMAT_VERSION) {
            migrate_document(&mut value);
        }
        let version = value
            .get("version")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
            .to_string();
        if version != FORMAT_VERSION {
            return Err(DocumentError::UnsupportedFormat(version));
        }

        // Every load is a clean slate. Variable writes are not patch
        // recorded, so the previous store is kept aside for error recovery.
        self.undo_stack.clear();
        self.hooks.caches.clear_caches();
        let previous_variables = std::mem::take(&mut self.variables);

        let mut warnings = Warnings::new();
        let mut block = self.begin_update();
        let result = self.load_document(&mut block, &value, &mut warnings);
        match result {
            Ok(()) => {
                self.commit(block, CommitOptions { undo: false });
                self.set_file_path(path);
                let root = self.root();
                self.hooks.layout.invalidate_layout(root);
                self.hooks.layout.update_layout();
                if !warnings.is_empty() {
                    tracing::warn!(
                        "document had problems: {} invalid fragment(s) skipped",
                        warnings.len()
                    );
                }
                tracing::debug!("document loaded");
                Ok(OpenReport {
                    warnings: warnings.into_vec(),
                })
            }
            Err(err) => {
                self.rollback(block);
                self.variables = previous_variables;
                tracing::error!("error loading document: {err}");
                Err(err)
            }
        }
    }

    fn load_document(
        &mut self,
        block: &mut UpdateBlock,
        value: &JsonValue,
        warnings: &mut Warnings,
    ) -> Result<(), DocumentError> {
        let root = self.root();
        self.clear_children(block, root);
        self.clear_connections(block);

        let Some(doc) = value.as_object() else {
            return Err(DocumentError::MalformedDocument(
                "document must be an object".to_string(),
            ));
        };

        if let Some(themes) = doc.get("themes").and_then(JsonValue::as_object) {
            let mut map = BTreeMap::new();
            for (name, colors) in themes {
                let Some(colors) = colors.as_object() else {
                    return Err(DocumentError::MalformedDocument(format!(
                        "theme '{name}' must be an object"
                    )));
                };
                let mut color_map = BTreeMap::new();
                for (key, color) in colors {
                    let color = color.as_str().ok_or_else(|| {
                        DocumentError::MalformedDocument(format!(
                            "theme '{name}' entry '{key}' must be a string"
                        ))
                    })?;
                    color_map.insert(key.clone(), color.to_string());
                }
                map.insert(name.clone(), color_map);
            }
            self.variables.set_themes(map);
        }

        if let Some(variables) = doc.get("variables").and_then(JsonValue::as_object) {
            for (name, definition) in variables {
                self.load_variable(name, definition)?;
            }
        }

        if let Some(children) = doc.get("children").and_then(JsonValue::as_array) {
            let mut children = children.clone();
            for child in &mut children {
                assign_missing_ids(child);
                walk_node_data(child, &mut |obj| {
                    let ty = obj.get("type").and_then(JsonValue::as_str).unwrap_or("");
                    if ty == "frame" || ty == "ref" {
                        obj.remove("placeholder");
                    }
                });
                collapse_self_refs(child);
            }
            self.insert_nodes(block, None, None, &children, warnings)?;
        }
        Ok(())
    }

    fn load_variable(&mut self, name: &str, definition: &JsonValue) -> Result<(), DocumentError> {
        let invalid = |reason: &str| DocumentError::InvalidVariable {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let Some(def) = definition.as_object() else {
            return Err(invalid("definition must be an object"));
        };
        let variable_type = def
            .get("type")
            .and_then(JsonValue::as_str)
            .and_then(VariableType::parse)
            .ok_or_else(|| invalid("missing or unknown type"))?;
        let raw = def.get("value").ok_or_else(|| invalid("missing value"))?;

        let entries: Vec<&JsonValue> = match raw {
            JsonValue::Array(list) => list.iter().collect(),
            single => vec![single],
        };
        let mut values = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = match entry.as_object() {
                Some(obj) => {
                    let value = obj.get("value").ok_or_else(|| invalid("missing value"))?;
                    if !variable_type.accepts(value) {
                        return Err(invalid("value does not match the declared type"));
                    }
                    let theme = match obj.get("theme") {
                        None => None,
                        Some(JsonValue::Object(theme)) => {
                            let mut map = BTreeMap::new();
                            for (dimension, variant) in theme {
                                let variant = variant
                                    .as_str()
                                    .ok_or_else(|| invalid("theme variants must be strings"))?;
                                map.insert(dimension.clone(), variant.to_string());
                            }
                            Some(map)
                        }
                        Some(_) => return Err(invalid("theme must be an object")),
                    };
                    VariableValue {
                        value: value.clone(),
                        theme,
                    }
                }
                None => {
                    if !variable_type.accepts(entry) {
                        return Err(invalid("value does not match the declared type"));
                    }
                    VariableValue {
                        value: entry.clone(),
                        theme: None,
                    }
                }
            };
            values.push(value);
        }
        let variable = self.variables.add_variable(name, variable_type);
        variable.values = values;
        Ok(())
    }

    /// Serialize one node: instances become `ref` documents carrying their
    /// overrides, everything else is inlined with its non-default
    /// properties.
    pub fn serialize_node(&self, key: NodeKey) -> JsonValue {
        let node = self.node(key);
        if node.prototype().is_some() {
            match self.collect_overrides(key) {
                Ok(doc) => return JsonValue::Object(doc),
                Err(err) => {
                    tracing::error!("failed to serialize instance '{}': {err}", node.id);
                }
            }
        }

        let mut map = JsonMap::new();
        map.insert("id".to_string(), json!(node.id));
        map.insert("type".to_string(), json!(node.node_type.tag()));
        if node.reusable {
            map.insert("reusable".to_string(), json!(true));
        }
        let defaults = default_properties(node.node_type);
        for (prop, value) in &node.properties {
            if defaults.get(prop) != Some(value) {
                map.insert(prop.file_name().to_string(), serialize_property(value));
            }
        }
        if node.node_type.allows_children() && !node.children().is_empty() {
            let children: Vec<JsonValue> = node
                .children()
                .iter()
                .map(|&child| self.serialize_node(child))
                .collect();
            map.insert("children".to_string(), JsonValue::Array(children));
        }
        JsonValue::Object(map)
    }

    /// Serialize the whole document: top-level children, then connections,
    /// themes and variables, tagged with the current format version.
    pub fn export(&self) -> JsonValue {
        let mut children: Vec<JsonValue> = self
            .node(self.root())
            .children()
            .iter()
            .map(|&child| self.serialize_node(child))
            .collect();
        for connection in self.connections() {
            children.push(json!({
                "id": connection.id,
                "type": "connection",
                "x": 0.0,
                "y": 0.0,
                "source": { "path": connection.source.path, "anchor": connection.source.anchor },
                "target": { "path": connection.target.path, "anchor": connection.target.anchor },
            }));
        }

        let mut doc = JsonMap::new();
        doc.insert("version".to_string(), json!(FORMAT_VERSION));
        doc.insert("children".to_string(), JsonValue::Array(children));

        if !self.variables.themes().is_empty() {
            doc.insert("themes".to_string(), json!(self.variables.themes()));
        }
        let variables: JsonMap = self
            .variables
            .variables()
            .map(|variable| {
                let value = serialize_variable_values(&variable.values);
                (
                    variable.name.clone(),
                    json!({ "type": variable.variable_type.tag(), "value": value }),
                )
            })
            .collect();
        if !variables.is_empty() {
            doc.insert("variables".to_string(), JsonValue::Object(variables));
        }
        JsonValue::Object(doc)
    }

    pub fn export_string(&self) -> String {
        serde_json::to_string_pretty(&self.export()).unwrap_or_else(|_| String::from("{}"))
    }
}

fn serialize_variable_values(values: &[VariableValue]) -> JsonValue {
    match values {
        [single] if single.theme.is_none() => single.value.clone(),
        values => JsonValue::Array(
            values
                .iter()
                .map(|v| match &v.theme {
                    None => json!({ "value": v.value }),
                    Some(theme) => json!({ "value": v.value, "theme": theme }),
                })
                .collect(),
        ),
    }
}
