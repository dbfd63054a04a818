//! # Override Engine
//!
//! Serializes the differences between an instance subtree and its prototype
//! into a `ref` document, and applies such a document back onto a live
//! subtree.
//!
//! Override documents key descendants by path relative to the instance
//! root. A serialized property value may be a literal or a `$name` variable
//! reference; variables resolve through [`VariableLookup`] at apply time and
//! are never stored verbatim. Coercion is strict but fail-soft: a variable
//! of the wrong kind (or one not defined yet) discards that one value and
//! keeps whatever the node inherited, because documents routinely reference
//! variables that are defined later in the load.

use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};

use crate::errors::{DataWarning, DocumentError, Warnings};
use crate::JsonMap;
use crate::node::{
    default_properties, Effect, Fill, GradientKind, GradientStop, ImageMode, NodeKey, NodeType,
    PropertyKey, Stroke, StrokeAlign, Value, ValueKind,
};
use crate::path::replace_last_segment;
use crate::session::{Session, UpdateBlock};
use crate::variables::{VariableLookup, VariableType};

/// Keys of a node-data object that are not properties.
const STRUCTURAL_KEYS: &[&str] = &[
    "id",
    "type",
    "ref",
    "reusable",
    "descendants",
    "children",
    "slot",
    "source",
    "target",
];

pub(crate) fn is_structural_key(name: &str) -> bool {
    STRUCTURAL_KEYS.contains(&name)
}

// ---- typed coercion ----

fn resolve_variable(
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    name: &str,
    expected: VariableType,
) -> Option<JsonValue> {
    let resolved = vars.get_variable(name, theme)?;
    if resolved.variable_type != expected {
        tracing::debug!(
            "variable '{name}' is a {}, expected {}; keeping inherited value",
            resolved.variable_type.tag(),
            expected.tag()
        );
        return None;
    }
    Some(resolved.value)
}

pub(crate) fn coerce_number(
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    raw: &JsonValue,
) -> Option<f64> {
    match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) if s.starts_with('$') => {
            resolve_variable(vars, theme, &s[1..], VariableType::Number)?.as_f64()
        }
        _ => None,
    }
}

pub(crate) fn coerce_bool(
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    raw: &JsonValue,
) -> Option<bool> {
    match raw {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) if s.starts_with('$') => {
            resolve_variable(vars, theme, &s[1..], VariableType::Boolean)?.as_bool()
        }
        _ => None,
    }
}

pub(crate) fn coerce_text(
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    raw: &JsonValue,
) -> Option<String> {
    match raw {
        JsonValue::String(s) if s.starts_with('$') => {
            resolve_variable(vars, theme, &s[1..], VariableType::String)?
                .as_str()
                .map(str::to_string)
        }
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

pub(crate) fn coerce_color(
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    raw: &JsonValue,
) -> Option<String> {
    match raw {
        JsonValue::String(s) if s.starts_with('$') => {
            resolve_variable(vars, theme, &s[1..], VariableType::Color)?
                .as_str()
                .map(str::to_string)
        }
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

// ---- paint parsing ----

fn parse_fill_entry(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Fill> {
    if raw.is_string() {
        return Some(Fill::Color {
            color: coerce_color(vars, theme, raw).unwrap_or_else(|| "#000000".to_string()),
            enabled: true,
        });
    }
    let map = raw.as_object()?;
    let kind = map.get("type").and_then(JsonValue::as_str).unwrap_or("");
    match kind {
        "color" => Some(Fill::Color {
            color: map
                .get("color")
                .and_then(|c| coerce_color(vars, theme, c))
                .unwrap_or_else(|| "#000000".to_string()),
            enabled: map
                .get("enabled")
                .and_then(|e| coerce_bool(vars, theme, e))
                .unwrap_or(true),
        }),
        "gradient" => {
            let gradient = map
                .get("gradientType")
                .and_then(JsonValue::as_str)
                .and_then(GradientKind::parse);
            let Some(gradient) = gradient else {
                warnings.report(DataWarning::UnsupportedFill("gradient".to_string()));
                return None;
            };
            let stops = map
                .get("colors")
                .and_then(JsonValue::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| {
                            let stop = entry.as_object()?;
                            Some(GradientStop {
                                color: stop
                                    .get("color")
                                    .and_then(|c| coerce_color(vars, theme, c))
                                    .unwrap_or_else(|| "#000000".to_string()),
                                position: stop
                                    .get("position")
                                    .and_then(|p| coerce_number(vars, theme, p))
                                    .unwrap_or(0.0),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(Fill::Gradient {
                gradient,
                stops,
                enabled: map
                    .get("enabled")
                    .and_then(|e| coerce_bool(vars, theme, e))
                    .unwrap_or(true),
            })
        }
        "image" => Some(Fill::Image {
            url: map
                .get("url")
                .and_then(|u| coerce_text(vars, theme, u))
                .unwrap_or_default(),
            mode: map
                .get("mode")
                .and_then(JsonValue::as_str)
                .and_then(ImageMode::parse)
                .unwrap_or(ImageMode::Stretch),
            enabled: map
                .get("enabled")
                .and_then(|e| coerce_bool(vars, theme, e))
                .unwrap_or(true),
        }),
        other => {
            warnings.report(DataWarning::UnsupportedFill(other.to_string()));
            None
        }
    }
}

pub(crate) fn parse_fills(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Vec<Fill>> {
    match raw {
        JsonValue::Array(entries) => Some(
            entries
                .iter()
                .filter_map(|e| parse_fill_entry(e, vars, theme, warnings))
                .collect(),
        ),
        JsonValue::String(_) | JsonValue::Object(_) => {
            Some(parse_fill_entry(raw, vars, theme, warnings).into_iter().collect())
        }
        _ => None,
    }
}

pub(crate) fn serialize_fills(fills: &[Fill]) -> JsonValue {
    JsonValue::Array(
        fills
            .iter()
            .map(|fill| match fill {
                Fill::Color { color, enabled } => json!({
                    "type": "color",
                    "color": color,
                    "enabled": enabled,
                }),
                Fill::Gradient {
                    gradient,
                    stops,
                    enabled,
                } => json!({
                    "type": "gradient",
                    "gradientType": gradient.tag(),
                    "colors": stops
                        .iter()
                        .map(|s| json!({ "color": s.color, "position": s.position }))
                        .collect::<Vec<_>>(),
                    "enabled": enabled,
                }),
                Fill::Image { url, mode, enabled } => json!({
                    "type": "image",
                    "url": url,
                    "mode": mode.tag(),
                    "enabled": enabled,
                }),
            })
            .collect(),
    )
}

pub(crate) fn parse_stroke(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Stroke> {
    let map = raw.as_object()?;
    let fills = map
        .get("fill")
        .and_then(|f| parse_fills(f, vars, theme, warnings))
        .unwrap_or_default();
    let thickness = match map.get("thickness") {
        Some(JsonValue::Object(sides)) => {
            let side = |name: &str| {
                sides
                    .get(name)
                    .and_then(|v| coerce_number(vars, theme, v))
                    .unwrap_or(0.0)
            };
            [side("top"), side("right"), side("bottom"), side("left")]
        }
        Some(value) => {
            let uniform = coerce_number(vars, theme, value).unwrap_or(0.0);
            [uniform; 4]
        }
        None => [0.0; 4],
    };
    let align = map
        .get("align")
        .and_then(JsonValue::as_str)
        .and_then(StrokeAlign::parse)
        .unwrap_or(StrokeAlign::Center);
    Some(Stroke {
        fills,
        thickness,
        align,
        cap: map.get("cap").and_then(JsonValue::as_str).map(str::to_string),
        join: map
            .get("join")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
    })
}

pub(crate) fn serialize_stroke(stroke: &Stroke) -> JsonValue {
    let mut map = JsonMap::new();
    map.insert("fill".to_string(), serialize_fills(&stroke.fills));
    let [top, right, bottom, left] = stroke.thickness;
    let thickness = if top == right && right == bottom && bottom == left {
        json!(top)
    } else {
        json!({ "top": top, "right": right, "bottom": bottom, "left": left })
    };
    map.insert("thickness".to_string(), thickness);
    map.insert("align".to_string(), json!(stroke.align.tag()));
    if let Some(cap) = &stroke.cap {
        map.insert("cap".to_string(), json!(cap));
    }
    if let Some(join) = &stroke.join {
        map.insert("join".to_string(), json!(join));
    }
    JsonValue::Object(map)
}

fn parse_effect_entry(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Effect> {
    let map = raw.as_object()?;
    let kind = map.get("type").and_then(JsonValue::as_str).unwrap_or("");
    let number = |name: &str| {
        map.get(name)
            .and_then(|v| coerce_number(vars, theme, v))
            .unwrap_or(0.0)
    };
    let enabled = map
        .get("enabled")
        .and_then(|e| coerce_bool(vars, theme, e))
        .unwrap_or(true);
    match kind {
        "blur" => Some(Effect::Blur {
            radius: number("radius"),
            enabled,
        }),
        "shadow" => {
            let offset = map.get("offset").and_then(JsonValue::as_object);
            let offset_part = |name: &str| {
                offset
                    .and_then(|o| o.get(name))
                    .and_then(|v| coerce_number(vars, theme, v))
                    .unwrap_or(0.0)
            };
            Some(Effect::Shadow {
                offset_x: offset_part("x"),
                offset_y: offset_part("y"),
                blur: number("blur"),
                spread: number("spread"),
                color: map
                    .get("color")
                    .and_then(|c| coerce_color(vars, theme, c))
                    .unwrap_or_else(|| "#000000".to_string()),
                enabled,
            })
        }
        "background_blur" => Some(Effect::BackgroundBlur {
            radius: number("radius"),
            enabled,
        }),
        other => {
            warnings.report(DataWarning::UnsupportedEffect(other.to_string()));
            None
        }
    }
}

pub(crate) fn parse_effects(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Vec<Effect>> {
    match raw {
        JsonValue::Array(entries) => Some(
            entries
                .iter()
                .filter_map(|e| parse_effect_entry(e, vars, theme, warnings))
                .collect(),
        ),
        JsonValue::Object(_) => Some(
            parse_effect_entry(raw, vars, theme, warnings)
                .into_iter()
                .collect(),
        ),
        _ => None,
    }
}

pub(crate) fn serialize_effects(effects: &[Effect]) -> JsonValue {
    JsonValue::Array(
        effects
            .iter()
            .map(|effect| match effect {
                Effect::Blur { radius, enabled } => json!({
                    "type": "blur",
                    "radius": radius,
                    "enabled": enabled,
                }),
                Effect::Shadow {
                    offset_x,
                    offset_y,
                    blur,
                    spread,
                    color,
                    enabled,
                } => json!({
                    "type": "shadow",
                    "offset": { "x": offset_x, "y": offset_y },
                    "blur": blur,
                    "spread": spread,
                    "color": color,
                    "enabled": enabled,
                }),
                Effect::BackgroundBlur { radius, enabled } => json!({
                    "type": "background_blur",
                    "radius": radius,
                    "enabled": enabled,
                }),
            })
            .collect(),
    )
}

pub(crate) fn parse_corners(
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
) -> Option<[f64; 4]> {
    match raw {
        JsonValue::Array(entries) => {
            let values: Vec<f64> = entries
                .iter()
                .map(|v| coerce_number(vars, theme, v).unwrap_or(0.0))
                .collect();
            match values.as_slice() {
                [a, b] => Some([*a, *b, *a, *b]),
                [a, b, c, d] => Some([*a, *b, *c, *d]),
                _ => None,
            }
        }
        _ => coerce_number(vars, theme, raw).map(|n| [n; 4]),
    }
}

pub(crate) fn serialize_corners(corners: &[f64; 4]) -> JsonValue {
    let [a, b, c, d] = *corners;
    if a == b && b == c && c == d {
        json!(a)
    } else {
        json!([a, b, c, d])
    }
}

fn parse_theme_map(raw: &JsonValue) -> Option<BTreeMap<String, String>> {
    let map = raw.as_object()?;
    let mut out = BTreeMap::new();
    for (k, v) in map {
        out.insert(k.clone(), v.as_str()?.to_string());
    }
    Some(out)
}

/// Validated string values for layout-ish keys. Unknown tags discard the
/// value, matching the engine's fail-soft posture on foreign documents.
fn validate_text(key: PropertyKey, text: String) -> Option<String> {
    let ok = match key {
        PropertyKey::Layout => matches!(text.as_str(), "none" | "horizontal" | "vertical"),
        PropertyKey::JustifyContent => matches!(
            text.as_str(),
            "start" | "end" | "center" | "space_between" | "space_around"
        ),
        PropertyKey::AlignItems => matches!(text.as_str(), "start" | "end" | "center"),
        _ => true,
    };
    ok.then_some(text)
}

/// Parse one property value from the file format. `None` means the value is
/// discarded and the node keeps what it inherited.
pub(crate) fn parse_property(
    key: PropertyKey,
    raw: &JsonValue,
    vars: &dyn VariableLookup,
    theme: Option<&str>,
    warnings: &mut Warnings,
) -> Option<Value> {
    match key.kind() {
        ValueKind::Number => coerce_number(vars, theme, raw).map(Value::Number),
        ValueKind::Bool => coerce_bool(vars, theme, raw).map(Value::Bool),
        ValueKind::Text => {
            coerce_text(vars, theme, raw).and_then(|t| validate_text(key, t).map(Value::Text))
        }
        ValueKind::Color => coerce_color(vars, theme, raw).map(Value::Color),
        ValueKind::Corners => parse_corners(raw, vars, theme).map(Value::Corners),
        ValueKind::Fills => parse_fills(raw, vars, theme, warnings).map(Value::Fills),
        ValueKind::Stroke => parse_stroke(raw, vars, theme, warnings).map(Value::Stroke),
        ValueKind::Effects => parse_effects(raw, vars, theme, warnings).map(Value::Effects),
        ValueKind::ThemeMap => parse_theme_map(raw).map(Value::ThemeMap),
    }
}

/// Serialize one property value into the file format. Inverse of
/// [`parse_property`] for every value this engine produces.
pub(crate) fn serialize_property(value: &Value) -> JsonValue {
    match value {
        Value::Number(n) => json!(n),
        Value::Bool(b) => json!(b),
        Value::Text(t) => json!(t),
        Value::Color(c) => json!(c),
        Value::Corners(corners) => serialize_corners(corners),
        Value::Fills(fills) => serialize_fills(fills),
        Value::Stroke(stroke) => serialize_stroke(stroke),
        Value::Effects(effects) => serialize_effects(effects),
        Value::ThemeMap(map) => json!(map),
    }
}

fn override_bucket<'a>(doc: &'a mut JsonMap, rel: Option<&str>) -> &'a mut JsonMap {
    match rel {
        None => doc,
        Some(rel) => {
            let descendants = doc
                .entry("descendants".to_string())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()));
            let descendants = descendants
                .as_object_mut()
                .expect("descendants bucket is an object");
            descendants
                .entry(rel.to_string())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()))
                .as_object_mut()
                .expect("descendant entry is an object")
        }
    }
}

impl Session {
    /// Whether an instance still structurally mirrors its prototype where it
    /// claims to.
    pub(crate) fn mirrors_prototype(&self, key: NodeKey) -> bool {
        let node = self.node(key);
        let Some(link) = node.prototype() else {
            return false;
        };
        if link.children_overridden {
            return true;
        }
        let proto_children = self.node(link.node).children();
        if node.children().len() != proto_children.len() {
            return false;
        }
        for (&child, &proto_child) in node.children().iter().zip(proto_children) {
            if self.is_unique(child) {
                continue;
            }
            match self.node(child).prototype() {
                Some(l) if l.node == proto_child => {
                    if !self.mirrors_prototype(child) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Walk an instance subtree in lock-step with its prototype and
    /// serialize every divergence into a `ref` document.
    pub fn collect_overrides(&self, instance: NodeKey) -> Result<JsonMap, DocumentError> {
        let node = self.node(instance);
        let Some(link) = node.prototype() else {
            return Err(DocumentError::MissingPrototype(node.id.clone()));
        };
        if !self.mirrors_prototype(instance) {
            tracing::error!(
                "instance {} has different structure than its prototype {}, which is not allowed",
                self.node_path(instance),
                self.node_path(link.node)
            );
        }
        let mut doc = JsonMap::new();
        doc.insert("id".to_string(), json!(node.id));
        doc.insert("type".to_string(), json!("ref"));
        if node.reusable {
            doc.insert("reusable".to_string(), json!(true));
        }
        doc.insert("ref".to_string(), json!(self.node_path(link.node)));
        self.collect_into(instance, None, &mut doc);
        Ok(doc)
    }

    fn collect_into(&self, key: NodeKey, rel: Option<&str>, doc: &mut JsonMap) {
        if rel.is_some() && self.is_unique(key) {
            // A unique child is not mirrored; store it whole.
            let serialized = self.serialize_node(key);
            let rel = rel.map(str::to_string);
            let descendants = doc
                .entry("descendants".to_string())
                .or_insert_with(|| JsonValue::Object(JsonMap::new()));
            if let (Some(obj), Some(rel)) = (descendants.as_object_mut(), rel) {
                obj.insert(rel, serialized);
            }
            return;
        }

        let node = self.node(key);
        let Some(link) = node.prototype() else {
            tracing::error!("mirrored node '{}' has no prototype", node.id);
            return;
        };

        let overridden: Vec<PropertyKey> = link.overridden.iter().copied().collect();
        if !overridden.is_empty() {
            let bucket = override_bucket(doc, rel);
            for prop in overridden {
                let value = match self.node(key).property(prop) {
                    Some(v) => serialize_property(v),
                    None => JsonValue::Null,
                };
                bucket.insert(prop.file_name().to_string(), value);
            }
        }

        if link.children_overridden {
            let children: Vec<JsonValue> = node
                .children()
                .iter()
                .map(|&c| self.serialize_node(c))
                .collect();
            override_bucket(doc, rel).insert("children".to_string(), JsonValue::Array(children));
            return;
        }

        let proto_children = self.node(link.node).children().to_vec();
        let children = node.children().to_vec();
        for (i, child) in children.into_iter().enumerate() {
            let Some(&proto_child) = proto_children.get(i) else {
                break;
            };
            let id = self.node(proto_child).id.clone();
            let child_rel = match rel {
                None => id,
                Some(_) if self.is_unique(proto_child) => id,
                Some(prefix) => {
                    if self.is_instance_boundary(key) {
                        format!("{prefix}/{id}")
                    } else {
                        replace_last_segment(prefix, &id)
                    }
                }
            };
            self.collect_into(child, Some(&child_rel), doc);
        }
    }

    /// Apply an override document onto a live node. The inverse of
    /// [`Session::collect_overrides`].
    ///
    /// A fragment carrying a `type` replaces the node outright, except for a
    /// `ref` pointing at the node's current prototype, which applies in
    /// place. A `children` array replaces the child list. Unrecognized
    /// property names are reported and skipped.
    pub fn apply_overrides(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        doc: &JsonValue,
        warnings: &mut Warnings,
    ) -> Result<(), DocumentError> {
        let Some(map) = doc.as_object() else {
            return Err(DocumentError::MalformedDocument(
                "override fragment must be an object".to_string(),
            ));
        };

        if let Some(ty) = map.get("type").and_then(JsonValue::as_str) {
            let in_place = ty == "ref" && self.refers_to_own_prototype(node, map);
            if !in_place {
                let path = self.node_path(node);
                self.replace_node(block, &path, JsonValue::Object(map.clone()), warnings)?;
                return Ok(());
            }
        }

        if let Some(descendants) = map.get("descendants").and_then(JsonValue::as_object) {
            let entries: Vec<(String, JsonValue)> =
                descendants.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (rel, fragment) in entries {
                let canonical = self
                    .canonicalize_relative(node, &rel)
                    .ok_or_else(|| DocumentError::OverridePath(rel.clone()))?;
                let target = self
                    .resolve_relative(node, &canonical)
                    .ok_or_else(|| DocumentError::OverridePath(rel.clone()))?;
                self.apply_overrides(block, target, &fragment, warnings)?;
            }
        }

        self.apply_fragment_properties(block, node, map, warnings);

        if let Some(children) = map.get("children").and_then(JsonValue::as_array) {
            let children = children.clone();
            self.clear_children(block, node);
            let path = self.node_path(node);
            self.insert_nodes(block, Some(&path), None, &children, warnings)?;
        }
        Ok(())
    }

    fn refers_to_own_prototype(&self, node: NodeKey, map: &JsonMap) -> bool {
        let Some(reference) = map.get("ref").and_then(JsonValue::as_str) else {
            return false;
        };
        let Some(link) = self.node(node).prototype() else {
            return false;
        };
        let proto_path = self.node_path(link.node);
        reference == proto_path || self.canonicalize(reference).as_deref() == Some(&proto_path)
    }

    /// Dispatch every recognized property in `fragment` onto `node`.
    pub(crate) fn apply_fragment_properties(
        &mut self,
        block: &mut UpdateBlock,
        node: NodeKey,
        fragment: &JsonMap,
        warnings: &mut Warnings,
    ) {
        let parsed = self.parse_fragment_properties(node, fragment, warnings);
        for (key, value) in parsed {
            self.set_property(block, node, key, value);
        }
    }

    fn parse_fragment_properties(
        &self,
        node: NodeKey,
        fragment: &JsonMap,
        warnings: &mut Warnings,
    ) -> Vec<(PropertyKey, Option<Value>)> {
        let theme = self.variables.default_theme().map(str::to_string);
        let node_id = self.node(node).id.clone();
        let mut out = Vec::new();
        for (name, raw) in fragment {
            if is_structural_key(name) {
                continue;
            }
            let Some(key) = PropertyKey::parse(name) else {
                warnings.report(DataWarning::UnknownProperty {
                    node: node_id.clone(),
                    name: name.clone(),
                });
                continue;
            };
            if raw.is_null() {
                out.push((key, None));
                continue;
            }
            match parse_property(key, raw, &self.variables, theme.as_deref(), warnings) {
                Some(value) => out.push((key, Some(value))),
                None => {
                    tracing::debug!("discarding value for '{name}' on '{node_id}'");
                }
            }
        }
        out
    }

    /// Parse a literal node-data object into a type and property bag.
    /// `None` when the entry has no usable type.
    pub(crate) fn parse_node_data(
        &self,
        data: &JsonMap,
        warnings: &mut Warnings,
    ) -> Option<(NodeType, BTreeMap<PropertyKey, Value>)> {
        let node_type = data
            .get("type")
            .and_then(JsonValue::as_str)
            .and_then(NodeType::parse)?;
        let mut properties = default_properties(node_type);
        let theme = self.variables.default_theme().map(str::to_string);
        let node_id = data
            .get("id")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        for (name, raw) in data {
            if is_structural_key(name) {
                continue;
            }
            let Some(key) = PropertyKey::parse(name) else {
                warnings.report(DataWarning::UnknownProperty {
                    node: node_id.clone(),
                    name: name.clone(),
                });
                continue;
            };
            if raw.is_null() {
                properties.remove(&key);
                continue;
            }
            if let Some(value) = parse_property(key, raw, &self.variables, theme.as_deref(), warnings)
            {
                properties.insert(key, value);
            }
        }
        Some((node_type, properties))
    }

    /// Re-key a ref document's `descendants` against the prototype it now
    /// points at, dropping entries that no longer resolve.
    pub(crate) fn canonicalize_descendants(
        &self,
        proto: NodeKey,
        doc: &mut JsonMap,
        warnings: &mut Warnings,
    ) {
        let Some(descendants) = doc.get("descendants").and_then(JsonValue::as_object).cloned()
        else {
            return;
        };
        let reference = doc
            .get("ref")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let mut canonical = JsonMap::new();
        for (path, fragment) in descendants {
            match self.canonicalize_relative(proto, &path) {
                Some(key) => {
                    canonical.insert(key, fragment);
                }
                None => warnings.report(DataWarning::InvalidOverridePath {
                    reference: reference.clone(),
                    path,
                }),
            }
        }
        if canonical.is_empty() {
            doc.remove("descendants");
        } else {
            doc.insert("descendants".to_string(), JsonValue::Object(canonical));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableStore;
    use serde_json::json;

    fn store_with_width() -> VariableStore {
        let mut store = VariableStore::new();
        let var = store.add_variable("w", VariableType::Number);
        var.values.push(crate::variables::VariableValue {
            value: json!(240.0),
            theme: None,
        });
        let var = store.add_variable("label", VariableType::String);
        var.values.push(crate::variables::VariableValue {
            value: json!("hello"),
            theme: None,
        });
        store
    }

    #[test]
    fn test_number_coercion_resolves_variables() {
        let store = store_with_width();
        let mut warnings = Warnings::new();
        let value = parse_property(
            PropertyKey::Width,
            &json!("$w"),
            &store,
            None,
            &mut warnings,
        );
        assert_eq!(value, Some(Value::Number(240.0)));
    }

    #[test]
    fn test_wrong_typed_variable_is_discarded() {
        let store = store_with_width();
        let mut warnings = Warnings::new();
        // "$label" is a string variable, Width expects a number.
        let value = parse_property(
            PropertyKey::Width,
            &json!("$label"),
            &store,
            None,
            &mut warnings,
        );
        assert_eq!(value, None);
        // Fail-soft: no hard warning either, the inherited value just stays.
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_fill_variant_warns_and_skips() {
        let store = VariableStore::new();
        let mut warnings = Warnings::new();
        let fills = parse_fills(
            &json!([{ "type": "mesh_gradient" }, "#ff0000"]),
            &store,
            None,
            &mut warnings,
        )
        .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(
            warnings.iter().next(),
            Some(&DataWarning::UnsupportedFill("mesh_gradient".to_string()))
        );
    }

    #[test]
    fn test_property_serialization_round_trips() {
        let store = VariableStore::new();
        let mut warnings = Warnings::new();
        let values = [
            (PropertyKey::Width, Value::Number(120.0)),
            (PropertyKey::Clip, Value::Bool(true)),
            (PropertyKey::Content, Value::Text("hi".into())),
            (PropertyKey::CornerRadius, Value::Corners([4.0, 8.0, 4.0, 8.0])),
            (
                PropertyKey::Fill,
                Value::Fills(vec![Fill::Color {
                    color: "#102030".into(),
                    enabled: true,
                }]),
            ),
            (
                PropertyKey::Stroke,
                Value::Stroke(Stroke {
                    fills: vec![Fill::Color {
                        color: "#000000".into(),
                        enabled: true,
                    }],
                    thickness: [1.0, 1.0, 1.0, 1.0],
                    align: StrokeAlign::Inside,
                    cap: None,
                    join: Some("miter".into()),
                }),
            ),
            (
                PropertyKey::Effect,
                Value::Effects(vec![Effect::Shadow {
                    offset_x: 0.0,
                    offset_y: 2.0,
                    blur: 6.0,
                    spread: 0.0,
                    color: "#00000080".into(),
                    enabled: true,
                }]),
            ),
        ];
        for (key, value) in values {
            let raw = serialize_property(&value);
            let parsed = parse_property(key, &raw, &store, None, &mut warnings);
            assert_eq!(parsed, Some(value), "round trip failed for {key:?}");
        }
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_corner_collapse() {
        assert_eq!(serialize_corners(&[5.0; 4]), json!(5.0));
        assert_eq!(
            serialize_corners(&[1.0, 2.0, 3.0, 4.0]),
            json!([1.0, 2.0, 3.0, 4.0])
        );
    }
}
