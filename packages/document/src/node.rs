//! # Node Model
//!
//! The typed building blocks of a Vellum document: node tags, the closed
//! property key set, property values, and the node record itself.
//!
//! Nodes never reference each other by pointer. They live in the session's
//! arena and link through [`NodeKey`]s, so ownership stays single-rooted and
//! back-references (prototype instances) can be kept in a session-owned
//! index instead of inside the node.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a node slot in the session arena.
///
/// Keys are stable for the lifetime of a session: slots are never reused, so
/// a key recorded in a patch or an undo batch stays unambiguous even after
/// the node is destroyed and recreated by undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(pub(crate) u32);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closed set of node tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Frame,
    Group,
    Rectangle,
    Ellipse,
    Line,
    Polygon,
    Path,
    Text,
    Note,
    Prompt,
    Context,
    IconFont,
}

impl NodeType {
    /// Parse a document tag. `ref` and `connection` are data-only tags and
    /// deliberately not part of this set.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "frame" => Some(Self::Frame),
            "group" => Some(Self::Group),
            "rectangle" => Some(Self::Rectangle),
            "ellipse" => Some(Self::Ellipse),
            "line" => Some(Self::Line),
            "polygon" => Some(Self::Polygon),
            "path" => Some(Self::Path),
            "text" => Some(Self::Text),
            "note" => Some(Self::Note),
            "prompt" => Some(Self::Prompt),
            "context" => Some(Self::Context),
            "icon_font" => Some(Self::IconFont),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Group => "group",
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Line => "line",
            Self::Polygon => "polygon",
            Self::Path => "path",
            Self::Text => "text",
            Self::Note => "note",
            Self::Prompt => "prompt",
            Self::Context => "context",
            Self::IconFont => "icon_font",
        }
    }

    /// Only containers own children.
    pub fn allows_children(self) -> bool {
        matches!(self, Self::Frame | Self::Group)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Closed set of property keys.
///
/// Every serialize and override site matches exhaustively on this enum so a
/// new key cannot be added without the compiler flagging each place that has
/// to learn about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    Name,
    X,
    Y,
    Width,
    Height,
    Rotation,
    Opacity,
    Enabled,
    Clip,
    FlipX,
    FlipY,
    Placeholder,
    CornerRadius,
    Fill,
    Stroke,
    Effect,
    Content,
    FontSize,
    FontFamily,
    FontWeight,
    FontStyle,
    LetterSpacing,
    LineHeight,
    TextAlign,
    TextAlignVertical,
    Layout,
    Gap,
    Padding,
    JustifyContent,
    AlignItems,
    PolygonCount,
    InnerRadius,
    StartAngle,
    SweepAngle,
    Geometry,
    FillRule,
    IconFontName,
    IconFontFamily,
    ModelName,
    Theme,
}

impl PropertyKey {
    /// The key's name in the document file format.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::X => "x",
            Self::Y => "y",
            Self::Width => "width",
            Self::Height => "height",
            Self::Rotation => "rotation",
            Self::Opacity => "opacity",
            Self::Enabled => "enabled",
            Self::Clip => "clip",
            Self::FlipX => "flipX",
            Self::FlipY => "flipY",
            Self::Placeholder => "placeholder",
            Self::CornerRadius => "cornerRadius",
            Self::Fill => "fill",
            Self::Stroke => "stroke",
            Self::Effect => "effect",
            Self::Content => "content",
            Self::FontSize => "fontSize",
            Self::FontFamily => "fontFamily",
            Self::FontWeight => "fontWeight",
            Self::FontStyle => "fontStyle",
            Self::LetterSpacing => "letterSpacing",
            Self::LineHeight => "lineHeight",
            Self::TextAlign => "textAlign",
            Self::TextAlignVertical => "textAlignVertical",
            Self::Layout => "layout",
            Self::Gap => "gap",
            Self::Padding => "padding",
            Self::JustifyContent => "justifyContent",
            Self::AlignItems => "alignItems",
            Self::PolygonCount => "polygonCount",
            Self::InnerRadius => "innerRadius",
            Self::StartAngle => "startAngle",
            Self::SweepAngle => "sweepAngle",
            Self::Geometry => "geometry",
            Self::FillRule => "fillRule",
            Self::IconFontName => "iconFontName",
            Self::IconFontFamily => "iconFontFamily",
            Self::ModelName => "model",
            Self::Theme => "theme",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        ALL_PROPERTY_KEYS.iter().copied().find(|k| k.file_name() == name)
    }

    /// Whether a change to this key can move geometry around.
    pub fn affects_layout(self) -> bool {
        matches!(
            self,
            Self::X
                | Self::Y
                | Self::Width
                | Self::Height
                | Self::Rotation
                | Self::Content
                | Self::FontSize
                | Self::FontFamily
                | Self::FontWeight
                | Self::LetterSpacing
                | Self::LineHeight
                | Self::Layout
                | Self::Gap
                | Self::Padding
                | Self::JustifyContent
                | Self::AlignItems
        )
    }

    /// The value shape this key accepts.
    pub fn kind(self) -> ValueKind {
        match self {
            Self::X
            | Self::Y
            | Self::Width
            | Self::Height
            | Self::Rotation
            | Self::Opacity
            | Self::FontSize
            | Self::LetterSpacing
            | Self::LineHeight
            | Self::Gap
            | Self::PolygonCount
            | Self::InnerRadius
            | Self::StartAngle
            | Self::SweepAngle => ValueKind::Number,
            Self::Enabled | Self::Clip | Self::FlipX | Self::FlipY | Self::Placeholder => {
                ValueKind::Bool
            }
            Self::Name
            | Self::Content
            | Self::FontFamily
            | Self::FontWeight
            | Self::FontStyle
            | Self::TextAlign
            | Self::TextAlignVertical
            | Self::Layout
            | Self::JustifyContent
            | Self::AlignItems
            | Self::Geometry
            | Self::FillRule
            | Self::IconFontName
            | Self::IconFontFamily
            | Self::ModelName => ValueKind::Text,
            Self::CornerRadius | Self::Padding => ValueKind::Corners,
            Self::Fill => ValueKind::Fills,
            Self::Stroke => ValueKind::Stroke,
            Self::Effect => ValueKind::Effects,
            Self::Theme => ValueKind::ThemeMap,
        }
    }
}

/// Every property key, in file-format order. Used by parsers that walk raw
/// JSON maps.
pub const ALL_PROPERTY_KEYS: &[PropertyKey] = &[
    PropertyKey::Name,
    PropertyKey::X,
    PropertyKey::Y,
    PropertyKey::Width,
    PropertyKey::Height,
    PropertyKey::Rotation,
    PropertyKey::Opacity,
    PropertyKey::Enabled,
    PropertyKey::Clip,
    PropertyKey::FlipX,
    PropertyKey::FlipY,
    PropertyKey::Placeholder,
    PropertyKey::CornerRadius,
    PropertyKey::Fill,
    PropertyKey::Stroke,
    PropertyKey::Effect,
    PropertyKey::Content,
    PropertyKey::FontSize,
    PropertyKey::FontFamily,
    PropertyKey::FontWeight,
    PropertyKey::FontStyle,
    PropertyKey::LetterSpacing,
    PropertyKey::LineHeight,
    PropertyKey::TextAlign,
    PropertyKey::TextAlignVertical,
    PropertyKey::Layout,
    PropertyKey::Gap,
    PropertyKey::Padding,
    PropertyKey::JustifyContent,
    PropertyKey::AlignItems,
    PropertyKey::PolygonCount,
    PropertyKey::InnerRadius,
    PropertyKey::StartAngle,
    PropertyKey::SweepAngle,
    PropertyKey::Geometry,
    PropertyKey::FillRule,
    PropertyKey::IconFontName,
    PropertyKey::IconFontFamily,
    PropertyKey::ModelName,
    PropertyKey::Theme,
];

/// Shape of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Bool,
    Text,
    Color,
    Corners,
    Fills,
    Stroke,
    Effects,
    ThemeMap,
}

impl ValueKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::Text => "string",
            Self::Color => "color",
            Self::Corners => "corner list",
            Self::Fills => "fill list",
            Self::Stroke => "stroke",
            Self::Effects => "effect list",
            Self::ThemeMap => "theme map",
        }
    }
}

/// A property value. Closed union; the serializer and the override engine
/// both match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Color(String),
    Corners([f64; 4]),
    Fills(Vec<Fill>),
    Stroke(Stroke),
    Effects(Vec<Effect>),
    ThemeMap(BTreeMap<String, String>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::Text(_) => ValueKind::Text,
            Value::Color(_) => ValueKind::Color,
            Value::Corners(_) => ValueKind::Corners,
            Value::Fills(_) => ValueKind::Fills,
            Value::Stroke(_) => ValueKind::Stroke,
            Value::Effects(_) => ValueKind::Effects,
            Value::ThemeMap(_) => ValueKind::ThemeMap,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Fill {
    Color {
        color: String,
        enabled: bool,
    },
    Gradient {
        gradient: GradientKind,
        stops: Vec<GradientStop>,
        enabled: bool,
    },
    Image {
        url: String,
        mode: ImageMode,
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientKind {
    Linear,
    Radial,
    Angular,
}

impl GradientKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "linear" => Some(Self::Linear),
            "radial" => Some(Self::Radial),
            "angular" => Some(Self::Angular),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Radial => "radial",
            Self::Angular => "angular",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub color: String,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    Fill,
    Fit,
    Stretch,
}

impl ImageMode {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "fill" => Some(Self::Fill),
            "fit" => Some(Self::Fit),
            "stretch" => Some(Self::Stretch),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Stretch => "stretch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub fills: Vec<Fill>,
    /// Top, right, bottom, left.
    pub thickness: [f64; 4],
    pub align: StrokeAlign,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeAlign {
    Inside,
    Center,
    Outside,
}

impl StrokeAlign {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "inside" => Some(Self::Inside),
            "center" => Some(Self::Center),
            "outside" => Some(Self::Outside),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Inside => "inside",
            Self::Center => "center",
            Self::Outside => "outside",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Effect {
    Blur {
        radius: f64,
        enabled: bool,
    },
    Shadow {
        offset_x: f64,
        offset_y: f64,
        blur: f64,
        spread: f64,
        color: String,
        enabled: bool,
    },
    BackgroundBlur {
        radius: f64,
        enabled: bool,
    },
}

/// Link from an instance to the node it mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeLink {
    /// The mirrored node.
    pub node: NodeKey,
    /// Keys whose value was explicitly user-set on this instance. Never
    /// contains inherited values.
    pub overridden: BTreeSet<PropertyKey>,
    /// When set, this node's child list no longer mirrors the prototype and
    /// is serialized literally.
    pub children_overridden: bool,
}

impl PrototypeLink {
    pub fn new(node: NodeKey) -> Self {
        Self {
            node,
            overridden: BTreeSet::new(),
            children_overridden: false,
        }
    }
}

/// A visual element in the document tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub properties: BTreeMap<PropertyKey, Value>,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) prototype: Option<PrototypeLink>,
    /// Whether other nodes may safely reference this node as a prototype.
    pub reusable: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            properties: default_properties(node_type),
            parent: None,
            children: Vec::new(),
            prototype: None,
            reusable: false,
        }
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn prototype(&self) -> Option<&PrototypeLink> {
        self.prototype.as_ref()
    }

    pub fn property(&self, key: PropertyKey) -> Option<&Value> {
        self.properties.get(&key)
    }

    pub fn is_overridden(&self, key: PropertyKey) -> bool {
        self.prototype
            .as_ref()
            .map(|link| link.overridden.contains(&key))
            .unwrap_or(false)
    }

    pub fn children_overridden(&self) -> bool {
        self.prototype
            .as_ref()
            .map(|link| link.children_overridden)
            .unwrap_or(false)
    }
}

/// Generate a fresh node id.
pub fn unique_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..8].to_string()
}

/// The property set a freshly created node starts from.
pub fn default_properties(node_type: NodeType) -> BTreeMap<PropertyKey, Value> {
    let mut props = BTreeMap::new();
    props.insert(PropertyKey::Enabled, Value::Bool(true));
    props.insert(PropertyKey::X, Value::Number(0.0));
    props.insert(PropertyKey::Y, Value::Number(0.0));
    props.insert(PropertyKey::Width, Value::Number(0.0));
    props.insert(PropertyKey::Height, Value::Number(0.0));
    props.insert(PropertyKey::Rotation, Value::Number(0.0));
    props.insert(PropertyKey::Opacity, Value::Number(1.0));
    props.insert(PropertyKey::FlipX, Value::Bool(false));
    props.insert(PropertyKey::FlipY, Value::Bool(false));

    match node_type {
        NodeType::Frame => {
            props.insert(PropertyKey::Clip, Value::Bool(false));
            props.insert(PropertyKey::Placeholder, Value::Bool(false));
            props.insert(PropertyKey::Layout, Value::Text("horizontal".into()));
            props.insert(PropertyKey::Gap, Value::Number(0.0));
            props.insert(PropertyKey::JustifyContent, Value::Text("start".into()));
            props.insert(PropertyKey::AlignItems, Value::Text("start".into()));
        }
        NodeType::Group => {
            props.insert(PropertyKey::Layout, Value::Text("none".into()));
        }
        NodeType::Text => {
            props.insert(PropertyKey::Content, Value::Text(String::new()));
            props.insert(PropertyKey::FontSize, Value::Number(14.0));
            props.insert(PropertyKey::FontFamily, Value::Text("Inter".into()));
            props.insert(PropertyKey::FontWeight, Value::Text("normal".into()));
            props.insert(PropertyKey::FontStyle, Value::Text("normal".into()));
            props.insert(PropertyKey::LetterSpacing, Value::Number(0.0));
            props.insert(PropertyKey::LineHeight, Value::Number(0.0));
            props.insert(PropertyKey::TextAlign, Value::Text("left".into()));
            props.insert(PropertyKey::TextAlignVertical, Value::Text("top".into()));
        }
        NodeType::Note | NodeType::Prompt | NodeType::Context => {
            props.insert(PropertyKey::Content, Value::Text(String::new()));
            props.insert(PropertyKey::FontSize, Value::Number(16.0));
            props.insert(PropertyKey::FontFamily, Value::Text("Inter".into()));
            props.insert(PropertyKey::FontWeight, Value::Text("400".into()));
            props.insert(PropertyKey::FontStyle, Value::Text("normal".into()));
            props.insert(PropertyKey::LetterSpacing, Value::Number(0.0));
            props.insert(PropertyKey::LineHeight, Value::Number(0.0));
        }
        NodeType::IconFont => {
            props.insert(
                PropertyKey::IconFontFamily,
                Value::Text("Material Symbols Rounded".into()),
            );
        }
        NodeType::Rectangle
        | NodeType::Ellipse
        | NodeType::Line
        | NodeType::Polygon
        | NodeType::Path => {}
    }

    props
}
