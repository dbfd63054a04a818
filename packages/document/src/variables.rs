//! # Variable and Theme Store
//!
//! Documents can bind any serialized property to a named variable (`$name`
//! in the file format). The store owns variable definitions and theme maps;
//! the rest of the engine only sees the [`VariableLookup`] seam, so hosts
//! can substitute their own resolver.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    Color,
    Number,
    Boolean,
    String,
}

impl VariableType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "color" => Some(Self::Color),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }

    /// Whether a raw JSON literal is acceptable for this variable type.
    pub fn accepts(self, value: &JsonValue) -> bool {
        match self {
            Self::Color => value.as_str().map(|s| s.starts_with('#')).unwrap_or(false),
            Self::Number => value.as_f64().map(f64::is_finite).unwrap_or(false),
            Self::Boolean => value.is_boolean(),
            Self::String => value.is_string(),
        }
    }
}

/// One value of a variable, optionally constrained to theme variants.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableValue {
    pub value: JsonValue,
    /// Theme dimension name to variant name, e.g. `{"mode": "dark"}`.
    pub theme: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub variable_type: VariableType,
    pub values: Vec<VariableValue>,
}

/// A variable resolved for a concrete theme.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVariable {
    pub variable_type: VariableType,
    pub value: JsonValue,
}

/// Resolver seam used wherever a property may be `$name`-bound.
pub trait VariableLookup {
    fn get_variable(&self, name: &str, theme: Option<&str>) -> Option<ResolvedVariable>;
}

/// Session-owned store implementing [`VariableLookup`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableStore {
    variables: BTreeMap<String, Variable>,
    /// Theme name to its color map, round-tripped through the file format.
    themes: BTreeMap<String, BTreeMap<String, String>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.themes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.themes.is_empty()
    }

    pub fn add_variable(&mut self, name: &str, variable_type: VariableType) -> &mut Variable {
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Variable {
                name: name.to_string(),
                variable_type,
                values: Vec::new(),
            })
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn set_themes(&mut self, themes: BTreeMap<String, BTreeMap<String, String>>) {
        self.themes = themes;
    }

    pub fn themes(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.themes
    }

    pub fn default_theme(&self) -> Option<&str> {
        self.themes.keys().next().map(String::as_str)
    }
}

impl VariableLookup for VariableStore {
    fn get_variable(&self, name: &str, theme: Option<&str>) -> Option<ResolvedVariable> {
        let variable = self.variables.get(name)?;

        // Prefer a value constrained to the requested theme variant, then an
        // unconstrained one, then whatever comes first.
        let themed = theme.and_then(|t| {
            variable.values.iter().find(|v| {
                v.theme
                    .as_ref()
                    .map(|m| m.values().any(|variant| variant == t))
                    .unwrap_or(false)
            })
        });
        let picked = themed
            .or_else(|| variable.values.iter().find(|v| v.theme.is_none()))
            .or_else(|| variable.values.first())?;

        Some(ResolvedVariable {
            variable_type: variable.variable_type,
            value: picked.value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_validation() {
        assert!(VariableType::Color.accepts(&json!("#ff0000")));
        assert!(!VariableType::Color.accepts(&json!("red")));
        assert!(VariableType::Number.accepts(&json!(4.5)));
        assert!(!VariableType::Number.accepts(&json!("4.5")));
        assert!(VariableType::String.accepts(&json!("hello")));
    }

    #[test]
    fn test_lookup_prefers_theme_variant() {
        let mut store = VariableStore::new();
        let var = store.add_variable("accent", VariableType::Color);
        var.values.push(VariableValue {
            value: json!("#111111"),
            theme: None,
        });
        var.values.push(VariableValue {
            value: json!("#eeeeee"),
            theme: Some(BTreeMap::from([("mode".to_string(), "dark".to_string())])),
        });

        let light = store.get_variable("accent", None).unwrap();
        assert_eq!(light.value, json!("#111111"));

        let dark = store.get_variable("accent", Some("dark")).unwrap();
        assert_eq!(dark.value, json!("#eeeeee"));
    }

    #[test]
    fn test_missing_variable_is_none() {
        let store = VariableStore::new();
        assert!(store.get_variable("nope", None).is_none());
    }
}
