//! Error and warning types for the document engine.
//!
//! Structural and format problems are fatal to the current operation and
//! surface as [`DocumentError`]; data problems are recovered locally, logged,
//! and collected as [`DataWarning`]s so foreign or older documents remain
//! openable.

use thiserror::Error;

use crate::node::NodeType;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("another node with id '{0}' already exists")]
    DuplicateId(String),

    #[error("invalid node id containing slash '{0}'")]
    InvalidId(String),

    #[error("there's a cycle in the reference graph with node '{0}'")]
    ReferenceCycle(String),

    #[error("invalid insertion index {index}, parent node '{parent}' has {children} children")]
    InvalidIndex {
        parent: String,
        index: usize,
        children: usize,
    },

    #[error("can't find parent node with id '{0}'")]
    MissingParent(String),

    #[error("can't find node with id '{0}'")]
    MissingNode(String),

    #[error("'{0}' mirrors a component instance; edit the prototype or enable children-overridden on it")]
    InstanceDescendant(String),

    #[error("'{parent}' is a {node_type} node and cannot have children")]
    ChildrenNotAllowed { parent: String, node_type: NodeType },

    #[error("can't move '{0}' into its own subtree")]
    MoveCycle(String),

    #[error("instance '{0}' has no prototype")]
    MissingPrototype(String),

    #[error("node not found for override path '{0}'")]
    OverridePath(String),

    #[error("replacement for '{0}' could not be built")]
    EmptyReplacement(String),

    #[error("variable '{name}' is invalid: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A recoverable data problem. The offending fragment is skipped and the
/// surrounding operation still succeeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataWarning {
    #[error("invalid property '{name}' on '{node}'")]
    UnknownProperty { node: String, name: String },

    #[error("invalid ref '{0}'")]
    InvalidRef(String),

    #[error("invalid override path '{path}' for '{reference}'")]
    InvalidOverridePath { reference: String, path: String },

    #[error("invalid data for node with id '{0}'")]
    MalformedNode(String),

    #[error("unsupported fill type: {0}")]
    UnsupportedFill(String),

    #[error("unsupported effect type: {0}")]
    UnsupportedEffect(String),

    #[error("node '{parent}' has missing child with id '{child}'")]
    MissingChild { parent: String, child: String },
}

/// Warning collector handed through load and override application. Each
/// report is also logged.
#[derive(Debug, Default)]
pub struct Warnings {
    items: Vec<DataWarning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, warning: DataWarning) {
        tracing::warn!("{warning}");
        self.items.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataWarning> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<DataWarning> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = DocumentError::DuplicateId("btn".into());
        assert!(err.to_string().contains("btn"));

        let err = DocumentError::InvalidIndex {
            parent: "card".into(),
            index: 9,
            children: 2,
        };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains("card"));
    }

    #[test]
    fn test_warnings_collect_in_order() {
        let mut warnings = Warnings::new();
        warnings.report(DataWarning::InvalidRef("a".into()));
        warnings.report(DataWarning::MalformedNode("b".into()));
        let items = warnings.into_vec();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], DataWarning::InvalidRef("a".into()));
    }
}
