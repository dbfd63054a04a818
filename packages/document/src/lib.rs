//! # Vellum Document
//!
//! Core document model for the Vellum design canvas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ serializer: JSON file ⇄ node graph          │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ mutations: insert / move / replace / copy   │
//! │  - scratch identity map, cycle detection    │
//! │  - dependent-instance reconciliation        │
//! └─────────────────────────────────────────────┘
//!          ↓                        ↓
//! ┌──────────────────┐  ┌───────────────────────┐
//! │ path: id paths ⇄ │  │ overrides: instance ⇄ │
//! │ live nodes       │  │ prototype divergence  │
//! └──────────────────┘  └───────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ session: arena, patches, undo, hooks        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core principles
//!
//! 1. **One session, no globals**: every operation takes the [`Session`] by
//!    reference; open/close is construct/drop.
//! 2. **Patches all the way down**: each field write records a value-level
//!    inverse; transactions, undo and redo replay the same patch lists.
//! 3. **Instances stay derived**: structural edits rebuild dependent
//!    instances through the session's instance index, preserving local
//!    overrides.
//! 4. **Fail soft on data, fail hard on structure**: malformed fragments are
//!    skipped with warnings; duplicate ids, cycles and bad indices roll the
//!    whole operation back.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vellum_document::{Session, Warnings, CommitOptions};
//!
//! let mut session = Session::new();
//! let report = session.open(&std::fs::read_to_string("doc.vel")?, None)?;
//!
//! let mut block = session.begin_update();
//! let mut warnings = Warnings::new();
//! session.insert_nodes(
//!     &mut block,
//!     Some("card"),
//!     Some(0),
//!     &[serde_json::json!({ "type": "rectangle", "width": 24.0 })],
//!     &mut warnings,
//! )?;
//! session.commit(block, CommitOptions { undo: true });
//!
//! std::fs::write("doc.vel", session.export_string())?;
//! ```

/// JSON object shape used throughout the file-format layer.
pub(crate) type JsonMap = serde_json::Map<String, serde_json::Value>;

mod errors;
mod mutations;
mod node;
mod overrides;
mod path;
mod serializer;
mod session;
mod undo_stack;
mod variables;

pub use errors::{DataWarning, DocumentError, Warnings};
pub use mutations::NodeMove;
pub use node::{
    default_properties, unique_id, Effect, Fill, GradientKind, GradientStop, ImageMode, Node,
    NodeKey, NodeType, PropertyKey, PrototypeLink, Stroke, StrokeAlign, Value, ValueKind,
};
pub use serializer::{OpenReport, FORMAT_VERSION};
pub use session::{
    CacheHost, CommitOptions, Connection, ConnectionEnd, Hooks, LayoutEngine, Patch, Renderer,
    Session, UpdateBlock,
};
pub use undo_stack::{PatchBatch, UndoStack};
pub use variables::{
    ResolvedVariable, Variable, VariableLookup, VariableStore, VariableType, VariableValue,
};
