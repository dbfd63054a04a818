//! Cross-module scenarios: nested components, override round-trips, undo,
//! and load/export behavior working together.

use pretty_assertions::assert_eq;
use serde_json::json;
use vellum_document::{
    CommitOptions, DocumentError, NodeMove, PropertyKey, Session, Value, Warnings, FORMAT_VERSION,
};

fn open(session: &mut Session, doc: serde_json::Value) {
    session.open_value(doc, None).unwrap();
}

/// A button component nested inside a card component, plus one card
/// instance. Exercises two levels of mirroring.
fn nested_component_doc() -> serde_json::Value {
    json!({
        "version": FORMAT_VERSION,
        "children": [
            { "id": "btn", "type": "frame", "width": 80.0, "children": [
                { "id": "lbl", "type": "text", "content": "Ok" }
            ]},
            { "id": "card", "type": "frame", "children": [
                { "id": "btn-1", "type": "ref", "ref": "btn" }
            ]},
            { "id": "card-1", "type": "ref", "ref": "card" }
        ]
    })
}

#[test]
fn nested_instances_build_and_resolve() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    let mirror_button = session.resolve_path("card-1/btn-1").unwrap();
    let mirror_label = session.resolve_path("card-1/btn-1/lbl").unwrap();
    assert_eq!(session.node_path(mirror_button), "card-1/btn-1");
    assert_eq!(session.node_path(mirror_label), "card-1/btn-1/lbl");
    assert_eq!(
        session.node(mirror_label).property(PropertyKey::Content),
        Some(&Value::Text("Ok".into()))
    );
}

#[test]
fn prototype_edit_propagates_through_two_levels() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    let label = session.resolve_path("lbl").unwrap();
    let mut block = session.begin_update();
    session.set_property(
        &mut block,
        label,
        PropertyKey::Content,
        Some(Value::Text("Send".into())),
    );
    session.commit(block, CommitOptions { undo: true });

    for path in ["btn-1/lbl", "card-1/btn-1/lbl"] {
        let key = session.resolve_path(path).unwrap();
        assert_eq!(
            session.node(key).property(PropertyKey::Content),
            Some(&Value::Text("Send".into())),
            "{path}"
        );
    }

    // An override on the inner mirror pins it against further edits.
    let inner = session.resolve_path("card-1/btn-1/lbl").unwrap();
    let mut block = session.begin_update();
    session.set_property(
        &mut block,
        inner,
        PropertyKey::Content,
        Some(Value::Text("Custom".into())),
    );
    session.set_property(
        &mut block,
        label,
        PropertyKey::Content,
        Some(Value::Text("Retry".into())),
    );
    session.commit(block, CommitOptions { undo: true });

    let outer = session.resolve_path("btn-1/lbl").unwrap();
    assert_eq!(
        session.node(outer).property(PropertyKey::Content),
        Some(&Value::Text("Retry".into()))
    );
    assert_eq!(
        session.node(inner).property(PropertyKey::Content),
        Some(&Value::Text("Custom".into()))
    );
}

#[test]
fn override_collect_apply_round_trip_is_stable() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    // Pile some overrides onto the instance.
    let instance = session.resolve_path("card-1").unwrap();
    let mirror_label = session.resolve_path("card-1/btn-1/lbl").unwrap();
    let mut block = session.begin_update();
    session.set_property(
        &mut block,
        instance,
        PropertyKey::Opacity,
        Some(Value::Number(0.75)),
    );
    session.set_property(
        &mut block,
        mirror_label,
        PropertyKey::Content,
        Some(Value::Text("Custom".into())),
    );
    session.commit(block, CommitOptions { undo: true });

    let collected = session.collect_overrides(instance).unwrap();
    let before: Vec<_> = ["card-1", "card-1/btn-1", "card-1/btn-1/lbl"]
        .iter()
        .map(|p| {
            let key = session.resolve_path(p).unwrap();
            session.node(key).properties.clone()
        })
        .collect();

    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    session
        .apply_overrides(
            &mut block,
            instance,
            &serde_json::Value::Object(collected),
            &mut warnings,
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });
    assert!(warnings.is_empty());

    let after: Vec<_> = ["card-1", "card-1/btn-1", "card-1/btn-1/lbl"]
        .iter()
        .map(|p| {
            let key = session.resolve_path(p).unwrap();
            session.node(key).properties.clone()
        })
        .collect();
    assert_eq!(before, after);
}

#[test]
fn canonicalization_is_idempotent_across_the_tree() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    for path in [
        "btn",
        "lbl",
        "card",
        "btn-1",
        "btn-1/lbl",
        "card-1",
        "card-1/btn-1",
        "card-1/btn-1/lbl",
    ] {
        let once = session
            .canonicalize(path)
            .unwrap_or_else(|| panic!("'{path}' should resolve"));
        let twice = session.canonicalize(&once).unwrap();
        assert_eq!(once, twice, "canonicalize not idempotent for '{path}'");
        // The canonical path resolves to the same node as the original.
        assert_eq!(session.resolve_path(path), session.resolve_path(&once));
    }
}

#[test]
fn undo_reverts_structural_insert_and_reconciliation() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());
    let exported_before = session.export();

    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    session
        .insert_nodes(
            &mut block,
            Some("card"),
            None,
            &[json!({ "id": "divider", "type": "line" })],
            &mut warnings,
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });

    assert!(session.resolve_path("card-1/divider").is_some());

    assert!(session.undo());
    assert!(session.resolve_path("divider").is_none());
    assert!(session.resolve_path("card-1/divider").is_none());
    assert_eq!(session.export(), exported_before);

    assert!(session.redo());
    assert!(session.resolve_path("card-1/divider").is_some());
}

#[test]
fn move_between_parents_survives_round_trip() {
    let mut session = Session::new();
    open(
        &mut session,
        json!({ "version": FORMAT_VERSION, "children": [
            { "id": "a", "type": "frame", "children": [
                { "id": "x", "type": "rectangle" }
            ]},
            { "id": "b", "type": "frame" }
        ]}),
    );

    let mut block = session.begin_update();
    session
        .move_nodes(
            &mut block,
            &[NodeMove {
                node: "x".into(),
                parent: Some("b".into()),
                index: None,
            }],
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });

    let b = session.resolve_path("b").unwrap();
    let x = session.resolve_path("x").unwrap();
    assert_eq!(session.node(b).children(), [x].as_slice());

    let exported = session.export();
    let mut reopened = Session::new();
    reopened.open_value(exported, None).unwrap();
    let b2 = reopened.resolve_path("b").unwrap();
    assert_eq!(reopened.node(b2).children().len(), 1);
}

#[test]
fn structural_children_override_detaches_mirroring() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    // Replace the instance's children wholesale.
    let instance = session.resolve_path("card-1").unwrap();
    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    session
        .apply_overrides(
            &mut block,
            instance,
            &json!({ "children": [
                { "id": "free", "type": "rectangle", "width": 5.0 }
            ]}),
            &mut warnings,
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });

    let instance = session.resolve_path("card-1").unwrap();
    assert!(session.node(instance).children_overridden());
    assert_eq!(session.node(instance).children().len(), 1);
    assert!(session.resolve_path("free").is_some());

    // Prototype structure edits no longer reach this instance.
    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    session
        .insert_nodes(
            &mut block,
            Some("card"),
            None,
            &[json!({ "id": "late", "type": "rectangle" })],
            &mut warnings,
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });

    let instance = session.resolve_path("card-1").unwrap();
    assert_eq!(session.node(instance).children().len(), 1);
    assert!(session.resolve_path("card-1/late").is_none());

    // And the divergent structure survives a file round trip.
    let exported = session.export();
    let mut reopened = Session::new();
    reopened.open_value(exported, None).unwrap();
    let instance = reopened.resolve_path("card-1").unwrap();
    assert!(reopened.node(instance).children_overridden());
    assert_eq!(reopened.node(instance).children().len(), 1);
}

#[test]
fn copy_then_edit_prototype_updates_copy() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());

    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    let copy = session
        .copy_node(
            &mut block,
            None,
            None,
            json!({ "id": "btn", "name": "copy of btn" }),
            &mut warnings,
        )
        .unwrap();
    session.commit(block, CommitOptions { undo: true });

    let copy_id = session.node(copy).id.clone();
    assert_ne!(copy_id, "btn");

    // Width flows from the prototype; the name override stays local.
    let btn = session.resolve_path("btn").unwrap();
    let mut block = session.begin_update();
    session.set_property(&mut block, btn, PropertyKey::Width, Some(Value::Number(96.0)));
    session.commit(block, CommitOptions { undo: true });

    assert_eq!(
        session.node(copy).property(PropertyKey::Width),
        Some(&Value::Number(96.0))
    );
    assert_eq!(
        session.node(copy).property(PropertyKey::Name),
        Some(&Value::Text("copy of btn".into()))
    );
}

#[test]
fn failed_operations_leave_no_partial_state() {
    let mut session = Session::new();
    open(&mut session, nested_component_doc());
    let node_count = session.node_count();
    let exported = session.export();

    // Structural failure inside a batch with a valid head.
    let mut block = session.begin_update();
    let mut warnings = Warnings::new();
    let err = session.insert_nodes(
        &mut block,
        None,
        None,
        &[
            json!({ "id": "ok", "type": "frame" }),
            json!({ "id": "self", "type": "ref", "ref": "self" }),
        ],
        &mut warnings,
    );
    assert!(matches!(err, Err(DocumentError::ReferenceCycle(_))));
    assert_eq!(session.node_count(), node_count);
    session.rollback(block);

    // Unknown parent.
    let mut block = session.begin_update();
    let err = session.insert_nodes(
        &mut block,
        Some("missing"),
        None,
        &[json!({ "type": "rectangle" })],
        &mut Warnings::new(),
    );
    assert!(matches!(err, Err(DocumentError::MissingParent(_))));
    session.rollback(block);

    assert_eq!(session.export(), exported);
}

#[test]
fn warnings_do_not_fail_the_load() {
    let mut session = Session::new();
    let report = session
        .open_value(
            json!({ "version": FORMAT_VERSION, "children": [
                { "id": "good", "type": "rectangle", "wobble": 3 },
                { "id": "ghost", "type": "ref", "ref": "nowhere" }
            ]}),
            None,
        )
        .unwrap();

    assert!(!report.is_clean());
    assert_eq!(report.warnings.len(), 2);
    assert!(session.resolve_path("good").is_some());
    assert!(session.resolve_path("ghost").is_none());
}
