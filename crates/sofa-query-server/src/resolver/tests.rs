//! Unit tests for path resolution.

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

#[fixture]
fn tree() -> Value {
    json!({
        "_id": "_design/app",
        "lib": {
            "util": "util source",
            "nested": {
                "deep": "deep source",
                "inner": {"leaf": "leaf source"}
            }
        },
        "shows": {"detail": "show source"},
        "number": 7
    })
}

fn context_of(path: &str, tree: &Value) -> ModuleContext {
    resolve(path, ModuleContext::default(), tree).expect("path resolves")
}

/// Context a module at `path` resolves its own requires from.
fn container_of(path: &str, tree: &Value) -> ModuleContext {
    context_of(path, tree)
        .parent()
        .cloned()
        .expect("resolved modules have a container")
}

fn reason(result: Result<ModuleContext, QueryServerError>) -> String {
    match result {
        Err(QueryServerError::Resolution { reason }) => reason,
        other => panic!("expected resolution error, got {other:?}"),
    }
}

#[rstest]
#[case("lib/util", "lib/util")]
#[case("lib/nested/deep", "lib/nested/deep")]
#[case("shows/detail", "shows/detail")]
fn resolves_from_the_root(tree: Value, #[case] path: &str, #[case] id: &str) {
    let module = context_of(path, &tree);
    assert_eq!(module.id(), Some(id));
    assert_eq!(module.location().map(|keys| keys.join("/")), Some(id.to_owned()));
    assert!(module.current(&tree).is_some_and(Value::is_string));
}

#[rstest]
#[case("/lib/util")]
#[case("lib//util")]
#[case("lib/util/")]
#[case("")]
fn empty_segments_always_fail(tree: Value, #[case] path: &str) {
    let message = reason(resolve(path, ModuleContext::default(), &tree));
    assert!(message.contains("empty segments"), "{message}");
}

#[rstest]
fn dot_needs_one_ancestor(tree: Value) {
    let message = reason(resolve("./lib", ModuleContext::default(), &tree));
    assert!(message.contains("has no parent"), "{message}");
}

#[rstest]
fn dot_dot_needs_two_ancestors(tree: Value) {
    let from_top_level_module = container_of("lib/util", &tree);
    let message = reason(resolve("../shows/detail", from_top_level_module, &tree));
    assert!(message.contains("has no parent"), "{message}");
}

#[rstest]
fn dot_stays_in_the_container(tree: Value) {
    let from = container_of("lib/nested/deep", &tree);
    let module = resolve("./inner/leaf", from, &tree).expect("sibling resolves");
    assert_eq!(module.id(), Some("lib/nested/inner/leaf"));
}

#[rstest]
fn dot_dot_climbs_one_container(tree: Value) {
    let from = container_of("lib/nested/deep", &tree);
    let module = resolve("../util", from, &tree).expect("uncle resolves");
    assert_eq!(module.id(), Some("lib/util"));
    assert_eq!(module.current(&tree), Some(&json!("util source")));
}

#[rstest]
fn leading_plain_segment_rebinds_to_root(tree: Value) {
    let from = container_of("lib/nested/deep", &tree);
    let module = resolve("shows/detail", from, &tree).expect("absolute path");
    assert_eq!(module.id(), Some("shows/detail"));
    assert_eq!(module.parent().and_then(ModuleContext::id), Some("shows"));
}

#[rstest]
fn missing_key_is_reported(tree: Value) {
    let message = reason(resolve("lib/missing", ModuleContext::default(), &tree));
    assert!(message.contains("'lib' has no property 'missing'"), "{message}");
}

#[rstest]
#[case("number", "number")]
#[case("lib", "object")]
#[case("lib/nested", "object")]
fn leaf_must_be_source_text(tree: Value, #[case] path: &str, #[case] kind: &str) {
    let message = reason(resolve(path, ModuleContext::default(), &tree));
    assert!(message.contains(&format!("not {kind}")), "{message}");
}

#[rstest]
fn missing_current_node_is_reported(tree: Value) {
    let detached = ModuleContext {
        id: Some("ghost".into()),
        location: None,
        parent: Some(Box::new(ModuleContext::root())),
    };
    let message = reason(resolve("./anything", detached, &tree));
    assert!(message.contains("required module missing"), "{message}");
}

#[rstest]
fn resolution_is_deterministic(tree: Value) {
    assert_eq!(context_of("lib/nested/deep", &tree), context_of("lib/nested/deep", &tree));
}
