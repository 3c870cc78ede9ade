//! Unit tests for the design-document cache and module loading.

use std::cell::Cell;
use std::rc::Rc;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::bundle::MockBundleImporter;
use crate::compiler::{Export, NativeCompiler};
use crate::protocol::ResponseStyle;

struct Fixture {
    cache: DDocCache,
    doc: SharedDesignDoc,
    loader: Rc<ModuleLoader>,
    executions: Rc<Cell<usize>>,
}

fn body() -> Value {
    json!({
        "_id": "_design/app",
        "lib": {
            "const": "module_const",
            "self": "module_self",
            "a": "module_a",
            "b": "module_b",
            "bundle": "UEsDBBQAAAAIAA==",
            "rel": {"x": "module_rel_x", "y": "module_y"}
        },
        "shows": {"detail": "show source"}
    })
}

fn compiler(executions: &Rc<Cell<usize>>) -> NativeCompiler {
    let mut compiler = NativeCompiler::new();
    let counter = Rc::clone(executions);
    compiler
        .register("module_const", move |scope, _args| {
            counter.set(counter.get() + 1);
            scope.export("answer", json!(42));
            Ok(Value::Null)
        })
        .register("module_self", |scope, _args| {
            scope.require("lib/self")?;
            Ok(Value::Null)
        })
        .register("module_a", |scope, _args| {
            scope.require("lib/b")?;
            Ok(Value::Null)
        })
        .register("module_b", |scope, _args| {
            scope.require("lib/a")?;
            Ok(Value::Null)
        })
        .register("module_rel_x", |scope, _args| {
            let sibling = scope.require("./y")?;
            let name = sibling
                .get("name")
                .and_then(Export::as_value)
                .cloned()
                .unwrap_or_default();
            scope.export("sibling", name);
            Ok(Value::Null)
        })
        .register("module_y", |scope, _args| {
            scope.export("name", json!("y"));
            Ok(Value::Null)
        });
    compiler
}

fn build(bundles: Bundles) -> Fixture {
    let executions = Rc::new(Cell::new(0));
    let mut cache = DDocCache::new();
    let doc = cache.insert("_design/app", body());
    let loader = ModuleLoader::new(
        &doc,
        Rc::new(compiler(&executions)),
        bundles,
        LogSink::new(ResponseStyle::Tagged),
    );
    Fixture {
        cache,
        doc,
        loader,
        executions,
    }
}

#[fixture]
fn fixture() -> Fixture {
    build(Bundles::disabled())
}

fn top_level() -> ModuleContext {
    ModuleContext::default()
}

#[rstest]
fn executes_and_caches_modules(fixture: Fixture) {
    let first = fixture
        .loader
        .require("lib/const", &top_level())
        .expect("module loads");
    let second = fixture
        .loader
        .require("lib/const", &top_level())
        .expect("module is cached");
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(fixture.executions.get(), 1);
    assert_eq!(first.get("answer").and_then(Export::as_value), Some(&json!(42)));
    assert_eq!(fixture.doc.borrow().module_count(), 1);
}

#[rstest]
fn self_require_is_a_resolution_error(fixture: Fixture) {
    let error = fixture
        .loader
        .require("lib/self", &top_level())
        .expect_err("cycle detected");
    match error {
        QueryServerError::Resolution { reason } => {
            assert!(reason.contains("lib/self -> lib/self"), "{reason}");
        }
        other => panic!("expected resolution error, got {other:?}"),
    }
    assert_eq!(fixture.doc.borrow().module_count(), 0);
}

#[rstest]
fn transitive_cycles_are_detected(fixture: Fixture) {
    let error = fixture
        .loader
        .require("lib/a", &top_level())
        .expect_err("cycle detected");
    assert!(error.reason().contains("lib/a -> lib/b -> lib/a"), "{}", error.reason());
    // The failed chain leaves nothing half-loaded behind.
    let retry = fixture.loader.require("lib/a", &top_level()).expect_err("still a cycle");
    assert_eq!(retry.error_id(), "invalid_require_path");
}

#[rstest]
fn modules_require_relative_to_their_container(fixture: Fixture) {
    let exports = fixture
        .loader
        .require("lib/rel/x", &top_level())
        .expect("relative require resolves");
    assert_eq!(exports.get("sibling").and_then(Export::as_value), Some(&json!("y")));
}

#[rstest]
fn top_level_functions_cannot_use_dot(fixture: Fixture) {
    let error = fixture
        .loader
        .require("./lib/const", &top_level())
        .expect_err("no container");
    assert!(error.reason().contains("has no parent"));
}

#[rstest]
fn non_source_leaf_is_rejected(fixture: Fixture) {
    let error = fixture
        .loader
        .require("lib/rel", &top_level())
        .expect_err("object leaf");
    assert!(error.reason().contains("not object"));
}

#[rstest]
fn replaced_documents_drop_their_loaders(fixture: Fixture) {
    let Fixture {
        mut cache, doc, loader, ..
    } = fixture;
    cache.insert("_design/app", json!({}));
    drop(doc);
    let error = loader
        .require("lib/const", &top_level())
        .expect_err("document gone");
    assert!(error.reason().contains("no longer cached"));
}

#[test]
fn bundle_leaves_are_imported_when_enabled() {
    let mut importer = MockBundleImporter::new();
    importer.expect_import().times(1).returning(|_, _| {
        let mut table = ExportTable::new();
        table.insert("packaged".into(), Export::Value(json!(true)));
        Ok(table)
    });
    let fixture = build(Bundles::new(true, None).with_importer(Rc::new(importer)));
    let exports = fixture
        .loader
        .require("lib/bundle", &top_level())
        .expect("bundle imports");
    assert_eq!(exports.get("packaged").and_then(Export::as_value), Some(&json!(true)));
}

#[rstest]
fn bundle_leaves_compile_as_source_when_disabled(fixture: Fixture) {
    let error = fixture
        .loader
        .require("lib/bundle", &top_level())
        .expect_err("no native implementation for the payload");
    assert_eq!(error.error_id(), "compilation_error");
}

#[rstest]
fn function_sources_are_looked_up_by_path(fixture: Fixture) {
    let doc = fixture.cache.get("_design/app").expect("cached");
    let doc = doc.borrow();
    assert_eq!(
        doc.function_source(&["shows".into(), "detail".into()]),
        Ok("show source".to_owned())
    );
    let missing = doc
        .function_source(&["shows".into(), "missing".into()])
        .expect_err("missing function");
    assert!(missing.reason().contains("shows/missing"));
}
