//! Incremental cycles over small on-disk repositories

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tessera_core::*;
use tessera_indexer::Indexer;

use crate::*;

const LIB: &str = r#"
def g(a, b):
    return a


class Base:
    def run(self):
        return g(1, 2)
"#;

const APP: &str = r#"
from lib import g, Base


class Child(Base):
    pass


def f1():
    return g(1, 2)


def f2():
    return g(3, 4)
"#;

fn write_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

fn engine_with(root: &Path, config: TesseraConfig) -> IncrementalEngine {
    let indexer = Indexer::new(root, config).unwrap();
    let engine = IncrementalEngine::new(indexer, Graph::new()).unwrap();
    let report = engine.index_all().unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    engine
}

fn engine(root: &Path) -> IncrementalEngine {
    engine_with(root, TesseraConfig::default())
}

fn id_of(engine: &IncrementalEngine, qualified: &str) -> NodeId {
    engine
        .read(|g| g.lookup_qualified(qualified))
        .unwrap()
        .first()
        .copied()
        .unwrap_or_else(|| panic!("no symbol {}", qualified))
}

fn types(report: &tessera_laws::ValidationReport) -> Vec<&str> {
    report
        .violations
        .iter()
        .map(|v| v.violation_type.as_str())
        .collect()
}

#[test]
fn impact_lists_exactly_the_callers() {
    let repo = write_repo(&[("lib.py", "def g(a, b):\n    return a\n"), ("app.py", APP)]);
    let engine = engine(repo.path());

    let impact = engine.impact("lib.g").unwrap();
    let callers: Vec<&str> = impact
        .callers
        .iter()
        .map(|c| c.qualified_name.as_str())
        .collect();
    assert_eq!(callers.len(), 2);
    assert!(callers.contains(&"app.f1"));
    assert!(callers.contains(&"app.f2"));
    assert_eq!(impact.resolved, vec![id_of(&engine, "lib.g")]);

    assert!(matches!(
        engine.impact("lib.nothing"),
        Err(EngineError::UnknownSymbol(_))
    ));
}

#[test]
fn class_impact_includes_method_callers_and_subclasses() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());

    let impact = engine.impact("lib.Base").unwrap();
    let subclasses: Vec<&str> = impact
        .subclasses
        .iter()
        .map(|c| c.qualified_name.as_str())
        .collect();
    assert_eq!(subclasses, vec!["app.Child"]);
}

#[test]
fn changes_propagate_one_hop() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());

    let event = engine.process_file(Path::new("lib.py")).unwrap();
    let stats = event.propagation_stats;
    assert_eq!(stats.callers, 2);
    assert_eq!(stats.subclasses, 1);
    assert_eq!(stats.importers, 1);
    assert_eq!(stats.superclasses, 0);

    for name in ["app.f1", "app.f2", "app.Child"] {
        assert!(event.changed.contains(&id_of(&engine, name)), "{name}");
    }
    assert!(event.changed.contains(&NodeId::module("app")));
}

#[test]
fn a_single_function_reaches_its_callers() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());
    let g = id_of(&engine, "lib.g");

    let (stats, changes) = engine
        .read(|graph| {
            let mut changes = ChangeSet::new([g]);
            let stats = propagate(graph, &mut changes);
            (stats, changes)
        })
        .unwrap();
    assert_eq!(stats.seeds, 1);
    assert_eq!(stats.callers, 3);
    assert_eq!(stats.callees, 0);
    assert_eq!(changes.len(), 4);
    assert!(changes.contains(id_of(&engine, "lib.Base.run")));
    assert!(!changes.seeds().contains(&id_of(&engine, "lib.Base.run")));
}

#[test]
fn validation_scope_pulls_in_call_sites_of_changed_functions() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());
    let g = id_of(&engine, "lib.g");

    let scope = engine
        .read(|graph| validation_scope(graph, &ChangeSet::new([g])))
        .unwrap();
    engine
        .read(|graph| {
            for site in graph.neighbors(g, EdgeKind::ResolvesTo, Direction::Incoming) {
                assert!(scope.contains(site));
            }
            for param in graph.parameters_of(g) {
                assert!(scope.contains(param.id));
            }
        })
        .unwrap();
}

#[test]
fn editing_a_signature_reports_callers() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());
    assert!(engine.validate_all().unwrap().is_clean());

    write(repo.path(), "lib.py", &LIB.replace("def g(a, b):", "def g(a, b, c):"));
    let event = engine.process_file(Path::new("lib.py")).unwrap();

    let report = &event.validation_result;
    assert_eq!(types(report), vec!["signature_mismatch"; 3]);
    let files: Vec<_> = report
        .violations
        .iter()
        .filter_map(|v| v.file_path.as_deref())
        .collect();
    assert_eq!(files, vec!["app.py", "app.py", "lib.py"]);
    assert!(report.violations[0].message.contains("[3, 3]"));
    assert_eq!(event.file_path, PathBuf::from("lib.py"));
    assert!(!event.reindex_stats.removed);
}

#[test]
fn removed_file_detaches_callers_and_relinks_on_return() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());

    fs::remove_file(repo.path().join("lib.py")).unwrap();
    let event = engine.process_file(Path::new("lib.py")).unwrap();
    assert!(event.reindex_stats.removed);
    assert!(event.reindex_stats.rebuild.nodes_removed > 0);
    assert!(!event.reindex_stats.rebuild.detached.is_empty());
    assert!(engine.read(|g| g.lookup_qualified("lib.g")).unwrap().is_empty());
    assert!(engine.impact("lib.g").is_err());

    write(repo.path(), "lib.py", LIB);
    let event = engine.process_file(repo.path().join("lib.py").as_path()).unwrap();
    assert!(event.reindex_stats.relinked >= 2);
    assert_eq!(engine.impact("lib.g").unwrap().callers.len(), 3);
    assert!(event.validation_result.is_clean());
}

fn fresh_violations(root: &Path) -> Vec<String> {
    engine(root)
        .validate_all()
        .unwrap()
        .violations
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn current_violations(engine: &IncrementalEngine) -> Vec<String> {
    engine
        .validate_all()
        .unwrap()
        .violations
        .iter()
        .map(|v| v.to_string())
        .collect()
}

const BASE_A: &str = r#"
class A:
    def __init__(self):
        pass

    def run(self):
        return 1
"#;

const SUB_B: &str = r#"
from a import A


class B(A):
    pass
"#;

const USE_C: &str = r#"
from b import B


def main():
    b = B(1)
    b.run(2)
"#;

#[test]
fn shadowing_an_inherited_member_rebinds_callers_elsewhere() {
    let repo = write_repo(&[("a.py", BASE_A), ("b.py", SUB_B), ("c.py", USE_C)]);
    let engine = engine(repo.path());
    assert_eq!(
        types(&engine.validate_all().unwrap()),
        vec!["too_many_positional", "too_many_positional"]
    );

    let overriding = format!(
        "{SUB_B}\n    def __init__(self, x):\n        self.x = x\n\n    def run(self, n):\n        return n\n"
    );
    write(repo.path(), "b.py", &overriding);
    let event = engine.process_file(Path::new("b.py")).unwrap();
    assert_eq!(event.reindex_stats.rebound, 2);
    assert!(event.validation_result.is_empty(), "{:?}", event.validation_result.violations);

    let init = id_of(&engine, "b.B.__init__");
    let run = id_of(&engine, "b.B.run");
    let callers = engine
        .read(|g| (g.callers_of(init), g.callers_of(run)))
        .unwrap();
    assert_eq!(callers.0, vec![id_of(&engine, "c.main")]);
    assert_eq!(callers.1, vec![id_of(&engine, "c.main")]);
    assert!(current_violations(&engine).is_empty());
    assert_eq!(current_violations(&engine), fresh_violations(repo.path()));

    // Dropping the overrides falls back to the inherited members again.
    write(repo.path(), "b.py", SUB_B);
    let event = engine.process_file(Path::new("b.py")).unwrap();
    assert_eq!(
        types(&event.validation_result),
        vec!["too_many_positional", "too_many_positional"]
    );
    assert_eq!(current_violations(&engine), fresh_violations(repo.path()));
}

#[test]
fn broken_edit_keeps_the_previous_slice() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());
    let before = engine.read(|g| g.node_count()).unwrap();

    write(repo.path(), "lib.py", "def g(:\n");
    let event = engine.process_file(Path::new("lib.py")).unwrap();
    assert!(event.reindex_stats.failure.is_some());
    assert_eq!(event.reindex_stats.rebuild.nodes_written, 0);
    assert_eq!(engine.read(|g| g.node_count()).unwrap(), before);
    assert!(event.validation_result.is_empty());
}

#[test]
fn marks_are_cleared_unless_retained() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);

    let engine = engine(repo.path());
    let event = engine.process_file(Path::new("lib.py")).unwrap();
    assert!(!event.changed.is_empty());
    let marked = engine
        .read(|g| event.changed.iter().filter(|id| g.node(**id).is_some_and(|n| n.changed)).count())
        .unwrap();
    assert_eq!(marked, 0);

    let mut config = TesseraConfig::default();
    config.watch.retain_changed = true;
    let engine = engine_with(repo.path(), config);
    let event = engine.process_file(Path::new("lib.py")).unwrap();
    let marked = engine
        .read(|g| event.changed.iter().filter(|id| g.node(**id).is_some_and(|n| n.changed)).count())
        .unwrap();
    assert_eq!(marked, event.changed.len());
}

#[test]
fn superseded_cycle_leaves_the_graph_alone() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = engine(repo.path());

    write(repo.path(), "lib.py", &LIB.replace("def g(a, b):", "def g(a, b, c):"));
    let outcome = engine.process_file_if(Path::new("lib.py"), || false).unwrap();
    assert!(outcome.is_none());
    let g = id_of(&engine, "lib.g");
    assert_eq!(engine.read(|graph| graph.parameters_of(g).len()).unwrap(), 2);
}

#[test]
fn files_outside_the_sources_are_rejected() {
    let repo = write_repo(&[("lib.py", LIB), ("notes.txt", "hello")]);
    let engine = engine(repo.path());
    assert!(matches!(
        engine.process_file(Path::new("notes.txt")),
        Err(EngineError::NotIndexable(_))
    ));
}

#[test]
fn generations_track_the_latest_signal() {
    let generations = Generations::default();
    let file = Path::new("lib.py");
    let first = generations.bump(file);
    assert!(generations.is_current(file, first));
    let second = generations.bump(file);
    assert!(!generations.is_current(file, first));
    assert!(generations.is_current(file, second));
    assert!(!generations.is_current(Path::new("other.py"), 1));
}

#[tokio::test]
async fn bus_delivers_to_every_subscriber() {
    let repo = write_repo(&[("lib.py", LIB)]);
    let engine = engine(repo.path());
    let event = engine.process_file(Path::new("lib.py")).unwrap();

    let bus = EventBus::new(8);
    assert_eq!(bus.publish(event.clone()), 0);

    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);
    assert_eq!(bus.publish(event), 2);
    assert_eq!(a.recv().await.unwrap().file_path, PathBuf::from("lib.py"));
    assert_eq!(b.recv().await.unwrap().file_path, PathBuf::from("lib.py"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bursts_of_changes_are_debounced() {
    let repo = write_repo(&[("lib.py", LIB), ("app.py", APP)]);
    let engine = Arc::new(engine(repo.path()));
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let (handle, _task) =
        Scheduler::new(Arc::clone(&engine), bus, Duration::from_millis(50)).spawn();

    write(repo.path(), "lib.py", &LIB.replace("def g(a, b):", "def g(a, b, c):"));
    for _ in 0..3 {
        assert!(handle.notify(repo.path().join("lib.py")));
    }
    assert!(handle.notify("notes.txt"));

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no event published")
        .unwrap();
    assert_eq!(event.file_path, PathBuf::from("lib.py"));
    assert_eq!(event.validation_result.errors, 3);

    let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(extra.is_err(), "expected a single event");
}

#[test]
fn change_event_json_shape() {
    let repo = write_repo(&[("lib.py", "def g(a):\n    return a\n")]);
    let engine = engine(repo.path());
    let mut event = engine.process_file(Path::new("lib.py")).unwrap();
    event.reindex_stats.duration_ms = 0;
    event.validation_result.duration_ms = 0;

    let json = serde_json::to_value(&event).unwrap();
    let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
    insta::assert_json_snapshot!(keys, @r###"
    [
      "file_path",
      "propagation_stats",
      "reindex_stats",
      "validation_result"
    ]
    "###);
}
