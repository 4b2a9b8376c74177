//! End-to-end tests: the CLI binary and the crates working together

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

use tessera_core::{Graph, TesseraConfig};
use tessera_indexer::Indexer;
use tessera_laws::{ValidationScope, Validator};
use tessera_watcher::IncrementalEngine;

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
    def run(self):
        return g(3, 4)


def f1():
    return g(1, 2)


def f2():
    return g(3, 4)
"#;

fn repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
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

fn tessera(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tessera"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to run tessera")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!("stdout is not JSON ({e}): {}", stdout(output))
    })
}

#[test]
fn help_names_the_tool() {
    let output = Command::new(env!("CARGO_BIN_EXE_tessera"))
        .arg("--help")
        .output()
        .unwrap();
    let text = stdout(&output);
    assert!(text.contains("tessera"));
    assert!(text.contains("Incremental semantic validation"));
}

#[test]
fn check_passes_on_a_clean_repository() {
    let dir = repo(&[("lib.py", LIB), ("app.py", APP)]);
    let output = tessera(dir.path(), &["check"]);
    assert!(output.status.success(), "{}", stdout(&output));
    assert!(stdout(&output).contains("0 errors"));
    assert!(dir.path().join(".tessera/graph.bin").exists());
}

#[test]
fn check_fails_on_an_arity_error() {
    let dir = repo(&[
        ("lib.py", &LIB.replace("def g(a, b):", "def g(a, b, c):")),
        ("app.py", APP),
    ]);
    let output = tessera(dir.path(), &["check"]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("signature_mismatch"), "{text}");
    assert!(text.contains("app.py:"), "{text}");

    let output = tessera(dir.path(), &["check", "--json", "--errors-only"]);
    let report = json(&output);
    assert_eq!(report["errors"], 4);
    assert_eq!(report["warnings"], 0);
    let first = &report["violations"][0];
    assert_eq!(first["law"], "typing");
    assert_eq!(first["violation_type"], "signature_mismatch");
    assert_eq!(first["severity"], "error");
    assert_eq!(first["file_path"], "app.py");
    assert_eq!(first["suggested_fix"], "supply c");
}

#[test]
fn impact_reports_callers_as_json() {
    let dir = repo(&[("lib.py", LIB), ("app.py", APP)]);
    let output = tessera(dir.path(), &["impact", "lib.g", "--json"]);
    assert!(output.status.success());
    let impact = json(&output);
    let mut callers: Vec<String> = impact["callers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["qualified_name"].as_str().unwrap().to_string())
        .collect();
    callers.sort();
    assert_eq!(callers, vec!["app.Child.run", "app.f1", "app.f2", "lib.Base.run"]);

    let missing = tessera(dir.path(), &["impact", "lib.nothing"]);
    assert!(!missing.status.success());
}

#[test]
fn snapshots_capture_and_compare_states() {
    let dir = repo(&[("lib.py", LIB), ("app.py", APP)]);
    let created = tessera(dir.path(), &["snapshot", "create", "--content-id", "-d", "before"]);
    assert!(created.status.success());
    let id = stdout(&created).split_whitespace().next().unwrap().to_string();
    assert!(id.starts_with("c-"), "{id}");

    let listed = stdout(&tessera(dir.path(), &["snapshot", "list"]));
    assert!(listed.contains(&id));
    assert!(listed.contains("before"));

    let unchanged = json(&tessera(dir.path(), &["snapshot", "diff", &id, "--json"]));
    assert!(unchanged["nodes_added"].as_array().unwrap().is_empty());
    assert!(unchanged["nodes_modified"].as_array().unwrap().is_empty());

    write(dir.path(), "lib.py", &format!("{LIB}\n\ndef h():\n    return 1\n"));
    let changed = json(&tessera(dir.path(), &["snapshot", "diff", &id, "--json"]));
    assert!(!changed["nodes_added"].as_array().unwrap().is_empty());
    assert!(changed["nodes_removed"].as_array().unwrap().is_empty());
}

#[test]
fn clear_removes_the_cache() {
    let dir = repo(&[("lib.py", LIB)]);
    assert!(tessera(dir.path(), &["index"]).status.success());
    assert!(dir.path().join(".tessera").exists());
    assert!(tessera(dir.path(), &["clear"]).status.success());
    assert!(!dir.path().join(".tessera").exists());
}

/// Violations found by a full index and validation of the tree on disk.
fn full_validation(root: &Path) -> Vec<String> {
    let indexer = Indexer::new(root, TesseraConfig::default()).unwrap();
    let mut graph = Graph::new();
    indexer.index_all(&mut graph).unwrap();
    Validator::from_config(&TesseraConfig::default())
        .unwrap()
        .validate(&graph, &ValidationScope::Full)
        .violations
        .iter()
        .map(|v| format!("{}", v))
        .collect()
}

#[test]
fn incremental_cycles_match_a_full_rebuild() {
    let dir = repo(&[("lib.py", LIB), ("app.py", APP)]);
    let indexer = Indexer::new(dir.path(), TesseraConfig::default()).unwrap();
    let engine = IncrementalEngine::new(indexer, Graph::new()).unwrap();
    engine.index_all().unwrap();

    let edits: [(&str, Option<String>); 4] = [
        ("lib.py", Some(LIB.replace("def g(a, b):", "def g(a, b, c=0, *, d):"))),
        ("app.py", Some(APP.replace("g(3, 4)", "g(3, 4, d=1)"))),
        ("lib.py", None),
        ("lib.py", Some(LIB.to_string())),
    ];
    for (file, content) in edits {
        match content {
            Some(content) => write(dir.path(), file, &content),
            None => fs::remove_file(dir.path().join(file)).unwrap(),
        }
        engine.process_file(Path::new(file)).unwrap();

        let incremental: Vec<String> = engine
            .validate_all()
            .unwrap()
            .violations
            .iter()
            .map(|v| format!("{}", v))
            .collect();
        assert_eq!(incremental, full_validation(dir.path()), "after editing {file}");
    }
}
