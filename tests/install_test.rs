//! Integration tests for `orc install`, `orc uninstall` and `orc upgrade`

mod common;

use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use common::{abc_config, install_file, TestProject};
use predicates::prelude::*;

fn index(project: &TestProject, component: &str) -> Vec<String> {
    project
        .read_file(&format!("root/share/orchestra/{component}.idx"))
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_install_from_source_records_every_component() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    project.orc_ok(&["install", "-B", "C@build0"]);

    for component in ["A", "B", "C"] {
        assert!(project.file_exists(&format!("root/share/orchestra/{component}.idx")));
        assert!(project.file_exists(&format!("root/share/orchestra/{component}.json")));
    }
    let root = ChildPath::new(project.root());
    root.child("share/a/file").assert(predicate::str::contains("a"));
    root.child("share/b/build1").assert(predicate::str::contains("b1"));
    root.child("share/b/build0").assert(predicate::path::missing());
    root.child("share/c/file").assert(predicate::str::contains("c"));

    assert_eq!(project.metadata("C")["manually_installed"], true);
    assert_eq!(project.metadata("A")["manually_installed"], false);
    assert_eq!(project.metadata("B")["manually_installed"], false);
    assert_eq!(project.metadata("B")["build"], "build1");
    assert_eq!(project.metadata("C")["source"], "build");
}

#[test]
fn test_index_entries_exist_and_uninstall_removes_them() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    project.orc_ok(&["install", "-B", "A"]);

    let entries = index(&project, "A");
    assert!(!entries.is_empty());
    for entry in &entries {
        let path = project.root().join(entry.trim_start_matches('/'));
        assert!(path.exists(), "{} listed but missing", path.display());
    }

    project.orc_ok(&["uninstall", "A"]);
    for entry in &entries {
        let path = project.root().join(entry.trim_start_matches('/'));
        assert!(!path.exists(), "{} left behind", path.display());
    }
    ChildPath::new(project.root())
        .child("share/orchestra/A.json")
        .assert(predicate::path::missing());
}

#[test]
fn test_uninstall_removes_nested_directories() {
    let config = format!(
        r#"
components:
  headers:
    builds:
      default:
        configure: "true"
        install: '{}'
"#,
        install_file("include/foo/bar/x.h", "x")
    );
    let project = TestProject::new(&config);
    project.orc_ok(&["install", "-B", "headers"]);

    let entries = index(&project, "headers");
    assert!(entries.iter().any(|e| e.trim_start_matches('/') == "include/foo/bar"));
    let root = ChildPath::new(project.root());
    root.child("include/foo/bar/x.h").assert(predicate::path::exists());

    project.orc_ok(&["uninstall", "headers"]);
    for entry in &entries {
        let path = project.root().join(entry.trim_start_matches('/'));
        assert!(!path.exists(), "{} left behind", path.display());
    }
    root.child("include/foo").assert(predicate::path::missing());
}

#[test]
fn test_uninstall_unknown_component_fails() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    let output = project.orc(&["uninstall", "A"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not installed"));
}

#[test]
fn test_changed_dependency_is_rebuilt_and_propagates() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    project.orc_ok(&["install", "-B", "C@build0"]);
    let c_hash = project.metadata("C")["recursive_hash"].clone();

    project.write_config(&abc_config("share/b/changed"));
    project.orc_ok(&["install", "-B", "C@build0"]);

    assert!(project.file_exists("root/share/b/changed"));
    assert!(!project.file_exists("root/share/b/build1"));
    assert_ne!(project.metadata("C")["recursive_hash"], c_hash);
    assert_eq!(project.metadata("C")["manually_installed"], true);
}

#[test]
fn test_second_install_with_no_force_is_a_no_op() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    project.orc_ok(&["install", "-B", "C@build0"]);
    std::fs::remove_file(project.path().join(".orchestra/c-script-ran")).unwrap();

    let output = project.orc_ok(&["install", "-B", "--no-force", "C@build0"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Nothing to do"));
    assert!(!project.file_exists(".orchestra/c-script-ran"));
}

#[test]
fn test_pretend_runs_nothing() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    let output = project.orc_ok(&["install", "-B", "--pretend", "C@build0"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Would run:"));
    assert!(stdout.contains("install C@build0"));
    assert!(!project.file_exists("root/share/orchestra/C.json"));
}

#[test]
fn test_install_from_binary_archive_skips_scripts() {
    let mut config = abc_config("share/b/build1");
    config.push_str("binary_archives:\n  - private: https://example.invalid/archives\n");
    let project = TestProject::new(&config);

    project.orc_ok(&["install", "-B", "--create-binary-archives", "C@build0"]);
    project.orc_ok(&["uninstall", "C"]);
    std::fs::remove_file(project.path().join(".orchestra/c-script-ran")).unwrap();

    project.orc_ok(&["install", "-b", "C@build0"]);
    assert!(!project.file_exists(".orchestra/c-script-ran"));
    assert_eq!(project.metadata("C")["source"], "binary archives");
    assert_eq!(project.read_file("root/share/c/file").trim(), "c");
}

#[test]
fn test_archives_only_without_archive_fails() {
    let mut config = abc_config("share/b/build1");
    config.push_str("binary_archives:\n  - private: https://example.invalid/archives\n");
    let project = TestProject::new(&config);

    let output = project.orc(&["install", "A"]);
    assert!(!output.status.success());
    assert!(!project.file_exists("root/share/orchestra/A.json"));
}

#[test]
fn test_hardlinks_become_relative_symlinks() {
    let install = format!(
        "{} && ln \"$DESTDIR$ORCHESTRA_ROOT/share/hl/one\" \"$DESTDIR$ORCHESTRA_ROOT/share/hl/two\"",
        install_file("share/hl/one", "same")
    );
    let project = TestProject::new(&format!(
        "components:\n  component_A:\n    builds:\n      default:\n        configure: \"true\"\n        install: '{install}'\n"
    ));
    project.orc_ok(&["install", "-B", "component_A"]);

    let dir = project.root().join("share/hl");
    let links: Vec<_> = ["one", "two"]
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.symlink_metadata().unwrap().file_type().is_symlink())
        .collect();
    assert_eq!(links.len(), 1);
    let target = std::fs::read_link(&links[0]).unwrap();
    assert!(target.is_relative());
    assert_eq!(std::fs::read_to_string(&links[0]).unwrap().trim(), "same");
}

#[test]
fn test_failing_script_exits_non_zero() {
    let project = TestProject::new(
        "components:\n  broken:\n    builds:\n      default:\n        configure: \"true\"\n        install: \"exit 3\"\n",
    );
    let output = project.orc(&["install", "-B", "broken"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken@default"));
}

#[test]
fn test_upgrade_reinstalls_only_manual_components() {
    let project = TestProject::new(&abc_config("share/b/build1"));
    project.orc_ok(&["install", "-B", "C@build0"]);

    let output = project.orc_ok(&["upgrade", "-B"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Nothing to do"));

    project.write_config(&abc_config("share/b/changed"));
    let output = project.orc_ok(&["upgrade", "-B", "--pretend"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("install B@build1"));
    assert!(stdout.contains("install C@build0"));
    assert!(!stdout.contains("install A@build0"));
}
