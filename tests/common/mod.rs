//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory holding an `.orchestra` project and runs
/// `orc` inside it.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a project whose configuration is `config_yaml`
    pub fn new(config_yaml: &str) -> Self {
        let project = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        project.write_config(config_yaml);
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// The orchestra root
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    /// Replace the configuration
    pub fn write_config(&self, config_yaml: &str) {
        self.create_file(".orchestra/config/main.yml", config_yaml);
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Parsed install metadata of a component
    pub fn metadata(&self, component: &str) -> serde_json::Value {
        let content = self.read_file(&format!("root/share/orchestra/{component}.json"));
        serde_json::from_str(&content).expect("Invalid metadata JSON")
    }

    /// Run `orc` with the plain templater in the project directory
    pub fn orc(&self, args: &[&str]) -> Output {
        self.orc_in(&self.path(), args)
    }

    /// Run `orc` from `dir`
    pub fn orc_in(&self, dir: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_orc"))
            .current_dir(dir)
            .env("ORCHESTRA_TEMPLATER", "plain")
            .env_remove("ORCHESTRA_DOTDIR")
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("Failed to execute orc")
    }

    /// Run `orc` and assert it succeeded
    pub fn orc_ok(&self, args: &[&str]) -> Output {
        let output = self.orc(args);
        assert!(
            output.status.success(),
            "orc {} failed:\nstdout: {}\nstderr: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }
}

/// Install script writing `content` to `relative` under the staged root
#[allow(dead_code)]
pub fn install_file(relative: &str, content: &str) -> String {
    let dir = Path::new(relative)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    format!(
        "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/{dir}\" && echo {content} > \"$DESTDIR$ORCHESTRA_ROOT/{relative}\""
    )
}

/// Three components: C@build0 depends on any build of A and on B@build1
#[allow(dead_code)]
pub fn abc_config(b_build1_file: &str) -> String {
    format!(
        r#"
components:
  A:
    builds:
      build0:
        configure: "true"
        install: '{a}'
  B:
    builds:
      build0:
        configure: "true"
        install: '{b0}'
      build1:
        configure: "true"
        install: '{b1}'
  C:
    builds:
      build0:
        configure: "true"
        install: '{c}; touch "$ORCHESTRA_DOTDIR/c-script-ran"'
        dependencies: [A, B@build1]
"#,
        a = install_file("share/a/file", "a"),
        b0 = install_file("share/b/build0", "b0"),
        b1 = install_file(b_build1_file, "b1"),
        c = install_file("share/c/file", "c"),
    )
}
