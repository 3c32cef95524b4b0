//! Install pipeline
//!
//! Installs one build into the orchestra root:
//!
//! 1. stage: fresh `<tmproot>/<safe-build-name>` with the root skeleton
//! 2. fill the staged root from a binary archive or the install script
//! 3. drop conflicting directories, run post-install rewrites
//! 4. diff the staged tree to get the component's file list
//! 5. uninstall the previously installed build, merge, record metadata
//! 6. optionally produce a binary archive, refresh convenience symlinks
//! 7. clean the staged root
//!
//! The merge is not transactional. An interrupted install leaves metadata
//! describing whatever was merged so the next install can uninstall it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::defaults::{CONFLICTING_DIRS, STAGED_ROOT_DIRS};
use crate::core::binary_archives;
use crate::core::component::Build;
use crate::core::environment::ScriptEnvironment;
use crate::core::hashing::{self, CommitSource};
use crate::core::metadata::{InstallMetadata, InstallSource, MetadataStore};
use crate::core::post_install::{self, PostInstallOptions};
use crate::core::uninstall;
use crate::core::workspace::Workspace;
use crate::error::{InstallError, OrchestraError};
use crate::infra::archive;
use crate::infra::filesystem;
use crate::infra::script::{ScriptFlavor, ScriptInvocation};

/// Outcome of an install
#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub source: InstallSource,
    /// Root-relative paths deposited by the build
    pub files: Vec<String>,
    /// Whether the staged tree was merged into the root
    pub merged: bool,
    /// Binary archive produced by this install
    pub created_archive: Option<PathBuf>,
}

/// `<TMP_ROOT><ORCHESTRA_ROOT>`
pub fn staged_root(tmp_root: &Path, orchestra_root: &Path) -> PathBuf {
    tmp_root.join(orchestra_root.strip_prefix("/").unwrap_or(orchestra_root))
}

/// Wipe and recreate a staged root with the directory skeleton
pub fn prepare_staged_root(tmp_root: &Path, staged: &Path) -> Result<(), OrchestraError> {
    filesystem::remove_dir_all(tmp_root)?;
    for dir in STAGED_ROOT_DIRS {
        filesystem::create_dir_all(&staged.join(dir))?;
    }
    let lib = staged.join("lib");
    std::os::unix::fs::symlink("lib64", &lib).map_err(|e| OrchestraError::io(&lib, e))?;
    let info_dir = staged.join("share/info/dir");
    std::fs::write(&info_dir, "").map_err(|e| OrchestraError::io(&info_dir, e))
}

/// Install `build`
pub fn install(ws: &Workspace, build: &Build) -> Result<InstallReport, OrchestraError> {
    let started = Instant::now();
    let config = &ws.config;
    let component = config.component(&build.component)?;
    let qualified = build.qualified_name();
    let root = &config.paths.root;

    let tmp_root = config.paths.tmproot_for(&qualified);
    let staged = staged_root(&tmp_root, root);
    tracing::info!("Installing {qualified}");
    prepare_staged_root(&tmp_root, &staged)?;
    let before = filesystem::index_tree(&staged)?;

    let recursive_hash = ws.recursive_hash(&build.component)?;
    let relative_archive = ws.archive_relative_path(build)?;
    let archive = if ws.can_use_archives(component) {
        ws.archives.locate(&relative_archive)
    } else {
        None
    };

    let source = if let Some(archive_path) = &archive {
        ws.archives.fetch(ws.vcs(), archive_path)?;
        tracing::info!("Extracting {}", archive_path.display());
        archive::extract_tar_gz(archive_path, &staged)?;
        InstallSource::BinaryArchives
    } else if ws.can_build(component) {
        run_install_script(ws, build)?;
        InstallSource::Build
    } else if ws.can_use_archives(component) {
        let material = ws.hash_material(&build.component)?;
        return Err(InstallError::MissingBinaryArchive {
            build: qualified,
            archive: relative_archive.display().to_string(),
            diff: ws
                .archives
                .closest_material_diff(&build.component, &build.name, &material),
        }
        .into());
    } else {
        return Err(InstallError::NoSourceAvailable { build: qualified }.into());
    };

    for dir in CONFLICTING_DIRS {
        filesystem::remove_dir_all(&staged.join(dir))?;
    }

    if !component.skip_post_install {
        // Archives already carry the license
        let license = match (&component.license, source) {
            (Some(license), InstallSource::Build) => {
                Some(config.paths.source_dir(&component.name).join(license))
            }
            _ => None,
        };
        post_install::post_install(&PostInstallOptions {
            staged_root: &staged,
            orchestra_root: root,
            component: &component.name,
            ndebug: build.ndebug,
            license: license.as_deref(),
        })?;
    }

    let files = new_files(&before, &filesystem::index_tree(&staged)?, &build.component);

    let mut created_archive = None;
    if ws.options.create_binary_archives && source == InstallSource::Build {
        if let Some((name, repository)) = ws.archives.target_repository(component) {
            let path = repository.join(&relative_archive);
            tracing::debug!("Archiving {qualified} into {name}");
            binary_archives::create(&staged, &path, &ws.hash_material(&build.component)?)?;
            created_archive = Some(path);
        } else {
            tracing::warn!("No binary archives repository to store {qualified}");
        }
    }

    let merged = !ws.options.no_merge;
    if merged {
        let previous = ws.metadata.load(&build.component)?;
        if previous.is_some() {
            uninstall::uninstall(root, &ws.metadata, &build.component)?;
        }
        merge(ws, &staged, root)?;

        let has_archive = archive.is_some() || created_archive.is_some();
        let metadata = InstallMetadata {
            component: build.component.clone(),
            build: build.name.clone(),
            self_hash: hashing::self_hash(build)?,
            recursive_hash,
            source,
            manually_installed: previous.is_some_and(|p| p.manually_installed)
                || ws.is_requested(&build.component),
            install_time: started.elapsed().as_secs_f64(),
            binary_archive_path: has_archive.then(|| relative_archive.display().to_string()),
        };
        ws.metadata.save_index(&build.component, &files)?;
        ws.metadata.save(&metadata)?;
        update_convenience_symlinks(ws, build, &relative_archive)?;
    }

    if ws.options.keep_tmproot {
        tracing::info!("Keeping {}", tmp_root.display());
    } else {
        filesystem::remove_dir_all(&tmp_root)?;
    }

    Ok(InstallReport {
        source,
        files,
        merged,
        created_archive,
    })
}

fn run_install_script(ws: &Workspace, build: &Build) -> Result<(), OrchestraError> {
    let component = ws.config.component(&build.component)?;
    let env = ScriptEnvironment::for_install(&ws.config, component, build)
        .with_run_tests(ws.options.run_tests);
    let prelude = env.prelude();
    let build_dir = ws.config.paths.build_dir(&build.component, &build.name);
    // Builds installed without configuring still need somewhere to run
    filesystem::create_dir_all(&build_dir)?;

    let name = format!("install {}", build.qualified_name());
    ws.scripts().run(
        &ScriptInvocation {
            name: &name,
            body: &build.install,
            working_dir: &build_dir,
            env: env.vars(),
            prelude: &prelude,
        },
        ScriptFlavor::User {
            stream_output: ws.options.stream_output,
        },
        true,
    )?;
    Ok(())
}

/// Paths present after staging but not before, plus the metadata files
fn new_files(before: &BTreeSet<PathBuf>, after: &BTreeSet<PathBuf>, component: &str) -> Vec<String> {
    let mut files: Vec<String> = after
        .difference(before)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    for own in [
        MetadataStore::relative_metadata_path(component),
        MetadataStore::relative_index_path(component),
    ] {
        let own = own.to_string_lossy().into_owned();
        if !files.contains(&own) {
            files.push(own);
        }
    }
    files
}

/// Copy the staged tree into the root, hardlinking where possible
fn merge(ws: &Workspace, staged: &Path, root: &Path) -> Result<(), OrchestraError> {
    filesystem::create_dir_all(root)?;
    let body = format!(
        "cp -farl \"{}/.\" \"{}\"",
        staged.display(),
        root.display()
    );
    let env = std::collections::BTreeMap::new();
    ws.scripts().run(
        &ScriptInvocation {
            name: "merge",
            body: &body,
            working_dir: root,
            env: &env,
            prelude: "",
        },
        ScriptFlavor::Internal,
        true,
    )?;
    Ok(())
}

/// Refresh the convenience symlinks next to the archive of `build`.
/// Returns the links created.
pub fn update_convenience_symlinks(
    ws: &Workspace,
    build: &Build,
    relative_archive: &Path,
) -> Result<Vec<PathBuf>, OrchestraError> {
    let Some(archive_path) = ws.archives.locate(relative_archive) else {
        return Ok(Vec::new());
    };
    let (Some(dir), Some(name)) = (archive_path.parent(), archive_path.file_name()) else {
        return Ok(Vec::new());
    };
    let component = ws.config.component(&build.component)?;
    let commit = ws.commit(component)?;
    let heads = if component.is_cloneable() {
        ws.remote_heads(component)
    } else {
        None
    };
    binary_archives::update_symlinks(
        dir,
        &name.to_string_lossy(),
        heads.as_ref(),
        commit.as_deref(),
        &ws.config_branch(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace::{ArchiveMode, WorkspaceOptions};
    use crate::test_utils::{workspace, FakeVcs};
    use serde_json::json;
    use tempfile::TempDir;

    fn project() -> serde_json::Value {
        json!({
            "binary_archives": [{"public": "https://example.com/archives"}],
            "components": {
                "hello": {
                    "license": "COPYING",
                    "builds": {
                        "default": {
                            "configure": "true",
                            "install": "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/bin\"\necho hello > \"$DESTDIR$ORCHESTRA_ROOT/bin/hello\"\nmkdir -p \"$DESTDIR$ORCHESTRA_ROOT/share/locale\"\ntouch \"$DESTDIR$ORCHESTRA_ROOT/share/locale/x\"\ntouch \"$DESTDIR$ORCHESTRA_ROOT/lib/libhello.la\""
                        },
                        "other": {
                            "configure": "true",
                            "install": "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/bin\"\necho other > \"$DESTDIR$ORCHESTRA_ROOT/bin/other\""
                        }
                    }
                }
            }
        })
    }

    fn build_mode(archive_mode: ArchiveMode) -> WorkspaceOptions {
        WorkspaceOptions {
            archive_mode,
            ..WorkspaceOptions::default()
        }
    }

    fn prepare(temp: &TempDir) -> Workspace {
        let mut ws = workspace(temp, project(), FakeVcs::default())
            .with_options(build_mode(ArchiveMode::ForceBuild));
        let sources = ws.config.paths.source_dir("hello");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(sources.join("COPYING"), "license text").unwrap();
        ws.request(["hello"]);
        ws
    }

    // ============================================
    // Unit Tests
    // ============================================

    #[test]
    fn test_staged_root_nests_the_orchestra_root() {
        assert_eq!(
            staged_root(Path::new("/tmp/x"), Path::new("/work/root")),
            PathBuf::from("/tmp/x/work/root")
        );
    }

    #[test]
    fn test_install_from_source_records_metadata() {
        let temp = TempDir::new().unwrap();
        let ws = prepare(&temp);
        let build = ws.config.resolve_build("hello").unwrap().clone();

        let report = install(&ws, &build).unwrap();
        let root = &ws.config.paths.root;

        assert_eq!(report.source, InstallSource::Build);
        assert!(report.merged);
        assert_eq!(std::fs::read_to_string(root.join("bin/hello")).unwrap(), "hello\n");
        assert!(!root.join("share/locale").exists());
        assert!(!root.join("lib64/libhello.la").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("share/orchestra/hello.license")).unwrap(),
            "license text"
        );

        let metadata = ws.metadata.load("hello").unwrap().unwrap();
        assert_eq!(metadata.build, "default");
        assert!(metadata.manually_installed);
        assert_eq!(metadata.recursive_hash, ws.recursive_hash("hello").unwrap());
        assert!(ws.is_installed_current(&build).unwrap());

        let index = ws.metadata.load_index("hello").unwrap();
        assert!(index.contains(&"bin/hello".to_string()));
        assert!(index.contains(&"share/orchestra/hello.json".to_string()));
        assert!(index.contains(&"share/orchestra/hello.idx".to_string()));
        for entry in &index {
            assert!(root.join(entry).exists(), "{entry} missing");
        }
        assert!(!ws.config.paths.tmproot_for("hello@default").exists());
    }

    #[test]
    fn test_installing_another_build_displaces_the_previous_one() {
        let temp = TempDir::new().unwrap();
        let ws = prepare(&temp);
        let default = ws.config.resolve_build("hello@default").unwrap().clone();
        let other = ws.config.resolve_build("hello@other").unwrap().clone();

        install(&ws, &default).unwrap();
        install(&ws, &other).unwrap();

        let root = &ws.config.paths.root;
        assert!(!root.join("bin/hello").exists());
        assert!(root.join("bin/other").exists());
        assert_eq!(ws.metadata.load("hello").unwrap().unwrap().build, "other");
        assert!(!ws.is_installed_current(&default).unwrap());
    }

    #[test]
    fn test_no_merge_leaves_root_untouched() {
        let temp = TempDir::new().unwrap();
        let mut ws = prepare(&temp);
        ws.options.no_merge = true;
        ws.options.keep_tmproot = true;
        let build = ws.config.resolve_build("hello").unwrap().clone();

        let report = install(&ws, &build).unwrap();
        assert!(!report.merged);
        assert!(!ws.config.paths.root.join("bin/hello").exists());
        assert!(ws.metadata.load("hello").unwrap().is_none());
        let staged = staged_root(&ws.config.paths.tmproot_for("hello@default"), &ws.config.paths.root);
        assert!(staged.join("bin/hello").exists());
    }

    #[test]
    fn test_archive_roundtrip_skips_the_install_script() {
        let temp = TempDir::new().unwrap();
        let mut ws = prepare(&temp);
        ws.options.create_binary_archives = true;
        let build = ws.config.resolve_build("hello").unwrap().clone();

        let report = install(&ws, &build).unwrap();
        let archive_path = report.created_archive.unwrap();
        assert!(archive_path.is_file());
        assert!(binary_archives::material_path(&archive_path).is_file());
        assert!(archive_path.with_file_name("none_master.tar.gz").exists());

        // A fresh archives-only workspace must take the archive
        std::fs::remove_dir_all(&ws.config.paths.root).unwrap();
        let mut ws2 = workspace(&temp, project(), FakeVcs::default())
            .with_options(build_mode(ArchiveMode::ArchivesOnly));
        ws2.request(["hello"]);

        let report = install(&ws2, &build).unwrap();
        assert_eq!(report.source, InstallSource::BinaryArchives);
        assert!(report.created_archive.is_none());
        let metadata = ws2.metadata.load("hello").unwrap().unwrap();
        assert_eq!(metadata.source, InstallSource::BinaryArchives);
        assert!(metadata.binary_archive_path.is_some());
        let root = &ws2.config.paths.root;
        assert_eq!(std::fs::read_to_string(root.join("bin/hello")).unwrap(), "hello\n");
        assert!(root.join("share/orchestra/hello.license").exists());
    }

    #[test]
    fn test_archives_only_reports_missing_archive() {
        let temp = TempDir::new().unwrap();
        let mut ws = prepare(&temp);
        ws.options.archive_mode = ArchiveMode::ArchivesOnly;
        let build = ws.config.resolve_build("hello").unwrap().clone();
        let err = install(&ws, &build).unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::Install(InstallError::MissingBinaryArchive { .. })
        ));
    }

    #[test]
    fn test_failing_install_script_is_a_user_error() {
        let temp = TempDir::new().unwrap();
        let mut value = project();
        value["components"]["hello"]["builds"]["default"]["install"] = "exit 7".into();
        let ws = workspace(&temp, value, FakeVcs::default())
            .with_options(build_mode(ArchiveMode::ForceBuild));
        let build = ws.config.resolve_build("hello").unwrap().clone();
        let err = install(&ws, &build).unwrap_err();
        assert!(err.is_user_error());
        assert!(ws.metadata.load("hello").unwrap().is_none());
    }
}
