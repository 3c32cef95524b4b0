//! Post-install rewrites of a staged root
//!
//! Makes a staged tree relocatable before it is merged or archived:
//! pkg-config files lose absolute paths, libtool archives are dropped,
//! hardlinks become symlinks, RPATHs become `$ORIGIN`-relative and
//! `NDEBUG` checks in headers are frozen to the build's setting.

use std::collections::BTreeMap;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use walkdir::WalkDir;

use crate::config::defaults::RPATH_PLACEHOLDER;
use crate::core::elf;
use crate::core::metadata::MetadataStore;
use crate::error::{InstallError, OrchestraError};
use crate::infra::filesystem;

/// What post-install should do for one build
#[derive(Debug, Clone)]
pub struct PostInstallOptions<'a> {
    /// Staged root, i.e. `<TMP_ROOT><ORCHESTRA_ROOT>`
    pub staged_root: &'a Path,
    /// Real orchestra root the tree will be merged into
    pub orchestra_root: &'a Path,
    pub component: &'a str,
    /// Value `NDEBUG` checks are frozen to
    pub ndebug: bool,
    /// License file to copy, if the component declares one
    pub license: Option<&'a Path>,
}

/// Counters, mostly for logging and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PostInstallReport {
    pub pkgconfig_files: usize,
    pub removed_la_files: usize,
    pub symlinked_hardlinks: usize,
    pub rpath_rewrites: usize,
    pub ndebug_headers: usize,
    pub license_copied: bool,
}

/// Run every post-install step
pub fn post_install(options: &PostInstallOptions<'_>) -> Result<PostInstallReport, OrchestraError> {
    let root = options.staged_root;
    let mut report = PostInstallReport {
        pkgconfig_files: fix_pkgconfig(root, options.orchestra_root)?,
        removed_la_files: remove_libtool_archives(root)?,
        symlinked_hardlinks: hardlinks_to_symlinks(root)?,
        rpath_rewrites: fix_rpaths(root, options.orchestra_root)?,
        ndebug_headers: freeze_ndebug(root, options.ndebug)?,
        license_copied: false,
    };
    if let Some(license) = options.license {
        copy_license(root, options.component, license)?;
        report.license_copied = true;
    }
    tracing::debug!("Post-install of {}: {report:?}", options.component);
    Ok(report)
}

/// Regular files (not symlinks) under `root`, sorted
fn regular_files(root: &Path) -> Result<Vec<PathBuf>, OrchestraError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            OrchestraError::io(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Replace the orchestra root in `lib/pkgconfig/*.pc` with a path relative
/// to `${pcfiledir}`
pub fn fix_pkgconfig(staged_root: &Path, orchestra_root: &Path) -> Result<usize, OrchestraError> {
    let dir = staged_root.join("lib64").join("pkgconfig");
    if !dir.is_dir() {
        return Ok(0);
    }
    let root = orchestra_root.display().to_string();
    let trailing = Regex::new(&format!(r"(?m){}$", regex::escape(&root)))
        .map_err(|e| OrchestraError::Generic(format!("Invalid root pattern: {e}")))?;

    let mut fixed = 0;
    for path in regular_files(&dir)? {
        if !has_extension(&path, &["pc"]) {
            continue;
        }
        let content = filesystem::read_file(&path)?;
        let rewritten = content.replace(&format!("{root}/"), "${pcfiledir}/../../");
        let rewritten = trailing.replace_all(&rewritten, NoExpand("${pcfiledir}/../.."));
        if rewritten != content {
            std::fs::write(&path, rewritten.as_bytes()).map_err(|e| OrchestraError::io(&path, e))?;
            fixed += 1;
        }
    }
    Ok(fixed)
}

/// Delete every libtool `.la` file
pub fn remove_libtool_archives(staged_root: &Path) -> Result<usize, OrchestraError> {
    let mut removed = 0;
    for path in regular_files(staged_root)? {
        if has_extension(&path, &["la"]) {
            filesystem::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Replace every group of hardlinked regular files by one file and
/// relative symlinks to it. The lexicographically first path is kept.
pub fn hardlinks_to_symlinks(staged_root: &Path) -> Result<usize, OrchestraError> {
    let mut groups: BTreeMap<(u64, u64), Vec<PathBuf>> = BTreeMap::new();
    for path in regular_files(staged_root)? {
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| OrchestraError::io(&path, e))?;
        if metadata.nlink() >= 2 {
            groups
                .entry((metadata.dev(), metadata.ino()))
                .or_default()
                .push(path);
        }
    }

    let mut converted = 0;
    for paths in groups.values() {
        let Some((keep, others)) = paths.split_first() else {
            continue;
        };
        for other in others {
            let parent = other.parent().unwrap_or(staged_root);
            let target = filesystem::relative_path(parent, keep);
            filesystem::remove_file(other)?;
            std::os::unix::fs::symlink(&target, other).map_err(|e| OrchestraError::io(other, e))?;
            tracing::debug!("{} -> {}", other.display(), target.display());
            converted += 1;
        }
    }
    Ok(converted)
}

/// Rewrite RPATHs of every executable ELF file
pub fn fix_rpaths(staged_root: &Path, orchestra_root: &Path) -> Result<usize, OrchestraError> {
    let root = orchestra_root.display().to_string();
    let mut rewritten = 0;
    for path in regular_files(staged_root)? {
        let metadata = std::fs::metadata(&path).map_err(|e| OrchestraError::io(&path, e))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            continue;
        }
        let mut data = std::fs::read(&path).map_err(|e| OrchestraError::io(&path, e))?;
        if !elf::is_elf(&data) {
            continue;
        }
        let parent = path.parent().unwrap_or(staged_root);
        let relative = filesystem::relative_path(parent, staged_root);
        let origin = format!("$ORIGIN/{}", relative.display());
        let origin = origin.trim_end_matches("/.");

        let count = elf::rewrite_dynstr(&mut data, RPATH_PLACEHOLDER, &root, origin, &path)?;
        if count > 0 {
            write_preserving_mode(&path, &data, metadata.permissions())?;
            rewritten += count;
        }
    }
    Ok(rewritten)
}

fn write_preserving_mode(
    path: &Path,
    data: &[u8],
    permissions: std::fs::Permissions,
) -> Result<(), OrchestraError> {
    let readonly = permissions.mode() & 0o200 == 0;
    if readonly {
        let mut writable = permissions.clone();
        writable.set_mode(permissions.mode() | 0o200);
        std::fs::set_permissions(path, writable).map_err(|e| OrchestraError::io(path, e))?;
    }
    std::fs::write(path, data).map_err(|e| OrchestraError::io(path, e))?;
    if readonly {
        std::fs::set_permissions(path, permissions).map_err(|e| OrchestraError::io(path, e))?;
    }
    Ok(())
}

/// Freeze `NDEBUG` checks in C/C++ headers
pub fn freeze_ndebug(staged_root: &Path, ndebug: bool) -> Result<usize, OrchestraError> {
    let (when_defined, when_undefined) = if ndebug { ("1", "0") } else { ("0", "1") };
    let ifdef = Regex::new(r"(?m)^(\s*)#(\s*)ifdef\s+NDEBUG\b")
        .map_err(|e| OrchestraError::Generic(e.to_string()))?;
    let ifndef = Regex::new(r"(?m)^(\s*)#(\s*)ifndef\s+NDEBUG\b")
        .map_err(|e| OrchestraError::Generic(e.to_string()))?;
    let defined = Regex::new(r"defined\s*\(\s*NDEBUG\s*\)|defined\s+NDEBUG\b")
        .map_err(|e| OrchestraError::Generic(e.to_string()))?;

    let mut changed = 0;
    for path in regular_files(staged_root)? {
        if !has_extension(&path, &["h", "hh", "hpp", "hxx", "inc"]) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if !content.contains("NDEBUG") {
            continue;
        }
        let rewritten = ifdef.replace_all(&content, format!("${{1}}#${{2}}if {when_defined}").as_str());
        let rewritten = ifndef.replace_all(&rewritten, format!("${{1}}#${{2}}if {when_undefined}").as_str());
        let rewritten = defined.replace_all(&rewritten, NoExpand(when_defined));
        if rewritten != content {
            std::fs::write(&path, rewritten.as_bytes()).map_err(|e| OrchestraError::io(&path, e))?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Copy the component license into `share/orchestra/<component>.license`
pub fn copy_license(staged_root: &Path, component: &str, license: &Path) -> Result<(), OrchestraError> {
    if !license.is_file() {
        return Err(InstallError::LicenseMissing {
            component: component.to_string(),
            path: license.to_path_buf(),
        }
        .into());
    }
    let destination = staged_root.join(MetadataStore::relative_license_path(component));
    if let Some(parent) = destination.parent() {
        filesystem::create_dir_all(parent)?;
    }
    std::fs::copy(license, &destination).map_err(|e| OrchestraError::io(&destination, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    // ============================================
    // Unit Tests
    // ============================================

    #[test]
    fn test_pkgconfig_paths_become_relative() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let pc = write(
            root,
            "lib64/pkgconfig/foo.pc",
            "prefix=/work/root\nlibdir=/work/root/lib64\nLibs: -L/work/rootfs\n",
        );
        assert_eq!(fix_pkgconfig(root, Path::new("/work/root")).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(pc).unwrap(),
            "prefix=${pcfiledir}/../..\nlibdir=${pcfiledir}/../../lib64\nLibs: -L/work/rootfs\n"
        );
    }

    #[test]
    fn test_libtool_archives_are_removed() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "lib64/libfoo.la", "");
        write(root, "lib64/libfoo.so", "");
        assert_eq!(remove_libtool_archives(root).unwrap(), 1);
        assert!(!root.join("lib64/libfoo.la").exists());
        assert!(root.join("lib64/libfoo.so").exists());
    }

    #[test]
    fn test_hardlinks_become_relative_symlinks() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let first = write(root, "bin/a-tool", "payload");
        std::fs::create_dir_all(root.join("libexec/sub")).unwrap();
        std::fs::hard_link(&first, root.join("libexec/sub/b-tool")).unwrap();

        assert_eq!(hardlinks_to_symlinks(root).unwrap(), 1);

        let link = root.join("libexec/sub/b-tool");
        let meta = std::fs::symlink_metadata(&link).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            PathBuf::from("../../bin/a-tool")
        );
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "payload");
        assert!(std::fs::symlink_metadata(&first).unwrap().file_type().is_file());
    }

    #[test]
    fn test_ndebug_is_frozen() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let header = write(
            root,
            "include/foo.h",
            "#ifdef NDEBUG\nA\n#endif\n#  ifndef NDEBUG\nB\n#endif\n#if defined(NDEBUG) && X\n#endif\n",
        );
        write(root, "include/plain.h", "int x;\n");

        assert_eq!(freeze_ndebug(root, true).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(&header).unwrap(),
            "#if 1\nA\n#endif\n#  if 0\nB\n#endif\n#if 1 && X\n#endif\n"
        );
    }

    #[test]
    fn test_ndebug_false_keeps_asserts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let header = write(root, "include/foo.h", "#ifndef NDEBUG\nassert\n#endif\n");
        freeze_ndebug(root, false).unwrap();
        assert_eq!(std::fs::read_to_string(header).unwrap(), "#if 1\nassert\n#endif\n");
    }

    #[test]
    fn test_license_copy() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("staged");
        let license = write(temp.path(), "src/COPYING", "GPL");
        copy_license(&staged, "toolchain/gcc", &license).unwrap();
        assert_eq!(
            std::fs::read_to_string(staged.join("share/orchestra/toolchain/gcc.license")).unwrap(),
            "GPL"
        );

        let err = copy_license(&staged, "gcc", &temp.path().join("missing")).unwrap_err();
        assert!(matches!(
            err,
            OrchestraError::Install(InstallError::LicenseMissing { .. })
        ));
    }

    #[test]
    fn test_non_elf_executables_are_untouched() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let script = write(root, "bin/tool", "#!/bin/sh\necho /work/root\n");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(fix_rpaths(root, Path::new("/work/root")).unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(script).unwrap(),
            "#!/bin/sh\necho /work/root\n"
        );
    }

    #[test]
    fn test_post_install_runs_every_step() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("staged");
        write(&staged, "lib64/libfoo.la", "");
        let license = write(temp.path(), "LICENSE", "MIT");
        let report = post_install(&PostInstallOptions {
            staged_root: &staged,
            orchestra_root: Path::new("/work/root"),
            component: "foo",
            ndebug: false,
            license: Some(&license),
        })
        .unwrap();
        assert_eq!(report.removed_la_files, 1);
        assert!(report.license_copied);
    }
}
