//! Git operations
//!
//! The VCS adapter used by the model (commit identity, remote HEADs) and by
//! the install pipeline (binary archive retrieval). Network-facing and LFS
//! operations shell out to `git`/`git-lfs`; read-only queries on local clones
//! go through the gix crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// git or git-lfs is missing from PATH
    #[error("'{program}' is not installed or not in PATH")]
    NotInstalled { program: String },

    /// A git command exited with a non-zero status
    #[error("'{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A fast-forward pull was refused
    #[error("Fast-forward pull refused in '{dir}': {stderr}")]
    FastForwardRefused { dir: PathBuf, stderr: String },

    /// An LFS file is still a pointer after fetching
    #[error("LFS file '{path}' could not be fetched")]
    LfsFileMissing { path: PathBuf },

    /// Failed to resolve a ref
    #[error("Failed to resolve '{reference}' in '{repo}': {error}")]
    ResolveFailed {
        repo: PathBuf,
        reference: String,
        error: String,
    },

    /// Invalid repository
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },

    /// IO error
    #[error("IO error running '{command}'")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Options for [`Vcs::clone_repo`]
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Branch to check out (remote default when `None`)
    pub branch: Option<String>,
    /// Do not download LFS objects while cloning
    pub skip_lfs_smudge: bool,
}

/// Minimal version-control surface orchestra needs
pub trait Vcs: Send + Sync {
    /// Fail early when the tools behind this adapter are missing
    fn ensure_available(&self) -> Result<(), GitError> {
        Ok(())
    }

    /// List remote branches: branch name -> commit
    fn ls_remote(&self, url: &str) -> Result<BTreeMap<String, String>, GitError>;

    /// Clone `url` into `dst`
    fn clone_repo(&self, url: &str, dst: &Path, options: &CloneOptions) -> Result<(), GitError>;

    /// Fast-forward-only pull of the checked out branch
    fn pull_ff(&self, dir: &Path) -> Result<(), GitError>;

    /// Resolve a revision to a full commit hash
    fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String, GitError>;

    /// Short name of the checked out branch, `None` when HEAD is detached
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError>;

    /// Fetch and check out the given LFS paths (relative to `dir`)
    fn lfs_fetch(&self, dir: &Path, paths: &[PathBuf]) -> Result<(), GitError>;
}

/// [`Vcs`] implementation driving the git command line
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    /// Create a new git adapter
    pub fn new() -> Self {
        Self
    }

    /// Check that `git` and `git-lfs` can be found
    pub fn check_installed() -> Result<(), GitError> {
        for program in ["git", "git-lfs"] {
            which::which(program).map_err(|_| GitError::NotInstalled {
                program: program.to_string(),
            })?;
        }
        Ok(())
    }

    /// Base git command with a sanitized environment
    fn command(dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        // An inherited GIT_DIR would redirect every command to another repository
        cmd.env_remove("GIT_DIR");
        cmd.env_remove("GIT_WORK_TREE");
        cmd.env("GIT_ASKPASS", "/bin/true");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd
    }

    fn run(mut cmd: Command) -> Result<Output, GitError> {
        let description = describe(&cmd);
        tracing::debug!("Running {description}");
        let output = cmd.output().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                GitError::NotInstalled {
                    program: "git".to_string(),
                }
            } else {
                GitError::Io {
                    command: description.clone(),
                    source,
                }
            }
        })?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(GitError::CommandFailed {
                command: description,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn open(dir: &Path) -> Result<gix::Repository, GitError> {
        gix::open(dir).map_err(|e| GitError::InvalidRepository {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })
    }
}

impl Vcs for GitCli {
    fn ensure_available(&self) -> Result<(), GitError> {
        Self::check_installed()
    }

    fn ls_remote(&self, url: &str) -> Result<BTreeMap<String, String>, GitError> {
        let mut cmd = Self::command(None);
        cmd.args(["ls-remote", "--heads"]).arg(url);
        let output = Self::run(cmd)?;
        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }

    fn clone_repo(&self, url: &str, dst: &Path, options: &CloneOptions) -> Result<(), GitError> {
        let mut cmd = Self::command(None);
        if options.skip_lfs_smudge {
            cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        }
        cmd.arg("clone");
        if let Some(branch) = &options.branch {
            cmd.arg("--branch").arg(branch);
        }
        cmd.arg(url).arg(dst);
        Self::run(cmd)?;
        Ok(())
    }

    fn pull_ff(&self, dir: &Path) -> Result<(), GitError> {
        let mut cmd = Self::command(Some(dir));
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.args(["pull", "--ff-only"]);
        match Self::run(cmd) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) => Err(GitError::FastForwardRefused {
                dir: dir.to_path_buf(),
                stderr,
            }),
            Err(e) => Err(e),
        }
    }

    fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String, GitError> {
        let repo = Self::open(dir)?;
        let id = repo
            .rev_parse_single(reference)
            .map_err(|e| GitError::ResolveFailed {
                repo: dir.to_path_buf(),
                reference: reference.to_string(),
                error: e.to_string(),
            })?;
        Ok(id.detach().to_hex().to_string())
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, GitError> {
        let repo = Self::open(dir)?;
        let head = repo.head_name().map_err(|e| GitError::ResolveFailed {
            repo: dir.to_path_buf(),
            reference: "HEAD".to_string(),
            error: e.to_string(),
        })?;
        Ok(head.map(|name| name.shorten().to_string()))
    }

    fn lfs_fetch(&self, dir: &Path, paths: &[PathBuf]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let include = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut fetch = Self::command(Some(dir));
        fetch.args(["lfs", "fetch", "--include"]).arg(&include);
        Self::run(fetch)?;

        let mut checkout = Self::command(Some(dir));
        checkout.args(["lfs", "checkout"]).args(paths);
        Self::run(checkout)?;

        for path in paths {
            let full = dir.join(path);
            if is_lfs_pointer(&full) {
                return Err(GitError::LfsFileMissing { path: full });
            }
        }
        Ok(())
    }
}

/// Parse `git ls-remote --heads` output into branch -> commit
pub fn parse_ls_remote(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.split_once('\t')?;
            let branch = reference.trim().strip_prefix("refs/heads/")?;
            Some((branch.to_string(), commit.trim().to_string()))
        })
        .collect()
}

/// Whether a file is a git-lfs pointer rather than the real content
pub fn is_lfs_pointer(path: &Path) -> bool {
    const POINTER_PREFIX: &[u8] = b"version https://git-lfs.github.com/spec/";
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    // Pointers are tiny text files
    if metadata.len() > 1024 {
        return false;
    }
    std::fs::read(path).is_ok_and(|content| content.starts_with(POINTER_PREFIX))
}

/// Walk up from `path` to the closest directory containing `.git`
pub fn find_repository_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

fn describe(cmd: &Command) -> String {
    let args = cmd
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {args}", cmd.get_program().to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::test_utils::generators::*;
    use tempfile::TempDir;

    // ============================================
    // Unit Tests - ls-remote parsing
    // ============================================

    #[test]
    fn test_parse_ls_remote_heads() {
        let output = "0123456789abcdef0123456789abcdef01234567\trefs/heads/master\n\
                      89abcdef0123456789abcdef0123456789abcdef\trefs/heads/feature/x\n";
        let heads = parse_ls_remote(output);
        assert_eq!(heads.len(), 2);
        assert_eq!(
            heads.get("master").unwrap(),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert!(heads.contains_key("feature/x"));
    }

    #[test]
    fn test_parse_ls_remote_ignores_tags_and_garbage() {
        let output = "abc\trefs/tags/v1.0\nnot a ref line\n\n";
        assert!(parse_ls_remote(output).is_empty());
    }

    // ============================================
    // Unit Tests - LFS pointers and repository roots
    // ============================================

    #[test]
    fn test_is_lfs_pointer() {
        let temp = TempDir::new().unwrap();
        let pointer = temp.path().join("archive.tar.gz");
        std::fs::write(
            &pointer,
            "version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 12\n",
        )
        .unwrap();
        assert!(is_lfs_pointer(&pointer));

        let real = temp.path().join("real.tar.gz");
        std::fs::write(&real, [0x1f, 0x8b, 0x08, 0x00]).unwrap();
        assert!(!is_lfs_pointer(&real));
        assert!(!is_lfs_pointer(&temp.path().join("missing")));
    }

    #[test]
    fn test_find_repository_root() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        let nested = repo.join("linux-x86-64/comp/build");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_repository_root(&nested).unwrap(), repo);
    }

    // ============================================
    // Integration Tests - local repositories
    // ============================================

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    #[ignore = "requires git - run with --ignored"]
    fn test_local_repository_roundtrip() {
        let temp = TempDir::new().unwrap();
        let upstream = temp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "-q", "-b", "master"]);
        std::fs::write(upstream.join("README"), "hello").unwrap();
        git(&upstream, &["add", "README"]);
        git(&upstream, &["commit", "-q", "-m", "initial"]);

        let vcs = GitCli::new();
        let heads = vcs.ls_remote(upstream.to_str().unwrap()).unwrap();
        let commit = heads.get("master").unwrap().clone();
        assert_eq!(commit.len(), 40);

        let clone = temp.path().join("clone");
        vcs.clone_repo(upstream.to_str().unwrap(), &clone, &CloneOptions::default())
            .unwrap();
        assert_eq!(vcs.rev_parse(&clone, "HEAD").unwrap(), commit);
        assert_eq!(vcs.current_branch(&clone).unwrap().as_deref(), Some("master"));
        vcs.pull_ff(&clone).unwrap();
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every well-formed head line is parsed back to its branch and commit
        #[test]
        fn prop_parse_ls_remote_roundtrip(
            branch in branch_name(),
            commit in commit_hash(),
        ) {
            let output = format!("{commit}\trefs/heads/{branch}\n");
            let heads = parse_ls_remote(&output);
            prop_assert_eq!(heads.get(&branch), Some(&commit));
        }
    }
}
