//! Default configuration values

/// Architecture string used in binary archive locations
pub const ARCHITECTURE: &str = "linux-x86-64";

/// Placeholder that install scripts link into RPATHs so the post-install
/// step can rewrite it in place
pub const RPATH_PLACEHOLDER: &str = "////////////////////////////////////////////////$ORCHESTRA_ROOT";

/// Name of the orchestra dot directory
pub const DOTDIR_NAME: &str = ".orchestra";

/// Environment variable overriding the dotdir location
pub const ENV_DOTDIR: &str = "ORCHESTRA_DOTDIR";

/// Environment variable selecting the templating front-end
pub const ENV_TEMPLATER: &str = "ORCHESTRA_TEMPLATER";

/// Sentinel touched in the build directory after a successful configure
pub const CONFIGURE_SENTINEL: &str = ".configure_successful";

/// Version of the hash material cache header
pub const HASH_MATERIAL_VERSION: u32 = 1;

/// Suffix of binary archives
pub const BINARY_ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Suffix of the hash material stored next to a binary archive
pub const HASH_MATERIAL_SUFFIX: &str = ".hash-material.yml";

/// Name used for the commit/branch of components without a repository
pub const NO_REPOSITORY: &str = "none";

/// Default branch priority when the configuration does not declare one
pub const DEFAULT_BRANCHES: &[&str] = &["master", "main"];

/// Directories created inside a staged root before installing
pub const STAGED_ROOT_DIRS: &[&str] = &[
    "bin",
    "include",
    "lib64",
    "lib64/include",
    "lib64/pkgconfig",
    "libexec",
    "share/info",
    "share/doc",
    "share/man",
    "share/orchestra",
    "usr/lib",
    "usr/include",
];

/// Directories removed from the staged root after installing
pub const CONFLICTING_DIRS: &[&str] = &["share/info", "share/locale"];

/// Metadata directory relative to the orchestra root
pub const METADATA_DIR: &str = "share/orchestra";
