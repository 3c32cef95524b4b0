//! Tar archives
//!
//! Creates and extracts the gzip-compressed tarballs used as binary
//! archives. Entries are rooted at `.` and owned by uid/gid 0.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};

use crate::error::{InstallError, OrchestraError};
use crate::infra::filesystem;

fn archive_error(path: &Path) -> impl Fn(std::io::Error) -> InstallError + '_ {
    move |source| InstallError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// Create `archive_path` from the contents of `source_dir`.
///
/// The archive is written to a sibling temporary file and renamed into place.
pub fn create_tar_gz(source_dir: &Path, archive_path: &Path) -> Result<(), OrchestraError> {
    let err = archive_error(archive_path);
    let temp = filesystem::sibling_tempfile(archive_path)?;

    let encoder = GzEncoder::new(BufWriter::new(temp.reopen().map_err(&err)?), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut root_header = Header::new_gnu();
    root_header.set_entry_type(EntryType::Directory);
    root_header.set_mode(0o755);
    root_header.set_uid(0);
    root_header.set_gid(0);
    root_header.set_size(0);
    builder
        .append_data(&mut root_header, ".", std::io::empty())
        .map_err(&err)?;

    for entry in walkdir::WalkDir::new(source_dir)
        .follow_links(false)
        .min_depth(1)
        .sort_by(|a, b| a.path().cmp(b.path()))
    {
        let entry = entry.map_err(|e| err(e.into()))?;
        let path = entry.path();
        let relative = Path::new(".").join(
            path.strip_prefix(source_dir)
                .map_err(|e| err(std::io::Error::other(e)))?,
        );
        let metadata = std::fs::symlink_metadata(path).map_err(&err)?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username("root").map_err(&err)?;
        header.set_groupname("root").map_err(&err)?;

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &relative, std::io::empty())
                .map_err(&err)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(path).map_err(&err)?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, &relative, &target)
                .map_err(&err)?;
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(metadata.permissions().mode() & 0o7777);
            let file = File::open(path).map_err(&err)?;
            builder
                .append_data(&mut header, &relative, BufReader::new(file))
                .map_err(&err)?;
        }
    }

    let encoder = builder.into_inner().map_err(&err)?;
    let mut writer = encoder.finish().map_err(&err)?;
    writer.flush().map_err(&err)?;
    drop(writer);

    filesystem::persist_atomic(temp, archive_path)
}

/// Extract a `.tar.gz` archive into `dest`, preserving permissions
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), InstallError> {
    let err = archive_error(archive_path);
    std::fs::create_dir_all(dest).map_err(|source| InstallError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    let file = File::open(archive_path).map_err(&err)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(dest).map_err(&err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_preserves_files_symlinks_and_modes() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir_all(source.join("bin")).unwrap();
        std::fs::create_dir_all(source.join("lib64")).unwrap();
        std::fs::write(source.join("bin/tool"), "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(source.join("bin/tool"), std::fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("lib64", source.join("lib")).unwrap();

        let archive = temp.path().join("out/none_abc.tar.gz");
        create_tar_gz(&source, &archive).unwrap();
        assert!(archive.exists());

        let dest = temp.path().join("dest");
        extract_tar_gz(&archive, &dest).unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("bin/tool")).unwrap(), "#!/bin/sh\n");
        let mode = std::fs::metadata(dest.join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        assert_eq!(
            std::fs::read_link(dest.join("lib")).unwrap(),
            std::path::PathBuf::from("lib64")
        );
    }

    #[test]
    fn test_archive_entries_are_owned_by_root() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("file"), "x").unwrap();

        let archive_path = temp.path().join("a.tar.gz");
        create_tar_gz(&source, &archive_path).unwrap();

        let file = File::open(&archive_path).unwrap();
        let mut archive = Archive::new(GzDecoder::new(file));
        let mut count = 0;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().uid().unwrap(), 0);
            assert_eq!(entry.header().gid().unwrap(), 0);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_extract_missing_archive_fails() {
        let temp = TempDir::new().unwrap();
        let result = extract_tar_gz(&temp.path().join("missing.tar.gz"), temp.path());
        assert!(matches!(
            result,
            Err(InstallError::Archive { .. })
        ));
    }
}
