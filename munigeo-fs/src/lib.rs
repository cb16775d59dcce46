//! Capability-based file helpers shared by the munigeo crates.
//!
//! Paths are UTF-8 (`camino`) and every open goes through `cap-std` so that
//! configuration and source lookups resolve relative to an explicit directory
//! handle rather than ambient process state.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io::{self, Read};

/// Open the directory containing `path` and return it with the file name.
///
/// # Errors
///
/// Returns an error when the path has no file name or the parent directory
/// cannot be opened.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("path {path} does not name a file")))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Read a UTF-8 text file into memory.
///
/// # Errors
///
/// Propagates I/O failures and rejects files that are not valid UTF-8.
pub fn read_utf8_file(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = open_dir_and_file(path)?;
    let mut file = dir.open(name.as_str())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Resolve `relative` against the directory holding `anchor`.
///
/// Source files named in a configuration file are relative to that file.
/// Absolute `relative` paths are returned unchanged.
#[must_use]
pub fn resolve_sibling(anchor: &Utf8Path, relative: &Utf8Path) -> Utf8PathBuf {
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    anchor
        .parent()
        .map_or_else(|| relative.to_path_buf(), |parent| parent.join(relative))
}

/// Return whether a path exists and is a regular file.
///
/// # Errors
///
/// Returns the underlying I/O error, including `NotFound`.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = open_dir_and_file(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_utf8_file_contents() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(b"origin_id: \"091\"\n")
            .expect("write temp file");
        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf()).expect("utf8 path");

        let contents = read_utf8_file(&path).expect("read file");

        assert_eq!(contents, "origin_id: \"091\"\n");
        assert!(file_is_file(&path).expect("inspect file"));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.yml")).expect("utf8 path");

        let err = read_utf8_file(&path).expect_err("missing file should fail");

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn resolves_sibling_paths() {
        let anchor = Utf8Path::new("/data/fi/helsinki/config.yml");
        assert_eq!(
            resolve_sibling(anchor, Utf8Path::new("divisions/districts.shp")),
            Utf8PathBuf::from("/data/fi/helsinki/divisions/districts.shp")
        );
        assert_eq!(
            resolve_sibling(anchor, Utf8Path::new("/abs/file.shp")),
            Utf8PathBuf::from("/abs/file.shp")
        );
    }
}
