//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "ZIP layout detection, extraction, and re-rooting."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---
//! Source hosts wrap zipball content in a single `<owner>-<repo>-<sha>/`
//! directory. Archives written by [`compress_dir`] are flat. Both shapes are
//! accepted by [`extract`], which reports the directory holding the project root.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{OrchestrationError, Result};

/// Layout of an archive's entries relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLayout {
    /// All content sits below one wrapper directory (host convention).
    Nested { root: String },
    /// Entries are already relative to the project root.
    Flat,
}

fn malformed(path: &Path, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::MalformedArchive {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Inspect the first entry to decide whether content is nested one directory deep.
///
/// The leading path component of the first entry counts as a wrapper when every
/// entry lives below it, whether or not the archive carries an explicit
/// directory entry for it; otherwise the archive is treated as flat.
pub fn detect_layout<R: io::Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &Path,
) -> Result<ArchiveLayout> {
    if archive.is_empty() {
        return Err(malformed(path, "archive has no entries"));
    }
    let first = archive.by_index(0)?.name().to_owned();
    let Some((component, _)) = first.split_once('/') else {
        return Ok(ArchiveLayout::Flat);
    };
    let root = format!("{component}/");
    let wrapped = archive.file_names().all(|name| name.starts_with(&root));
    if wrapped {
        Ok(ArchiveLayout::Nested { root })
    } else {
        Ok(ArchiveLayout::Flat)
    }
}

/// Extract `archive_path` below `dest` and return the project root directory.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let layout = detect_layout(&mut archive, archive_path)?;
    fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                malformed(
                    archive_path,
                    format!("entry {} escapes the extraction root", entry.name()),
                )
            })?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    let root = match &layout {
        ArchiveLayout::Nested { root } => dest.join(root.trim_end_matches('/')),
        ArchiveLayout::Flat => dest.to_path_buf(),
    };
    debug!(archive = %archive_path.display(), root = %root.display(), ?layout, "archive extracted");
    Ok(root)
}

/// Write every file below `root` into a DEFLATE archive at `dest`, named relative to `root`.
///
/// Returns the number of file entries written.
pub fn compress_dir(root: &Path, dest: &Path) -> Result<usize> {
    let mut writer = ZipWriter::new(File::create(dest)?);
    let mut written = 0usize;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            OrchestrationError::Io(err.into_io_error().unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| {
                malformed(
                    dest,
                    format!("{} is outside {}", entry.path().display(), root.display()),
                )
            })?;
        let name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mut options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(entry.path())?.permissions().mode();
            options = options.unix_permissions(mode);
        }
        writer.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut writer)?;
        written += 1;
    }

    writer.finish()?;
    debug!(root = %root.display(), archive = %dest.display(), entries = written, "archive written");
    Ok(written)
}

/// Names of all entries in an archive, in archive order.
pub fn entry_names(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    (0..archive.len())
        .map(|index| Ok(archive.by_index(index)?.name().to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, Option<&str>)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            match body {
                Some(body) => {
                    writer.start_file(*name, FileOptions::default()).unwrap();
                    writer.write_all(body.as_bytes()).unwrap();
                }
                None => writer.add_directory(*name, FileOptions::default()).unwrap(),
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn nested_layout_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested.zip");
        write_zip(
            &path,
            &[
                ("octo-repo-abc/", None),
                ("octo-repo-abc/README.md", Some("hi")),
                ("octo-repo-abc/src/lib.rs", Some("fn a() {}")),
            ],
        );
        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(
            detect_layout(&mut archive, &path).unwrap(),
            ArchiveLayout::Nested {
                root: "octo-repo-abc/".into()
            }
        );
    }

    #[test]
    fn leading_directory_with_siblings_is_flat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.zip");
        write_zip(
            &path,
            &[("src/", None), ("src/lib.rs", Some("x")), ("Cargo.toml", Some("y"))],
        );
        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(detect_layout(&mut archive, &path).unwrap(), ArchiveLayout::Flat);
    }

    #[test]
    fn wrapper_without_directory_entry_is_nested() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("implicit.zip");
        write_zip(
            &path,
            &[
                ("octo-repo-abc/buildspec.yml", Some("version: 0.2")),
                ("octo-repo-abc/pipeline/stack.yaml", Some("Resources: {}")),
            ],
        );
        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(
            detect_layout(&mut archive, &path).unwrap(),
            ArchiveLayout::Nested {
                root: "octo-repo-abc/".into()
            }
        );
    }

    #[test]
    fn top_level_file_first_is_flat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.zip");
        write_zip(&path, &[("README.md", Some("x")), ("src/lib.rs", Some("y"))]);
        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(detect_layout(&mut archive, &path).unwrap(), ArchiveLayout::Flat);
    }

    #[test]
    fn empty_archive_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        write_zip(&path, &[]);
        let err = extract(&path, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedArchive { .. }));
    }

    #[test]
    fn extract_then_compress_strips_wrapper() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested.zip");
        write_zip(
            &path,
            &[
                ("octo-repo-abc/", None),
                ("octo-repo-abc/buildspec.yml", Some("version: 0.2")),
                ("octo-repo-abc/pipeline/", None),
                ("octo-repo-abc/pipeline/stack.yaml", Some("Resources: {}")),
            ],
        );
        let root = extract(&path, &dir.path().join("out")).unwrap();
        assert!(root.ends_with("octo-repo-abc"));

        let repacked = dir.path().join("repacked.zip");
        assert_eq!(compress_dir(&root, &repacked).unwrap(), 2);
        assert_eq!(
            entry_names(&repacked).unwrap(),
            vec!["buildspec.yml".to_owned(), "pipeline/stack.yaml".to_owned()]
        );
    }
}
