//! Jar packing and unpacking.

use memmap2::Mmap;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BuildError, Result};
use crate::scan::scan_files;

pub const METADATA_DIR: &str = "META-INF";
pub const MANIFEST_NAME: &str = "MANIFEST.MF";

const SIGNATURE_EXTENSIONS: [&str; 4] = ["SF", "DSA", "RSA", "EC"];

pub fn default_manifest() -> String {
    format!(
        "Manifest-Version: 1.0\r\nCreated-By: {} {}\r\n\r\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Extracts every entry of `archive_path` into `dest`, overwriting files that
/// already exist there. Returns the number of files written.
pub fn explode(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .map_err(BuildError::io(format!("failed to open {}", archive_path.display())))?;
    // SAFETY: The file is opened read-only and outlives the mapping within this function.
    let mmap = unsafe { Mmap::map(&file) }
        .map_err(BuildError::io(format!("failed to map {}", archive_path.display())))?;
    let mut archive =
        ZipArchive::new(Cursor::new(&mmap[..])).map_err(BuildError::archive(archive_path))?;

    std::fs::create_dir_all(dest)
        .map_err(BuildError::io(format!("failed to create {}", dest.display())))?;

    let mut written = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(BuildError::archive(archive_path))?;
        let relative = safe_entry_path(entry.name()).ok_or_else(|| {
            BuildError::Validation(format!(
                "entry '{}' in {} escapes the extraction directory",
                entry.name(),
                archive_path.display()
            ))
        })?;
        let target = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(BuildError::io(format!("failed to create {}", target.display())))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(BuildError::io(format!("failed to create {}", parent.display())))?;
        }
        let mut out = File::create(&target)
            .map_err(BuildError::io(format!("failed to create {}", target.display())))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(BuildError::io(format!("failed to extract {}", target.display())))?;
        written += 1;
    }

    log::debug!(
        "exploded {} file(s) from {} into {}",
        written,
        archive_path.display(),
        dest.display()
    );
    Ok(written)
}

fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Packs the union of `dirs` into one archive at `output`.
///
/// Directories that do not exist are skipped. When two directories hold the
/// same relative path, the first one wins. A manifest is only written if none
/// of the directories already carries `META-INF/MANIFEST.MF`.
pub fn assemble(output: &Path, dirs: &[PathBuf], manifest: Option<&str>) -> Result<usize> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(BuildError::io(format!("failed to create {}", parent.display())))?;
    }

    let file = File::create(output)
        .map_err(BuildError::io(format!("failed to create {}", output.display())))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let manifest_entry = format!("{METADATA_DIR}/{MANIFEST_NAME}");

    let mut names: HashSet<String> = HashSet::new();
    let mut pending = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            log::debug!("skipping missing directory {}", dir.display());
            continue;
        }
        for record in scan_files(dir, None)? {
            let name = entry_name(&record.relative_path);
            if names.insert(name.clone()) {
                pending.push((name, record.absolute_path));
            } else {
                log::debug!("duplicate entry {name} from {} ignored", dir.display());
            }
        }
    }

    if let Some(text) = manifest
        && !names.contains(&manifest_entry)
    {
        zip.start_file(manifest_entry.as_str(), options)
            .map_err(BuildError::archive(output))?;
        zip.write_all(text.as_bytes())
            .map_err(BuildError::io(format!("failed to write {}", output.display())))?;
    }

    for (name, source) in &pending {
        zip.start_file(name.as_str(), options)
            .map_err(BuildError::archive(output))?;
        let mut input = File::open(source)
            .map_err(BuildError::io(format!("failed to read {}", source.display())))?;
        std::io::copy(&mut input, &mut zip)
            .map_err(BuildError::io(format!("failed to write {}", output.display())))?;
    }

    zip.finish().map_err(BuildError::archive(output))?;
    log::debug!("assembled {} with {} file(s)", output.display(), pending.len());
    Ok(pending.len())
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Deletes the manifest and any signature files from `root/META-INF`.
/// Returns the paths removed.
pub fn strip_signing_metadata(root: &Path) -> Result<Vec<PathBuf>> {
    let meta = root.join(METADATA_DIR);
    if !meta.is_dir() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(&meta)
        .map_err(BuildError::io(format!("failed to list {}", meta.display())))?;
    let mut removed = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(BuildError::io(format!("failed to list {}", meta.display())))?
            .path();
        if !path.is_file() || !is_signing_metadata(&path) {
            continue;
        }
        std::fs::remove_file(&path)
            .map_err(BuildError::io(format!("failed to remove {}", path.display())))?;
        removed.push(path);
    }
    removed.sort();
    Ok(removed)
}

fn is_signing_metadata(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.eq_ignore_ascii_case(MANIFEST_NAME) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SIGNATURE_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn explode_merges_archives_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.jar");
        let second = dir.path().join("second.jar");
        write_jar(&first, &[("a/Shared.class", b"one"), ("a/One.class", b"1")]);
        write_jar(&second, &[("a/Shared.class", b"two")]);

        let dest = dir.path().join("out");
        assert_eq!(explode(&first, &dest).unwrap(), 2);
        assert_eq!(explode(&second, &dest).unwrap(), 1);

        assert_eq!(std::fs::read(dest.join("a/Shared.class")).unwrap(), b"two");
        assert!(dest.join("a/One.class").is_file());
    }

    #[test]
    fn explode_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("evil.jar");
        write_jar(&jar, &[("../escape.txt", b"x")]);

        let err = explode(&jar, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, BuildError::Validation(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn explode_reports_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("broken.jar");
        std::fs::write(&jar, b"not a zip").unwrap();
        let err = explode(&jar, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, BuildError::Archive { .. }));
    }

    #[test]
    fn assemble_unions_dirs_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        let resources = dir.path().join("resources");
        std::fs::create_dir_all(classes.join("com/acme")).unwrap();
        std::fs::create_dir_all(&resources).unwrap();
        std::fs::write(classes.join("com/acme/App.class"), b"cafe").unwrap();
        std::fs::write(classes.join("app.properties"), b"from classes").unwrap();
        std::fs::write(resources.join("app.properties"), b"from resources").unwrap();

        let jar = dir.path().join("target/app.jar");
        let count = assemble(
            &jar,
            &[classes, dir.path().join("missing"), resources],
            Some(&default_manifest()),
        )
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            entry_names(&jar),
            vec!["META-INF/MANIFEST.MF", "app.properties", "com/acme/App.class"]
        );

        let mut archive = ZipArchive::new(File::open(&jar).unwrap()).unwrap();
        let mut text = String::new();
        archive
            .by_name("app.properties")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "from classes");
    }

    #[test]
    fn assemble_keeps_existing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(classes.join("META-INF")).unwrap();
        std::fs::write(classes.join("META-INF/MANIFEST.MF"), b"Main-Class: X\n").unwrap();

        let jar = dir.path().join("app.jar");
        assemble(&jar, &[classes], Some(&default_manifest())).unwrap();

        let mut archive = ZipArchive::new(File::open(&jar).unwrap()).unwrap();
        let mut text = String::new();
        archive
            .by_name("META-INF/MANIFEST.MF")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "Main-Class: X\n");
    }

    #[test]
    fn strip_signing_metadata_leaves_other_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("META-INF");
        std::fs::create_dir_all(meta.join("services")).unwrap();
        for name in ["MANIFEST.MF", "VENDOR.SF", "VENDOR.RSA", "VENDOR.DSA", "LICENSE"] {
            std::fs::write(meta.join(name), b"x").unwrap();
        }
        std::fs::write(meta.join("services/com.acme.Spi"), b"impl").unwrap();

        let removed = strip_signing_metadata(dir.path()).unwrap();
        assert_eq!(removed.len(), 4);
        assert!(meta.join("LICENSE").is_file());
        assert!(meta.join("services/com.acme.Spi").is_file());
        assert!(!meta.join("MANIFEST.MF").exists());
    }

    #[test]
    fn strip_signing_metadata_without_meta_inf_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(strip_signing_metadata(dir.path()).unwrap().is_empty());
    }
}
