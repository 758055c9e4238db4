use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ServiceError;

/// Bundles `files` into a deflate zip at `archive_path`.
///
/// Entries are stored under their bare file names. Files that disappeared
/// since conversion are skipped. Returns the number of entries written.
pub fn build_archive(files: &[PathBuf], archive_path: &Path) -> Result<usize, ServiceError> {
    let archive = File::create(archive_path)
        .map_err(|e| ServiceError::Archive(format!("{}: {e}", archive_path.display())))?;
    let mut zip = ZipWriter::new(archive);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut written = 0usize;
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!("file {} has no usable name, skipped", path.display());
            continue;
        };
        let mut source = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("file {} vanished before packaging, skipped", path.display());
                continue;
            }
            Err(e) => return Err(ServiceError::Archive(format!("{name}: {e}"))),
        };
        zip.start_file(name, options)?;
        io::copy(&mut source, &mut zip).map_err(|e| ServiceError::Archive(format!("{name}: {e}")))?;
        written += 1;
    }

    zip.finish()?;
    tracing::info!("archive {} built with {written} files", archive_path.display());
    Ok(written)
}

/// Runs [`build_archive`] on the blocking pool.
pub async fn build_archive_file(files: Vec<PathBuf>, archive_path: PathBuf) -> Result<usize, ServiceError> {
    tokio::task::spawn_blocking(move || build_archive(&files, &archive_path))
        .await
        .map_err(|e| ServiceError::Archive(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;

    fn entries(archive_path: &Path) -> BTreeSet<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(archive_path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                assert_eq!(entry.compression(), CompressionMethod::Deflated);
                let mut content = Vec::new();
                entry.read_to_end(&mut content).unwrap();
                (entry.name().to_owned(), content)
            })
            .collect()
    }

    #[test]
    fn entries_use_bare_names() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("converted").join("id");
        std::fs::create_dir_all(&nested).unwrap();
        let a = nested.join("a.png");
        let b = nested.join("b.png");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"second").unwrap();
        let archive_path = dir.path().join("bundle.zip");

        // Act
        let written = build_archive(&[a, b], &archive_path).unwrap();

        // Assert
        assert_eq!(written, 2);
        let expected: BTreeSet<_> = [
            ("a.png".to_owned(), b"first".to_vec()),
            ("b.png".to_owned(), b"second".to_vec()),
        ]
        .into_iter()
        .collect();
        assert_eq!(entries(&archive_path), expected);
    }

    #[test]
    fn vanished_files_are_skipped() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.jpg");
        std::fs::write(&present, b"x").unwrap();
        let gone = dir.path().join("gone.jpg");
        let archive_path = dir.path().join("bundle.zip");

        // Act
        let written = build_archive(&[present, gone], &archive_path).unwrap();

        // Assert
        assert_eq!(written, 1);
        let names: Vec<_> = entries(&archive_path).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["present.jpg".to_owned()]);
    }

    #[test]
    fn unwritable_archive_is_an_archive_error() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("missing").join("bundle.zip");

        // Act
        let result = build_archive(&[], &archive_path);

        // Assert
        assert!(matches!(result, Err(ServiceError::Archive(_))));
    }
}
