use std::io;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{Stream, TryStreamExt};
use kernel::TargetFormat;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::error::ServiceError;

/// Uploads are written to disk in pieces of this size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

const UPLOADS_DIR: &str = "uploads";
const CONVERTED_DIR: &str = "converted";
const ARCHIVES_DIR: &str = "archives";
const ARCHIVE_EXTENSION: &str = "zip";

/// The three top level directories every request works under.
#[derive(Debug, Clone)]
pub struct StorageRoots {
    uploads: PathBuf,
    converted: PathBuf,
    archives: PathBuf,
}

impl StorageRoots {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            uploads: base.join(UPLOADS_DIR),
            converted: base.join(CONVERTED_DIR),
            archives: base.join(ARCHIVES_DIR),
        }
    }

    /// Creates all roots. Existing directories are fine.
    pub async fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.uploads).await?;
        fs::create_dir_all(&self.converted).await?;
        fs::create_dir_all(&self.archives).await
    }

    #[must_use]
    pub fn uploads(&self) -> &Path {
        &self.uploads
    }

    #[must_use]
    pub fn converted(&self) -> &Path {
        &self.converted
    }

    #[must_use]
    pub fn archives(&self) -> &Path {
        &self.archives
    }
}

/// A file persisted inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl StoredFile {
    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(self.name.as_str())
    }
}

/// Directories and paths owned by one upload/convert cycle.
///
/// Every path is namespaced by a fresh random id, so concurrent requests never
/// address the same file even when clients upload identical names.
#[derive(Debug)]
pub struct RequestWorkspace {
    id: Uuid,
    upload_dir: PathBuf,
    converted_dir: PathBuf,
    archive_path: PathBuf,
}

impl RequestWorkspace {
    /// Allocates a new workspace and eagerly creates its directories.
    pub async fn create(roots: &StorageRoots) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let key = id.to_string();
        let workspace = Self {
            id,
            upload_dir: roots.uploads.join(&key),
            converted_dir: roots.converted.join(&key),
            archive_path: roots
                .archives
                .join(format!("{key}.{ARCHIVE_EXTENSION}")),
        };
        fs::create_dir_all(&workspace.upload_dir).await?;
        if let Err(e) = fs::create_dir_all(&workspace.converted_dir).await {
            if let Err(remove_error) = fs::remove_dir_all(&workspace.upload_dir).await {
                tracing::warn!(
                    "upload directory {} not removed: {remove_error}",
                    workspace.upload_dir.display()
                );
            }
            return Err(e);
        }
        tracing::debug!("workspace {id} created");
        Ok(workspace)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    #[must_use]
    pub fn converted_dir(&self) -> &Path {
        &self.converted_dir
    }

    /// Where the bundle of this request goes if it produces several files.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Validates the client supplied name and streams `stream` into the
    /// upload directory, never letting more than `max_size` bytes rest on
    /// disk. Partially written files are removed on every failure.
    pub async fn persist_upload<S, E>(
        &self,
        file_name: Option<&str>,
        stream: S,
        max_size: u64,
    ) -> Result<StoredFile, ServiceError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let name = file_name
            .and_then(sanitize_file_name)
            .ok_or_else(|| ServiceError::validation("Filename missing"))?;
        if kernel::allowed_extension(name).is_none() {
            let ext = kernel::extension_of(name)
                .map(|e| format!(".{}", e.to_ascii_lowercase()))
                .unwrap_or_default();
            return Err(ServiceError::validation(format!(
                "File type {ext} not supported"
            )));
        }

        let path = free_path(&self.upload_dir, name).await;
        match write_bounded(&path, name, stream, max_size).await {
            Ok(size) => {
                tracing::info!("file: {name} saved: {size} bytes workspace: {}", self.id);
                Ok(StoredFile {
                    name: file_name_of(&path).unwrap_or(name).to_owned(),
                    path,
                    size,
                })
            }
            Err(e) => {
                if let Err(remove_error) = fs::remove_file(&path).await {
                    if remove_error.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(
                            "partial upload {} not removed: {remove_error}",
                            path.display()
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Deterministic output location for `stem` converted to `target`.
    #[must_use]
    pub fn output_path_for(&self, stem: &str, target: &TargetFormat) -> PathBuf {
        self.converted_dir
            .join(format!("{stem}{}", target.extension()))
    }

    /// Like [`RequestWorkspace::output_path_for`] but never returns a path
    /// that already holds an earlier output of this request.
    pub async fn next_output_path(&self, stem: &str, target: &TargetFormat) -> PathBuf {
        free_path(&self.converted_dir, &format!("{stem}{}", target.extension())).await
    }
}

/// Strips any directory part from a client supplied file name. Both `/` and
/// `\` are treated as separators.
#[must_use]
pub fn sanitize_file_name(path: &str) -> Option<&str> {
    let name = match path.rfind(['\\', '/']) {
        Some(ix) => &path[ix + 1..],
        None => path,
    };
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// First of `name`, `stem_1.ext`, `stem_2.ext`, ... that does not exist in `dir`.
async fn free_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !exists(&candidate).await {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    let mut n = 1usize;
    loop {
        let candidate = dir.join(format!("{stem}_{n}{ext}"));
        if !exists(&candidate).await {
            return candidate;
        }
        n += 1;
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn write_bounded<S, E>(
    path: &Path,
    name: &str,
    stream: S,
    max_size: u64,
) -> Result<u64, ServiceError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = File::create(path).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let read = body_reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        size += read as u64;
        if size > max_size {
            return Err(ServiceError::PayloadTooLarge {
                file: name.to_owned(),
                limit: max_size,
            });
        }
        file.write_all(&buffer[..read]).await?;
    }
    file.flush().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use rstest::rstest;
    use std::convert::Infallible;

    fn body(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn workspace() -> (tempfile::TempDir, StorageRoots, RequestWorkspace) {
        let dir = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(dir.path());
        roots.create().await.unwrap();
        let workspace = RequestWorkspace::create(&roots).await.unwrap();
        (dir, roots, workspace)
    }

    #[rstest]
    #[case("", None)]
    #[case("file.png", Some("file.png"))]
    #[case("dir/file.png", Some("file.png"))]
    #[case("dir\\file.png", Some("file.png"))]
    #[case("dir1\\dir2\\file.png", Some("file.png"))]
    #[case("../../etc/passwd.png", Some("passwd.png"))]
    #[case("dir/", None)]
    #[case("..", None)]
    #[trace]
    fn sanitize_file_name_cases(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(sanitize_file_name(path), expected);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_upload_directory() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let roots = StorageRoots::new(dir.path());
        std::fs::create_dir_all(roots.uploads()).unwrap();
        std::fs::write(roots.converted(), b"not a directory").unwrap();

        // Act
        let result = RequestWorkspace::create(&roots).await;

        // Assert
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(roots.uploads()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn create_allocates_distinct_directories() {
        // Arrange
        let (_dir, roots, first) = workspace().await;

        // Act
        let second = RequestWorkspace::create(&roots).await.unwrap();

        // Assert
        assert_ne!(first.id(), second.id());
        assert_ne!(first.upload_dir(), second.upload_dir());
        assert!(first.upload_dir().is_dir());
        assert!(first.converted_dir().is_dir());
        assert!(second.upload_dir().is_dir());
        assert!(first.upload_dir().starts_with(roots.uploads()));
        assert!(first.converted_dir().starts_with(roots.converted()));
        assert_eq!(
            first.archive_path(),
            roots.archives().join(format!("{}.zip", first.id()))
        );
    }

    #[tokio::test]
    async fn persist_upload_writes_all_chunks() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;
        let chunks = vec![vec![1u8; CHUNK_SIZE], vec![2u8; 10]];

        // Act
        let stored = workspace
            .persist_upload(Some("photos/cat.PNG"), body(chunks), 10 * 1024 * 1024)
            .await
            .unwrap();

        // Assert
        assert_eq!(stored.name, "cat.PNG");
        assert_eq!(stored.stem(), "cat");
        assert_eq!(stored.size, CHUNK_SIZE as u64 + 10);
        assert_eq!(stored.path, workspace.upload_dir().join("cat.PNG"));
        assert_eq!(
            std::fs::metadata(&stored.path).unwrap().len(),
            stored.size
        );
    }

    #[rstest]
    #[case(None, "Filename missing")]
    #[case(Some(""), "Filename missing")]
    #[case(Some("notes.txt"), "File type .txt not supported")]
    #[case(Some("README"), "File type  not supported")]
    #[trace]
    #[tokio::test]
    async fn persist_upload_rejects_bad_names(
        #[case] name: Option<&'static str>,
        #[case] message: &str,
    ) {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;

        // Act
        let result = workspace
            .persist_upload(name, body(vec![vec![0u8; 4]]), 1024)
            .await;

        // Assert
        match result {
            Err(ServiceError::Validation(m)) => assert_eq!(m, message),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(std::fs::read_dir(workspace.upload_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn persist_upload_removes_oversized_file() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;
        let chunks = vec![vec![0u8; 600], vec![0u8; 600]];

        // Act
        let result = workspace
            .persist_upload(Some("big.jpg"), body(chunks), 1000)
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(ServiceError::PayloadTooLarge { ref file, limit: 1000 }) if file == "big.jpg"
        ));
        assert!(!workspace.upload_dir().join("big.jpg").exists());
    }

    #[tokio::test]
    async fn persist_upload_accepts_exact_limit() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;

        // Act
        let stored = workspace
            .persist_upload(Some("edge.bmp"), body(vec![vec![0u8; 1000]]), 1000)
            .await
            .unwrap();

        // Assert
        assert_eq!(stored.size, 1000);
    }

    #[tokio::test]
    async fn persist_upload_removes_file_on_stream_error() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::other("connection reset")),
        ]);

        // Act
        let result = workspace
            .persist_upload(Some("broken.png"), failing, 1000)
            .await;

        // Assert
        assert!(matches!(result, Err(ServiceError::Storage(_))));
        assert!(!workspace.upload_dir().join("broken.png").exists());
    }

    #[tokio::test]
    async fn same_name_twice_gets_suffix() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;

        // Act
        let first = workspace
            .persist_upload(Some("a.png"), body(vec![vec![1u8]]), 10)
            .await
            .unwrap();
        let second = workspace
            .persist_upload(Some("a.png"), body(vec![vec![2u8]]), 10)
            .await
            .unwrap();

        // Assert
        assert_eq!(first.name, "a.png");
        assert_eq!(second.name, "a_1.png");
        assert_eq!(second.stem(), "a_1");
    }

    #[rstest]
    #[case("jpeg", "photo.jpg")]
    #[case("JPG", "photo.jpg")]
    #[case("png", "photo.png")]
    #[case("webp", "photo.webp")]
    #[case("bmp", "photo.bmp")]
    #[case("tiff", "photo.tiff")]
    #[case("pdf", "photo.pdf")]
    #[case("GIF", "photo.gif")]
    #[trace]
    #[tokio::test]
    async fn output_path_for_cases(#[case] token: &str, #[case] expected: &str) {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;
        let target = TargetFormat::parse(token).unwrap();

        // Act
        let path = workspace.output_path_for("photo", &target);

        // Assert
        assert_eq!(path, workspace.converted_dir().join(expected));
    }

    #[tokio::test]
    async fn next_output_path_skips_existing_outputs() {
        // Arrange
        let (_dir, _roots, workspace) = workspace().await;
        let target = TargetFormat::WebP;
        std::fs::write(workspace.output_path_for("a", &target), b"x").unwrap();

        // Act
        let path = workspace.next_output_path("a", &target).await;

        // Assert
        assert_eq!(path, workspace.converted_dir().join("a_1.webp"));
    }
}
