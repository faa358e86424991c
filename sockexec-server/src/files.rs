//! Workspace file store
//!
//! All file transfer operations of every session go through a [`FileStore`]
//! rooted at the workspace directory. Filenames are single path components;
//! anything that could escape the workspace is rejected.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

use sockexec_protocol::{decode_payload, encode_payload, EncodedPayload, FileEntry, FileKind};
use sockexec_utils::{Result, SockexecError};

/// Workspace directory shared by all sessions
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_file_size: u64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Create the workspace directory and log what it already holds
    pub async fn init(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|e| SockexecError::FileWrite {
                    path: self.root.clone(),
                    source: e,
                })?;
            info!("Created workspace directory {}", self.root.display());
        }

        let entries = self.list().await?;
        info!(
            "Workspace {} holds {} entries",
            self.root.display(),
            entries.len()
        );
        for entry in &entries {
            debug!(filename = %entry.name, bytes = entry.size, "existing {:?}", entry.kind);
        }
        Ok(())
    }

    /// Map a filename to its path inside the workspace
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// Store an uploaded payload, returning the number of bytes written
    ///
    /// An existing file is overwritten.
    pub async fn save(
        &self,
        filename: &str,
        data: &str,
        is_base64: bool,
        declared_size: Option<u64>,
    ) -> Result<u64> {
        let path = self.resolve(filename)?;

        let bytes = decode_payload(data, is_base64)
            .map_err(|e| SockexecError::InvalidMessage(e.to_string()))?;
        let size = bytes.len() as u64;
        if size > self.max_file_size {
            return Err(SockexecError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        if let Some(declared) = declared_size {
            if declared != size {
                warn!(filename, declared, bytes = size, "Declared fileSize differs from payload");
            }
        }

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| SockexecError::FileWrite { path, source: e })?;

        info!(filename, bytes = size, base64 = is_base64, "File stored");
        Ok(size)
    }

    /// Read a file and encode it for transmission
    pub async fn load(&self, filename: &str) -> Result<EncodedPayload> {
        let path = self.resolve(filename)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(SockexecError::FileNotFound(filename.to_string())),
        };

        if metadata.len() > self.max_file_size {
            return Err(SockexecError::FileTooLarge {
                size: metadata.len(),
                max: self.max_file_size,
            });
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SockexecError::FileRead { path, source: e })?;

        let payload = encode_payload(filename, &bytes);
        info!(filename, bytes = payload.size, base64 = payload.is_base64, "File loaded");
        Ok(payload)
    }

    /// Enumerate the workspace (non-recursive, sorted by name)
    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            // Follow symlinks the way a plain stat would
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: format_modified(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
                kind: if metadata.is_dir() {
                    FileKind::Directory
                } else {
                    FileKind::File
                },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Accept only a single, normal path component
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.contains(['/', '\\', '\0']) {
        return Err(SockexecError::InvalidFilename(filename.to_string()));
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(SockexecError::InvalidFilename(filename.to_string())),
    }
}

/// RFC 3339 in UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
fn format_modified(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store(dir: &Path) -> FileStore {
        FileStore::new(dir, 1024)
    }

    #[test]
    fn test_validate_filename() {
        for ok in ["notes.txt", "logo.png", ".hidden", "a b c", "日本.md"] {
            assert!(validate_filename(ok).is_ok(), "{}", ok);
        }
        for bad in ["", ".", "..", "../etc/passwd", "/etc/passwd", "a/b", "a\\b", "dir/"] {
            assert!(
                matches!(validate_filename(bad), Err(SockexecError::InvalidFilename(_))),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_format_modified() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1_714_564_800_123);
        assert_eq!(format_modified(time), "2024-05-01T12:00:00.123Z");
    }

    #[tokio::test]
    async fn test_upload_then_download_text() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let written = store.save("notes.txt", "hello\nworld", false, Some(11)).await.unwrap();
        assert_eq!(written, 11);

        let payload = store.load("notes.txt").await.unwrap();
        assert_eq!(payload.data, "hello\nworld");
        assert!(!payload.is_base64);
        assert_eq!(payload.size, 11);
    }

    #[tokio::test]
    async fn test_upload_binary_is_byte_exact() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let bytes: Vec<u8> = (0..=255u8).collect();
        let encoded = encode_payload("blob.bin", &bytes);

        store.save("blob.bin", &encoded.data, true, None).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("blob.bin")).unwrap(), bytes);

        let payload = store.load("blob.bin").await.unwrap();
        assert!(payload.is_base64);
        assert_eq!(payload.data, encoded.data);
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save("a.txt", "first", false, None).await.unwrap();
        store.save("a.txt", "2nd", false, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "2nd");
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        let store = store(&workspace);

        let err = store.save("../escape.txt", "x", false, None).await.unwrap_err();
        assert!(matches!(err, SockexecError::InvalidFilename(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path(), 4);
        let err = store.save("big.txt", "12345", false, None).await.unwrap_err();
        assert!(matches!(err, SockexecError::FileTooLarge { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn test_upload_invalid_base64() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let err = store.save("x.png", "***", true, None).await.unwrap_err();
        assert!(matches!(err, SockexecError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_download_missing_and_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let store = store(dir.path());

        let err = store.load("missing.txt").await.unwrap_err();
        assert_eq!(err.to_string(), "File not found: missing.txt");

        let err = store.load("nested").await.unwrap_err();
        assert!(matches!(err, SockexecError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_sorted_with_kinds() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("a.bin"), [0u8; 3]).unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();
        let store = store(dir.path());

        let entries = store.list().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.bin", "b.txt", "c"]);
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[0].kind, FileKind::File);
        assert_eq!(entries[2].kind, FileKind::Directory);
        assert!(entries[1].modified.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_init_creates_workspace() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("websocket_files");
        let store = store(&workspace);

        store.init().await.unwrap();
        assert!(workspace.is_dir());
        assert!(store.list().await.unwrap().is_empty());
    }
}
