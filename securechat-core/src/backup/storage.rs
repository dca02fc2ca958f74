//! Where encrypted backups live.
//!
//! The provider only ever sees envelope bytes. `FsBlobStorage` keeps them in
//! a local directory; cloud providers implement the same trait.

use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Error type of storage providers; the core only reports that they failed.
pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

const FILE_PREFIX: &str = "securechat_backup_";
const FILE_SUFFIX: &str = ".enc";

/// A stored backup file as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Unix millis
    pub created_at: i64,
}

pub fn backup_file_name(timestamp_millis: i64) -> String {
    format!("{}{}{}", FILE_PREFIX, timestamp_millis, FILE_SUFFIX)
}

fn timestamp_from_name(name: &str) -> Option<i64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// Blob-storage provider for backup envelopes.
pub trait BlobStorage: Send + Sync {
    fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<BackupFile, StorageError>> + Send;

    fn download(&self, file_id: &str) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send;

    /// Backups newest first.
    fn list(&self) -> impl Future<Output = Result<Vec<BackupFile>, StorageError>> + Send;
}

/// Backups as files in one directory.
///
/// Uploads are written under a unique hidden name and renamed into place on
/// a blocking thread. A failed write or rename removes the partial file, and
/// dropping the upload future lets the blocking write run to completion.
#[derive(Debug, Clone)]
pub struct FsBlobStorage {
    dir: PathBuf,
}

impl FsBlobStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf, StorageError> {
        if file_id.is_empty() || file_id.contains(['/', '\\']) || file_id.starts_with('.') {
            return Err(format!("invalid backup file id {:?}", file_id).into());
        }
        Ok(self.dir.join(file_id))
    }
}

impl BlobStorage for FsBlobStorage {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<BackupFile, StorageError> {
        let path = self.path_for(name)?;
        let partial = self.dir.join(format!(".{}.{}.partial", name, Uuid::new_v4()));
        let dir = self.dir.clone();
        let size = bytes.len() as u64;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_then_rename(&dir, &partial, &target, &bytes))
            .await??;

        debug!(path = %path.display(), size, "Stored backup file");
        Ok(BackupFile {
            id: name.to_string(),
            name: name.to_string(),
            size,
            created_at: timestamp_from_name(name)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        })
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(file_id)?;
        Ok(fs::read(path).await?)
    }

    async fn list(&self) -> Result<Vec<BackupFile>, StorageError> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(created_at) = timestamp_from_name(&name) else {
                continue;
            };
            let size = entry.metadata().await?.len();
            files.push(BackupFile {
                id: name.clone(),
                name,
                size,
                created_at,
            });
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }
}

/// Removes the partial file unless the upload got as far as the rename.
struct PartialFile<'a> {
    path: &'a Path,
    committed: bool,
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(self.path);
        }
    }
}

fn write_then_rename(dir: &Path, partial: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut guard = PartialFile {
        path: partial,
        committed: false,
    };
    let mut file = std::fs::File::create(partial)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(partial, target)?;
    guard.committed = true;
    Ok(())
}
