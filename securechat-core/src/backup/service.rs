//! Backup pipeline: local store -> snapshot -> envelope -> blob storage, and back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task;
use tokio::time::timeout;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::codec::BackupCodec;
use super::envelope::BackupEnvelope;
use super::kdf::{BackupKeyDeriver, PasswordKdf};
use super::snapshot::{BackupSnapshot, RestoreSummary};
use super::storage::{backup_file_name, BackupFile, BlobStorage, StorageError};
use crate::error::BackupError;
use crate::models::input::{BackupRequest, RestoreRequest, ValidateExt};
use crate::store::{LocalStore, SharedStore};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Progress of a running backup or restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Exporting,
    Encrypting,
    Uploading,
    Downloading,
    Decrypting,
    Restoring,
    Done,
}

pub struct BackupService<S, B, K = BackupKeyDeriver> {
    store: SharedStore<S>,
    storage: Arc<B>,
    codec: Arc<BackupCodec<K>>,
    timeout: Duration,
    progress: Option<mpsc::UnboundedSender<BackupStage>>,
}

impl<S, B, K> BackupService<S, B, K>
where
    S: LocalStore + 'static,
    B: BlobStorage,
    K: PasswordKdf + 'static,
{
    pub fn new(store: SharedStore<S>, storage: Arc<B>, codec: BackupCodec<K>) -> Self {
        Self {
            store,
            storage,
            codec: Arc::new(codec),
            timeout: DEFAULT_STORAGE_TIMEOUT,
            progress: None,
        }
    }

    /// Bound on every upload, download and list call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<BackupStage>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, stage: BackupStage) {
        if let Some(tx) = &self.progress {
            // Receiver gone just means nobody is watching
            let _ = tx.send(stage);
        }
    }

    /// Export the whole local store, encrypt it under the password and upload it.
    pub async fn create_backup(&self, request: BackupRequest) -> Result<BackupFile, BackupError> {
        request.validate_input()?;
        let BackupRequest { user_id, password } = request;
        let password = Zeroizing::new(password);

        self.report(BackupStage::Exporting);
        let snapshot = {
            let store = self.store.read().await;
            BackupSnapshot::collect(&*store, &user_id)?
        };
        let message_count = snapshot.metadata.message_count;

        self.report(BackupStage::Encrypting);
        let codec = Arc::clone(&self.codec);
        let owner = user_id.clone();
        let envelope = task::spawn_blocking(move || codec.create_envelope(&snapshot, &password, &owner))
            .await
            .map_err(|_| BackupError::Worker)??;
        let bytes = envelope.to_bytes()?;
        let name = backup_file_name(envelope.timestamp);

        self.report(BackupStage::Uploading);
        let file = self
            .bounded("upload", self.storage.upload(&name, bytes))
            .await?;

        info!(
            user_id = %user_id,
            file = %file.name,
            messages = message_count,
            size = file.size,
            "Backup created"
        );
        self.report(BackupStage::Done);
        Ok(file)
    }

    /// Download, decrypt and merge a backup into the local store.
    ///
    /// The store is untouched unless every check passes.
    pub async fn restore_backup(&self, request: RestoreRequest) -> Result<RestoreSummary, BackupError> {
        request.validate_input()?;
        let RestoreRequest {
            user_id,
            password,
            file_id,
        } = request;
        let password = Zeroizing::new(password);

        self.report(BackupStage::Downloading);
        let bytes = self
            .bounded("download", self.storage.download(&file_id))
            .await?;
        let envelope = BackupEnvelope::from_bytes(&bytes)?;

        self.report(BackupStage::Decrypting);
        let codec = Arc::clone(&self.codec);
        let owner = user_id.clone();
        let snapshot = task::spawn_blocking(move || codec.open_envelope(&envelope, &password, &owner))
            .await
            .map_err(|_| BackupError::Worker)??;

        self.report(BackupStage::Restoring);
        let summary = {
            let store = self.store.write().await;
            snapshot.merge_into(&*store)?
        };

        info!(
            user_id = %user_id,
            file = %file_id,
            conversations = summary.conversation_count,
            messages = summary.message_count,
            "Backup restored"
        );
        self.report(BackupStage::Done);
        Ok(summary)
    }

    /// Stored backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupFile>, BackupError> {
        self.bounded("list", self.storage.list()).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = Result<T, StorageError>>,
    ) -> Result<T, BackupError> {
        match timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "Backup storage call failed");
                Err(BackupError::Storage(operation))
            }
            Err(_) => {
                warn!(operation, timeout_secs = self.timeout.as_secs_f64(), "Backup storage call timed out");
                Err(BackupError::Timeout(operation))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::storage::FsBlobStorage;
    use crate::models::{Contact, StoredMessage};
    use crate::store::{shared, MemoryStore};

    const PASSWORD: &str = "correct-horse-battery-staple123";

    /// Provider that never answers.
    struct HangingStorage;

    impl BlobStorage for HangingStorage {
        async fn upload(&self, _name: &str, _bytes: Vec<u8>) -> Result<BackupFile, StorageError> {
            std::future::pending().await
        }

        async fn download(&self, _file_id: &str) -> Result<Vec<u8>, StorageError> {
            std::future::pending().await
        }

        async fn list(&self) -> Result<Vec<BackupFile>, StorageError> {
            std::future::pending().await
        }
    }

    /// Provider that rejects everything.
    struct BrokenStorage;

    impl BlobStorage for BrokenStorage {
        async fn upload(&self, _name: &str, _bytes: Vec<u8>) -> Result<BackupFile, StorageError> {
            Err("quota exceeded for token abc123".into())
        }

        async fn download(&self, _file_id: &str) -> Result<Vec<u8>, StorageError> {
            Err("not found".into())
        }

        async fn list(&self) -> Result<Vec<BackupFile>, StorageError> {
            Err("unauthorized".into())
        }
    }

    fn seeded_store() -> SharedStore<MemoryStore> {
        let store = MemoryStore::new();
        store.append("bob", &StoredMessage::text("user-42", "hello")).unwrap();
        store.append("bob", &StoredMessage::text("bob", "hi back")).unwrap();
        store
            .replace_contacts(&[Contact {
                id: "bob".to_string(),
                username: "bob".to_string(),
                display_name: None,
                public_key: None,
            }])
            .unwrap();
        shared(store)
    }

    fn backup_request(user_id: &str, password: &str) -> BackupRequest {
        BackupRequest {
            user_id: user_id.to_string(),
            password: password.to_string(),
        }
    }

    fn restore_request(user_id: &str, password: &str, file_id: &str) -> RestoreRequest {
        RestoreRequest {
            user_id: user_id.to_string(),
            password: password.to_string(),
            file_id: file_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_then_restore_into_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsBlobStorage::new(dir.path()));

        let source = BackupService::new(seeded_store(), Arc::clone(&storage), BackupCodec::new());
        let file = source
            .create_backup(backup_request("user-42", PASSWORD))
            .await
            .unwrap();
        assert!(file.name.starts_with("securechat_backup_"));

        let target_store = shared(MemoryStore::new());
        let target = BackupService::new(Arc::clone(&target_store), storage, BackupCodec::new());
        let summary = target
            .restore_backup(restore_request("user-42", PASSWORD, &file.id))
            .await
            .unwrap();

        assert_eq!(summary.conversation_count, 1);
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.contact_count, 1);

        let store = target_store.read().await;
        let contents: Vec<_> = store.get("bob").unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hello", "hi back"]);
    }

    #[tokio::test]
    async fn test_progress_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = BackupService::new(
            seeded_store(),
            Arc::new(FsBlobStorage::new(dir.path())),
            BackupCodec::new(),
        )
        .with_progress(tx);

        let file = service
            .create_backup(backup_request("user-42", PASSWORD))
            .await
            .unwrap();
        service
            .restore_backup(restore_request("user-42", PASSWORD, &file.id))
            .await
            .unwrap();
        drop(service);

        let mut stages = Vec::new();
        while let Some(stage) = rx.recv().await {
            stages.push(stage);
        }
        assert_eq!(
            stages,
            vec![
                BackupStage::Exporting,
                BackupStage::Encrypting,
                BackupStage::Uploading,
                BackupStage::Done,
                BackupStage::Downloading,
                BackupStage::Decrypting,
                BackupStage::Restoring,
                BackupStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsBlobStorage::new(dir.path()));
        let source = BackupService::new(seeded_store(), Arc::clone(&storage), BackupCodec::new());
        let file = source
            .create_backup(backup_request("user-42", PASSWORD))
            .await
            .unwrap();

        let target_store = shared(MemoryStore::new());
        target_store
            .read()
            .await
            .append("carol", &StoredMessage::text("carol", "keep me"))
            .unwrap();
        let target = BackupService::new(Arc::clone(&target_store), storage, BackupCodec::new());

        let result = target
            .restore_backup(restore_request("user-42", "not the password", &file.id))
            .await;
        assert!(matches!(result, Err(BackupError::InvalidPassword)));

        let store = target_store.read().await;
        assert_eq!(store.list_keys().unwrap(), vec!["carol".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let service = BackupService::new(
            seeded_store(),
            Arc::new(FsBlobStorage::new(dir.path())),
            BackupCodec::new(),
        );

        let result = service.create_backup(backup_request("user-42", "short")).await;
        assert!(matches!(result, Err(BackupError::Validation(_))));
        assert!(service.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_timeout() {
        let service = BackupService::new(seeded_store(), Arc::new(HangingStorage), BackupCodec::new())
            .with_timeout(Duration::from_millis(50));

        let result = service.create_backup(backup_request("user-42", PASSWORD)).await;
        assert!(matches!(result, Err(BackupError::Timeout("upload"))));
    }

    #[tokio::test]
    async fn test_download_timeout_touches_nothing() {
        let store = seeded_store();
        let service = BackupService::new(Arc::clone(&store), Arc::new(HangingStorage), BackupCodec::new())
            .with_timeout(Duration::from_millis(50));

        let result = service
            .restore_backup(restore_request("user-42", PASSWORD, "securechat_backup_1.enc"))
            .await;
        assert!(matches!(result, Err(BackupError::Timeout("download"))));
        assert_eq!(store.read().await.get("bob").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_storage_failures_are_opaque() {
        let service = BackupService::new(seeded_store(), Arc::new(BrokenStorage), BackupCodec::new());

        let err = service
            .create_backup(backup_request("user-42", PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Storage("upload")));
        assert!(!err.to_string().contains("abc123"));

        assert!(matches!(
            service.list_backups().await,
            Err(BackupError::Storage("list"))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_file_rejected_before_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsBlobStorage::new(dir.path()));
        let name = backup_file_name(7);
        storage
            .upload(&name, br#"{"version":999,"userId":"user-42"}"#.to_vec())
            .await
            .unwrap();

        let service = BackupService::new(seeded_store(), storage, BackupCodec::new());
        let result = service
            .restore_backup(restore_request("user-42", PASSWORD, &name))
            .await;
        assert!(matches!(result, Err(BackupError::UnsupportedBackupVersion(999))));
    }
}
