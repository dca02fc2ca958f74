//! Input DTOs with garde validation.
//!
//! Checked before any key stretching starts, so bad input fails fast.

use garde::Validate;
use serde::Deserialize;

use crate::error::BackupError;

/// Validation constants
const MAX_USER_ID_LENGTH: usize = 128;
const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 1024;
const MAX_FILE_ID_LENGTH: usize = 256;

/// File ids name files in the blob store, never paths
fn validate_file_id(value: &str, _ctx: &()) -> garde::Result {
    if value.contains(['/', '\\']) || value.starts_with('.') {
        return Err(garde::Error::new("Invalid backup file id"));
    }
    Ok(())
}

/// Input for creating a backup
#[derive(Deserialize, Validate)]
#[garde(context(()))]
pub struct BackupRequest {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub user_id: String,
    #[garde(length(min = MIN_PASSWORD_LENGTH, max = MAX_PASSWORD_LENGTH))]
    pub password: String,
}

/// Input for restoring a backup
#[derive(Deserialize, Validate)]
#[garde(context(()))]
pub struct RestoreRequest {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub user_id: String,
    #[garde(length(min = 1, max = MAX_PASSWORD_LENGTH))]
    pub password: String,
    #[garde(length(min = 1, max = MAX_FILE_ID_LENGTH), custom(validate_file_id))]
    pub file_id: String,
}

// Passwords stay out of Debug output
impl std::fmt::Debug for BackupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRequest")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RestoreRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreRequest")
            .field("user_id", &self.user_id)
            .field("file_id", &self.file_id)
            .finish_non_exhaustive()
    }
}

/// Helper trait to convert garde validation errors into `BackupError`
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), BackupError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), BackupError> {
        self.validate()
            .map_err(|e| BackupError::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(user_id: &str, password: &str) -> BackupRequest {
        BackupRequest {
            user_id: user_id.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_backup_request_accepts_reasonable_input() {
        assert!(backup("user-42", "correct-horse-battery-staple123")
            .validate_input()
            .is_ok());
    }

    #[test]
    fn test_backup_request_rejects_short_password() {
        let err = backup("user-42", "short").validate_input().unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
    }

    #[test]
    fn test_backup_request_rejects_empty_user() {
        assert!(backup("", "long enough password").validate_input().is_err());
        assert!(backup(&"u".repeat(129), "long enough password")
            .validate_input()
            .is_err());
    }

    #[test]
    fn test_restore_request_rejects_path_like_file_ids() {
        for file_id in ["../etc/passwd", "a/b", "a\\b", ".hidden"] {
            let request = RestoreRequest {
                user_id: "user-42".to_string(),
                password: "whatever".to_string(),
                file_id: file_id.to_string(),
            };
            assert!(request.validate_input().is_err(), "{} accepted", file_id);
        }
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", backup("user-42", "hunter2hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
