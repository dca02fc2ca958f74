use serde::{Deserialize, Serialize};

/// A decrypted message as kept in local history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
   pub id: String,
   pub sender_id: String,
   pub content: String,
   #[serde(default = "default_message_type")]
   pub message_type: String,
   #[serde(default = "default_status")]
   pub status: String,
   pub created_at: i64,
}

fn default_message_type() -> String {
   "text".to_string()
}

fn default_status() -> String {
   "sent".to_string()
}

impl StoredMessage {
   pub fn text(sender_id: &str, content: &str) -> Self {
      Self {
         id: uuid::Uuid::new_v4().to_string(),
         sender_id: sender_id.to_string(),
         content: content.to_string(),
         message_type: default_message_type(),
         status: default_status(),
         created_at: chrono::Utc::now().timestamp_millis(),
      }
   }
}
