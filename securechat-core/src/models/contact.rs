use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Base64 SPKI as published by the backend
    #[serde(default)]
    pub public_key: Option<String>,
}
