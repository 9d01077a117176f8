use crate::shared::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// A write request captured while the server was unreachable.
/// Replayed in insertion order once connectivity returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MutationRecord {
    pub id: i64,
    pub url: String,
    pub method: String,
    /// JSON-encoded string map; the body below is opaque to the log.
    pub headers: String,
    pub body: Option<String>,
    pub attempts: i32,
    pub created_at: i64,
}

impl MutationRecord {
    pub fn header_map(&self) -> Result<HashMap<String, String>> {
        serde_json::from_str(&self.headers).map_err(SyncError::from)
    }
}

/// Insertion-side shape; the log assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDraft {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl MutationDraft {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_json_body(mut self, body: impl Into<String>) -> Self {
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = Some(body.into());
        self
    }

    pub fn headers_json(&self) -> Result<String> {
        serde_json::to_string(&self.headers).map_err(SyncError::from)
    }
}
