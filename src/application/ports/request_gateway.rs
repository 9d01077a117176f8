use crate::domain::entities::MutationDraft;
use crate::shared::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
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

    pub fn to_draft(&self) -> MutationDraft {
        MutationDraft {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

impl From<&crate::domain::entities::MutationRecord> for GatewayRequest {
    fn from(record: &crate::domain::entities::MutationRecord) -> Self {
        Self {
            method: record.method.clone(),
            url: record.url.clone(),
            headers: record.header_map().unwrap_or_default(),
            body: record.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Option<String>,
}

/// Transport seam for all domain writes and resync reads.
///
/// Implementations must distinguish "network unreachable"
/// (`SyncError::Offline`) from "request rejected" (`SyncError::Rejected`);
/// the sync core queues the former and rolls back on the latter.
#[async_trait]
pub trait RequestGateway: Send + Sync {
    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse>;
}
