use crate::domain::entities::Attachment;
use crate::domain::value_objects::ScopeId;
use crate::shared::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The file selected or pasted by the user. Retained by the tracker so a
/// failed upload can be retried without re-selecting the file.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub file_type: String,
    pub bytes: Vec<u8>,
}

impl UploadSource {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Transfer mechanics (multipart encoding, cloud storage) live behind this
/// seam. Implementations report percentages through `progress` and must stop
/// promptly when `cancel` fires.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        source: &UploadSource,
        scope: &ScopeId,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<Attachment>;
}
