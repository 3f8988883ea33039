//! Storage for files uploaded through channels.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::channels::PendingUpload;
use crate::message::AttachmentRef;

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn store(&self, upload: &PendingUpload) -> std::io::Result<AttachmentRef>;
    /// Bytes of a stored attachment, `None` when the id is unknown or invalid.
    async fn read(&self, id: &str) -> std::io::Result<Option<Vec<u8>>>;
}

/// Writes uploads to a local directory and serves them under `public_base`.
pub struct LocalAttachmentStore {
    dir: PathBuf,
    public_base: String,
}

impl LocalAttachmentStore {
    pub fn new(dir: PathBuf, public_base: impl Into<String>) -> Self {
        Self {
            dir,
            public_base: public_base.into(),
        }
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains("..") && !id.contains('/') && !id.contains('\\')
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn store(&self, upload: &PendingUpload) -> std::io::Result<AttachmentRef> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let id = format!(
            "{}-{}",
            uuid::Uuid::new_v4().simple(),
            sanitize_name(&upload.name)
        );
        tokio::fs::write(self.dir.join(&id), &upload.bytes).await?;
        log::debug!("stored upload {} ({} bytes)", id, upload.bytes.len());
        Ok(AttachmentRef {
            url: Some(format!("{}/{}", self.public_base.trim_end_matches('/'), id)),
            id: Some(id),
        })
    }

    async fn read(&self, id: &str) -> std::io::Result<Option<Vec<u8>>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
