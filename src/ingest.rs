//! Document ingestion pipeline.
//!
//! Validates the declared media type and size, extracts plain text, and
//! stores the result in the injected [`DocumentStore`]. Validation always
//! happens before any extraction work or table insertion.
//!
//! HTTP uploads are streamed into a [`StagedUpload`], a temporary file in the
//! upload directory that is deleted when the value is dropped. The size cap
//! is enforced while streaming, so an oversized body is rejected without
//! buffering it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::extract::{extract_text, ExtractError};
use crate::models::{DocumentMetadata, MediaType, MediaTypeRejection, StoredDocument};
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    UnsupportedMediaType(MediaTypeRejection),
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error(transparent)]
    ExtractionFailed(#[from] ExtractError),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("extraction task failed: {0}")]
    Task(String),
}

/// What the client gets back after a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub success: bool,
    #[serde(rename = "fileId")]
    pub id: String,
    #[serde(rename = "filename")]
    pub original_name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub message: String,
}

pub struct DocumentIngestor {
    store: Arc<dyn DocumentStore>,
    upload_dir: PathBuf,
    max_upload_bytes: u64,
}

impl DocumentIngestor {
    pub fn new(store: Arc<dyn DocumentStore>, upload_dir: PathBuf, max_upload_bytes: u64) -> Self {
        Self {
            store,
            upload_dir,
            max_upload_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Checks the declared media type and size. No I/O.
    pub fn validate(&self, declared_media_type: &str, size_bytes: u64) -> Result<MediaType, IngestError> {
        let media_type =
            MediaType::from_mime(declared_media_type).map_err(IngestError::UnsupportedMediaType)?;
        self.check_size(size_bytes)?;
        Ok(media_type)
    }

    fn check_size(&self, size_bytes: u64) -> Result<(), IngestError> {
        if size_bytes > self.max_upload_bytes {
            return Err(IngestError::PayloadTooLarge {
                size: size_bytes,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Ingests an in-memory file: validate, extract, store.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        declared_media_type: &str,
        original_name: &str,
        size_bytes: u64,
    ) -> Result<IngestReceipt, IngestError> {
        let media_type = self.validate(declared_media_type, size_bytes)?;

        let text = tokio::task::spawn_blocking(move || extract_text(bytes, media_type))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))??;

        let doc = StoredDocument {
            id: new_document_id(),
            original_name: original_name.to_string(),
            media_type,
            text,
            size_bytes,
            created_at: Utc::now(),
        };
        let receipt = IngestReceipt {
            success: true,
            id: doc.id.clone(),
            original_name: doc.original_name.clone(),
            size_bytes,
            message: "Document uploaded and processed successfully".to_string(),
        };
        self.store.insert(doc)?;

        tracing::info!(
            id = %receipt.id,
            filename = %receipt.original_name,
            size = size_bytes,
            media_type = %media_type,
            "document ingested"
        );
        Ok(receipt)
    }

    /// Opens a temporary file for an upload whose media type was already
    /// accepted. The file disappears when the returned value is dropped.
    pub async fn stage(
        &self,
        declared_media_type: &str,
        original_name: &str,
    ) -> Result<StagedUpload, IngestError> {
        MediaType::from_mime(declared_media_type).map_err(IngestError::UnsupportedMediaType)?;
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.upload_dir)?;
        let file = tokio::fs::File::from_std(temp.reopen()?);
        Ok(StagedUpload {
            temp,
            file,
            declared_media_type: declared_media_type.to_string(),
            original_name: original_name.to_string(),
            size_bytes: 0,
            limit: self.max_upload_bytes,
        })
    }

    /// Ingests a staged upload. The temporary file is removed on every path
    /// out of this function.
    pub async fn ingest_staged(&self, mut staged: StagedUpload) -> Result<IngestReceipt, IngestError> {
        staged.file.flush().await?;
        self.validate(&staged.declared_media_type, staged.size_bytes)?;
        let bytes = tokio::fs::read(staged.path()).await?;
        self.ingest(
            bytes,
            &staged.declared_media_type,
            &staged.original_name,
            staged.size_bytes,
        )
        .await
    }

    pub fn metadata(&self, id: &str) -> Result<DocumentMetadata, IngestError> {
        self.store
            .metadata(id)
            .ok_or_else(|| IngestError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<(), IngestError> {
        match self.store.remove(id) {
            Some(doc) => {
                tracing::info!(id = %doc.id, "document deleted");
                Ok(())
            }
            None => Err(IngestError::NotFound(id.to_string())),
        }
    }
}

/// Millisecond timestamp plus a random suffix; unique even for concurrent
/// uploads of the same file name.
fn new_document_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// An upload being written to a temporary file.
pub struct StagedUpload {
    temp: tempfile::NamedTempFile,
    file: tokio::fs::File,
    declared_media_type: String,
    original_name: String,
    size_bytes: u64,
    limit: u64,
}

impl StagedUpload {
    /// Appends a chunk, failing as soon as the running size passes the cap.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), IngestError> {
        let size = self.size_bytes + chunk.len() as u64;
        if size > self.limit {
            return Err(IngestError::PayloadTooLarge {
                size,
                limit: self.limit,
            });
        }
        self.file.write_all(chunk).await?;
        self.size_bytes = size;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
