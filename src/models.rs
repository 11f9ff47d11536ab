//! Core data models used throughout the relay.
//!
//! These types represent the uploaded documents held in memory and the chat
//! turns composed for each upstream request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_MSWORD: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// A media type the ingestion pipeline knows how to extract text from.
///
/// Legacy `application/msword` is part of the upload allow-list but has no
/// variant here: [`MediaType::from_mime`] rejects it with a conversion hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Pdf,
    Docx,
    PlainText,
}

/// Why a declared media type cannot be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaTypeRejection {
    /// Legacy binary Word document; must be converted to `.docx` first.
    LegacyWord,
    /// Anything outside the allow-list.
    NotAllowed(String),
}

impl fmt::Display for MediaTypeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaTypeRejection::LegacyWord => write!(
                f,
                "Legacy .doc files are not supported. Please convert to .docx format."
            ),
            MediaTypeRejection::NotAllowed(mime) => write!(
                f,
                "Unsupported file type '{}'. Only PDF, DOC, DOCX, and TXT files are allowed.",
                mime
            ),
        }
    }
}

impl MediaType {
    /// Parses a declared MIME string. Parameters such as `; charset=utf-8`
    /// are ignored and the comparison is case-insensitive.
    pub fn from_mime(mime: &str) -> Result<Self, MediaTypeRejection> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            MIME_PDF => Ok(MediaType::Pdf),
            MIME_DOCX => Ok(MediaType::Docx),
            MIME_TEXT => Ok(MediaType::PlainText),
            MIME_MSWORD => Err(MediaTypeRejection::LegacyWord),
            _ => Err(MediaTypeRejection::NotAllowed(mime.to_string())),
        }
    }

    /// Guesses the declared MIME string from a file extension. Used by the
    /// CLI, where there is no client-declared type.
    pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MIME_PDF),
            "doc" => Some(MIME_MSWORD),
            "docx" => Some(MIME_DOCX),
            "txt" | "text" | "md" => Some(MIME_TEXT),
            _ => None,
        }
    }

    pub fn as_mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => MIME_PDF,
            MediaType::Docx => MIME_DOCX,
            MediaType::PlainText => MIME_TEXT,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Extracted document held in the in-memory table.
///
/// Never mutated after insertion; the store hands out shared references.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub original_name: String,
    pub media_type: MediaType,
    pub text: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Metadata view of a [`StoredDocument`]. Deliberately omits the text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    #[serde(rename = "fileId")]
    pub id: String,
    #[serde(rename = "filename")]
    pub original_name: String,
    #[serde(rename = "uploadDate")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "mimetype")]
    pub media_type: String,
}

impl From<&StoredDocument> for DocumentMetadata {
    fn from(doc: &StoredDocument) -> Self {
        Self {
            id: doc.id.clone(),
            original_name: doc.original_name.clone(),
            created_at: doc.created_at,
            size_bytes: doc.size_bytes,
            media_type: doc.media_type.as_mime().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message sent to the upstream chat-completion API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}
