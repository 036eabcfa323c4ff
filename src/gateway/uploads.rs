use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::Serialize;

use super::GatewayError;
use super::config::UploadConfig;
use super::extract::{DocumentKind, ExtractorRegistry};
use crate::types::{UploadStatus, UploadedFile};
use crate::utils::hex_encode;

static UPLOAD_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// An uploaded file as received, before validation.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_id: String,
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub extracted_text: String,
    pub full_text_available: bool,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_file_bytes: u64,
    public_base_url: Option<String>,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_file_bytes: config.max_file_bytes,
            public_base_url: config
                .public_base_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    /// Checks size and type. Returns the effective mimetype.
    pub fn validate(
        &self,
        file: &IncomingFile,
        extractors: &ExtractorRegistry,
        images_only: bool,
    ) -> Result<String, GatewayError> {
        let size = file.data.len() as u64;
        if size > self.max_file_bytes {
            return Err(GatewayError::FileTooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        let mimetype = effective_mimetype(file.content_type.as_deref(), file.file_name.as_deref());
        let kind = DocumentKind::from_mime(&mimetype);
        let accepted = if images_only {
            kind == Some(DocumentKind::Image)
        } else {
            extractors.supports(&mimetype)
        };
        if !accepted {
            return Err(GatewayError::UnsupportedMediaType { mimetype });
        }
        Ok(mimetype)
    }

    /// Writes the bytes under a fresh id and returns the pending record.
    pub async fn store(
        &self,
        file: &IncomingFile,
        mimetype: String,
    ) -> Result<UploadedFile, GatewayError> {
        let file_name = sanitize_file_name(file.file_name.as_deref());
        let id = generate_file_id();
        let stored_name = match Path::new(&file_name).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!("{id}.{ext}"),
            _ => id.clone(),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| GatewayError::Storage {
                message: format!("create {}: {err}", self.dir.display()),
            })?;
        let storage_location = self.dir.join(&stored_name);
        tokio::fs::write(&storage_location, &file.data)
            .await
            .map_err(|err| GatewayError::Storage {
                message: format!("write {}: {err}", storage_location.display()),
            })?;

        Ok(UploadedFile {
            id,
            file_name,
            mimetype,
            byte_size: file.data.len() as u64,
            storage_location,
            status: UploadStatus::Pending,
        })
    }

    pub async fn read(&self, file: &UploadedFile) -> Result<Bytes, GatewayError> {
        tokio::fs::read(&file.storage_location)
            .await
            .map(Bytes::from)
            .map_err(|err| GatewayError::Storage {
                message: format!("read {}: {err}", file.storage_location.display()),
            })
    }

    /// URL under which the stored file is served, when a public base is configured.
    pub fn public_url(&self, file: &UploadedFile) -> Option<String> {
        let stored_name = file.storage_location.file_name()?.to_str()?;
        self.public_base_url
            .as_deref()
            .map(|base| format!("{base}/uploads/{stored_name}"))
    }

    pub fn display_url(&self, file: &UploadedFile) -> String {
        self.public_url(file).unwrap_or_else(|| {
            let stored_name = file
                .storage_location
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(file.id.as_str());
            format!("/uploads/{stored_name}")
        })
    }
}

fn generate_file_id() -> String {
    let mut bytes = [0u8; 16];
    if getrandom::fill(&mut bytes).is_err() {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0);
        let seq = UPLOAD_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        return format!("file-{ts_ms}-{seq}");
    }
    format!("file-{}", hex_encode(&bytes))
}

fn sanitize_file_name(name: Option<&str>) -> String {
    let base = name
        .unwrap_or_default()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// The declared content type, or a guess from the file extension when the client sent
/// none or a generic one.
pub fn effective_mimetype(declared: Option<&str>, file_name: Option<&str>) -> String {
    let declared = declared
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "application/octet-stream");
    if let Some(declared) = declared {
        return declared;
    }

    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::config::ExtractionConfig;

    fn store(dir: &Path, max_file_bytes: u64) -> UploadStore {
        UploadStore::new(&UploadConfig {
            dir: dir.to_path_buf(),
            max_file_bytes,
            ..UploadConfig::default()
        })
    }

    fn incoming(name: &str, content_type: Option<&str>, data: &'static [u8]) -> IncomingFile {
        IncomingFile {
            file_name: Some(name.to_string()),
            content_type: content_type.map(str::to_string),
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn guesses_mimetype_from_extension() {
        assert_eq!(effective_mimetype(None, Some("a.PDF")), "application/pdf");
        assert_eq!(
            effective_mimetype(Some("application/octet-stream"), Some("notes.txt")),
            "text/plain"
        );
        assert_eq!(
            effective_mimetype(Some("Text/Plain; charset=utf-8"), None),
            "text/plain"
        );
    }

    #[test]
    fn rejects_large_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 4);
        let extractors = ExtractorRegistry::from_config(&ExtractionConfig::default());

        let too_large = store.validate(&incoming("a.txt", None, b"hello"), &extractors, false);
        assert!(matches!(too_large, Err(GatewayError::FileTooLarge { size: 5, limit: 4 })));

        let unsupported = store.validate(&incoming("a.zip", None, b"PK"), &extractors, false);
        assert!(matches!(
            unsupported,
            Err(GatewayError::UnsupportedMediaType { .. })
        ));

        let not_image = store.validate(&incoming("a.txt", None, b"hi"), &extractors, true);
        assert!(not_image.is_err());
    }

    #[tokio::test]
    async fn stores_bytes_under_random_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1024);
        let file = incoming("../../etc/notes.txt", Some("text/plain"), b"hello world");

        let stored = store.store(&file, "text/plain".to_string()).await.unwrap();
        assert_eq!(stored.file_name, "notes.txt");
        assert_eq!(stored.byte_size, 11);
        assert_eq!(stored.status, UploadStatus::Pending);
        assert!(stored.storage_location.starts_with(dir.path()));
        assert!(stored.storage_location.to_string_lossy().ends_with(".txt"));
        assert_eq!(store.read(&stored).await.unwrap().as_ref(), b"hello world");
        assert!(store.public_url(&stored).is_none());
        assert!(store.display_url(&stored).starts_with("/uploads/file-"));
    }

    #[tokio::test]
    async fn public_url_uses_stored_name_under_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(&UploadConfig {
            dir: dir.path().to_path_buf(),
            public_base_url: Some("https://cdn.example.com/".to_string()),
            ..UploadConfig::default()
        });
        let file = incoming("cat.png", Some("image/png"), b"\x89PNG");

        let stored = store.store(&file, "image/png".to_string()).await.unwrap();
        let url = store.public_url(&stored).unwrap();
        assert_eq!(url, format!("https://cdn.example.com/uploads/{}.png", stored.id));
        assert_eq!(store.display_url(&stored), url);
    }
}
