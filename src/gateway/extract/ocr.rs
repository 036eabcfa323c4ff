use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::command::run_with_stdin;
use super::{ExtractError, Extractor};

/// Optical character recognition via `tesseract stdin stdout`.
///
/// OCR is CPU heavy; running it as a child process keeps the runtime's workers free.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    program: String,
    language: String,
    timeout: Duration,
}

impl OcrExtractor {
    pub fn new(program: impl Into<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for OcrExtractor {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::Malformed("empty image".to_string()));
        }
        run_with_stdin(
            &self.program,
            &["stdin", "stdout", "-l", self.language.as_str()],
            &bytes,
            self.timeout,
        )
        .await
    }
}
