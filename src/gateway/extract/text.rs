use async_trait::async_trait;
use bytes::Bytes;

use super::{ExtractError, Extractor};

/// Decodes bytes as UTF-8, replacing invalid sequences.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError> {
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strips_byte_order_mark_and_replaces_invalid_utf8() {
        let bytes = Bytes::from_static(b"\xef\xbb\xbfhello \xff world");
        let text = PlainTextExtractor.extract(bytes).await.unwrap();
        assert_eq!(text, "hello \u{fffd} world");
    }
}
