use bytes::Bytes;

use super::GatewayError;

#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MultipartPart {
    pub fn is_file(&self) -> bool {
        self.filename.as_deref().is_some_and(|name| !name.trim().is_empty())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
}

fn find_subslice(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(start);
    }
    if start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|rel| start + rel)
}

fn multipart_boundary(content_type: &str) -> Result<String, GatewayError> {
    for param in content_type.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let value = unquote(value.trim());
        if !value.trim().is_empty() {
            return Ok(value.to_string());
        }
    }
    Err(GatewayError::InvalidRequest {
        reason: "multipart boundary is missing".to_string(),
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn skip_line_break(bytes: &[u8], cursor: usize) -> usize {
    if bytes.get(cursor..cursor + 2) == Some(b"\r\n") {
        cursor + 2
    } else if bytes.get(cursor..cursor + 1) == Some(b"\n") {
        cursor + 1
    } else {
        cursor
    }
}

/// Parses a buffered `multipart/form-data` body. Part data are zero-copy slices of `body`.
pub fn parse_multipart_form(
    content_type: &str,
    body: &Bytes,
) -> Result<Vec<MultipartPart>, GatewayError> {
    let invalid = |reason: &str| GatewayError::InvalidRequest {
        reason: reason.to_string(),
    };

    let boundary = multipart_boundary(content_type)?;
    let boundary_marker = format!("--{boundary}");
    let delimiter = format!("\r\n{boundary_marker}");

    let bytes = body.as_ref();
    let Some(mut cursor) = find_subslice(bytes, boundary_marker.as_bytes(), 0) else {
        return Err(invalid("multipart body missing boundary marker"));
    };
    cursor += boundary_marker.len();

    let mut parts = Vec::new();
    loop {
        if bytes.get(cursor..cursor + 2) == Some(b"--") {
            break;
        }
        cursor = skip_line_break(bytes, cursor);

        let (headers_end, separator_len) =
            if let Some(idx) = find_subslice(bytes, b"\r\n\r\n", cursor) {
                (idx, 4)
            } else if let Some(idx) = find_subslice(bytes, b"\n\n", cursor) {
                (idx, 2)
            } else {
                return Err(invalid("multipart part missing header separator"));
            };

        let headers_raw = String::from_utf8_lossy(&bytes[cursor..headers_end]);
        let mut name = None;
        let mut filename = None;
        let mut part_content_type = None;
        for line in headers_raw.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                for item in value.split(';').map(str::trim) {
                    if let Some(value) = item.strip_prefix("name=") {
                        name = Some(unquote(value.trim()).to_string());
                    } else if let Some(value) = item.strip_prefix("filename=") {
                        filename = Some(unquote(value.trim()).to_string());
                    }
                }
            } else if key.trim().eq_ignore_ascii_case("content-type") && !value.is_empty() {
                part_content_type = Some(value.to_string());
            }
        }

        let name = name.ok_or_else(|| invalid("multipart part missing content-disposition name"))?;
        let data_start = headers_end + separator_len;
        let Some(data_end) = find_subslice(bytes, delimiter.as_bytes(), data_start) else {
            return Err(invalid("multipart part missing trailing boundary"));
        };

        parts.push(MultipartPart {
            name,
            filename,
            content_type: part_content_type,
            data: body.slice(data_start..data_end),
        });

        cursor = data_end + delimiter.len();
        if bytes.get(cursor..cursor + 2) == Some(b"--") {
            break;
        }
    }

    Ok(parts)
}
