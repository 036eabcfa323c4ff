use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use calamine::{Data, Range, Reader as _};

use super::{ExtractError, Extractor};

/// Every worksheet as a comma-delimited block headed by `Sheet: <name>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetExtractor;

#[async_trait]
impl Extractor for SpreadsheetExtractor {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError> {
        tokio::task::spawn_blocking(move || workbook_text(bytes))
            .await
            .map_err(|err| ExtractError::Task(err.to_string()))?
    }
}

fn workbook_text(bytes: Bytes) -> Result<String, ExtractError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|err| ExtractError::Malformed(err.to_string()))?;

    let mut blocks = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|err| ExtractError::Malformed(err.to_string()))?;
        blocks.push(format!("Sheet: {name}\n{}", range_to_delimited(&range)));
    }
    Ok(blocks.join("\n\n"))
}

fn range_to_delimited(range: &Range<Data>) -> String {
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| escape_cell(&cell.to_string()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_rows_with_quoting() {
        let mut range = Range::new((0, 0), (1, 2));
        range.set_value((0, 0), Data::String("item".to_string()));
        range.set_value((0, 1), Data::String("qty".to_string()));
        range.set_value((0, 2), Data::String("note".to_string()));
        range.set_value((1, 0), Data::String("bolts".to_string()));
        range.set_value((1, 1), Data::Int(12));
        range.set_value((1, 2), Data::String("m4, zinc".to_string()));

        assert_eq!(
            range_to_delimited(&range),
            "item,qty,note\nbolts,12,\"m4, zinc\""
        );
    }

    #[tokio::test]
    async fn garbage_bytes_are_malformed() {
        let err = SpreadsheetExtractor
            .extract(Bytes::from_static(b"definitely not a workbook"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
