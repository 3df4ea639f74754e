use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse an optional JSON text column.
pub fn parse_json_opt(
    raw: Option<String>,
    table: &'static str,
    column: &'static str,
) -> Result<Option<serde_json::Value>, StoreError> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid JSON: {e}"),
        })
    })
    .transpose()
}

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
