//! Transform documents embedded in table extensions.
//!
//! A transform is written as the pretty-printed JSON document
//! `{"wcs": <transform>}`. ASCII documents become a text table with one
//! `gWCS` column and one row per line. Anything else falls back to a binary
//! table holding one byte per row.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::fits::bintable::{binary_table_extension, read_binary_table};
use crate::fits::table::{ascii_table_extension, read_ascii_table};
use crate::fits::{Hdu, HduInfo, RawExtension};
use crate::table::{Column, ColumnData, Table};
use crate::wcs::Transform;

/// Extension name of transform extensions.
pub const WCS_EXTNAME: &str = "WCS";
/// The single column of a transform extension.
pub const WCS_COLUMN: &str = "gWCS";
/// Top-level document entry holding the transform.
const DOCUMENT_KEY: &str = "wcs";

#[derive(Serialize)]
struct Document<'a> {
    wcs: &'a Transform,
}

/// Serialize `transform` into its document bytes.
///
/// Fails with [`Error::TypeMismatch`] if a model in the pipeline has no
/// serialization tag.
pub fn encode_document(transform: &Transform) -> Result<Vec<u8>> {
    let untagged = transform.untagged_models();
    if !untagged.is_empty() {
        return Err(Error::type_mismatch(format!(
            "transform models {untagged:?} have no serialization tag"
        )));
    }
    Ok(serde_json::to_vec_pretty(&Document { wcs: transform })?)
}

/// Wrap document bytes in a table carrying `EXTNAME = 'WCS'` and `version`.
pub fn document_table(document: &[u8], version: Option<i64>) -> Result<(Table, bool)> {
    let (column, is_text) = match std::str::from_utf8(document) {
        Ok(text) if text.is_ascii() => {
            let lines = text.lines().map(str::to_string).collect();
            (ColumnData::Str(lines), true)
        }
        _ => {
            log::warn!("transform document is not ASCII; storing it as bytes in a binary table");
            (ColumnData::U8(document.to_vec()), false)
        }
    };
    let mut table = Table::from_columns(vec![Column::new(WCS_COLUMN, column)])?;
    table.header.set("EXTNAME", WCS_EXTNAME, None)?;
    if let Some(version) = version {
        table.header.set("EXTVER", version, None)?;
    }
    Ok((table, is_text))
}

/// Encode `transform` as a table extension tagged with the owning unit's
/// `version`.
pub fn encode(transform: &Transform, version: Option<i64>) -> Result<RawExtension> {
    let document = encode_document(transform)?;
    document_extension(&document, version)
}

/// Encode already-serialized document bytes.
pub fn document_extension(document: &[u8], version: Option<i64>) -> Result<RawExtension> {
    let (table, is_text) = document_table(document, version)?;
    if is_text {
        ascii_table_extension(&table)
    } else {
        Ok(binary_table_extension(&table))
    }
}

/// Recover a transform from a decoded transform table.
///
/// Returns `None`, with a warning, when the column is missing, the document
/// does not parse or it has no transform entry.
pub fn decode(table: &Table) -> Option<Transform> {
    let document = match table.column(WCS_COLUMN).map(|c| &c.data) {
        Some(ColumnData::Str(lines)) => lines.join("\n").into_bytes(),
        Some(ColumnData::U8(bytes)) => bytes.clone(),
        Some(_) | None => {
            log::warn!("transform table has no usable {WCS_COLUMN} column");
            return None;
        }
    };
    let mut value: serde_json::Value = match serde_json::from_slice(&document) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("failed to parse transform document: {err}");
            return None;
        }
    };
    let Some(entry) = value.get_mut(DOCUMENT_KEY).map(serde_json::Value::take) else {
        log::warn!("transform document has no {DOCUMENT_KEY:?} entry");
        return None;
    };
    match serde_json::from_value(entry) {
        Ok(transform) => Some(transform),
        Err(err) => {
            log::warn!("failed to rebuild transform: {err}");
            None
        }
    }
}

/// Decode the transform extension `hdu` whose data segment is `raw`.
///
/// Non-table extensions and unreadable tables yield `None` with a warning.
pub fn decode_extension(hdu: &Hdu, raw: &[u8]) -> Option<Transform> {
    let table = match hdu.info {
        HduInfo::AsciiTable { .. } => read_ascii_table(raw, hdu),
        HduInfo::BinaryTable { .. } => read_binary_table(raw, hdu),
        _ => {
            log::warn!("transform extension is not a table; ignoring it");
            return None;
        }
    };
    match table {
        Ok(table) => decode(&table),
        Err(err) => {
            log::warn!("failed to read transform table: {err}");
            None
        }
    }
}
