//! Binary table extensions ⇄ [`Table`].
//!
//! Only scalar cells are modelled (repeat count 1), plus fixed-width
//! character columns (`rA`).

use crate::error::{Error, Result};
use crate::fits::hdu::{extension_cards, Hdu, HduInfo, RawExtension};
use crate::fits::header::{Card, Header};
use crate::table::{Column, ColumnData, Table};

/// The element type of a binary table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryColumnType {
    /// L: logical, one byte (`T`/`F`).
    Logical,
    /// B: unsigned byte.
    Byte,
    /// I: 16-bit signed integer.
    Short,
    /// J: 32-bit signed integer.
    Int,
    /// K: 64-bit signed integer.
    Long,
    /// E: 32-bit IEEE float.
    Float,
    /// D: 64-bit IEEE float.
    Double,
    /// A: character string of the given width.
    Ascii(usize),
}

impl BinaryColumnType {
    /// Bytes occupied by one cell.
    pub fn byte_width(self) -> usize {
        match self {
            BinaryColumnType::Logical | BinaryColumnType::Byte => 1,
            BinaryColumnType::Short => 2,
            BinaryColumnType::Int | BinaryColumnType::Float => 4,
            BinaryColumnType::Long | BinaryColumnType::Double => 8,
            BinaryColumnType::Ascii(w) => w,
        }
    }

    pub fn tform(self) -> String {
        match self {
            BinaryColumnType::Logical => "1L".into(),
            BinaryColumnType::Byte => "1B".into(),
            BinaryColumnType::Short => "1I".into(),
            BinaryColumnType::Int => "1J".into(),
            BinaryColumnType::Long => "1K".into(),
            BinaryColumnType::Float => "1E".into(),
            BinaryColumnType::Double => "1D".into(),
            BinaryColumnType::Ascii(w) => format!("{w}A"),
        }
    }
}

/// Parse a TFORMn value such as `"1J"`, `"D"` or `"20A"`.
pub fn parse_tform_binary(s: &str) -> Result<BinaryColumnType> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or(Error::InvalidValue("TFORM has no type code"))?;
    let repeat = if split == 0 {
        1
    } else {
        s[..split]
            .parse::<usize>()
            .map_err(|_| Error::InvalidValue("bad TFORM repeat count"))?
    };
    let code = &s[split..];
    if code.starts_with('A') {
        return Ok(BinaryColumnType::Ascii(repeat));
    }
    if repeat != 1 {
        return Err(Error::InvalidValue("vector columns are not supported"));
    }
    match code {
        "L" => Ok(BinaryColumnType::Logical),
        "B" => Ok(BinaryColumnType::Byte),
        "I" => Ok(BinaryColumnType::Short),
        "J" => Ok(BinaryColumnType::Int),
        "K" => Ok(BinaryColumnType::Long),
        "E" => Ok(BinaryColumnType::Float),
        "D" => Ok(BinaryColumnType::Double),
        _ => Err(Error::InvalidValue("unsupported TFORM type code")),
    }
}

/// Column name, unit and type read from TTYPEn/TUNITn/TFORMn.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryColumnDescriptor {
    pub name: String,
    pub unit: Option<String>,
    pub col_type: BinaryColumnType,
}

/// Extract column descriptors from a table header. Unnamed columns are
/// called `colN`.
pub fn parse_binary_table_columns(
    header: &Header,
    tfields: usize,
) -> Result<Vec<BinaryColumnDescriptor>> {
    (1..=tfields)
        .map(|i| {
            let tform = header
                .get_str(&format!("TFORM{i}"))
                .ok_or(Error::MissingKeyword("TFORMn"))?;
            Ok(BinaryColumnDescriptor {
                name: header
                    .get_str(&format!("TTYPE{i}"))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| format!("col{i}")),
                unit: header.get_str(&format!("TUNIT{i}")).map(str::to_string),
                col_type: parse_tform_binary(tform)?,
            })
        })
        .collect()
}

fn read_cells<T, const N: usize>(
    raw: &[u8],
    naxis1: usize,
    naxis2: usize,
    offset: usize,
    decode: impl Fn([u8; N]) -> T,
) -> Result<Vec<T>> {
    (0..naxis2)
        .map(|row| {
            let start = row * naxis1 + offset;
            raw.get(start..start + N)
                .and_then(|cell| <[u8; N]>::try_from(cell).ok())
                .map(&decode)
                .ok_or(Error::UnexpectedEof)
        })
        .collect()
}

fn read_column(
    raw: &[u8],
    naxis1: usize,
    naxis2: usize,
    offset: usize,
    col_type: BinaryColumnType,
) -> Result<ColumnData> {
    Ok(match col_type {
        BinaryColumnType::Logical => {
            ColumnData::Logical(read_cells(raw, naxis1, naxis2, offset, |b: [u8; 1]| b[0] == b'T')?)
        }
        BinaryColumnType::Byte => {
            ColumnData::U8(read_cells(raw, naxis1, naxis2, offset, |b: [u8; 1]| b[0])?)
        }
        BinaryColumnType::Short => {
            ColumnData::I16(read_cells(raw, naxis1, naxis2, offset, i16::from_be_bytes)?)
        }
        BinaryColumnType::Int => {
            ColumnData::I32(read_cells(raw, naxis1, naxis2, offset, i32::from_be_bytes)?)
        }
        BinaryColumnType::Long => {
            ColumnData::I64(read_cells(raw, naxis1, naxis2, offset, i64::from_be_bytes)?)
        }
        BinaryColumnType::Float => {
            ColumnData::F32(read_cells(raw, naxis1, naxis2, offset, f32::from_be_bytes)?)
        }
        BinaryColumnType::Double => {
            ColumnData::F64(read_cells(raw, naxis1, naxis2, offset, f64::from_be_bytes)?)
        }
        BinaryColumnType::Ascii(width) => {
            let cells = (0..naxis2)
                .map(|row| {
                    let start = row * naxis1 + offset;
                    raw.get(start..start + width)
                        .map(|cell| {
                            String::from_utf8_lossy(cell)
                                .trim_end_matches(['\0', ' '])
                                .to_string()
                        })
                        .ok_or(Error::UnexpectedEof)
                })
                .collect::<Result<Vec<_>>>()?;
            ColumnData::Str(cells)
        }
    })
}

/// Decode a binary table extension. `raw` is its data segment.
///
/// The table's metadata record keeps every non-structural card.
pub fn read_binary_table(raw: &[u8], hdu: &Hdu) -> Result<Table> {
    let (naxis1, naxis2, tfields) = match hdu.info {
        HduInfo::BinaryTable {
            naxis1,
            naxis2,
            tfields,
            ..
        } => (naxis1, naxis2, tfields),
        _ => return Err(Error::InvalidHeader("not a binary table")),
    };
    let descriptors = parse_binary_table_columns(&hdu.header, tfields)?;
    let row_width: usize = descriptors.iter().map(|d| d.col_type.byte_width()).sum();
    if row_width != naxis1 {
        return Err(Error::InvalidHeader("NAXIS1 differs from the sum of column widths"));
    }

    let mut header = hdu.header.clone();
    header.strip_structural();
    let mut table = Table::new();
    table.header = header;
    let mut offset = 0;
    for d in descriptors {
        let data = read_column(raw, naxis1, naxis2, offset, d.col_type)?;
        offset += d.col_type.byte_width();
        table.push_column(Column {
            name: d.name,
            unit: d.unit,
            data,
        })?;
    }
    Ok(table)
}

fn column_type(data: &ColumnData) -> BinaryColumnType {
    match data {
        ColumnData::Logical(_) => BinaryColumnType::Logical,
        ColumnData::U8(_) => BinaryColumnType::Byte,
        ColumnData::I16(_) => BinaryColumnType::Short,
        ColumnData::I32(_) => BinaryColumnType::Int,
        ColumnData::I64(_) => BinaryColumnType::Long,
        ColumnData::F32(_) => BinaryColumnType::Float,
        ColumnData::F64(_) => BinaryColumnType::Double,
        ColumnData::Str(v) => {
            BinaryColumnType::Ascii(v.iter().map(String::len).max().unwrap_or(0).max(1))
        }
    }
}

fn write_cell(data: &ColumnData, row: usize, width: usize, dest: &mut [u8]) {
    match data {
        ColumnData::Logical(v) => dest[0] = if v[row] { b'T' } else { b'F' },
        ColumnData::U8(v) => dest[0] = v[row],
        ColumnData::I16(v) => dest.copy_from_slice(&v[row].to_be_bytes()),
        ColumnData::I32(v) => dest.copy_from_slice(&v[row].to_be_bytes()),
        ColumnData::I64(v) => dest.copy_from_slice(&v[row].to_be_bytes()),
        ColumnData::F32(v) => dest.copy_from_slice(&v[row].to_be_bytes()),
        ColumnData::F64(v) => dest.copy_from_slice(&v[row].to_be_bytes()),
        ColumnData::Str(v) => {
            let bytes = v[row].as_bytes();
            let n = bytes.len().min(width);
            dest[..n].copy_from_slice(&bytes[..n]);
        }
    }
}

/// Build a binary table extension from `table`, carrying its metadata record
/// after the structural and column cards.
pub fn binary_table_extension(table: &Table) -> RawExtension {
    let types: Vec<BinaryColumnType> =
        table.columns().iter().map(|c| column_type(&c.data)).collect();
    let naxis1: usize = types.iter().map(|t| t.byte_width()).sum();
    let naxis2 = table.nrows();

    let mut cards = extension_cards("BINTABLE", 8, &[naxis1, naxis2], 0);
    cards.push(Card::new("TFIELDS", table.ncols()));
    for (i, (column, col_type)) in table.columns().iter().zip(&types).enumerate() {
        let n = i + 1;
        cards.push(Card::new(&format!("TTYPE{n}"), column.name.as_str()));
        cards.push(Card::new(&format!("TFORM{n}"), col_type.tform()));
        if let Some(unit) = &column.unit {
            cards.push(Card::new(&format!("TUNIT{n}"), unit.as_str()));
        }
    }

    let mut data = vec![0u8; naxis1 * naxis2];
    for row in 0..naxis2 {
        let mut offset = row * naxis1;
        for (column, col_type) in table.columns().iter().zip(&types) {
            let width = col_type.byte_width();
            write_cell(&column.data, row, width, &mut data[offset..offset + width]);
            offset += width;
        }
    }
    RawExtension::new(cards, &table.header, data)
}
