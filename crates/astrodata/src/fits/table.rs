//! ASCII table extensions ⇄ [`Table`].

use crate::error::{Error, Result};
use crate::fits::hdu::{extension_cards, Hdu, HduInfo, RawExtension};
use crate::fits::header::{Card, Header};
use crate::fits::value::parse_float_literal;
use crate::table::{Column, ColumnData, Table};

// ── Column Format ──

/// The format code for an ASCII table column, parsed from a TFORMn keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiColumnFormat {
    /// `Aw`: character string, `w` characters wide.
    Character(usize),
    /// `Iw`: integer, `w` characters wide.
    Integer(usize),
    /// `Fw.d`, `Ew.d` or `Dw.d`: floating point, `w` characters wide.
    Float(usize),
}

impl AsciiColumnFormat {
    pub fn width(self) -> usize {
        match self {
            AsciiColumnFormat::Character(w)
            | AsciiColumnFormat::Integer(w)
            | AsciiColumnFormat::Float(w) => w,
        }
    }
}

const INT_WIDTH: usize = 20;
const FLOAT_WIDTH: usize = 25;

/// Parse a TFORM string such as `"A20"`, `"I10"`, `"F12.4"` or `"D25.17"`.
pub fn parse_tform_ascii(s: &str) -> Result<AsciiColumnFormat> {
    let s = s.trim();
    let mut chars = s.chars();
    let code = chars.next().ok_or(Error::InvalidValue("empty TFORM"))?;
    let rest = chars.as_str();
    let width_text = rest.split('.').next().unwrap_or(rest);
    let width = width_text
        .parse::<usize>()
        .map_err(|_| Error::InvalidValue("bad TFORM width"))?;
    match code {
        'A' => Ok(AsciiColumnFormat::Character(width)),
        'I' => Ok(AsciiColumnFormat::Integer(width)),
        'F' | 'E' | 'D' => Ok(AsciiColumnFormat::Float(width)),
        _ => Err(Error::InvalidValue("unsupported ASCII TFORM code")),
    }
}

// ── Reading ──

/// Decode an ASCII table extension. `raw` is its data segment.
pub fn read_ascii_table(raw: &[u8], hdu: &Hdu) -> Result<Table> {
    let (naxis1, naxis2, tfields) = match hdu.info {
        HduInfo::AsciiTable {
            naxis1,
            naxis2,
            tfields,
        } => (naxis1, naxis2, tfields),
        _ => return Err(Error::InvalidHeader("not an ASCII table")),
    };

    let mut header = hdu.header.clone();
    header.strip_structural();
    let mut table = Table::new();
    table.header = header;

    for i in 1..=tfields {
        let format = parse_tform_ascii(
            hdu.header
                .get_str(&format!("TFORM{i}"))
                .ok_or(Error::MissingKeyword("TFORMn"))?,
        )?;
        let tbcol = hdu
            .header
            .get_int(&format!("TBCOL{i}"))
            .filter(|&c| c >= 1)
            .ok_or(Error::MissingKeyword("TBCOLn"))? as usize
            - 1;
        let fields = (0..naxis2).map(|row| {
            let start = row * naxis1 + tbcol;
            raw.get(start..start + format.width())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .ok_or(Error::UnexpectedEof)
        });
        let data = match format {
            AsciiColumnFormat::Character(_) => ColumnData::Str(
                fields
                    .map(|f| f.map(|s| s.trim_end().to_string()))
                    .collect::<Result<_>>()?,
            ),
            AsciiColumnFormat::Integer(_) => ColumnData::I64(
                fields
                    .map(|f| {
                        let s = f?;
                        let s = s.trim();
                        if s.is_empty() {
                            return Ok(0);
                        }
                        s.parse::<i64>()
                            .map_err(|_| Error::InvalidValue("bad integer field"))
                    })
                    .collect::<Result<_>>()?,
            ),
            AsciiColumnFormat::Float(_) => ColumnData::F64(
                fields
                    .map(|f| {
                        let s = f?;
                        if s.trim().is_empty() {
                            return Ok(0.0);
                        }
                        parse_float_literal(&s).ok_or(Error::InvalidValue("bad float field"))
                    })
                    .collect::<Result<_>>()?,
            ),
        };
        table.push_column(Column {
            name: hdu
                .header
                .get_str(&format!("TTYPE{i}"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| format!("col{i}")),
            unit: hdu.header.get_str(&format!("TUNIT{i}")).map(str::to_string),
            data,
        })?;
    }
    Ok(table)
}

// ── Writing ──

fn column_format(data: &ColumnData) -> Result<AsciiColumnFormat> {
    match data {
        ColumnData::Str(v) => {
            if v.iter().any(|s| !s.is_ascii()) {
                return Err(Error::InvalidValue("ASCII table cells must be ASCII"));
            }
            Ok(AsciiColumnFormat::Character(
                v.iter().map(String::len).max().unwrap_or(0).max(1),
            ))
        }
        ColumnData::U8(_) | ColumnData::I16(_) | ColumnData::I32(_) | ColumnData::I64(_) => {
            Ok(AsciiColumnFormat::Integer(INT_WIDTH))
        }
        ColumnData::F32(_) | ColumnData::F64(_) => Ok(AsciiColumnFormat::Float(FLOAT_WIDTH)),
        ColumnData::Logical(_) => Err(Error::type_mismatch(
            "logical columns cannot be stored in an ASCII table",
        )),
    }
}

fn tform(format: AsciiColumnFormat) -> String {
    match format {
        AsciiColumnFormat::Character(w) => format!("A{w}"),
        AsciiColumnFormat::Integer(w) => format!("I{w}"),
        AsciiColumnFormat::Float(w) => format!("D{w}.17"),
    }
}

fn format_field(data: &ColumnData, row: usize, width: usize) -> String {
    match data {
        ColumnData::Str(v) => format!("{:<width$}", v[row]),
        ColumnData::U8(v) => format!("{:>width$}", v[row]),
        ColumnData::I16(v) => format!("{:>width$}", v[row]),
        ColumnData::I32(v) => format!("{:>width$}", v[row]),
        ColumnData::I64(v) => format!("{:>width$}", v[row]),
        ColumnData::F32(v) => format!("{:>width$}", format!("{:.16E}", v[row] as f64)),
        ColumnData::F64(v) => format!("{:>width$}", format!("{:.16E}", v[row])),
        ColumnData::Logical(_) => " ".repeat(width),
    }
}

/// Build an ASCII table extension from `table`. Columns are separated by
/// one blank.
pub fn ascii_table_extension(table: &Table) -> Result<RawExtension> {
    let formats = table
        .columns()
        .iter()
        .map(|c| column_format(&c.data))
        .collect::<Result<Vec<_>>>()?;
    let mut tbcols = Vec::with_capacity(formats.len());
    let mut naxis1 = 0usize;
    for (i, f) in formats.iter().enumerate() {
        if i > 0 {
            naxis1 += 1;
        }
        tbcols.push(naxis1);
        naxis1 += f.width();
    }
    let naxis2 = table.nrows();

    let mut cards = extension_cards("TABLE", 8, &[naxis1, naxis2], 0);
    cards.push(Card::new("TFIELDS", table.ncols()));
    for (i, (column, format)) in table.columns().iter().zip(&formats).enumerate() {
        let n = i + 1;
        cards.push(Card::new(&format!("TTYPE{n}"), column.name.as_str()));
        cards.push(Card::new(&format!("TFORM{n}"), tform(*format)));
        cards.push(Card::new(&format!("TBCOL{n}"), tbcols[i] + 1));
        if let Some(unit) = &column.unit {
            cards.push(Card::new(&format!("TUNIT{n}"), unit.as_str()));
        }
    }

    let mut data = vec![b' '; naxis1 * naxis2];
    for row in 0..naxis2 {
        for ((column, format), &tbcol) in table.columns().iter().zip(&formats).zip(&tbcols) {
            let width = format.width();
            let field = format_field(&column.data, row, width);
            let start = row * naxis1 + tbcol;
            let n = field.len().min(width);
            data[start..start + n].copy_from_slice(&field.as_bytes()[..n]);
        }
    }
    Ok(RawExtension::new(cards, &table.header, data))
}

/// `true` for an extension header describing an ASCII table.
pub fn is_ascii_table(header: &Header) -> bool {
    header.get_str("XTENSION").map(str::trim) == Some("TABLE")
}
