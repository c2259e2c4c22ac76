//! Raw extensions: locating headers and data segments in a byte stream, and
//! emitting them back.

use std::io::Write;

use crate::error::{Error, Result};
use crate::fits::header::{is_structural_keyword, parse_header, serialize_header, Card, Header};
use crate::fits::{checked_padded_len, padded_byte_len, Value, BLOCK_SIZE};

/// Describes the kind and shape of data in a single extension.
#[derive(Debug, Clone, PartialEq)]
pub enum HduInfo {
    /// Primary extension, possibly carrying an image.
    Primary {
        bitpix: i64,
        /// Axis lengths in header order (NAXIS1 first).
        naxes: Vec<usize>,
    },
    /// Image extension (XTENSION = 'IMAGE').
    Image { bitpix: i64, naxes: Vec<usize> },
    /// ASCII table extension (XTENSION = 'TABLE').
    AsciiTable {
        naxis1: usize,
        naxis2: usize,
        tfields: usize,
    },
    /// Binary table extension (XTENSION = 'BINTABLE').
    BinaryTable {
        naxis1: usize,
        naxis2: usize,
        pcount: usize,
        tfields: usize,
    },
}

/// One extension located in a byte stream.
#[derive(Debug, Clone)]
pub struct Hdu {
    pub info: HduInfo,
    /// All cards of the extension header, structural ones included.
    pub header: Header,
    /// Byte offset where the data segment begins.
    pub data_start: usize,
    /// Length of the data segment in bytes (unpadded).
    pub data_len: usize,
}

impl Hdu {
    /// `EXTNAME`, trimmed; `None` when absent or blank.
    pub fn name(&self) -> Option<&str> {
        self.header
            .get_str("EXTNAME")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `EXTVER`, when present.
    pub fn version(&self) -> Option<i64> {
        self.header.get_int("EXTVER")
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.info, HduInfo::Primary { .. })
    }

    pub fn is_table(&self) -> bool {
        matches!(
            self.info,
            HduInfo::AsciiTable { .. } | HduInfo::BinaryTable { .. }
        )
    }

    /// `true` if the extension has a non-empty data segment.
    pub fn has_data(&self) -> bool {
        self.data_len > 0
    }

    /// BITPIX and C-order shape (slowest axis first) of an image extension.
    pub fn image_layout(&self) -> Option<(i64, Vec<usize>)> {
        match &self.info {
            HduInfo::Primary { bitpix, naxes } | HduInfo::Image { bitpix, naxes } => {
                Some((*bitpix, naxes.iter().rev().copied().collect()))
            }
            _ => None,
        }
    }

    /// The data segment of this extension within `bytes`.
    pub fn data<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        bytes
            .get(self.data_start..self.data_start + self.data_len)
            .ok_or(Error::UnexpectedEof)
    }
}

fn required_int(header: &Header, keyword: &'static str) -> Result<i64> {
    header.get_int(keyword).ok_or(Error::MissingKeyword(keyword))
}

fn required_len(header: &Header, keyword: &'static str) -> Result<usize> {
    usize::try_from(required_int(header, keyword)?)
        .map_err(|_| Error::InvalidHeader("negative dimension"))
}

fn read_naxes(header: &Header) -> Result<Vec<usize>> {
    let naxis = required_len(header, "NAXIS")?;
    (1..=naxis)
        .map(|i| {
            header
                .get_int(&format!("NAXIS{i}"))
                .ok_or(Error::MissingKeyword("NAXISn"))
                .and_then(|n| {
                    usize::try_from(n).map_err(|_| Error::InvalidHeader("negative NAXISn"))
                })
        })
        .collect()
}

fn parse_hdu_info(header: &Header, is_primary: bool) -> Result<HduInfo> {
    if is_primary {
        let bitpix = required_int(header, "BITPIX")?;
        return Ok(HduInfo::Primary {
            bitpix,
            naxes: read_naxes(header)?,
        });
    }

    let xtension = header
        .get_str("XTENSION")
        .ok_or(Error::MissingKeyword("XTENSION"))?
        .trim();
    match xtension {
        "IMAGE" => Ok(HduInfo::Image {
            bitpix: required_int(header, "BITPIX")?,
            naxes: read_naxes(header)?,
        }),
        "TABLE" => Ok(HduInfo::AsciiTable {
            naxis1: required_len(header, "NAXIS1")?,
            naxis2: required_len(header, "NAXIS2")?,
            tfields: required_len(header, "TFIELDS")?,
        }),
        "BINTABLE" => Ok(HduInfo::BinaryTable {
            naxis1: required_len(header, "NAXIS1")?,
            naxis2: required_len(header, "NAXIS2")?,
            pcount: required_len(header, "PCOUNT")?,
            tfields: required_len(header, "TFIELDS")?,
        }),
        other => Err(Error::UnsupportedExtension(other.to_string())),
    }
}

fn data_byte_len(info: &HduInfo) -> Result<usize> {
    let overflow = Error::InvalidHeader("data size overflow");
    match info {
        HduInfo::Primary { bitpix, naxes } | HduInfo::Image { bitpix, naxes } => {
            if naxes.is_empty() {
                return Ok(0);
            }
            let bytes_per_value = (bitpix.unsigned_abs() / 8) as usize;
            naxes
                .iter()
                .try_fold(bytes_per_value, |acc, &d| acc.checked_mul(d))
                .ok_or(overflow)
        }
        HduInfo::AsciiTable { naxis1, naxis2, .. } => naxis1.checked_mul(*naxis2).ok_or(overflow),
        HduInfo::BinaryTable {
            naxis1,
            naxis2,
            pcount,
            ..
        } => naxis1
            .checked_mul(*naxis2)
            .and_then(|n| n.checked_add(*pcount))
            .ok_or(overflow),
    }
}

/// Locate every extension in a complete container byte stream.
///
/// Bytes after the last well-formed extension are ignored.
pub fn parse_hdus(data: &[u8]) -> Result<Vec<Hdu>> {
    if data.len() < BLOCK_SIZE {
        return Err(Error::UnexpectedEof);
    }

    let mut hdus: Vec<Hdu> = Vec::new();
    let mut offset = 0usize;

    while data.len() - offset >= BLOCK_SIZE {
        let (header, header_len) = match parse_header(&data[offset..]) {
            Ok(parsed) => parsed,
            Err(_) if !hdus.is_empty() => break,
            Err(e) => return Err(e),
        };

        let is_primary = hdus.is_empty();
        if is_primary && header.cards().first().map(|c| c.keyword.as_str()) != Some("SIMPLE") {
            return Err(Error::InvalidHeader("first extension must be primary"));
        }

        let info = parse_hdu_info(&header, is_primary)?;
        let data_len = data_byte_len(&info)?;
        let data_start = offset + header_len;
        let data_end = data_start
            .checked_add(data_len)
            .ok_or(Error::InvalidHeader("data size overflow"))?;
        // Trailing block padding may be missing, the data itself may not.
        if data_end > data.len() {
            return Err(Error::UnexpectedEof);
        }
        let next = checked_padded_len(data_len)
            .and_then(|padded| data_start.checked_add(padded))
            .ok_or(Error::InvalidHeader("data size overflow"))?;

        hdus.push(Hdu {
            info,
            header,
            data_start,
            data_len,
        });
        offset = next.min(data.len());
    }

    if hdus.is_empty() {
        return Err(Error::InvalidHeader("no extensions found"));
    }
    Ok(hdus)
}

// ── Writing ──

/// An extension ready to be written: its full card list and unpadded data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtension {
    pub cards: Vec<Card>,
    pub data: Vec<u8>,
}

impl RawExtension {
    /// Combine mandatory structural cards with the content cards of `header`.
    ///
    /// Structural keywords in `header` are skipped, since they would
    /// contradict the ones generated for the data actually written.
    pub fn new(structural: Vec<Card>, header: &Header, data: Vec<u8>) -> Self {
        let mut cards = structural;
        cards.extend(
            header
                .iter()
                .filter(|c| !is_structural_keyword(&c.keyword))
                .cloned(),
        );
        RawExtension { cards, data }
    }

    /// A data-less primary extension carrying `header`.
    pub fn primary(header: &Header) -> Self {
        let structural = vec![
            Card::with_comment("SIMPLE", true, "conforms to FITS standard"),
            Card::with_comment("BITPIX", 8i64, "array data type"),
            Card::with_comment("NAXIS", 0i64, "number of array dimensions"),
            Card::new("EXTEND", true),
        ];
        RawExtension::new(structural, header, Vec::new())
    }

    pub fn name(&self) -> Option<&str> {
        self.cards
            .iter()
            .find(|c| c.keyword == "EXTNAME")
            .and_then(|c| c.value.as_ref())
            .and_then(Value::as_str)
    }

    /// Serialize header blocks followed by zero-padded data blocks.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(&serialize_header(&self.cards)?)?;
        if !self.data.is_empty() {
            out.write_all(&self.data)?;
            let padding = padded_byte_len(self.data.len()) - self.data.len();
            out.write_all(&vec![0u8; padding])?;
        }
        Ok(())
    }
}

/// Mandatory extension cards: XTENSION, BITPIX, NAXIS, NAXISn, PCOUNT, GCOUNT.
///
/// `naxes` is in header order (NAXIS1 first).
pub fn extension_cards(xtension: &str, bitpix: i64, naxes: &[usize], pcount: usize) -> Vec<Card> {
    let mut cards = Vec::with_capacity(5 + naxes.len());
    cards.push(Card::new("XTENSION", xtension));
    cards.push(Card::new("BITPIX", bitpix));
    cards.push(Card::new("NAXIS", naxes.len()));
    for (i, &dim) in naxes.iter().enumerate() {
        cards.push(Card::new(&format!("NAXIS{}", i + 1), dim));
    }
    cards.push(Card::new("PCOUNT", pcount));
    cards.push(Card::new("GCOUNT", 1i64));
    cards
}

/// Write a complete container: every extension in order.
pub fn write_hdus<W: Write>(hdus: &[RawExtension], out: &mut W) -> Result<()> {
    for hdu in hdus {
        hdu.write_to(out)?;
    }
    Ok(())
}
