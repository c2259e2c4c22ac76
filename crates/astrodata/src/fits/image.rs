//! Image pixel codecs: raw big-endian storage ⇄ typed arrays, with
//! BSCALE/BZERO rescaling.

use std::ops::Range;

use crate::array::{DataType, ImageData};
use crate::error::{Error, Result};
use crate::fits::hdu::{extension_cards, RawExtension};
use crate::fits::header::{Card, Header};

/// The two-parameter affine rescale `physical = raw * bscale + bzero`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub bscale: f64,
    pub bzero: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Scaling {
            bscale: 1.0,
            bzero: 0.0,
        }
    }
}

impl Scaling {
    /// Read BSCALE/BZERO from a header, defaulting to the identity.
    pub fn from_header(header: &Header) -> Self {
        Scaling {
            bscale: header.get_float("BSCALE").unwrap_or(1.0),
            bzero: header.get_float("BZERO").unwrap_or(0.0),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.bscale == 1.0 && self.bzero == 0.0
    }

    /// The unsigned 16-bit convention: BITPIX 16 shifted by 32768.
    fn is_unsigned16(&self, bitpix: i64) -> bool {
        bitpix == 16 && self.bscale == 1.0 && self.bzero == 32768.0
    }
}

/// Element type an image materializes as once `scaling` is applied.
///
/// Masks are always unsigned 16-bit.
pub fn physical_dtype(bitpix: i64, scaling: Scaling, is_mask: bool) -> Result<DataType> {
    let stored = DataType::from_bitpix(bitpix)?;
    if is_mask {
        return Ok(DataType::U16);
    }
    if scaling.is_identity() {
        return Ok(stored);
    }
    if scaling.is_unsigned16(bitpix) {
        return Ok(DataType::U16);
    }
    Ok(match bitpix {
        8 | 16 | -32 => DataType::F32,
        _ => DataType::F64,
    })
}

fn rescale(stored: ImageData, scaling: Scaling, target: DataType) -> ImageData {
    if scaling.is_identity() {
        return stored.cast(target);
    }
    let physical = stored
        .to_f64()
        .mapv(|v| v * scaling.bscale + scaling.bzero);
    ImageData::F64(physical).cast(target)
}

/// Decode a complete image data segment.
///
/// `shape` is C-order (slowest axis first).
pub fn decode_image(
    raw: &[u8],
    bitpix: i64,
    shape: &[usize],
    scaling: Scaling,
    target: DataType,
) -> Result<ImageData> {
    let stored = ImageData::from_be_bytes(DataType::from_bitpix(bitpix)?, shape, raw)?;
    Ok(rescale(stored, scaling, target))
}

/// Decode the hyper-rectangle `ranges` (C-order, one per axis) of an image
/// data segment, touching only the bytes inside it.
pub fn decode_region(
    raw: &[u8],
    bitpix: i64,
    shape: &[usize],
    ranges: &[Range<usize>],
    scaling: Scaling,
    target: DataType,
) -> Result<ImageData> {
    let stored_type = DataType::from_bitpix(bitpix)?;
    let bpp = stored_type.size();
    let ndim = shape.len();
    if ranges.len() != ndim {
        return Err(Error::InvalidValue("section dimensionality differs from array"));
    }
    if ranges
        .iter()
        .zip(shape)
        .any(|(r, &dim)| r.start > r.end || r.end > dim)
    {
        return Err(Error::InvalidValue("section exceeds array bounds"));
    }
    let sub_shape: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
    let total: usize = sub_shape.iter().product();
    if ndim == 0 || total == 0 {
        return Ok(ImageData::zeros(target, &sub_shape));
    }

    // Row-major strides in elements; the last axis is contiguous.
    let mut strides = vec![1usize; ndim];
    for d in (0..ndim - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }

    let run = &ranges[ndim - 1];
    let run_bytes = (run.end - run.start) * bpp;
    let outer = &sub_shape[..ndim - 1];
    let n_runs: usize = outer.iter().product();

    let mut bytes = Vec::with_capacity(total * bpp);
    let mut idx = vec![0usize; ndim - 1];
    for _ in 0..n_runs {
        let mut flat = run.start;
        for (d, &i) in idx.iter().enumerate() {
            flat += (ranges[d].start + i) * strides[d];
        }
        let start = flat * bpp;
        let chunk = raw
            .get(start..start + run_bytes)
            .ok_or(Error::UnexpectedEof)?;
        bytes.extend_from_slice(chunk);

        // Advance the outer multi-index, last outer axis fastest.
        for d in (0..idx.len()).rev() {
            idx[d] += 1;
            if idx[d] < outer[d] {
                break;
            }
            idx[d] = 0;
        }
    }

    let stored = ImageData::from_be_bytes(stored_type, &sub_shape, &bytes)?;
    Ok(rescale(stored, scaling, target))
}

/// Encode an array into raw big-endian bytes plus the scaling cards its
/// element type needs (only `U16`, stored as signed with `BZERO = 32768`).
pub fn encode_image(data: &ImageData) -> (Vec<u8>, Vec<Card>) {
    match data {
        ImageData::U16(a) => {
            let shifted = ImageData::I16(a.mapv(|v| (v ^ 0x8000) as i16));
            let cards = vec![Card::new("BSCALE", 1i64), Card::new("BZERO", 32768i64)];
            (shifted.to_be_bytes(), cards)
        }
        other => (other.to_be_bytes(), Vec::new()),
    }
}

/// Build an image extension carrying `data` and the content of `header`.
pub fn image_extension(header: &Header, data: &ImageData) -> RawExtension {
    let naxes: Vec<usize> = data.shape().iter().rev().copied().collect();
    let (bytes, scaling_cards) = encode_image(data);
    let mut structural = extension_cards("IMAGE", data.dtype().bitpix(), &naxes, 0);
    structural.extend(scaling_cards);
    RawExtension::new(structural, header, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn be_i16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn dtype_rules() {
        let id = Scaling::default();
        let u16 = Scaling {
            bscale: 1.0,
            bzero: 32768.0,
        };
        let scaled = Scaling {
            bscale: 2.0,
            bzero: 10.0,
        };
        assert_eq!(physical_dtype(16, id, false).unwrap(), DataType::I16);
        assert_eq!(physical_dtype(16, u16, false).unwrap(), DataType::U16);
        assert_eq!(physical_dtype(8, scaled, false).unwrap(), DataType::F32);
        assert_eq!(physical_dtype(32, scaled, false).unwrap(), DataType::F64);
        assert_eq!(physical_dtype(-32, id, true).unwrap(), DataType::U16);
    }

    #[test]
    fn decode_applies_scaling() {
        let raw = be_i16(&[1, 2, 3, 4]);
        let scaling = Scaling {
            bscale: 2.0,
            bzero: 10.0,
        };
        let data = decode_image(&raw, 16, &[2, 2], scaling, DataType::F32).unwrap();
        assert_eq!(data, ImageData::F32(array![[12.0, 14.0], [16.0, 18.0]].into_dyn()));
    }

    #[test]
    fn unsigned16_round_trip() {
        let original = ImageData::U16(array![[0u16, 1], [32768, 65535]].into_dyn());
        let (raw, cards) = encode_image(&original);
        let scaling = Scaling::from_header(&Header::from_cards(cards));
        let dtype = physical_dtype(16, scaling, false).unwrap();
        let back = decode_image(&raw, 16, &[2, 2], scaling, dtype).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn region_matches_full_decode() {
        let full = Array2::from_shape_fn((5, 7), |(y, x)| (y * 10 + x) as i16).into_dyn();
        let raw = ImageData::I16(full.clone()).to_be_bytes();
        let ranges = [1..4, 2..6];
        let region =
            decode_region(&raw, 16, &[5, 7], &ranges, Scaling::default(), DataType::I16).unwrap();
        let expected = ImageData::I16(full).section(&ranges).unwrap();
        assert_eq!(region, expected);
    }

    #[test]
    fn region_out_of_bounds_fails() {
        let raw = vec![0u8; 8];
        assert!(decode_region(&raw, 16, &[2, 2], &[0..3, 0..1], Scaling::default(), DataType::I16)
            .is_err());
    }

    #[test]
    fn image_extension_reverses_axes() {
        let data = ImageData::F32(ndarray::ArrayD::zeros(ndarray::IxDyn(&[3, 4])));
        let ext = image_extension(&Header::new(), &data);
        let naxis1 = ext.cards.iter().find(|c| c.keyword == "NAXIS1").unwrap();
        assert_eq!(naxis1.value.as_ref().and_then(|v| v.as_int()), Some(4));
        assert_eq!(ext.data.len(), 48);
    }
}
