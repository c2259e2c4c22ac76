//! Typed n-dimensional pixel arrays.
//!
//! Arrays are held in C order with the slowest axis first, so an image with
//! `NAXIS1 = 100` and `NAXIS2 = 50` has shape `[50, 100]` and is indexed `[y, x]`.

use std::fmt::Debug;
use std::ops::Range;

use bytemuck::pod_collect_to_vec;
use ndarray::{ArrayD, IxDyn, Slice};

use crate::error::{Error, Result};

/// Element type of a pixel array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    U8,
    I16,
    U16,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    /// BITPIX used to store this type. `U16` is stored as 16-bit signed with
    /// `BZERO = 32768`.
    pub fn bitpix(self) -> i64 {
        match self {
            DataType::U8 => 8,
            DataType::I16 | DataType::U16 => 16,
            DataType::I32 => 32,
            DataType::I64 => 64,
            DataType::F32 => -32,
            DataType::F64 => -64,
        }
    }

    /// The raw storage type for a BITPIX value, before any rescaling.
    pub fn from_bitpix(bitpix: i64) -> Result<Self> {
        match bitpix {
            8 => Ok(DataType::U8),
            16 => Ok(DataType::I16),
            32 => Ok(DataType::I32),
            64 => Ok(DataType::I64),
            -32 => Ok(DataType::F32),
            -64 => Ok(DataType::F64),
            other => Err(Error::InvalidBitpix(other)),
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }
}

/// Scalar types that can live in an [`ImageData`].
pub trait Pixel: bytemuck::Pod + PartialEq + Debug + Default + Send + Sync + 'static {
    const DTYPE: DataType;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    /// Swap between native and big-endian byte order (an involution).
    fn swap_be(self) -> Self;
    fn wrap(array: ArrayD<Self>) -> ImageData;
    fn unwrap(data: &ImageData) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_int_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const DTYPE: DataType = DataType::$variant;

            fn from_f64(v: f64) -> Self {
                // `as` saturates and maps NaN to zero.
                v.round() as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn swap_be(self) -> Self {
                <$t>::to_be(self)
            }

            fn wrap(array: ArrayD<Self>) -> ImageData {
                ImageData::$variant(array)
            }

            fn unwrap(data: &ImageData) -> Option<&ArrayD<Self>> {
                match data {
                    ImageData::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! impl_float_pixel {
    ($t:ty, $variant:ident) => {
        impl Pixel for $t {
            const DTYPE: DataType = DataType::$variant;

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn swap_be(self) -> Self {
                <$t>::from_bits(self.to_bits().to_be())
            }

            fn wrap(array: ArrayD<Self>) -> ImageData {
                ImageData::$variant(array)
            }

            fn unwrap(data: &ImageData) -> Option<&ArrayD<Self>> {
                match data {
                    ImageData::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

impl_int_pixel!(u8, U8);
impl_int_pixel!(i16, I16);
impl_int_pixel!(u16, U16);
impl_int_pixel!(i32, I32);
impl_int_pixel!(i64, I64);
impl_float_pixel!(f32, F32);
impl_float_pixel!(f64, F64);

/// A materialized pixel array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Run `$body` with `$a` bound to the inner array, whatever its element type.
macro_rules! with_array {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ImageData::U8($a) => $body,
            ImageData::I16($a) => $body,
            ImageData::U16($a) => $body,
            ImageData::I32($a) => $body,
            ImageData::I64($a) => $body,
            ImageData::F32($a) => $body,
            ImageData::F64($a) => $body,
        }
    };
}

/// Like `with_array!`, rewrapping the result in the same variant.
macro_rules! map_array {
    ($data:expr, $a:ident => $body:expr) => {
        match $data {
            ImageData::U8($a) => ImageData::U8($body),
            ImageData::I16($a) => ImageData::I16($body),
            ImageData::U16($a) => ImageData::U16($body),
            ImageData::I32($a) => ImageData::I32($body),
            ImageData::I64($a) => ImageData::I64($body),
            ImageData::F32($a) => ImageData::F32($body),
            ImageData::F64($a) => ImageData::F64($body),
        }
    };
}

/// Elementwise scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => lhs / rhs,
        }
    }
}

/// Row and column ranges of the inclusive crop `[y1..=y2, x1..=x2]` of a
/// 2-D `shape`, clamped to its bounds.
pub fn crop_ranges(
    shape: &[usize],
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
) -> Result<[Range<usize>; 2]> {
    if shape.len() != 2 {
        return Err(Error::type_mismatch(format!(
            "crop needs a 2-D array, got {} dimensions",
            shape.len()
        )));
    }
    let clamp = |lo: usize, hi: usize, dim: usize| {
        let end = hi.saturating_add(1).min(dim);
        lo.min(end)..end
    };
    Ok([clamp(y1, y2, shape[0]), clamp(x1, x2, shape[1])])
}

impl<T: Pixel> From<ArrayD<T>> for ImageData {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl ImageData {
    /// A zero-filled array.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Self {
        let shape = IxDyn(shape);
        match dtype {
            DataType::U8 => ImageData::U8(ArrayD::zeros(shape)),
            DataType::I16 => ImageData::I16(ArrayD::zeros(shape)),
            DataType::U16 => ImageData::U16(ArrayD::zeros(shape)),
            DataType::I32 => ImageData::I32(ArrayD::zeros(shape)),
            DataType::I64 => ImageData::I64(ArrayD::zeros(shape)),
            DataType::F32 => ImageData::F32(ArrayD::zeros(shape)),
            DataType::F64 => ImageData::F64(ArrayD::zeros(shape)),
        }
    }

    /// Build an array from flat C-order values.
    pub fn from_shape_vec<T: Pixel>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), values)
            .map(T::wrap)
            .map_err(|_| Error::InvalidValue("value count does not match shape"))
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ImageData::U8(_) => DataType::U8,
            ImageData::I16(_) => DataType::I16,
            ImageData::U16(_) => DataType::U16,
            ImageData::I32(_) => DataType::I32,
            ImageData::I64(_) => DataType::I64,
            ImageData::F32(_) => DataType::F32,
            ImageData::F64(_) => DataType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the inner array if it has element type `T`.
    pub fn as_array<T: Pixel>(&self) -> Option<&ArrayD<T>> {
        T::unwrap(self)
    }

    /// Copy of the values as 64-bit floats.
    pub fn to_f64(&self) -> ArrayD<f64> {
        with_array!(self, a => a.mapv(Pixel::to_f64))
    }

    /// Convert to another element type through `f64`.
    pub fn cast(&self, dtype: DataType) -> ImageData {
        if dtype == self.dtype() {
            return self.clone();
        }
        let values = self.to_f64();
        match dtype {
            DataType::U8 => ImageData::U8(values.mapv(u8::from_f64)),
            DataType::I16 => ImageData::I16(values.mapv(i16::from_f64)),
            DataType::U16 => ImageData::U16(values.mapv(u16::from_f64)),
            DataType::I32 => ImageData::I32(values.mapv(i32::from_f64)),
            DataType::I64 => ImageData::I64(values.mapv(i64::from_f64)),
            DataType::F32 => ImageData::F32(values.mapv(f32::from_f64)),
            DataType::F64 => ImageData::F64(values),
        }
    }

    fn check_ranges(&self, ranges: &[Range<usize>]) -> Result<()> {
        let shape = self.shape();
        if ranges.len() != shape.len() {
            return Err(Error::InvalidValue("section dimensionality differs from array"));
        }
        let fits = ranges
            .iter()
            .zip(shape)
            .all(|(r, &dim)| r.start <= r.end && r.end <= dim);
        if fits {
            Ok(())
        } else {
            Err(Error::InvalidValue("section exceeds array bounds"))
        }
    }

    /// Owned copy of the hyper-rectangle `ranges` (one range per axis).
    pub fn section(&self, ranges: &[Range<usize>]) -> Result<ImageData> {
        self.check_ranges(ranges)?;
        Ok(map_array!(self, a => a
            .slice_each_axis(|ax| Slice::from(ranges[ax.axis.index()].clone()))
            .to_owned()))
    }

    /// Overwrite the hyper-rectangle `ranges` with `src`, converting its
    /// element type if needed.
    pub fn assign_section(&mut self, ranges: &[Range<usize>], src: &ImageData) -> Result<()> {
        self.check_ranges(ranges)?;
        let expected: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
        if src.shape() != expected.as_slice() {
            return Err(Error::InvalidValue("section shape differs from source array"));
        }
        let src = src.cast(self.dtype());
        match (self, &src) {
            (ImageData::U8(dst), ImageData::U8(s)) => assign(dst, ranges, s),
            (ImageData::I16(dst), ImageData::I16(s)) => assign(dst, ranges, s),
            (ImageData::U16(dst), ImageData::U16(s)) => assign(dst, ranges, s),
            (ImageData::I32(dst), ImageData::I32(s)) => assign(dst, ranges, s),
            (ImageData::I64(dst), ImageData::I64(s)) => assign(dst, ranges, s),
            (ImageData::F32(dst), ImageData::F32(s)) => assign(dst, ranges, s),
            (ImageData::F64(dst), ImageData::F64(s)) => assign(dst, ranges, s),
            _ => return Err(Error::InvalidValue("section element type differs from array")),
        }
        Ok(())
    }

    /// Inclusive 2-D crop `[y1..=y2, x1..=x2]`, clamped to the array bounds.
    pub fn crop(&self, x1: usize, y1: usize, x2: usize, y2: usize) -> Result<ImageData> {
        self.section(&crop_ranges(self.shape(), x1, y1, x2, y2)?)
    }

    /// Apply `op` with a scalar right-hand side. Float arrays keep their type,
    /// integer arrays are promoted to `F64`.
    pub fn apply_scalar(&self, op: Operator, rhs: f64) -> ImageData {
        match self {
            ImageData::F32(a) => ImageData::F32(a.mapv(|v| op.apply(v as f64, rhs) as f32)),
            other => ImageData::F64(other.to_f64().mapv(|v| op.apply(v, rhs))),
        }
    }

    /// Big-endian bytes in C order, unpadded.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        with_array!(self, a => be_bytes(a))
    }

    /// Decode big-endian bytes of `dtype` into an array of `shape`.
    pub fn from_be_bytes(dtype: DataType, shape: &[usize], raw: &[u8]) -> Result<ImageData> {
        let count: usize = shape.iter().product();
        if raw.len() != count * dtype.size() {
            return Err(Error::UnexpectedEof);
        }
        match dtype {
            DataType::U8 => decode::<u8>(shape, raw),
            DataType::I16 => decode::<i16>(shape, raw),
            DataType::U16 => decode::<u16>(shape, raw),
            DataType::I32 => decode::<i32>(shape, raw),
            DataType::I64 => decode::<i64>(shape, raw),
            DataType::F32 => decode::<f32>(shape, raw),
            DataType::F64 => decode::<f64>(shape, raw),
        }
    }
}

fn assign<T: Pixel>(dst: &mut ArrayD<T>, ranges: &[Range<usize>], src: &ArrayD<T>) {
    dst.slice_each_axis_mut(|ax| Slice::from(ranges[ax.axis.index()].clone()))
        .assign(src);
}

fn be_bytes<T: Pixel>(array: &ArrayD<T>) -> Vec<u8> {
    let swapped: Vec<T> = array.iter().map(|v| v.swap_be()).collect();
    pod_collect_to_vec(&swapped)
}

fn decode<T: Pixel>(shape: &[usize], raw: &[u8]) -> Result<ImageData> {
    let mut values: Vec<T> = pod_collect_to_vec(raw);
    for v in &mut values {
        *v = v.swap_be();
    }
    ImageData::from_shape_vec(shape, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn ramp(ny: usize, nx: usize) -> ImageData {
        let a = Array2::from_shape_fn((ny, nx), |(y, x)| (y * nx + x) as f32);
        ImageData::F32(a.into_dyn())
    }

    #[test]
    fn bitpix_mapping() {
        assert_eq!(DataType::U16.bitpix(), 16);
        assert_eq!(DataType::from_bitpix(-64).unwrap(), DataType::F64);
        assert!(matches!(DataType::from_bitpix(12), Err(Error::InvalidBitpix(12))));
    }

    #[test]
    fn be_bytes_round_trip_every_type() {
        let cases = vec![
            ImageData::U8(array![1u8, 255].into_dyn()),
            ImageData::I16(array![-2i16, i16::MAX].into_dyn()),
            ImageData::U16(array![0u16, 65535].into_dyn()),
            ImageData::I32(array![i32::MIN, 7].into_dyn()),
            ImageData::I64(array![i64::MAX, -1].into_dyn()),
            ImageData::F32(array![1.5f32, -0.25].into_dyn()),
            ImageData::F64(array![1e200, -3.0].into_dyn()),
        ];
        for data in cases {
            let raw = data.to_be_bytes();
            let back = ImageData::from_be_bytes(data.dtype(), data.shape(), &raw).unwrap();
            assert_eq!(back, data);
        }
    }

    #[test]
    fn be_bytes_are_big_endian() {
        let data = ImageData::I16(array![0x0102i16].into_dyn());
        assert_eq!(data.to_be_bytes(), vec![0x01, 0x02]);
    }

    #[test]
    fn crop_is_inclusive() {
        let data = ramp(4, 5);
        let cropped = data.crop(1, 2, 3, 3).unwrap();
        assert_eq!(cropped.shape(), &[2, 3]);
        let a = cropped.as_array::<f32>().unwrap();
        assert_eq!(a[[0, 0]], 11.0);
        assert_eq!(a[[1, 2]], 18.0);
    }

    #[test]
    fn crop_requires_two_dimensions() {
        let data = ImageData::F64(array![1.0, 2.0].into_dyn());
        assert!(matches!(data.crop(0, 0, 1, 1), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn assign_section_casts_source() {
        let mut dst = ImageData::zeros(DataType::I32, &[2, 2]);
        let src = ImageData::F64(array![[2.6]].into_dyn());
        dst.assign_section(&[1..2, 0..1], &src).unwrap();
        assert_eq!(dst.as_array::<i32>().unwrap()[[1, 0]], 3);
    }

    #[test]
    fn assign_section_rejects_shape_mismatch() {
        let mut dst = ImageData::zeros(DataType::F32, &[2, 2]);
        let src = ImageData::zeros(DataType::F32, &[2, 1]);
        assert!(dst.assign_section(&[0..1, 0..2], &src).is_err());
    }

    #[test]
    fn section_out_of_bounds_fails() {
        assert!(ramp(2, 2).section(&[0..3, 0..1]).is_err());
    }

    #[test]
    fn scalar_ops_promote_integers() {
        let data = ImageData::I16(array![2i16, 4].into_dyn());
        let halved = data.apply_scalar(Operator::Divide, 4.0);
        assert_eq!(halved, ImageData::F64(array![0.5, 1.0].into_dyn()));
        let f = ImageData::F32(array![1.0f32].into_dyn()).apply_scalar(Operator::Add, 1.0);
        assert_eq!(f.dtype(), DataType::F32);
    }
}
