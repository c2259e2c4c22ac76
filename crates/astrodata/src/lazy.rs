//! Deferred access to arrays held in backing storage.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::array::{crop_ranges, DataType, ImageData};
use crate::error::{Error, Result};
use crate::fits::image::{decode_image, decode_region, physical_dtype, Scaling};
use crate::fits::Hdu;
use crate::storage::Storage;

/// An image extension that has not been read yet.
///
/// Shape and element type are known up front; pixels are decoded and
/// rescaled only when [`data`](Self::data) or [`section`](Self::section) is
/// called. The handle keeps its storage alive.
#[derive(Clone)]
pub struct LazyArray {
    storage: Arc<Storage>,
    data_start: usize,
    data_len: usize,
    bitpix: i64,
    shape: Vec<usize>,
    scaling: Scaling,
    dtype: DataType,
}

impl LazyArray {
    /// Handle for the image data of `hdu`. Masks materialize as `U16`.
    pub fn new(storage: Arc<Storage>, hdu: &Hdu, is_mask: bool) -> Result<Self> {
        let (bitpix, shape) = hdu
            .image_layout()
            .ok_or_else(|| Error::type_mismatch("lazy arrays need an image extension"))?;
        let scaling = Scaling::from_header(&hdu.header);
        let dtype = physical_dtype(bitpix, scaling, is_mask)?;
        if hdu.data_start + hdu.data_len > storage.bytes().len() {
            return Err(Error::UnexpectedEof);
        }
        Ok(LazyArray {
            storage,
            data_start: hdu.data_start,
            data_len: hdu.data_len,
            bitpix,
            shape,
            scaling,
            dtype,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type after rescaling.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn scaling(&self) -> Scaling {
        self.scaling
    }

    fn raw(&self) -> Result<&[u8]> {
        self.storage
            .bytes()
            .get(self.data_start..self.data_start + self.data_len)
            .ok_or(Error::UnexpectedEof)
    }

    /// Read and rescale the whole array.
    pub fn data(&self) -> Result<ImageData> {
        decode_image(self.raw()?, self.bitpix, &self.shape, self.scaling, self.dtype)
    }

    /// Read and rescale only the hyper-rectangle `ranges`.
    pub fn section(&self, ranges: &[Range<usize>]) -> Result<ImageData> {
        decode_region(
            self.raw()?,
            self.bitpix,
            &self.shape,
            ranges,
            self.scaling,
            self.dtype,
        )
    }
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyArray")
            .field("data_start", &self.data_start)
            .field("bitpix", &self.bitpix)
            .field("shape", &self.shape)
            .field("scaling", &self.scaling)
            .field("dtype", &self.dtype)
            .finish()
    }
}

/// Pixel storage of a unit member: either materialized or lazy.
#[derive(Debug, Clone)]
pub enum PixelArray {
    Loaded(ImageData),
    Lazy(LazyArray),
}

impl PixelArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            PixelArray::Loaded(data) => data.shape(),
            PixelArray::Lazy(lazy) => lazy.shape(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            PixelArray::Loaded(data) => data.dtype(),
            PixelArray::Lazy(lazy) => lazy.dtype(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, PixelArray::Lazy(_))
    }

    /// The materialized array, if already loaded.
    pub fn as_loaded(&self) -> Option<&ImageData> {
        match self {
            PixelArray::Loaded(data) => Some(data),
            PixelArray::Lazy(_) => None,
        }
    }

    /// An owned copy of the full array, decoding it if still lazy.
    pub fn to_data(&self) -> Result<ImageData> {
        match self {
            PixelArray::Loaded(data) => Ok(data.clone()),
            PixelArray::Lazy(lazy) => lazy.data(),
        }
    }

    /// Replace a lazy handle by its decoded array and borrow it mutably.
    pub fn materialize(&mut self) -> Result<&mut ImageData> {
        if let PixelArray::Lazy(lazy) = self {
            *self = PixelArray::Loaded(lazy.data()?);
        }
        match self {
            PixelArray::Loaded(data) => Ok(data),
            PixelArray::Lazy(_) => Err(Error::structural("lazy array was not materialized")),
        }
    }

    /// Inclusive 2-D crop. A lazy array reads only the cropped rows.
    pub fn crop(&self, x1: usize, y1: usize, x2: usize, y2: usize) -> Result<PixelArray> {
        let ranges = crop_ranges(self.shape(), x1, y1, x2, y2)?;
        self.section(&ranges).map(PixelArray::Loaded)
    }

    /// The hyper-rectangle `ranges`, reading only that part of a lazy array.
    pub fn section(&self, ranges: &[Range<usize>]) -> Result<ImageData> {
        match self {
            PixelArray::Loaded(data) => data.section(ranges),
            PixelArray::Lazy(lazy) => lazy.section(ranges),
        }
    }
}

impl From<ImageData> for PixelArray {
    fn from(data: ImageData) -> Self {
        PixelArray::Loaded(data)
    }
}
