//! A multi-extension FITS container model.
//!
//! A container file is read into a [`Provider`]: primary metadata, an ordered
//! list of [`Unit`]s (a primary array with optional uncertainty, mask,
//! coordinate transform and named auxiliary objects) and container-level
//! tables. Pixel arrays of files opened from a path stay lazy until used.
//! [`View`]s address subsets of units, [`windowed_op`] evaluates functions
//! block by block, and [`write`] turns a provider back into a container.

pub mod array;
pub mod descriptor;
pub mod error;
pub mod fits;
pub mod headers;
pub mod lazy;
pub mod provider;
pub mod reader;
pub mod selector;
pub mod storage;
pub mod table;
pub mod unit;
pub mod view;
pub mod wcs;
pub mod windowed;
pub mod writer;

pub use array::{DataType, ImageData, Operator};
pub use descriptor::{Descriptor, DescriptorValue, KeywordDescriptor, Tags};
pub use error::{Error, MissingKeyError, Result};
pub use fits::{Header, Value};
pub use headers::HeaderCollection;
pub use lazy::{LazyArray, PixelArray};
pub use provider::{AppendOptions, Appended, ArrayPayload, Found, Payload, Provider};
pub use reader::{from_bytes, open, open_with, ReadOptions};
pub use selector::Selector;
pub use table::{Column, ColumnData, Table};
pub use unit::{AuxObject, Unit};
pub use view::{View, ViewMut};
pub use wcs::{Frame, Model, Transform};
pub use windowed::{windowed_op, BlockContext, BlockOutput, Window, WindowedConfig};
pub use writer::{to_bytes, write, WriteOptions};
