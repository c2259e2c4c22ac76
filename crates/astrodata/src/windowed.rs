//! Block-by-block evaluation of a function over same-shaped units.
//!
//! The output shape is tiled with non-overlapping blocks, the last block
//! along each axis covering whatever remains. Blocks are processed strictly
//! in order and only one block of input is held in memory at a time.

use std::ops::Range;

use log::LevelFilter;

use crate::array::{DataType, ImageData};
use crate::error::{Error, Result};
use crate::fits::Header;
use crate::unit::{AuxObject, Unit};

/// Options for [`windowed_op`].
#[derive(Debug, Clone)]
pub struct WindowedConfig {
    /// Block shape, one entry per axis.
    pub block_shape: Vec<usize>,
    /// Output shape; defaults to the common shape of the inputs.
    pub shape: Option<Vec<usize>>,
    /// Output element type; defaults to that of the first input.
    pub dtype: Option<DataType>,
    pub with_uncertainty: bool,
    pub with_mask: bool,
    /// Most verbose level the executor and the block function should log at.
    pub log_level: LevelFilter,
}

impl WindowedConfig {
    pub fn new(block_shape: &[usize]) -> Self {
        WindowedConfig {
            block_shape: block_shape.to_vec(),
            shape: None,
            dtype: None,
            with_uncertainty: false,
            with_mask: false,
            log_level: LevelFilter::Warn,
        }
    }

    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.shape = Some(shape.to_vec());
        self
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_uncertainty(mut self, enabled: bool) -> Self {
        self.with_uncertainty = enabled;
        self
    }

    pub fn with_mask(mut self, enabled: bool) -> Self {
        self.with_mask = enabled;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }
}

/// Where the current block lies, handed to the block function.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub index: usize,
    pub count: usize,
    /// Block extent along each axis.
    pub ranges: Vec<Range<usize>>,
    pub log_level: LevelFilter,
}

impl BlockContext {
    /// `true` if messages at `level` should be emitted.
    pub fn enabled(&self, level: log::Level) -> bool {
        level <= self.log_level
    }
}

/// The block of one input unit.
#[derive(Debug, Clone)]
pub struct Window {
    pub data: ImageData,
    pub uncertainty: Option<ImageData>,
    pub mask: Option<ImageData>,
}

/// Result of the block function for one block.
#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub data: ImageData,
    pub uncertainty: Option<ImageData>,
    pub mask: Option<ImageData>,
    /// Per-block auxiliary arrays, stitched into full-shape arrays by name.
    pub aux: Vec<(String, ImageData)>,
}

impl BlockOutput {
    pub fn new(data: ImageData) -> Self {
        BlockOutput {
            data,
            uncertainty: None,
            mask: None,
            aux: Vec::new(),
        }
    }

    pub fn with_aux(mut self, name: &str, data: ImageData) -> Self {
        self.aux.push((name.to_string(), data));
        self
    }
}

/// Blocks of `block_shape` covering `shape`, first axis slowest.
pub fn blocks(shape: &[usize], block_shape: &[usize]) -> Result<Vec<Vec<Range<usize>>>> {
    if shape.len() != block_shape.len() {
        return Err(Error::type_mismatch(format!(
            "incompatible shape {shape:?} and block shape {block_shape:?}"
        )));
    }
    if block_shape.contains(&0) {
        return Err(Error::InvalidValue("block sizes must be positive"));
    }
    let ticks: Vec<Vec<Range<usize>>> = shape
        .iter()
        .zip(block_shape)
        .map(|(&len, &step)| (0..len).step_by(step).map(|s| s..(s + step).min(len)).collect())
        .collect();
    Ok(ticks.iter().fold(vec![Vec::new()], |acc, axis| {
        acc.iter()
            .flat_map(|prefix| {
                axis.iter().map(move |r| {
                    let mut block = prefix.clone();
                    block.push(r.clone());
                    block
                })
            })
            .collect()
    }))
}

fn common_shape(inputs: &[&Unit]) -> Result<Vec<usize>> {
    let first = inputs[0].shape();
    if inputs.iter().any(|u| u.shape() != first) {
        return Err(Error::type_mismatch(
            "can't calculate final shape: inputs disagree on shape, and none was provided",
        ));
    }
    Ok(first.to_vec())
}

/// Apply `func` block by block over `inputs` and assemble a new unit.
///
/// The result takes its name, version, metadata record and transform from
/// the first input and carries no auxiliary objects except those the block
/// function emits.
pub fn windowed_op<F>(mut func: F, inputs: &[&Unit], config: &WindowedConfig) -> Result<Unit>
where
    F: FnMut(&[Window], &BlockContext) -> Result<BlockOutput>,
{
    let first = inputs
        .first()
        .ok_or_else(|| Error::type_mismatch("windowed operation needs at least one input"))?;
    let shape = match &config.shape {
        Some(shape) => shape.clone(),
        None => common_shape(inputs)?,
    };
    let dtype = config.dtype.unwrap_or_else(|| first.data.dtype());
    let boxes = blocks(&shape, &config.block_shape)?;

    let mut data = ImageData::zeros(dtype, &shape);
    let mut uncertainty = config.with_uncertainty.then(|| ImageData::zeros(dtype, &shape));
    let mut mask = config.with_mask.then(|| ImageData::zeros(DataType::U16, &shape));
    let mut aux: Vec<(String, ImageData)> = Vec::new();

    for (index, ranges) in boxes.iter().enumerate() {
        if config.log_level >= LevelFilter::Debug {
            log::debug!("block {}/{}: {ranges:?}", index + 1, boxes.len());
        }
        let windows = inputs
            .iter()
            .map(|unit| {
                Ok(Window {
                    data: unit.data.section(ranges)?,
                    uncertainty: unit.uncertainty().map(|u| u.section(ranges)).transpose()?,
                    mask: unit.mask().map(|m| m.section(ranges)).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let context = BlockContext {
            index,
            count: boxes.len(),
            ranges: ranges.clone(),
            log_level: config.log_level,
        };
        let out = func(&windows, &context)?;

        data.assign_section(ranges, &out.data)?;
        if let (Some(dst), Some(src)) = (&mut uncertainty, &out.uncertainty) {
            dst.assign_section(ranges, src)?;
        }
        if let (Some(dst), Some(src)) = (&mut mask, &out.mask) {
            dst.assign_section(ranges, src)?;
        }
        for (name, block) in out.aux {
            if boxes.len() == 1 {
                aux.push((name, block));
                continue;
            }
            let position = match aux.iter().position(|(n, _)| *n == name) {
                Some(position) => position,
                None => {
                    aux.push((name, ImageData::zeros(block.dtype(), &shape)));
                    aux.len() - 1
                }
            };
            aux[position].1.assign_section(ranges, &block)?;
        }
        // Block inputs are released here, before the next block is read.
        drop(windows);
    }

    let mut result = Unit::new(&first.name, first.version, data, first.header.clone());
    result.wcs = first.wcs.clone();
    if let Some(variance) = uncertainty {
        result.set_uncertainty(variance)?;
    }
    if let Some(mask) = mask {
        result.set_mask(mask)?;
    }
    for (name, data) in aux {
        let mut header = Header::new();
        header.set("EXTNAME", name.as_str(), None)?;
        result.set_aux(
            &name,
            AuxObject::Array {
                data,
                header: Some(header),
            },
        )?;
    }
    Ok(result)
}
