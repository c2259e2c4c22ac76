//! Units: a primary array bundled with its uncertainty, mask, transform,
//! metadata record and auxiliary objects.

use crate::array::{DataType, ImageData, Operator};
use crate::error::{Error, Result};
use crate::fits::Header;
use crate::lazy::PixelArray;
use crate::table::Table;
use crate::wcs::Transform;

/// Name of the primary-array role.
pub const DEFAULT_NAME: &str = "SCI";
/// Name of the uncertainty (variance) role.
pub const VAR_NAME: &str = "VAR";
/// Name of the mask role.
pub const DQ_NAME: &str = "DQ";

/// An auxiliary object attached to a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxObject {
    /// A pixel array, with its own metadata record when it had one on disk.
    Array {
        data: ImageData,
        header: Option<Header>,
    },
    Table(Table),
}

impl AuxObject {
    /// Shape of array objects. Tables have none.
    pub fn shape(&self) -> Option<&[usize]> {
        match self {
            AuxObject::Array { data, .. } => Some(data.shape()),
            AuxObject::Table(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&ImageData> {
        match self {
            AuxObject::Array { data, .. } => Some(data),
            AuxObject::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            AuxObject::Table(table) => Some(table),
            AuxObject::Array { .. } => None,
        }
    }
}

impl From<ImageData> for AuxObject {
    fn from(data: ImageData) -> Self {
        AuxObject::Array { data, header: None }
    }
}

impl From<Table> for AuxObject {
    fn from(table: Table) -> Self {
        AuxObject::Table(table)
    }
}

/// `true` for names usable for auxiliary objects and container tables:
/// upper-case letters, digits and underscores, starting with a letter.
pub fn is_object_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// One `(name, version)` unit of a container.
///
/// The primary array, uncertainty and mask always share one shape.
#[derive(Debug, Clone)]
pub struct Unit {
    pub name: String,
    pub version: i64,
    pub data: PixelArray,
    uncertainty: Option<PixelArray>,
    mask: Option<PixelArray>,
    pub wcs: Option<Transform>,
    pub header: Header,
    aux: Vec<(String, AuxObject)>,
}

impl Unit {
    pub fn new(name: &str, version: i64, data: impl Into<PixelArray>, header: Header) -> Self {
        Unit {
            name: name.to_string(),
            version,
            data: data.into(),
            uncertainty: None,
            mask: None,
            wcs: None,
            header,
            aux: Vec::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn check_shape(&self, role: &str, shape: &[usize]) -> Result<()> {
        if shape == self.shape() {
            Ok(())
        } else {
            Err(Error::type_mismatch(format!(
                "{role} shape {shape:?} differs from data shape {:?}",
                self.shape()
            )))
        }
    }

    /// The variance plane.
    pub fn uncertainty(&self) -> Option<&PixelArray> {
        self.uncertainty.as_ref()
    }

    pub fn set_uncertainty(&mut self, variance: impl Into<PixelArray>) -> Result<()> {
        let variance = variance.into();
        self.check_shape(VAR_NAME, variance.shape())?;
        self.uncertainty = Some(variance);
        Ok(())
    }

    pub fn take_uncertainty(&mut self) -> Option<PixelArray> {
        self.uncertainty.take()
    }

    pub fn mask(&self) -> Option<&PixelArray> {
        self.mask.as_ref()
    }

    /// Attach a mask. Loaded masks are converted to unsigned 16-bit.
    pub fn set_mask(&mut self, mask: impl Into<PixelArray>) -> Result<()> {
        let mask = match mask.into() {
            PixelArray::Loaded(data) => PixelArray::Loaded(data.cast(DataType::U16)),
            lazy => lazy,
        };
        self.check_shape(DQ_NAME, mask.shape())?;
        self.mask = Some(mask);
        Ok(())
    }

    pub fn take_mask(&mut self) -> Option<PixelArray> {
        self.mask.take()
    }

    pub fn aux(&self, name: &str) -> Option<&AuxObject> {
        self.aux.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn aux_mut(&mut self, name: &str) -> Option<&mut AuxObject> {
        self.aux.iter_mut().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    /// Auxiliary objects in insertion order.
    pub fn aux_iter(&self) -> impl Iterator<Item = (&str, &AuxObject)> {
        self.aux.iter().map(|(n, o)| (n.as_str(), o))
    }

    pub fn aux_names(&self) -> impl Iterator<Item = &str> {
        self.aux.iter().map(|(n, _)| n.as_str())
    }

    /// Store `object` under `name`, replacing an existing object in place.
    pub fn set_aux(&mut self, name: &str, object: impl Into<AuxObject>) -> Result<()> {
        if !is_object_name(name) {
            return Err(Error::InvalidValue("auxiliary names must be upper case"));
        }
        let object = object.into();
        match self.aux_mut(name) {
            Some(existing) => *existing = object,
            None => self.aux.push((name.to_string(), object)),
        }
        Ok(())
    }

    pub fn remove_aux(&mut self, name: &str) -> Result<AuxObject> {
        let index = self
            .aux
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(self.aux.remove(index).1)
    }

    /// Inclusive crop of the primary array, uncertainty, mask and every
    /// auxiliary array sharing the primary array's original shape.
    pub fn crop(&mut self, x1: usize, y1: usize, x2: usize, y2: usize) -> Result<()> {
        let original = self.shape().to_vec();
        self.data = self.data.crop(x1, y1, x2, y2)?;
        if let Some(variance) = &mut self.uncertainty {
            *variance = variance.crop(x1, y1, x2, y2)?;
        }
        if let Some(mask) = &mut self.mask {
            *mask = mask.crop(x1, y1, x2, y2)?;
        }
        for (_, object) in &mut self.aux {
            if let AuxObject::Array { data, .. } = object {
                if data.shape() == original.as_slice() {
                    *data = data.crop(x1, y1, x2, y2)?;
                }
            }
        }
        Ok(())
    }

    /// Combine the primary array with a scalar, propagating the variance.
    pub fn apply_scalar(&mut self, op: Operator, operand: f64) -> Result<()> {
        let data = self.data.materialize()?;
        *data = data.apply_scalar(op, operand);
        if let Some(variance) = &mut self.uncertainty {
            let factor = match op {
                Operator::Add | Operator::Subtract => None,
                Operator::Multiply => Some(operand * operand),
                Operator::Divide => Some(1.0 / (operand * operand)),
            };
            if let Some(factor) = factor {
                let variance = variance.materialize()?;
                *variance = variance.apply_scalar(Operator::Multiply, factor);
            }
        }
        Ok(())
    }
}
