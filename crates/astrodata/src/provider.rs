//! The container provider: primary metadata, units and container tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::array::{ImageData, Operator};
use crate::error::{Error, Result};
use crate::fits::Header;
use crate::headers::HeaderCollection;
use crate::lazy::PixelArray;
use crate::selector::Selector;
use crate::table::Table;
use crate::unit::{is_object_name, AuxObject, Unit, DEFAULT_NAME, DQ_NAME, VAR_NAME};
use crate::view::{View, ViewMut};
use crate::wcs::codec::WCS_EXTNAME;
use crate::wcs::Transform;

/// An array to append, with the metadata and transform that travel with it.
#[derive(Debug, Clone)]
pub struct ArrayPayload {
    pub data: PixelArray,
    pub header: Option<Header>,
    pub wcs: Option<Transform>,
}

impl ArrayPayload {
    pub fn new(data: impl Into<PixelArray>) -> Self {
        ArrayPayload {
            data: data.into(),
            header: None,
            wcs: None,
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_wcs(mut self, wcs: Transform) -> Self {
        self.wcs = Some(wcs);
        self
    }
}

/// Anything that can be appended to a provider.
#[derive(Debug, Clone)]
pub enum Payload {
    Array(ArrayPayload),
    Table(Table),
    Transform(Transform),
}

impl From<ArrayPayload> for Payload {
    fn from(p: ArrayPayload) -> Self {
        Payload::Array(p)
    }
}

impl From<ImageData> for Payload {
    fn from(data: ImageData) -> Self {
        Payload::Array(ArrayPayload::new(data))
    }
}

impl From<PixelArray> for Payload {
    fn from(data: PixelArray) -> Self {
        Payload::Array(ArrayPayload::new(data))
    }
}

impl From<Table> for Payload {
    fn from(table: Table) -> Self {
        Payload::Table(table)
    }
}

impl From<Transform> for Payload {
    fn from(wcs: Transform) -> Self {
        Payload::Transform(wcs)
    }
}

/// Options for [`Provider::append`].
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Role or object name. New units default to `SCI`.
    pub name: Option<String>,
    /// Explicit version for a new unit; the next free version otherwise.
    pub version: Option<i64>,
    /// Index of the unit to attach the payload to.
    pub add_to: Option<usize>,
}

impl AppendOptions {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_add_to(mut self, index: usize) -> Self {
        self.add_to = Some(index);
        self
    }
}

/// Where an appended payload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// A new unit at this index.
    Unit(usize),
    Uncertainty,
    Mask,
    Transform,
    Aux(String),
    /// A container-level table.
    Table(String),
}

/// An object found by name through [`Provider::lookup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Found<'a> {
    Table(&'a Table),
    Aux(&'a AuxObject),
}

/// An in-memory container.
///
/// Units are kept in display and write order; each `(name, version)` pair
/// occurs once.
#[derive(Debug, Clone, Default)]
pub struct Provider {
    phu: Header,
    units: Vec<Unit>,
    tables: BTreeMap<String, Table>,
    path: Option<PathBuf>,
    orig_filename: Option<String>,
}

impl Provider {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty container with the given primary metadata.
    pub fn with_phu(phu: Header) -> Self {
        Provider {
            phu,
            ..Self::default()
        }
    }

    pub fn phu(&self) -> &Header {
        &self.phu
    }

    pub fn phu_mut(&mut self) -> &mut Header {
        &mut self.phu
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the file this container belongs to. The first path set also
    /// becomes the original file name.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.orig_filename.is_none() {
            self.orig_filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
        }
        self.path = Some(path);
    }

    pub fn orig_filename(&self) -> Option<&str> {
        self.orig_filename.as_deref()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub fn unit_mut(&mut self, index: usize) -> Option<&mut Unit> {
        self.units.get_mut(index)
    }

    fn unit_at(&mut self, index: usize) -> Result<&mut Unit> {
        let len = self.units.len();
        self.units.get_mut(index).ok_or(Error::IndexOutOfRange {
            index: index as isize,
            len,
        })
    }

    fn next_version(&self, name: &str) -> i64 {
        self.units
            .iter()
            .filter(|u| u.name == name)
            .map(|u| u.version)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Add a payload as a new unit, a unit member or a container table.
    ///
    /// With `add_to`, arrays named `VAR` become the unit's uncertainty, `DQ`
    /// its mask and any other name an auxiliary object; transforms become
    /// the unit's transform. Without it, arrays create a new unit and
    /// tables are stored at container level. Role arrays (`VAR`, `DQ`,
    /// `WCS`) and transforms cannot stand alone.
    pub fn append(
        &mut self,
        payload: impl Into<Payload>,
        options: AppendOptions,
    ) -> Result<Appended> {
        let payload = payload.into();
        match options.add_to {
            Some(index) => self.add_to_unit(index, payload, options.name.as_deref()),
            None => self.add_standalone(payload, options.name.as_deref(), options.version),
        }
    }

    fn add_to_unit(
        &mut self,
        index: usize,
        payload: Payload,
        name: Option<&str>,
    ) -> Result<Appended> {
        let unit = self.unit_at(index)?;
        let required_name = || name.ok_or_else(|| Error::type_mismatch("unit members need a name"));
        match payload {
            Payload::Transform(wcs) => {
                unit.wcs = Some(wcs);
                Ok(Appended::Transform)
            }
            Payload::Array(array) => match required_name()? {
                VAR_NAME => unit.set_uncertainty(array.data).map(|_| Appended::Uncertainty),
                DQ_NAME => unit.set_mask(array.data).map(|_| Appended::Mask),
                DEFAULT_NAME | WCS_EXTNAME => Err(Error::type_mismatch(format!(
                    "an array cannot be attached to a unit as {}",
                    name.unwrap_or_default()
                ))),
                other => {
                    let object = AuxObject::Array {
                        data: array.data.to_data()?,
                        header: array.header,
                    };
                    unit.set_aux(other, object)?;
                    Ok(Appended::Aux(other.to_string()))
                }
            },
            Payload::Table(table) => {
                let name = required_name()?;
                unit.set_aux(name, table)?;
                Ok(Appended::Aux(name.to_string()))
            }
        }
    }

    fn add_standalone(
        &mut self,
        payload: Payload,
        name: Option<&str>,
        version: Option<i64>,
    ) -> Result<Appended> {
        match payload {
            Payload::Transform(_) => Err(Error::type_mismatch(
                "a transform can only be attached to a unit's primary array",
            )),
            Payload::Table(table) => {
                let name =
                    name.ok_or_else(|| Error::type_mismatch("container tables need a name"))?;
                self.set_table(name, table)?;
                Ok(Appended::Table(name.to_string()))
            }
            Payload::Array(array) => {
                let name = name.unwrap_or(DEFAULT_NAME);
                if matches!(name, VAR_NAME | DQ_NAME | WCS_EXTNAME) {
                    return Err(Error::type_mismatch(format!(
                        "{name} arrays must be attached to an existing unit"
                    )));
                }
                let version = match version {
                    Some(v) if self.units.iter().any(|u| u.name == name && u.version == v) => {
                        return Err(Error::structural(format!("{name} version {v} already exists")));
                    }
                    Some(v) => v,
                    None => self.next_version(name),
                };
                let mut header = array.header.unwrap_or_default();
                header.strip_structural();
                let mut unit = Unit::new(name, version, array.data, header);
                unit.wcs = array.wcs;
                self.units.push(unit);
                Ok(Appended::Unit(self.units.len() - 1))
            }
        }
    }

    /// Remove and return the unit at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Unit> {
        self.unit_at(index)?;
        Ok(self.units.remove(index))
    }

    /// Inclusive crop `[y1..=y2, x1..=x2]` of every unit.
    pub fn crop(&mut self, x1: usize, y1: usize, x2: usize, y2: usize) -> Result<()> {
        let all: Vec<usize> = (0..self.units.len()).collect();
        self.crop_units(&all, x1, y1, x2, y2)
    }

    pub(crate) fn crop_units(
        &mut self,
        indices: &[usize],
        x1: usize,
        y1: usize,
        x2: usize,
        y2: usize,
    ) -> Result<()> {
        for &i in indices {
            self.unit_at(i)?.crop(x1, y1, x2, y2)?;
        }
        Ok(())
    }

    /// Combine every unit with a scalar.
    pub fn apply_scalar(&mut self, op: Operator, operand: f64) -> Result<&mut Self> {
        let all: Vec<usize> = (0..self.units.len()).collect();
        self.apply_scalar_units(&all, op, operand)?;
        Ok(self)
    }

    pub(crate) fn apply_scalar_units(
        &mut self,
        indices: &[usize],
        op: Operator,
        operand: f64,
    ) -> Result<()> {
        for &i in indices {
            self.unit_at(i)?.apply_scalar(op, operand)?;
        }
        Ok(())
    }

    pub fn add(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Add, operand)
    }

    pub fn subtract(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Subtract, operand)
    }

    pub fn multiply(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Multiply, operand)
    }

    pub fn divide(&mut self, operand: f64) -> Result<&mut Self> {
        self.apply_scalar(Operator::Divide, operand)
    }

    // ── Container tables ──

    /// Store `table` under `name`, replacing any table of that name.
    pub fn set_table(&mut self, name: &str, table: Table) -> Result<()> {
        if !is_object_name(name) {
            return Err(Error::InvalidValue("table names must be upper case"));
        }
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn delete_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Container tables, sorted by name.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Names reachable through [`lookup`](Self::lookup) at container level.
    pub fn exposed(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    /// A container table by name, else the first auxiliary object of that
    /// name on any unit.
    pub fn lookup(&self, name: &str) -> Result<Found<'_>> {
        let all: Vec<usize> = (0..self.units.len()).collect();
        self.lookup_in(&all, name)
    }

    pub(crate) fn lookup_in(&self, indices: &[usize], name: &str) -> Result<Found<'_>> {
        if let Some(table) = self.tables.get(name) {
            return Ok(Found::Table(table));
        }
        indices
            .iter()
            .filter_map(|&i| self.units.get(i))
            .find_map(|u| u.aux(name))
            .map(Found::Aux)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    // ── Metadata ──

    /// Shared access to the metadata record of every unit.
    pub fn hdr(&self) -> HeaderCollection<&Header> {
        HeaderCollection::new(self.units.iter().map(|u| &u.header).collect())
    }

    pub fn hdr_mut(&mut self) -> HeaderCollection<&mut Header> {
        HeaderCollection::new(self.units.iter_mut().map(|u| &mut u.header).collect())
    }

    pub(crate) fn headers_mut(&mut self, indices: &[usize]) -> Vec<&mut Header> {
        let mut slots: Vec<Option<&mut Header>> =
            self.units.iter_mut().map(|u| Some(&mut u.header)).collect();
        indices
            .iter()
            .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
            .collect()
    }

    // ── Views ──

    pub(crate) fn unit_keys(&self, indices: &[usize]) -> Vec<(&str, i64)> {
        indices
            .iter()
            .filter_map(|&i| self.units.get(i))
            .map(|u| (u.name.as_str(), u.version))
            .collect()
    }

    /// A view of the selected units.
    pub fn view(&self, selector: impl Into<Selector>) -> Result<View<'_>> {
        let all: Vec<usize> = (0..self.units.len()).collect();
        let (indices, single) = selector.into().resolve(&self.unit_keys(&all))?;
        Ok(View::new(self, indices, single))
    }

    /// A mutable view of the selected units.
    pub fn view_mut(&mut self, selector: impl Into<Selector>) -> Result<ViewMut<'_>> {
        let all: Vec<usize> = (0..self.units.len()).collect();
        let (indices, single) = selector.into().resolve(&self.unit_keys(&all))?;
        Ok(ViewMut::new(self, indices, single))
    }

    /// Views of each unit in order.
    pub fn iter(&self) -> impl Iterator<Item = View<'_>> {
        (0..self.units.len()).map(move |i| View::new(self, vec![i], true))
    }
}
