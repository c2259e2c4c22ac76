//! Writing a [`Provider`] back to a container.
//!
//! Extension order: primary metadata, then per unit its primary array,
//! uncertainty, mask, transform table and auxiliary objects, then container
//! tables sorted by name.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::fits::bintable::binary_table_extension;
use crate::fits::hdu::{write_hdus, RawExtension};
use crate::fits::image::image_extension;
use crate::fits::Header;
use crate::provider::Provider;
use crate::table::Table;
use crate::unit::{AuxObject, Unit, DQ_NAME, VAR_NAME};
use crate::wcs::codec;
use crate::wcs::fitswcs::{strip_basis_keywords, transform_to_header, Fidelity};

/// Options for writing a container to a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Replace an existing file instead of failing.
    pub overwrite: bool,
}

impl WriteOptions {
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// `header` with `EXTNAME`/`EXTVER` set first and any stale ones dropped.
fn named_header(header: &Header, name: &str, version: Option<i64>) -> Result<Header> {
    let mut named = Header::new();
    named.set("EXTNAME", name, None)?;
    if let Some(version) = version {
        named.set("EXTVER", version, None)?;
    }
    let mut content = header.clone();
    content.strip_structural();
    named.update(&content);
    Ok(named)
}

fn table_extension(table: &Table, name: &str, version: Option<i64>) -> Result<RawExtension> {
    let mut table = table.clone();
    table.header = named_header(&table.header, name, version)?;
    Ok(binary_table_extension(&table))
}

fn unit_extensions(unit: &Unit, out: &mut Vec<RawExtension>) -> Result<()> {
    let version = Some(unit.version);
    let mut header = unit.header.clone();
    let data = unit.data.to_data()?;

    let mut wcs_extension = None;
    if let Some(wcs) = &unit.wcs {
        let suppress = match transform_to_header(wcs, data.shape()) {
            Ok((keywords, fidelity)) => {
                strip_basis_keywords(&mut header);
                header.update(&keywords);
                fidelity == Fidelity::Exact
            }
            Err(err) => {
                log::warn!(
                    "{} {}: transform not written as FITS-WCS: {err}",
                    unit.name,
                    unit.version
                );
                false
            }
        };
        if !suppress {
            wcs_extension = Some(codec::encode(wcs, version)?);
        }
    }

    out.push(image_extension(&named_header(&header, &unit.name, version)?, &data));
    if let Some(variance) = unit.uncertainty() {
        out.push(image_extension(&named_header(&header, VAR_NAME, version)?, &variance.to_data()?));
    }
    if let Some(mask) = unit.mask() {
        out.push(image_extension(&named_header(&header, DQ_NAME, version)?, &mask.to_data()?));
    }
    out.extend(wcs_extension);

    for (name, object) in unit.aux_iter() {
        let ext = match object {
            AuxObject::Array { data, header: own } => {
                let base = own.as_ref().unwrap_or(&unit.header);
                image_extension(&named_header(base, name, version)?, data)
            }
            AuxObject::Table(table) => table_extension(table, name, version)?,
        };
        out.push(ext);
    }
    Ok(())
}

/// The ordered extension list of `provider`.
pub fn to_extensions(provider: &Provider) -> Result<Vec<RawExtension>> {
    let mut out = vec![RawExtension::primary(provider.phu())];
    for unit in provider.units() {
        unit_extensions(unit, &mut out)?;
    }
    for (name, table) in provider.tables() {
        out.push(table_extension(table, name, None)?);
    }
    Ok(out)
}

/// Serialize `provider` to container bytes.
pub fn to_bytes(provider: &Provider) -> Result<Vec<u8>> {
    let extensions = to_extensions(provider)?;
    let mut bytes = Vec::new();
    write_hdus(&extensions, &mut bytes)?;
    Ok(bytes)
}

/// Write `provider` to `path`.
///
/// Without `overwrite`, an existing file is an [`std::io::ErrorKind::AlreadyExists`]
/// error. Nothing is created when serialization fails; a failed write may
/// leave a partial file.
pub fn write(provider: &Provider, path: impl AsRef<Path>, options: WriteOptions) -> Result<()> {
    let extensions = to_extensions(provider)?;
    let file = if options.overwrite {
        OpenOptions::new().write(true).create(true).truncate(true).open(path)?
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)?
    };
    let mut out = BufWriter::new(file);
    write_hdus(&extensions, &mut out)?;
    out.flush()?;
    Ok(())
}
