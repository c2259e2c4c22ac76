//! Reading containers into a [`Provider`].
//!
//! Extensions are classified by `EXTNAME`/`EXTVER`. Every `SCI` extension
//! becomes a unit; extensions sharing its version become its uncertainty
//! (`VAR`), mask (`DQ`), transform (`WCS`) or auxiliary objects. Anything
//! left over becomes a container table or a unit of its own, or is
//! discarded with a warning when it cannot be appended.
//!
//! Arrays of memory-mapped files stay lazy; otherwise they are decoded
//! while reading.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fits::bintable::read_binary_table;
use crate::fits::hdu::parse_hdus;
use crate::fits::table::read_ascii_table;
use crate::fits::{Hdu, HduInfo, Header};
use crate::lazy::{LazyArray, PixelArray};
use crate::provider::{AppendOptions, Appended, ArrayPayload, Provider};
use crate::storage::Storage;
use crate::table::Table;
use crate::unit::{DEFAULT_NAME, DQ_NAME, VAR_NAME};
use crate::wcs::codec::{self, WCS_EXTNAME};
use crate::wcs::fitswcs::transform_from_header;
use crate::wcs::Transform;

/// Names that always become container tables.
const GLOBAL_TABLES: [&str; 2] = ["REFCAT", "MDF"];

/// Sort key version of extensions without one.
const UNVERSIONED: i64 = (1 << 32) - 1;

/// Options for reading a container.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Map files into memory and keep arrays lazy. When false, files are
    /// read fully and arrays decoded immediately.
    pub memmap: bool,
    /// Called on every extension header before classification.
    pub extname_parser: Option<fn(&mut Header)>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            memmap: true,
            extname_parser: None,
        }
    }
}

impl ReadOptions {
    pub fn with_memmap(mut self, memmap: bool) -> Self {
        self.memmap = memmap;
        self
    }

    pub fn with_extname_parser(mut self, parser: fn(&mut Header)) -> Self {
        self.extname_parser = Some(parser);
        self
    }
}

/// Read the container at `path` with default options.
pub fn open(path: impl AsRef<Path>) -> Result<Provider> {
    open_with(path, ReadOptions::default())
}

/// Read the container at `path`.
///
/// The primary metadata gains `ORIGNAME` unless it already has one.
pub fn open_with(path: impl AsRef<Path>, options: ReadOptions) -> Result<Provider> {
    let path = path.as_ref();
    let storage = Arc::new(Storage::open(path, options.memmap)?);
    let mut provider = Provider::new();
    provider.set_path(path);
    read_into(&mut provider, storage, options)?;
    Ok(provider)
}

/// Read a container held in memory. Arrays are decoded immediately.
pub fn from_bytes(bytes: Vec<u8>, options: ReadOptions) -> Result<Provider> {
    let mut provider = Provider::new();
    read_into(&mut provider, Arc::new(Storage::from(bytes)), options)?;
    if let Some(origname) = provider.phu().get_str("ORIGNAME").map(str::to_string) {
        provider.set_path(origname);
    }
    Ok(provider)
}

/// An extension together with the name and version it was classified under.
struct Entry {
    hdu: Hdu,
    name: Option<String>,
    version: Option<i64>,
}

impl Entry {
    fn new(hdu: Hdu) -> Self {
        let name = hdu.name().map(str::to_string);
        let version = hdu.version().filter(|&v| v != -1);
        Entry { hdu, name, version }
    }

    /// Primary first, then by version with `SCI` first and unnamed last.
    fn sort_key(&self) -> (i64, String) {
        if self.hdu.is_primary() {
            return (-1, String::new());
        }
        let name = match self.name.as_deref() {
            None => "zzzz".to_string(),
            Some(DEFAULT_NAME) => DEFAULT_NAME.to_string(),
            Some(other) => format!("z{other}"),
        };
        (self.version.unwrap_or(UNVERSIONED), name)
    }
}

fn stamp_origname(phu: &mut Header, orig_filename: Option<&str>) -> Result<()> {
    match orig_filename {
        Some(name) if !phu.contains("ORIGNAME") => {
            phu.set("ORIGNAME", name, Some("Original filename prior to processing"))
        }
        _ => Ok(()),
    }
}

fn content_header(hdu: &Hdu) -> Header {
    let mut header = hdu.header.clone();
    header.strip_structural();
    header
}

/// The array of `hdu`, lazy when the storage is mapped.
fn pixels(storage: &Arc<Storage>, hdu: &Hdu, is_mask: bool) -> Result<PixelArray> {
    let lazy = LazyArray::new(Arc::clone(storage), hdu, is_mask)?;
    if storage.is_mapped() {
        Ok(PixelArray::Lazy(lazy))
    } else {
        lazy.data().map(PixelArray::Loaded)
    }
}

fn read_table(bytes: &[u8], hdu: &Hdu) -> Result<Table> {
    let raw = hdu.data(bytes)?;
    match hdu.info {
        HduInfo::AsciiTable { .. } => read_ascii_table(raw, hdu),
        HduInfo::BinaryTable { .. } => read_binary_table(raw, hdu),
        _ => Err(Error::type_mismatch("extension is not a table")),
    }
}

/// Derive a transform from header keywords, keeping only type mismatches
/// as errors.
fn derive_transform(header: &Header, naxes: usize) -> Result<Option<Transform>> {
    match transform_from_header(header, naxes) {
        Ok(wcs) => Ok(wcs),
        Err(err @ Error::TypeMismatch(_)) => Err(err),
        Err(err) => {
            log::debug!("no transform derived from header keywords: {err}");
            Ok(None)
        }
    }
}

fn read_into(provider: &mut Provider, storage: Arc<Storage>, options: ReadOptions) -> Result<()> {
    let mut hdus = parse_hdus(storage.bytes())?;
    if let Some(parser) = options.extname_parser {
        for hdu in &mut hdus {
            parser(&mut hdu.header);
        }
    }

    let multi = hdus.len() > 1 || hdus.first().is_some_and(|h| !h.has_data());
    if multi {
        read_multi(provider, &storage, hdus)
    } else {
        read_single(provider, &storage, hdus)
    }
}

/// A bare primary array: the whole file becomes unit `SCI` version 1.
fn read_single(provider: &mut Provider, storage: &Arc<Storage>, hdus: Vec<Hdu>) -> Result<()> {
    let hdu = hdus
        .into_iter()
        .next()
        .ok_or_else(|| Error::structural("container has no extensions"))?;
    let header = content_header(&hdu);
    let mut phu = header.clone();
    stamp_origname(&mut phu, provider.orig_filename())?;
    *provider.phu_mut() = phu;

    let data = pixels(storage, &hdu, false)?;
    let wcs = derive_transform(&header, data.shape().len())?;
    let mut payload = ArrayPayload::new(data).with_header(header);
    payload.wcs = wcs;
    log::debug!("single-image container read as {DEFAULT_NAME} 1");
    provider.append(payload, AppendOptions::default().with_name(DEFAULT_NAME).with_version(1))?;
    Ok(())
}

fn read_multi(provider: &mut Provider, storage: &Arc<Storage>, hdus: Vec<Hdu>) -> Result<()> {
    let bytes = storage.bytes();
    let mut entries: Vec<Entry> = hdus.into_iter().map(Entry::new).collect();

    // Unclassified images join the units after the highest version seen.
    let mut highest = entries
        .iter()
        .filter(|e| e.name.is_some())
        .filter_map(|e| e.version)
        .max()
        .unwrap_or(0);
    for entry in &mut entries {
        if entry.name.is_some() && entry.version.is_some() {
            continue;
        }
        if matches!(entry.hdu.info, HduInfo::Image { .. }) {
            highest += 1;
            entry.name.get_or_insert_with(|| DEFAULT_NAME.to_string());
            entry.version.get_or_insert(highest);
        }
    }
    entries.sort_by_key(Entry::sort_key);

    let mut phu = content_header(&entries[0].hdu);
    stamp_origname(&mut phu, provider.orig_filename())?;
    *provider.phu_mut() = phu;
    let mut seen = vec![false; entries.len()];
    seen[0] = true;

    let sci: Vec<usize> = (1..entries.len())
        .filter(|&i| entries[i].name.as_deref() == Some(DEFAULT_NAME))
        .collect();
    for i in sci {
        seen[i] = true;
        let version = entries[i].version.unwrap_or(-1);
        let (mut uncertainty, mut mask, mut wcs_ext, mut others) = (None, None, None, Vec::new());
        for (j, entry) in entries.iter().enumerate() {
            let skip = entry
                .name
                .as_deref()
                .map_or(true, |n| n == DEFAULT_NAME || GLOBAL_TABLES.contains(&n));
            if seen[j] || skip || entry.version != Some(version) {
                continue;
            }
            seen[j] = true;
            match entry.name.as_deref() {
                Some(DQ_NAME) => mask = Some(j),
                Some(VAR_NAME) => uncertainty = Some(j),
                Some(WCS_EXTNAME) => wcs_ext = Some(j),
                _ => others.push(j),
            }
        }
        log::debug!(
            "{DEFAULT_NAME} {version}: uncertainty={} mask={} wcs={} others={}",
            uncertainty.is_some(),
            mask.is_some(),
            wcs_ext.is_some(),
            others.len()
        );

        let hdu = &entries[i].hdu;
        let data = pixels(storage, hdu, false)
            .map_err(|err| Error::structural(format!("{DEFAULT_NAME} {version}: {err}")))?;
        let header = content_header(hdu);
        let naxes = data.shape().len();

        let mut wcs = wcs_ext.and_then(|j| {
            let hdu = &entries[j].hdu;
            hdu.data(bytes).ok().and_then(|raw| codec::decode_extension(hdu, raw))
        });
        if wcs.is_none() {
            wcs = derive_transform(&header, naxes)?;
        }
        if wcs.is_none() {
            wcs = derive_transform(provider.phu(), naxes)?;
        }

        let mut payload = ArrayPayload::new(data).with_header(header);
        payload.wcs = wcs;
        let options = AppendOptions::default()
            .with_name(DEFAULT_NAME)
            .with_version(version);
        let index = match provider.append(payload, options)? {
            Appended::Unit(index) => index,
            _ => return Err(Error::structural("science array was not added as a unit")),
        };

        for (j, is_mask, role) in [(uncertainty, false, VAR_NAME), (mask, true, DQ_NAME)] {
            let Some(j) = j else { continue };
            let data = pixels(storage, &entries[j].hdu, is_mask)?;
            provider.append(data, AppendOptions::default().with_name(role).with_add_to(index))?;
        }

        for j in others {
            let entry = &entries[j];
            if let Err(err) = append_member(provider, storage, entry, index) {
                let name = entry.name.as_deref().unwrap_or_default();
                log::warn!("{err}. Discarding {name} {version}");
            }
        }
    }

    for (j, entry) in entries.iter().enumerate() {
        if seen[j] {
            continue;
        }
        let name = entry.name.as_deref().unwrap_or("<unnamed>");
        if let Err(err) = append_leftover(provider, storage, entry) {
            log::warn!("{err}. Discarding {name}");
        }
    }
    Ok(())
}

/// Attach an auxiliary extension to the unit at `index`.
fn append_member(
    provider: &mut Provider,
    storage: &Arc<Storage>,
    entry: &Entry,
    index: usize,
) -> Result<()> {
    let name = entry.name.as_deref().unwrap_or_default();
    let options = AppendOptions::default().with_name(name).with_add_to(index);
    if entry.hdu.is_table() {
        provider.append(read_table(storage.bytes(), &entry.hdu)?, options)?;
    } else {
        let data = pixels(storage, &entry.hdu, false)?;
        let payload = ArrayPayload::new(data).with_header(content_header(&entry.hdu));
        provider.append(payload, options)?;
    }
    Ok(())
}

/// Best-effort append of an extension that belongs to no unit.
fn append_leftover(provider: &mut Provider, storage: &Arc<Storage>, entry: &Entry) -> Result<()> {
    let name = entry
        .name
        .as_deref()
        .ok_or_else(|| Error::type_mismatch("extension has no name"))?;
    log::debug!("extension {name} {:?} belongs to no unit", entry.version);
    let mut options = AppendOptions::default().with_name(name);
    if entry.hdu.is_table() {
        provider.append(read_table(storage.bytes(), &entry.hdu)?, options)?;
    } else {
        if let Some(version) = entry.version {
            options = options.with_version(version);
        }
        let data = pixels(storage, &entry.hdu, name == DQ_NAME)?;
        let payload = ArrayPayload::new(data).with_header(content_header(&entry.hdu));
        provider.append(payload, options)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{DataType, ImageData};
    use crate::fits::hdu::{write_hdus, RawExtension};
    use crate::fits::image::image_extension;
    use crate::fits::Card;

    fn named(name: Option<&str>, version: Option<i64>) -> Header {
        let mut h = Header::new();
        if let Some(name) = name {
            h.set("EXTNAME", name, None).unwrap();
        }
        if let Some(version) = version {
            h.set("EXTVER", version, None).unwrap();
        }
        h
    }

    fn image(name: Option<&str>, version: Option<i64>) -> RawExtension {
        image_extension(&named(name, version), &ImageData::zeros(DataType::F32, &[3, 4]))
    }

    fn container(exts: Vec<RawExtension>) -> Vec<u8> {
        let mut all = vec![RawExtension::primary(&Header::new())];
        all.extend(exts);
        let mut bytes = Vec::new();
        write_hdus(&all, &mut bytes).unwrap();
        bytes
    }

    fn sci(version: i64) -> (String, i64) {
        (DEFAULT_NAME.to_string(), version)
    }

    fn keys(p: &Provider) -> Vec<(String, i64)> {
        p.units().iter().map(|u| (u.name.clone(), u.version)).collect()
    }

    #[test]
    fn sort_key_orders_science_first() {
        let bytes = container(vec![
            image(Some("VAR"), Some(2)),
            image(None, None),
            image(Some("SCI"), Some(2)),
            image(Some("SCI"), Some(1)),
        ]);
        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        assert_eq!(keys(&p), [sci(1), sci(2), sci(3)]);
        assert!(p.unit(1).unwrap().uncertainty().is_some());
        assert!(p.units().iter().all(|u| !u.data.is_lazy()));
    }

    #[test]
    fn orphans_are_discarded_with_a_warning() {
        let _ = env_logger::builder().is_test(true).try_init();
        let bytes = container(vec![image(Some("SCI"), Some(1)), image(Some("VAR"), Some(4))]);
        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        assert_eq!(keys(&p), [sci(1)]);
        assert!(p.unit(0).unwrap().uncertainty().is_none());
    }

    #[test]
    fn unattachable_members_are_discarded_with_a_warning() {
        let _ = env_logger::builder().is_test(true).try_init();
        let bytes = container(vec![
            image(Some("SCI"), Some(1)),
            image(Some("OBJ-MASK"), Some(1)),
            image(Some("ObjMask"), Some(1)),
            image(Some("OBJMASK"), Some(1)),
            image(Some("SCI"), Some(2)),
        ]);
        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        assert_eq!(keys(&p), [sci(1), sci(2)]);
        let names: Vec<&str> = p.unit(0).unwrap().aux_names().collect();
        assert_eq!(names, ["OBJMASK"]);
    }

    #[test]
    fn reserved_tables_stay_global() {
        use crate::fits::bintable::binary_table_extension;
        use crate::table::{Column, ColumnData};
        let mut refcat = Table::from_columns(vec![Column::new("RA", ColumnData::F64(vec![1.0]))]).unwrap();
        refcat.header = named(Some("REFCAT"), Some(1));
        let bytes = container(vec![image(Some("SCI"), Some(1)), binary_table_extension(&refcat)]);
        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        assert!(p.table("REFCAT").is_ok());
        assert_eq!(p.unit(0).unwrap().aux_names().count(), 0);
    }

    #[test]
    fn single_image_becomes_sci_1() {
        let data = ImageData::zeros(DataType::I16, &[5, 7]);
        let mut cards = vec![
            Card::new("SIMPLE", true),
            Card::new("BITPIX", 16i64),
            Card::new("NAXIS", 2i64),
            Card::new("NAXIS1", 7i64),
            Card::new("NAXIS2", 5i64),
            Card::new("EXTEND", true),
        ];
        cards.push(Card::new("OBJECT", "NGC 1"));
        let primary = RawExtension {
            cards,
            data: data.to_be_bytes(),
        };
        let mut bytes = Vec::new();
        write_hdus(&[primary], &mut bytes).unwrap();
        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        assert_eq!(keys(&p), [sci(1)]);
        assert_eq!(p.unit(0).unwrap().shape(), &[5, 7]);
        assert_eq!(p.phu().get_str("OBJECT"), Some("NGC 1"));
        assert!(!p.phu().contains("SIMPLE") && !p.phu().contains("NAXIS1"));
    }

    #[test]
    fn wcs_type_mismatch_is_fatal() {
        let mut header = named(Some("SCI"), Some(1));
        header.set("CRPIX1", "centre", None).unwrap();
        let ext = image_extension(&header, &ImageData::zeros(DataType::F32, &[2, 2]));
        let err = from_bytes(container(vec![ext]), ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn extname_parser_renames_before_classification() {
        fn rename(header: &mut Header) {
            if header.get_str("EXTNAME") == Some("RAW") {
                header.set("EXTNAME", "SCI", None).unwrap_or_default();
            }
        }
        let bytes = container(vec![image(Some("RAW"), Some(1))]);
        let options = ReadOptions::default().with_extname_parser(rename);
        let p = from_bytes(bytes, options).unwrap();
        assert_eq!(keys(&p), [sci(1)]);
    }
}
