//! Write/read round trips of whole containers.
//!
//! Most tests work on in-memory byte buffers; the file-path tests use a
//! temporary directory to exercise memory-mapped, lazy reading.

use astrodata::fits::hdu::parse_hdus;
use astrodata::{
    from_bytes, open, open_with, to_bytes, write, AppendOptions, ArrayPayload, Column, ColumnData,
    DataType, Found, Frame, Header, ImageData, Model, Provider, ReadOptions, Table, Transform,
    WriteOptions,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ramp(rows: usize, cols: usize, offset: f32) -> ImageData {
    let values = (0..rows * cols).map(|i| i as f32 + offset).collect();
    ImageData::from_shape_vec(&[rows, cols], values).unwrap()
}

/// PRIMARY, SCI 1 with VAR and DQ, SCI 2.
fn sample() -> Provider {
    let mut p = Provider::new();
    p.phu_mut().set("OBJECT", "NGC 1300", None).unwrap();
    let mut header = Header::new();
    header.set("GAIN", 2.5, Some("electrons/ADU")).unwrap();
    p.append(
        ArrayPayload::new(ramp(4, 5, 0.0)).with_header(header),
        AppendOptions::default(),
    )
    .unwrap();
    let to_first = AppendOptions::default().with_add_to(0);
    p.append(ramp(4, 5, 100.0), to_first.clone().with_name("VAR"))
        .unwrap();
    p.append(ImageData::zeros(DataType::U16, &[4, 5]), to_first.with_name("DQ"))
        .unwrap();
    p.append(ramp(3, 3, 0.0), AppendOptions::default()).unwrap();
    p
}

fn layout(bytes: &[u8]) -> Vec<(Option<String>, Option<i64>)> {
    parse_hdus(bytes)
        .unwrap()
        .iter()
        .map(|h| (h.name().map(str::to_string), h.version()))
        .collect()
}

fn ext(name: &str, version: i64) -> (Option<String>, Option<i64>) {
    (Some(name.to_string()), Some(version))
}

fn sample_pixels(transform: &Transform) -> Vec<Vec<f64>> {
    [[0.0, 0.0], [3.0, 1.0], [7.5, 6.25], [-2.0, 9.0]]
        .iter()
        .map(|p| transform.evaluate(p).unwrap())
        .collect()
}

fn assert_close(a: &[Vec<f64>], b: &[Vec<f64>], tolerance: f64) {
    for (pa, pb) in a.iter().zip(b) {
        for (x, y) in pa.iter().zip(pb) {
            assert!((x - y).abs() <= tolerance, "{pa:?} != {pb:?}");
        }
    }
}

fn with_transform(wcs: Transform) -> Provider {
    let mut p = Provider::new();
    let payload = ArrayPayload::new(ImageData::zeros(DataType::F32, &[8, 10])).with_wcs(wcs);
    p.append(payload, AppendOptions::default()).unwrap();
    p
}

fn linear(frame: Frame) -> Transform {
    Transform::new(
        Frame::pixel(2),
        frame,
        vec![
            Model::Shift {
                offsets: vec![-4.5, -3.5],
            },
            Model::Affine {
                matrix: vec![vec![0.02, 0.001], vec![-0.001, 0.02]],
                translation: vec![1.0, -1.0],
            },
        ],
    )
}

fn distorted(frame: Frame) -> Transform {
    Transform::new(
        Frame::pixel(2),
        frame,
        vec![
            Model::Scale {
                factors: vec![0.5, 0.5],
            },
            Model::Polynomial2d {
                degree: 2,
                coeffs_x: vec![0.0, 1.0, 0.0, 1e-3, 0.0, 2e-4],
                coeffs_y: vec![0.0, 0.0, 1.0, 0.0, -5e-4, 0.0],
            },
        ],
    )
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[test]
fn mef_layout_survives_a_round_trip() {
    init_logging();
    let bytes = to_bytes(&sample()).unwrap();
    let expected = vec![
        (None, None),
        ext("SCI", 1),
        ext("VAR", 1),
        ext("DQ", 1),
        ext("SCI", 2),
    ];
    assert_eq!(layout(&bytes), expected);

    let p = from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(p.len(), 2);
    assert_eq!(p.phu().get_str("OBJECT"), Some("NGC 1300"));
    let first = p.unit(0).unwrap();
    assert_eq!(first.header.get_float("GAIN"), Some(2.5));
    assert_eq!(first.data.to_data().unwrap(), ramp(4, 5, 0.0));
    assert_eq!(first.uncertainty().unwrap().to_data().unwrap(), ramp(4, 5, 100.0));
    assert_eq!(first.mask().unwrap().dtype(), DataType::U16);
    assert_eq!(p.unit(1).unwrap().shape(), &[3, 3]);

    assert_eq!(layout(&to_bytes(&p).unwrap()), expected);
}

#[test]
fn tables_travel_with_their_owners() {
    let mut p = sample();
    let catalog = Table::from_columns(vec![
        Column::new("ID", ColumnData::I32(vec![1, 2, 3])),
        Column::new("FLUX", ColumnData::F64(vec![1.5, 2.5, 3.5])).with_unit("Jy"),
    ])
    .unwrap();
    let slits = Table::from_columns(vec![Column::new("SLITID", ColumnData::I16(vec![7]))]).unwrap();
    p.append(catalog, AppendOptions::default().with_name("OBJCAT").with_add_to(1))
        .unwrap();
    p.set_table("MDF", slits).unwrap();

    let bytes = to_bytes(&p).unwrap();
    let names: Vec<Option<String>> = layout(&bytes).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names.last().unwrap().as_deref(), Some("MDF"));

    let back = from_bytes(bytes, ReadOptions::default()).unwrap();
    assert!(back.unit(0).unwrap().aux("OBJCAT").is_none());
    let objcat = back.unit(1).unwrap().aux("OBJCAT").unwrap().as_table().unwrap();
    let flux = objcat.column("FLUX").unwrap();
    assert_eq!(flux.data, ColumnData::F64(vec![1.5, 2.5, 3.5]));
    assert_eq!(flux.unit.as_deref(), Some("Jy"));
    match back.lookup("MDF").unwrap() {
        Found::Table(t) => assert_eq!(t.column("SLITID").unwrap().data, ColumnData::I16(vec![7])),
        other => panic!("MDF should be a container table, got {other:?}"),
    }
}

#[test]
fn appends_number_versions_in_order() {
    let mut p = Provider::new();
    for _ in 0..3 {
        p.append(ramp(2, 2, 0.0), AppendOptions::default()).unwrap();
    }
    let versions: Vec<i64> = p.units().iter().map(|u| u.version).collect();
    assert_eq!(versions, [1, 2, 3]);
    p.remove(1).unwrap();
    p.append(ramp(2, 2, 0.0), AppendOptions::default()).unwrap();
    let versions: Vec<i64> = p.units().iter().map(|u| u.version).collect();
    assert_eq!(versions, [1, 3, 4]);
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

#[test]
fn linear_transform_round_trips_through_keywords() {
    let wcs = linear(Frame::new("world", &["u", "v"], &["mm", "mm"]));
    let bytes = to_bytes(&with_transform(wcs.clone())).unwrap();
    assert_eq!(layout(&bytes).len(), 2, "an exact transform needs no table");

    let p = from_bytes(bytes, ReadOptions::default()).unwrap();
    let unit = p.unit(0).unwrap();
    assert_eq!(unit.header.get_str("FITS-WCS"), Some("EXACT"));
    let back = unit.wcs.as_ref().unwrap();
    assert_eq!(back.input_frame, wcs.input_frame);
    assert_eq!(back.output_frame, wcs.output_frame);
    assert_close(&sample_pixels(back), &sample_pixels(&wcs), 1e-9);
}

#[test]
fn frame_metadata_keywords_cannot_hold_keeps_the_document() {
    init_logging();
    for frame in [
        Frame::new("focal", &["u", "v"], &["mm", "mm"]),
        Frame::new("world", &["u", "v"], &["Å", "Å"]),
    ] {
        let wcs = linear(frame);
        let bytes = to_bytes(&with_transform(wcs.clone())).unwrap();
        assert_eq!(layout(&bytes).last().unwrap(), &ext("WCS", 1));

        let p = from_bytes(bytes, ReadOptions::default()).unwrap();
        let unit = p.unit(0).unwrap();
        assert_eq!(unit.header.get_str("FITS-WCS"), Some("APPROXIMATE"));
        assert_eq!(unit.wcs.as_ref(), Some(&wcs));
    }
}

#[test]
fn celestial_transform_round_trips_through_keywords() {
    let wcs = Transform::new(
        Frame::pixel(2),
        Frame::new("icrs", &["lon", "lat"], &["deg", "deg"]),
        vec![
            Model::Affine {
                matrix: vec![vec![-1e-4, 0.0], vec![0.0, 1e-4]],
                translation: vec![4e-4, -3e-4],
            },
            Model::Gnomonic,
            Model::CelestialRotation {
                lon: 150.0,
                lat: 2.2,
                lon_pole: 180.0,
            },
        ],
    );
    let p = from_bytes(to_bytes(&with_transform(wcs.clone())).unwrap(), ReadOptions::default()).unwrap();
    let unit = p.unit(0).unwrap();
    assert_eq!(unit.header.get_str("CTYPE1"), Some("RA---TAN"));
    assert_close(&sample_pixels(unit.wcs.as_ref().unwrap()), &sample_pixels(&wcs), 1e-9);
}

#[test]
fn distorted_transform_travels_as_a_document() {
    init_logging();
    let wcs = distorted(Frame::new("focal", &["u", "v"], &["mm", "mm"]));
    let bytes = to_bytes(&with_transform(wcs.clone())).unwrap();
    assert_eq!(layout(&bytes).last().unwrap(), &ext("WCS", 1));

    let p = from_bytes(bytes, ReadOptions::default()).unwrap();
    let unit = p.unit(0).unwrap();
    assert_eq!(unit.header.get_str("FITS-WCS"), Some("APPROXIMATE"));
    assert_eq!(unit.wcs.as_ref(), Some(&wcs));
    assert!(unit.aux_names().next().is_none());
}

#[test]
fn non_ascii_document_uses_a_binary_table() {
    init_logging();
    let wcs = distorted(Frame::new("Détecteur", &["u", "v"], &["mm", "mm"]));
    let bytes = to_bytes(&with_transform(wcs.clone())).unwrap();
    let hdus = parse_hdus(&bytes).unwrap();
    let table = hdus.last().unwrap();
    assert_eq!(table.header.get_str("XTENSION").map(str::trim), Some("BINTABLE"));

    let p = from_bytes(bytes, ReadOptions::default()).unwrap();
    assert_eq!(p.unit(0).unwrap().wcs.as_ref(), Some(&wcs));
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[test]
fn files_open_lazily_and_record_their_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("N20240101S0001.fits");
    write(&sample(), &path, WriteOptions::default()).unwrap();

    let p = open(&path).unwrap();
    assert!(p.units().iter().all(|u| u.data.is_lazy()));
    assert_eq!(p.orig_filename(), Some("N20240101S0001.fits"));
    assert_eq!(p.phu().get_str("ORIGNAME"), Some("N20240101S0001.fits"));
    assert_eq!(p.unit(0).unwrap().data.to_data().unwrap(), ramp(4, 5, 0.0));

    let eager = open_with(&path, ReadOptions::default().with_memmap(false)).unwrap();
    assert!(eager.units().iter().all(|u| !u.data.is_lazy()));

    let copy = dir.path().join("processed.fits");
    write(&p, &copy, WriteOptions::default()).unwrap();
    let reopened = open(&copy).unwrap();
    assert_eq!(reopened.phu().get_str("ORIGNAME"), Some("N20240101S0001.fits"));
    assert_eq!(reopened.unit(1).unwrap().data.to_data().unwrap(), ramp(3, 3, 0.0));
}

#[test]
fn lazy_crop_matches_eager_crop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crop.fits");
    write(&sample(), &path, WriteOptions::default()).unwrap();

    let mut lazy = open(&path).unwrap();
    let mut eager = sample();
    lazy.crop(1, 1, 3, 2).unwrap();
    eager.crop(1, 1, 3, 2).unwrap();
    for (a, b) in lazy.units().iter().zip(eager.units()) {
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.data.to_data().unwrap(), b.data.to_data().unwrap());
    }
    assert_eq!(lazy.unit(0).unwrap().shape(), &[2, 3]);
}

#[test]
fn in_memory_containers_take_their_path_from_origname() {
    let mut p = sample();
    p.phu_mut().set("ORIGNAME", "raw.fits", None).unwrap();
    let back = from_bytes(to_bytes(&p).unwrap(), ReadOptions::default()).unwrap();
    assert_eq!(back.orig_filename(), Some("raw.fits"));
}
