//! Block-wise evaluation over in-memory and file-backed units.

use astrodata::{
    open, windowed_op, write, AppendOptions, ArrayPayload, BlockContext, BlockOutput, DataType,
    Frame, Header, ImageData, Model, Operator, Provider, Transform, Window, WindowedConfig,
    WriteOptions,
};
use log::LevelFilter;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ramp(rows: usize, cols: usize) -> ImageData {
    let values = (0..rows * cols).map(|i| i as f32).collect();
    ImageData::from_shape_vec(&[rows, cols], values).unwrap()
}

fn science(rows: usize, cols: usize) -> Provider {
    let mut header = Header::new();
    header.set("OBJECT", "flat", None).unwrap();
    let wcs = Transform::new(
        Frame::pixel(2),
        Frame::new("world", &["x", "y"], &["", ""]),
        vec![Model::Shift {
            offsets: vec![10.0, 20.0],
        }],
    );
    let mut p = Provider::new();
    let payload = ArrayPayload::new(ramp(rows, cols)).with_header(header).with_wcs(wcs);
    p.append(payload, AppendOptions::default()).unwrap();
    p.append(
        ImageData::zeros(DataType::F32, &[rows, cols]),
        AppendOptions::default().with_name("VAR").with_add_to(0),
    )
    .unwrap();
    p
}

fn identity(windows: &[Window], _: &BlockContext) -> astrodata::Result<BlockOutput> {
    Ok(BlockOutput::new(windows[0].data.clone()))
}

#[test]
fn identity_over_a_lazy_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.fits");
    write(&science(11, 7), &path, WriteOptions::default()).unwrap();
    let p = open(&path).unwrap();
    let unit = p.unit(0).unwrap();
    assert!(unit.data.is_lazy());

    let config = WindowedConfig::new(&[4, 3]).with_log_level(LevelFilter::Debug);
    let out = windowed_op(identity, &[unit], &config).unwrap();
    assert_eq!(out.data.to_data().unwrap(), ramp(11, 7));
    assert_eq!(out.header.get_str("OBJECT"), Some("flat"));
    assert_eq!(out.wcs, unit.wcs);
    assert!(out.uncertainty().is_none() && out.mask().is_none());
    assert!(out.aux_names().next().is_none());
}

#[test]
fn blocks_are_visited_in_order_and_cover_the_array() {
    let p = science(5, 5);
    let mut seen = Vec::new();
    let config = WindowedConfig::new(&[2, 5])
        .with_dtype(DataType::F64)
        .with_uncertainty(true)
        .with_mask(true);
    let out = windowed_op(
        |windows, ctx| {
            seen.push((ctx.index, ctx.ranges[0].clone()));
            assert_eq!(ctx.count, 3);
            assert!(!ctx.enabled(log::Level::Info));
            let window = &windows[0];
            let doubled = ImageData::F64(window.data.to_f64() * 2.0);
            let mut block = BlockOutput::new(doubled);
            block.uncertainty = window.uncertainty.clone();
            Ok(block)
        },
        &[p.unit(0).unwrap()],
        &config,
    )
    .unwrap();

    assert_eq!(seen, [(0, 0..2), (1, 2..4), (2, 4..5)]);
    let data = out.data.to_data().unwrap();
    assert_eq!(data.dtype(), DataType::F64);
    assert_eq!(data.to_f64()[[4, 4]], 48.0);
    assert_eq!(out.uncertainty().unwrap().dtype(), DataType::F64);
    let mask = out.mask().unwrap().to_data().unwrap();
    assert_eq!(mask.dtype(), DataType::U16);
    assert!(mask.to_f64().iter().all(|&v| v == 0.0));
}

#[test]
fn per_block_statistics_become_auxiliary_arrays() {
    let p = science(6, 4);
    let config = WindowedConfig::new(&[3, 2]);
    let out = windowed_op(
        |windows, ctx| {
            let data = &windows[0].data;
            let filled = |value: f64| ImageData::zeros(DataType::F64, data.shape()).apply_scalar(Operator::Add, value);
            let mean = data.to_f64().mean().unwrap_or(0.0);
            Ok(BlockOutput::new(data.clone())
                .with_aux("BLKMEAN", filled(mean))
                .with_aux("BLKID", filled(ctx.index as f64)))
        },
        &[p.unit(0).unwrap()],
        &config,
    )
    .unwrap();

    let means = out.aux("BLKMEAN").unwrap().as_array().unwrap().to_f64();
    assert_eq!(means.shape(), &[6, 4]);
    // Top-left block holds rows 0..3, columns 0..2: values 0 1 4 5 8 9.
    assert_eq!(means[[0, 0]], 4.5);
    let ids = out.aux("BLKID").unwrap().as_array().unwrap().to_f64();
    assert_eq!((ids[[0, 3]], ids[[5, 0]], ids[[5, 3]]), (1.0, 2.0, 3.0));
    assert_eq!(out.aux_names().collect::<Vec<_>>(), ["BLKMEAN", "BLKID"]);
}
