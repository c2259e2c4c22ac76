//! FITS-WCS header keywords ⇄ [`Transform`].
//!
//! Supported keyword sets are linear (`CRPIXn`, `CRVALn`, `CDi_j` or
//! `PCi_j`×`CDELTi`, `CTYPEn`, `CUNITn`) and the celestial gnomonic
//! projection (`RA---TAN`/`DEC--TAN` with `LONPOLE`).

use crate::error::{Error, Result};
use crate::fits::{Header, Value};
use crate::wcs::{Frame, Model, Transform};

/// Keyword recording how faithfully the header keywords describe the transform.
pub const FIDELITY_KEYWORD: &str = "FITS-WCS";

/// How well header keywords describe a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    /// The keywords reproduce the transform.
    Exact,
    /// The keywords are a first-order approximation.
    Approximate,
}

impl Fidelity {
    pub fn as_str(self) -> &'static str {
        match self {
            Fidelity::Exact => "EXACT",
            Fidelity::Approximate => "APPROXIMATE",
        }
    }
}

/// Remove the basis keywords of axes 1 to 4 that a fresh conversion replaces.
pub fn strip_basis_keywords(header: &mut Header) {
    for i in 1..=4 {
        for prefix in ["CDELT", "CRVAL", "CUNIT", "CTYPE", "CRPIX"] {
            header.remove(&format!("{prefix}{i}"));
        }
        for j in 1..=4 {
            header.remove(&format!("CD{i}_{j}"));
            header.remove(&format!("PC{i}_{j}"));
        }
    }
}

fn numeric(header: &Header, key: &str) -> Result<Option<f64>> {
    match header.get(key) {
        None => Ok(None),
        Some(value) => value.as_float().map(Some).ok_or_else(|| {
            Error::type_mismatch(format!("{key} holds a {} value, expected a number", value.kind()))
        }),
    }
}

fn text(header: &Header, key: &str) -> Result<Option<String>> {
    match header.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(Error::type_mismatch(format!(
            "{key} holds a {} value, expected a string",
            other.kind()
        ))),
    }
}

/// The three-letter projection code of a `CTYPEn` such as `RA---TAN`.
fn projection_code(ctype: &str) -> Option<&str> {
    (ctype.len() == 8 && ctype.is_char_boundary(4) && &ctype[4..5] == "-").then(|| &ctype[5..8])
}

/// Build a transform from the WCS keywords of `header` for an
/// `naxes`-dimensional array.
///
/// Returns `Ok(None)` when the header carries no WCS or uses a projection
/// other than TAN. A keyword of the wrong type is an error.
pub fn transform_from_header(header: &Header, naxes: usize) -> Result<Option<Transform>> {
    if naxes == 0 || !["CRPIX1", "CRVAL1", "CTYPE1", "CD1_1"].iter().any(|k| header.contains(k)) {
        return Ok(None);
    }

    let mut crpix = Vec::with_capacity(naxes);
    let mut crval = Vec::with_capacity(naxes);
    let mut ctype = Vec::with_capacity(naxes);
    let mut cunit = Vec::with_capacity(naxes);
    for i in 1..=naxes {
        crpix.push(numeric(header, &format!("CRPIX{i}"))?.unwrap_or(0.0));
        crval.push(numeric(header, &format!("CRVAL{i}"))?.unwrap_or(0.0));
        ctype.push(text(header, &format!("CTYPE{i}"))?.unwrap_or_default());
        cunit.push(text(header, &format!("CUNIT{i}"))?.unwrap_or_default());
    }

    let has_cd = (1..=naxes).any(|i| (1..=naxes).any(|j| header.contains(&format!("CD{i}_{j}"))));
    let mut matrix = vec![vec![0.0; naxes]; naxes];
    for i in 0..naxes {
        let cdelt = numeric(header, &format!("CDELT{}", i + 1))?.unwrap_or(1.0);
        for j in 0..naxes {
            matrix[i][j] = if has_cd {
                numeric(header, &format!("CD{}_{}", i + 1, j + 1))?.unwrap_or(0.0)
            } else {
                let identity = if i == j { 1.0 } else { 0.0 };
                cdelt * numeric(header, &format!("PC{}_{}", i + 1, j + 1))?.unwrap_or(identity)
            };
        }
    }

    let codes: Vec<Option<&str>> = ctype.iter().map(|c| projection_code(c)).collect();
    let celestial = naxes == 2 && codes.iter().all(|c| *c == Some("TAN"));
    if !celestial && codes.iter().any(Option::is_some) {
        log::debug!("unsupported WCS projection {ctype:?}");
        return Ok(None);
    }

    let mut pipeline = vec![
        Model::Shift {
            offsets: crpix.iter().map(|p| -(p - 1.0)).collect(),
        },
        Model::Affine {
            matrix,
            translation: vec![0.0; naxes],
        },
    ];
    let output_frame = if celestial {
        pipeline.push(Model::Gnomonic);
        pipeline.push(Model::CelestialRotation {
            lon: crval[0],
            lat: crval[1],
            lon_pole: numeric(header, "LONPOLE")?.unwrap_or(180.0),
        });
        let name = text(header, "RADESYS")?
            .map_or_else(|| "icrs".to_string(), |s| s.to_lowercase());
        Frame::new(&name, &["lon", "lat"], &["deg", "deg"])
    } else {
        pipeline.push(Model::Shift { offsets: crval });
        Frame {
            name: "world".to_string(),
            axes_names: ctype
                .into_iter()
                .enumerate()
                .map(|(i, c)| if c.is_empty() { format!("axis{}", i + 1) } else { c })
                .collect(),
            units: cunit,
        }
    };
    Ok(Some(Transform::new(Frame::pixel(naxes), output_frame, pipeline)))
}

/// Affine map `x → a·x + b`.
struct AffineMap {
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
}

impl AffineMap {
    fn identity(n: usize) -> Self {
        let a = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        AffineMap { a, b: vec![0.0; n] }
    }

    /// Apply `m · (a x + b) + t`.
    fn then_matrix(&mut self, m: &[Vec<f64>], t: &[f64]) -> Result<()> {
        let n = self.b.len();
        if m.len() != n || t.len() != n || m.iter().any(|row| row.len() != n) {
            return Err(Error::type_mismatch("linear model changes the number of axes"));
        }
        let a = (0..n)
            .map(|i| (0..n).map(|j| (0..n).map(|k| m[i][k] * self.a[k][j]).sum()).collect())
            .collect();
        let b = (0..n)
            .map(|i| (0..n).map(|k| m[i][k] * self.b[k]).sum::<f64>() + t[i])
            .collect();
        self.a = a;
        self.b = b;
        Ok(())
    }

    fn then(&mut self, model: &Model) -> Result<()> {
        let n = self.b.len();
        match model {
            Model::Shift { offsets } => {
                let identity = AffineMap::identity(n).a;
                self.then_matrix(&identity, offsets)
            }
            Model::Scale { factors } => {
                if factors.len() != n {
                    return Err(Error::type_mismatch("scale model changes the number of axes"));
                }
                let m: Vec<Vec<f64>> = (0..n)
                    .map(|i| (0..n).map(|j| if i == j { factors[i] } else { 0.0 }).collect())
                    .collect();
                self.then_matrix(&m, &vec![0.0; n])
            }
            Model::Affine {
                matrix,
                translation,
            } => self.then_matrix(matrix, translation),
            Model::Rotation2d { angle } => {
                let (s, c) = angle.to_radians().sin_cos();
                self.then_matrix(&[vec![c, -s], vec![s, c]], &[0.0, 0.0])
            }
            _ => Err(Error::type_mismatch("model is not linear")),
        }
    }
}

fn evaluate_models(models: &[Model], input: &[f64]) -> Result<Vec<f64>> {
    models
        .iter()
        .try_fold(input.to_vec(), |coords, model| model.evaluate(&coords))
}

/// First-order expansion of `models` around `centre` by central differences.
fn linearize(models: &[Model], centre: &[f64]) -> Result<AffineMap> {
    const STEP: f64 = 0.5;
    let n = centre.len();
    let f0 = evaluate_models(models, centre)?;
    if f0.len() != n {
        return Err(Error::type_mismatch("pipeline changes the number of axes"));
    }
    let mut a = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut plus = centre.to_vec();
        let mut minus = centre.to_vec();
        plus[j] += STEP;
        minus[j] -= STEP;
        let fp = evaluate_models(models, &plus)?;
        let fm = evaluate_models(models, &minus)?;
        for i in 0..n {
            a[i][j] = (fp[i] - fm[i]) / (2.0 * STEP);
        }
    }
    let b = (0..n)
        .map(|i| f0[i] - (0..n).map(|j| a[i][j] * centre[j]).sum::<f64>())
        .collect();
    Ok(AffineMap { a, b })
}

/// Express `transform` as FITS-WCS keywords for an array of C-order `shape`.
///
/// Linear pipelines, optionally ending in a TAN projection and celestial
/// rotation, map exactly. Other pipelines are linearized at the array
/// centre. The result is [`Fidelity::Exact`] only when reading the keywords
/// back also restores both frames; a frame name or unit the keywords cannot
/// hold makes it [`Fidelity::Approximate`]. The returned header includes
/// `FITS-WCS` set to the fidelity.
pub fn transform_to_header(transform: &Transform, shape: &[usize]) -> Result<(Header, Fidelity)> {
    let n = transform.n_inputs();
    if n != shape.len() {
        return Err(Error::type_mismatch(format!(
            "transform has {n} inputs but the array has {} dimensions",
            shape.len()
        )));
    }

    let pipeline = &transform.pipeline;
    let (planar, rotation) = match pipeline.as_slice() {
        [rest @ .., Model::Gnomonic, Model::CelestialRotation { lon, lat, lon_pole }] => {
            (rest, Some((*lon, *lat, *lon_pole)))
        }
        all => (all, None),
    };
    if planar
        .iter()
        .any(|m| matches!(m, Model::Gnomonic | Model::CelestialRotation { .. }))
    {
        return Err(Error::type_mismatch(
            "celestial models must end the pipeline to be written as FITS-WCS",
        ));
    }
    if rotation.is_some() && n != 2 {
        return Err(Error::type_mismatch("celestial WCS needs two axes"));
    }

    let (map, fidelity) = if planar.iter().all(Model::is_linear) {
        let mut map = AffineMap::identity(n);
        for model in planar {
            map.then(model)?;
        }
        (map, Fidelity::Exact)
    } else {
        // Pixel order is NAXIS1 first, the reverse of the C-order shape.
        let centre: Vec<f64> = shape.iter().rev().map(|&len| (len as f64 - 1.0) / 2.0).collect();
        (linearize(planar, &centre)?, Fidelity::Approximate)
    };

    let mut header = Header::new();
    for i in 0..n {
        for j in 0..n {
            header.set(&format!("CD{}_{}", i + 1, j + 1), map.a[i][j], None)?;
        }
    }
    match rotation {
        Some((lon, lat, lon_pole)) => {
            // The reference pixel is where the intermediate coordinates vanish.
            let [[a00, a01], [a10, a11]] = [[map.a[0][0], map.a[0][1]], [map.a[1][0], map.a[1][1]]];
            let det = a00 * a11 - a01 * a10;
            if det == 0.0 || !det.is_finite() {
                return Err(Error::type_mismatch("singular linear part in celestial WCS"));
            }
            let p0 = [
                (-a11 * map.b[0] + a01 * map.b[1]) / det,
                (a10 * map.b[0] - a00 * map.b[1]) / det,
            ];
            let axes = [("RA---TAN", lon), ("DEC--TAN", lat)];
            for (i, (ctype, crval)) in axes.into_iter().enumerate() {
                header.set(&format!("CRPIX{}", i + 1), p0[i] + 1.0, None)?;
                header.set(&format!("CRVAL{}", i + 1), crval, None)?;
                header.set(&format!("CTYPE{}", i + 1), ctype, None)?;
                header.set(&format!("CUNIT{}", i + 1), "deg", None)?;
            }
            header.set("LONPOLE", lon_pole, None)?;
            let frame = transform.output_frame.name.to_uppercase();
            if matches!(frame.as_str(), "ICRS" | "FK5" | "FK4") {
                header.set("RADESYS", frame, None)?;
            }
        }
        None => {
            if transform.n_outputs() != n {
                return Err(Error::type_mismatch("output frame axes differ from input axes"));
            }
            for i in 0..n {
                header.set(&format!("CRPIX{}", i + 1), 1.0, None)?;
                header.set(&format!("CRVAL{}", i + 1), map.b[i], None)?;
                let axis = &transform.output_frame.axes_names[i];
                if axis.is_ascii() && !axis.is_empty() {
                    header.set(&format!("CTYPE{}", i + 1), axis.as_str(), None)?;
                }
                let unit = transform.output_frame.units.get(i);
                if let Some(unit) = unit.filter(|u| u.is_ascii() && !u.is_empty()) {
                    header.set(&format!("CUNIT{}", i + 1), unit.as_str(), None)?;
                }
            }
        }
    }
    let fidelity = match fidelity {
        Fidelity::Exact if !restores_frames(&header, transform)? => Fidelity::Approximate,
        other => other,
    };
    header.set(FIDELITY_KEYWORD, fidelity.as_str(), None)?;
    Ok((header, fidelity))
}

/// Whether the transform read back from `header` has the frames of `transform`.
fn restores_frames(header: &Header, transform: &Transform) -> Result<bool> {
    let back = transform_from_header(header, transform.n_inputs())?;
    Ok(back.is_some_and(|back| {
        back.input_frame == transform.input_frame && back.output_frame == transform.output_frame
    }))
}
