//! Coordinate transforms attached to units.
//!
//! A [`Transform`] maps pixel coordinates (0-based, NAXIS1 axis first) to
//! world coordinates through a pipeline of [`Model`]s. Transforms are carried
//! in files either as FITS-WCS header keywords ([`fitswcs`]) or as a tagged
//! JSON document stored in a table extension ([`codec`]).

pub mod codec;
pub mod fitswcs;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named coordinate frame.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Frame {
    pub name: String,
    pub axes_names: Vec<String>,
    pub units: Vec<String>,
}

impl Frame {
    pub fn new(name: &str, axes_names: &[&str], units: &[&str]) -> Self {
        Frame {
            name: name.to_string(),
            axes_names: axes_names.iter().map(|s| s.to_string()).collect(),
            units: units.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The pixel frame of an `naxes`-dimensional detector.
    pub fn pixel(naxes: usize) -> Self {
        const AXES: [&str; 4] = ["x", "y", "z", "w"];
        Frame {
            name: "pixels".to_string(),
            axes_names: (0..naxes)
                .map(|i| AXES.get(i).map_or_else(|| format!("axis{}", i + 1), |s| s.to_string()))
                .collect(),
            units: vec!["pix".to_string(); naxes],
        }
    }

    pub fn naxes(&self) -> usize {
        self.axes_names.len()
    }
}

/// A model with no serialization tag: an arbitrary function of the inputs.
#[derive(Clone)]
pub struct FunctionModel {
    pub name: String,
    pub func: Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>,
}

impl FunctionModel {
    pub fn new(name: &str, func: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static) -> Self {
        FunctionModel {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FunctionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionModel").field("name", &self.name).finish()
    }
}

impl PartialEq for FunctionModel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// One step of a transform pipeline.
///
/// Angles are in degrees.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Model {
    /// `out[i] = in[i] + offsets[i]`.
    Shift { offsets: Vec<f64> },
    /// `out[i] = in[i] * factors[i]`.
    Scale { factors: Vec<f64> },
    /// `out = matrix · in + translation`.
    Affine {
        matrix: Vec<Vec<f64>>,
        translation: Vec<f64>,
    },
    /// Counter-clockwise rotation of a 2-D plane.
    Rotation2d { angle: f64 },
    /// 2-D polynomial distortion. Coefficients are ordered by total degree,
    /// then by decreasing power of x: `1, x, y, x², xy, y², ...`.
    Polynomial2d {
        degree: usize,
        coeffs_x: Vec<f64>,
        coeffs_y: Vec<f64>,
    },
    /// Gnomonic (TAN) projection from the intermediate plane to native
    /// spherical coordinates `(phi, theta)`.
    Gnomonic,
    /// Rotation from native spherical to celestial coordinates.
    CelestialRotation { lon: f64, lat: f64, lon_pole: f64 },
    /// A model with no document representation.
    #[serde(skip)]
    Function(FunctionModel),
}

fn expect_len(model: &str, expected: usize, input: &[f64]) -> Result<()> {
    if input.len() == expected {
        Ok(())
    } else {
        Err(Error::type_mismatch(format!(
            "{model} model takes {expected} inputs, got {}",
            input.len()
        )))
    }
}

fn polynomial_terms(degree: usize) -> impl Iterator<Item = (i32, i32)> {
    (0..=degree as i32).flat_map(|d| (0..=d).rev().map(move |i| (i, d - i)))
}

impl Model {
    /// Number of coefficients of a 2-D polynomial of `degree`.
    pub fn polynomial_len(degree: usize) -> usize {
        (degree + 1) * (degree + 2) / 2
    }

    /// `true` for models that are affine in their inputs.
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            Model::Shift { .. }
                | Model::Scale { .. }
                | Model::Affine { .. }
                | Model::Rotation2d { .. }
        )
    }

    /// Tag used in the serialized document, `None` for untagged models.
    pub fn tag(&self) -> Option<&'static str> {
        Some(match self {
            Model::Shift { .. } => "shift",
            Model::Scale { .. } => "scale",
            Model::Affine { .. } => "affine",
            Model::Rotation2d { .. } => "rotation2d",
            Model::Polynomial2d { .. } => "polynomial2d",
            Model::Gnomonic => "gnomonic",
            Model::CelestialRotation { .. } => "celestial_rotation",
            Model::Function(_) => return None,
        })
    }

    pub fn evaluate(&self, input: &[f64]) -> Result<Vec<f64>> {
        match self {
            Model::Shift { offsets } => {
                expect_len("shift", offsets.len(), input)?;
                Ok(input.iter().zip(offsets).map(|(x, o)| x + o).collect())
            }
            Model::Scale { factors } => {
                expect_len("scale", factors.len(), input)?;
                Ok(input.iter().zip(factors).map(|(x, f)| x * f).collect())
            }
            Model::Affine {
                matrix,
                translation,
            } => {
                expect_len("affine", translation.len(), input)?;
                matrix
                    .iter()
                    .zip(translation)
                    .map(|(row, t)| {
                        expect_len("affine", row.len(), input)?;
                        Ok(row.iter().zip(input).map(|(m, x)| m * x).sum::<f64>() + t)
                    })
                    .collect()
            }
            Model::Rotation2d { angle } => {
                expect_len("rotation2d", 2, input)?;
                let (s, c) = angle.to_radians().sin_cos();
                Ok(vec![
                    input[0] * c - input[1] * s,
                    input[0] * s + input[1] * c,
                ])
            }
            Model::Polynomial2d {
                degree,
                coeffs_x,
                coeffs_y,
            } => {
                expect_len("polynomial2d", 2, input)?;
                let n = Model::polynomial_len(*degree);
                if coeffs_x.len() != n || coeffs_y.len() != n {
                    return Err(Error::type_mismatch(format!(
                        "polynomial of degree {degree} needs {n} coefficients per axis"
                    )));
                }
                let (x, y) = (input[0], input[1]);
                let (mut u, mut v) = (0.0, 0.0);
                let coeffs = coeffs_x.iter().zip(coeffs_y);
                for ((i, j), (cx, cy)) in polynomial_terms(*degree).zip(coeffs) {
                    let term = x.powi(i) * y.powi(j);
                    u += cx * term;
                    v += cy * term;
                }
                Ok(vec![u, v])
            }
            Model::Gnomonic => {
                expect_len("gnomonic", 2, input)?;
                let (x, y) = (input[0], input[1]);
                let r = x.hypot(y);
                let phi = x.atan2(-y).to_degrees();
                let theta = (180.0 / std::f64::consts::PI).atan2(r).to_degrees();
                Ok(vec![phi, theta])
            }
            Model::CelestialRotation { lon, lat, lon_pole } => {
                expect_len("celestial_rotation", 2, input)?;
                let phi = input[0].to_radians();
                let theta = input[1].to_radians();
                let (sin_d0, cos_d0) = lat.to_radians().sin_cos();
                let dphi = phi - lon_pole.to_radians();
                let (sin_t, cos_t) = theta.sin_cos();
                let alpha = lon.to_radians()
                    + (-cos_t * dphi.sin()).atan2(sin_t * cos_d0 - cos_t * sin_d0 * dphi.cos());
                let delta = (sin_t * sin_d0 + cos_t * cos_d0 * dphi.cos()).clamp(-1.0, 1.0).asin();
                Ok(vec![alpha.to_degrees().rem_euclid(360.0), delta.to_degrees()])
            }
            Model::Function(f) => Ok((f.func)(input)),
        }
    }
}

/// A pixel → world mapping: input frame, output frame and the models that
/// connect them.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Transform {
    pub input_frame: Frame,
    pub output_frame: Frame,
    pub pipeline: Vec<Model>,
}

impl Transform {
    pub fn new(input_frame: Frame, output_frame: Frame, pipeline: Vec<Model>) -> Self {
        Transform {
            input_frame,
            output_frame,
            pipeline,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.input_frame.naxes()
    }

    pub fn n_outputs(&self) -> usize {
        self.output_frame.naxes()
    }

    /// Map a pixel position to world coordinates.
    pub fn evaluate(&self, pixel: &[f64]) -> Result<Vec<f64>> {
        if pixel.len() != self.n_inputs() {
            return Err(Error::type_mismatch(format!(
                "transform takes {} inputs, got {}",
                self.n_inputs(),
                pixel.len()
            )));
        }
        self.pipeline
            .iter()
            .try_fold(pixel.to_vec(), |coords, model| model.evaluate(&coords))
    }

    /// Names of models with no serialization tag.
    pub fn untagged_models(&self) -> Vec<&str> {
        self.pipeline
            .iter()
            .filter_map(|m| match m {
                Model::Function(f) => Some(f.name.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn linear_pipeline() {
        let t = Transform::new(
            Frame::pixel(2),
            Frame::new("world", &["u", "v"], &["mm", "mm"]),
            vec![
                Model::Shift {
                    offsets: vec![-1.0, -2.0],
                },
                Model::Scale {
                    factors: vec![2.0, 3.0],
                },
                Model::Rotation2d { angle: 90.0 },
            ],
        );
        let out = t.evaluate(&[2.0, 3.0]).unwrap();
        assert!(close(&out, &[-3.0, 2.0]), "{out:?}");
    }

    #[test]
    fn affine_and_polynomial() {
        let affine = Model::Affine {
            matrix: vec![vec![1.0, 2.0], vec![0.0, 1.0]],
            translation: vec![10.0, 0.0],
        };
        assert_eq!(affine.evaluate(&[1.0, 1.0]).unwrap(), vec![13.0, 1.0]);

        // u = x + 0.5 x², v = y + xy
        let poly = Model::Polynomial2d {
            degree: 2,
            coeffs_x: vec![0.0, 1.0, 0.0, 0.5, 0.0, 0.0],
            coeffs_y: vec![0.0, 0.0, 1.0, 0.0, 1.0, 0.0],
        };
        assert_eq!(poly.evaluate(&[2.0, 3.0]).unwrap(), vec![4.0, 9.0]);
        assert!(!poly.is_linear());
    }

    #[test]
    fn tangent_plane_reference_point() {
        let tan = Model::Gnomonic;
        let rot = Model::CelestialRotation {
            lon: 150.0,
            lat: 2.0,
            lon_pole: 180.0,
        };
        let native = tan.evaluate(&[0.0, 0.0]).unwrap();
        assert!((native[1] - 90.0).abs() < 1e-12);
        let world = rot.evaluate(&native).unwrap();
        assert!(close(&world, &[150.0, 2.0]), "{world:?}");
    }

    #[test]
    fn tangent_plane_offsets_move_east_and_north() {
        let t = Transform::new(
            Frame::pixel(2),
            Frame::new("icrs", &["lon", "lat"], &["deg", "deg"]),
            vec![
                Model::Gnomonic,
                Model::CelestialRotation {
                    lon: 10.0,
                    lat: 0.0,
                    lon_pole: 180.0,
                },
            ],
        );
        let east = t.evaluate(&[0.01, 0.0]).unwrap();
        assert!(east[0] > 10.0 && east[1].abs() < 1e-9);
        let north = t.evaluate(&[0.0, 0.01]).unwrap();
        assert!(north[1] > 0.0 && (north[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let t = Transform::new(Frame::pixel(2), Frame::pixel(2), vec![]);
        assert!(matches!(t.evaluate(&[1.0]), Err(Error::TypeMismatch(_))));
        let shift = Model::Shift { offsets: vec![1.0] };
        assert!(shift.evaluate(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn model_document_is_tagged() {
        let json = serde_json::to_value(Model::Rotation2d { angle: 30.0 }).unwrap();
        assert_eq!(json["type"], "rotation2d");
        let back: Model = serde_json::from_value(json).unwrap();
        assert_eq!(back, Model::Rotation2d { angle: 30.0 });
        assert_eq!(serde_json::to_value(Model::Gnomonic).unwrap()["type"], "gnomonic");
    }

    #[test]
    fn function_models_have_no_tag() {
        let f = Model::Function(FunctionModel::new("square", |x| x.iter().map(|v| v * v).collect()));
        assert_eq!(f.tag(), None);
        assert_eq!(f.evaluate(&[3.0]).unwrap(), vec![9.0]);
        assert!(serde_json::to_string(&f).is_err());
    }
}
