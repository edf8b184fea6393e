//! Line/parabola least squares and conversion to helix parameters.
//!
//! In the bending plane the track is modelled as `y = a + b·dx + c·dx²`, in
//! the non-bending plane as `z = d + e·dx`, with `dx = x − x_origin`. Both
//! systems are solved from accumulated normal equations.

use crate::helix::{central_jacobian, Helix, K_GEV_PER_T_MM};
use crate::types::{BoundMatrix, BoundVector};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use std::f64::consts::FRAC_PI_2;

const EPS: f64 = 1e-12;

/// Coefficients `(a, b, c, d, e)` of the seed model.
pub(crate) type ModelVector = BoundVector;

#[derive(Clone, Debug)]
pub(crate) struct SeedFit {
    pub params: BoundVector,
    pub covariance: BoundMatrix,
    pub chi2: f64,
}

struct ParabolaAccum {
    n: Matrix3<f64>,
    rhs: Vector3<f64>,
}

impl ParabolaAccum {
    fn new() -> Self {
        Self {
            n: Matrix3::zeros(),
            rhs: Vector3::zeros(),
        }
    }

    fn accumulate(&mut self, dx: f64, y: f64, w: f64) {
        let basis = Vector3::new(1.0, dx, dx * dx);
        self.n += basis * basis.transpose() * w;
        self.rhs += basis * (y * w);
    }
}

struct LineAccum {
    n: Matrix2<f64>,
    rhs: Vector2<f64>,
}

impl LineAccum {
    fn new() -> Self {
        Self {
            n: Matrix2::zeros(),
            rhs: Vector2::zeros(),
        }
    }

    fn accumulate(&mut self, dx: f64, z: f64, w: f64) {
        let basis = Vector2::new(1.0, dx);
        self.n += basis * basis.transpose() * w;
        self.rhs += basis * (z * w);
    }
}

/// Fits the model to `points` and converts it to perigee parameters at
/// `perigee`. Returns `None` for degenerate systems or a vanishing field.
pub(crate) fn fit_seed(
    points: &[Vector3<f64>],
    x_origin: f64,
    perigee: &Vector3<f64>,
    bz: f64,
    sigma: f64,
    inflation: f64,
) -> Option<SeedFit> {
    if points.len() < 3 || bz.abs() <= EPS || !(sigma > 0.0) {
        return None;
    }
    let mut depths: Vec<f64> = points.iter().map(|p| p.x).collect();
    depths.sort_by(f64::total_cmp);
    depths.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    if depths.len() < 3 {
        return None;
    }
    let w = 1.0 / (sigma * sigma);
    let mut parabola = ParabolaAccum::new();
    let mut line = LineAccum::new();
    for p in points {
        let dx = p.x - x_origin;
        parabola.accumulate(dx, p.y, w);
        line.accumulate(dx, p.z, w);
    }
    let cov_y = parabola.n.try_inverse()?;
    let cov_z = line.n.try_inverse()?;
    let abc = cov_y * parabola.rhs;
    let de = cov_z * line.rhs;
    if !abc.iter().chain(de.iter()).all(|v| v.is_finite()) {
        return None;
    }

    let chi2: f64 = points
        .iter()
        .map(|p| {
            let dx = p.x - x_origin;
            let ry = p.y - (abc[0] + abc[1] * dx + abc[2] * dx * dx);
            let rz = p.z - (de[0] + de[1] * dx);
            (ry * ry + rz * rz) * w
        })
        .sum();

    let model = ModelVector::new(abc[0], abc[1], abc[2], de[0], de[1]);
    let params = model_to_perigee(&model, x_origin, perigee, bz);

    let mut model_cov = BoundMatrix::zeros();
    model_cov.fixed_view_mut::<3, 3>(0, 0).copy_from(&cov_y);
    model_cov.fixed_view_mut::<2, 2>(3, 3).copy_from(&cov_z);
    let jacobian = central_jacobian(
        |m| model_to_perigee(m, x_origin, perigee, bz),
        &model,
        &model_steps(&model),
    );
    let covariance = jacobian * model_cov * jacobian.transpose() * inflation;

    Some(SeedFit {
        params,
        covariance,
        chi2,
    })
}

/// Helix at `(x_origin, a, d)` described by the model, as perigee parameters.
pub(crate) fn model_to_perigee(
    model: &ModelVector,
    x_origin: f64,
    perigee: &Vector3<f64>,
    bz: f64,
) -> BoundVector {
    let (a, b, c, d, e) = (model[0], model[1], model[2], model[3], model[4]);
    let slope_norm = 1.0 + b * b;
    let phi = b.atan();
    let tan_lambda = e / slope_norm.sqrt();
    let theta = FRAC_PI_2 - tan_lambda.atan();
    let kappa = 2.0 * c / slope_norm.powf(1.5);
    let qop = -kappa * theta.sin() / (K_GEV_PER_T_MM * bz);
    Helix {
        point: Vector3::new(x_origin, a, d),
        phi,
        theta,
        qop,
        bz,
    }
    .to_perigee(perigee)
}

fn model_steps(model: &ModelVector) -> ModelVector {
    let scales = [1.0, 1e-3, 1e-6, 1.0, 1e-3];
    ModelVector::from_fn(|i, _| 1e-6 * model[i].abs().max(scales[i]))
}
