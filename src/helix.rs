//! Analytic helix in a constant solenoidal field along `z`.
//!
//! The helix is anchored at a point with the local azimuth `phi`, polar angle
//! `theta` and signed inverse momentum `q/p`. The path parameter `s` used by
//! every method is the transverse arc length measured from the anchor, so
//! `z` grows by `s·cot θ`.
//!
//! Key ideas
//! - Perigee parameters relative to a reference point are obtained from the
//!   closest approach of the transverse circle to that point.
//! - Plane crossings are solved with Newton iterations seeded by the tangent
//!   line, which converges in a few steps for the stiff tracks of a tracker.

use crate::types::{bound, BoundMatrix, BoundVector};
use nalgebra::{Vector2, Vector3};
use std::f64::consts::PI;

/// Converts `B[T] · R[mm]` into transverse momentum in GeV.
pub const K_GEV_PER_T_MM: f64 = 0.299_792_458e-3;

const EPS: f64 = 1e-12;
/// Below this bending angle the circle formulas are replaced by a series.
const SMALL_TURN: f64 = 1e-9;

/// Wraps an angle to `[-π, π)`.
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Helix {
    pub point: Vector3<f64>,
    pub phi: f64,
    pub theta: f64,
    pub qop: f64,
    /// Field strength along `z` (T).
    pub bz: f64,
}

impl Helix {
    /// Helix through the perigee point described by `params` at `reference`.
    pub fn from_perigee(params: &BoundVector, reference: &Vector3<f64>, bz: f64) -> Self {
        let d0 = params[bound::D0];
        let phi = params[bound::PHI];
        let (sin_phi, cos_phi) = phi.sin_cos();
        let point = reference + Vector3::new(-d0 * sin_phi, d0 * cos_phi, params[bound::Z0]);
        Self {
            point,
            phi,
            theta: params[bound::THETA],
            qop: params[bound::QOP],
            bz,
        }
    }

    pub fn from_momentum(
        point: Vector3<f64>,
        momentum: &Vector3<f64>,
        charge: f64,
        bz: f64,
    ) -> Option<Self> {
        let p = momentum.norm();
        if p <= EPS {
            return None;
        }
        Some(Self {
            point,
            phi: momentum.y.atan2(momentum.x),
            theta: momentum.xy().norm().atan2(momentum.z),
            qop: charge / p,
            bz,
        })
    }

    /// Signed azimuth change per unit transverse path.
    pub fn omega(&self) -> f64 {
        let sin_theta = self.theta.sin();
        if sin_theta.abs() <= EPS {
            return 0.0;
        }
        -K_GEV_PER_T_MM * self.bz * self.qop / sin_theta
    }

    pub fn momentum_magnitude(&self) -> f64 {
        crate::types::momentum_from_qop(self.qop)
    }

    fn cot_theta(&self) -> f64 {
        self.theta.cos() / self.theta.sin().max(EPS)
    }

    pub fn position_at(&self, s: f64) -> Vector3<f64> {
        let omega = self.omega();
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let (dx, dy) = if (omega * s).abs() < SMALL_TURN {
            let half = 0.5 * omega * s * s;
            (s * cos_phi - half * sin_phi, s * sin_phi + half * cos_phi)
        } else {
            let (sin_s, cos_s) = (self.phi + omega * s).sin_cos();
            ((sin_s - sin_phi) / omega, (cos_phi - cos_s) / omega)
        };
        self.point + Vector3::new(dx, dy, s * self.cot_theta())
    }

    /// Derivative of the position with respect to the transverse path.
    pub fn tangent_at(&self, s: f64) -> Vector3<f64> {
        let (sin_s, cos_s) = (self.phi + self.omega() * s).sin_cos();
        Vector3::new(cos_s, sin_s, self.cot_theta())
    }

    pub fn direction_at(&self, s: f64) -> Vector3<f64> {
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        let (sin_s, cos_s) = (self.phi + self.omega() * s).sin_cos();
        Vector3::new(sin_theta * cos_s, sin_theta * sin_s, cos_theta)
    }

    pub fn momentum_at(&self, s: f64) -> Vector3<f64> {
        self.direction_at(s) * self.momentum_magnitude()
    }

    /// Three-dimensional path length covered by `s` of transverse path.
    pub fn path_length(&self, s: f64) -> f64 {
        s / self.theta.sin().abs().max(EPS)
    }

    /// Transverse path to the point of closest approach to `reference`.
    ///
    /// On a circle the nearest branch is taken, so the result lies within
    /// half a turn of the anchor.
    pub fn closest_approach(&self, reference: &Vector3<f64>) -> f64 {
        let omega = self.omega();
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        if omega.abs() < EPS {
            let delta = reference.xy() - self.point.xy();
            return delta.x * cos_phi + delta.y * sin_phi;
        }
        let center = self.point.xy() + Vector2::new(-sin_phi, cos_phi) / omega;
        let u = reference.xy() - center;
        if u.norm() <= EPS {
            return 0.0;
        }
        let sign = omega.signum();
        let psi = (sign * u.x).atan2(-sign * u.y);
        wrap_angle(psi - self.phi) / omega
    }

    /// Perigee parameters of this helix relative to `reference`.
    pub fn to_perigee(&self, reference: &Vector3<f64>) -> BoundVector {
        let s = self.closest_approach(reference);
        let pca = self.position_at(s);
        let phi = wrap_angle(self.phi + self.omega() * s);
        let (sin_phi, cos_phi) = phi.sin_cos();
        let d0 = -(pca.x - reference.x) * sin_phi + (pca.y - reference.y) * cos_phi;
        BoundVector::new(d0, pca.z - reference.z, phi, self.theta, self.qop)
    }

    /// Forward transverse path at which the helix crosses the plane through
    /// `center` with unit `normal`.
    ///
    /// Returns `None` when Newton iterations do not converge within
    /// `max_iterations`, when the crossing lies behind the anchor, or when its
    /// 3D path exceeds `path_limit`.
    pub fn intersect_plane(
        &self,
        center: &Vector3<f64>,
        normal: &Vector3<f64>,
        max_iterations: usize,
        path_limit: Option<f64>,
    ) -> Option<f64> {
        let distance = |s: f64| normal.dot(&(self.position_at(s) - center));
        let slope = |s: f64| normal.dot(&self.tangent_at(s));

        let initial = slope(0.0);
        if initial.abs() <= EPS {
            return None;
        }
        let mut s = -distance(0.0) / initial;
        let mut converged = false;
        for _ in 0..max_iterations.max(1) {
            let d = slope(s);
            if d.abs() <= EPS {
                return None;
            }
            let step = distance(s) / d;
            s -= step;
            if step.abs() < 1e-9 {
                converged = true;
                break;
            }
        }
        if !converged && distance(s).abs() > 1e-6 {
            return None;
        }
        if s < -1e-9 {
            return None;
        }
        if let Some(limit) = path_limit {
            if self.path_length(s) > limit {
                return None;
            }
        }
        Some(s.max(0.0))
    }
}

/// Perigee parameters at `to` of the helix given by `params` at `from`.
pub fn transport_perigee(
    params: &BoundVector,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    bz: f64,
) -> BoundVector {
    Helix::from_perigee(params, from, bz).to_perigee(to)
}

/// Transports parameters and covariance between perigee reference points.
pub fn transport_perigee_with_covariance(
    params: &BoundVector,
    covariance: &BoundMatrix,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    bz: f64,
) -> (BoundVector, BoundMatrix) {
    if (from - to).norm() <= EPS {
        return (*params, *covariance);
    }
    let moved = transport_perigee(params, from, to, bz);
    let jacobian = central_jacobian(
        |p| transport_perigee(p, from, to, bz),
        params,
        &perigee_steps(params),
    );
    (moved, jacobian * covariance * jacobian.transpose())
}

/// Finite-difference steps suited to perigee parameters.
pub(crate) fn perigee_steps(params: &BoundVector) -> BoundVector {
    BoundVector::new(
        1e-4,
        1e-4,
        1e-6,
        1e-6,
        (1e-6 * params[bound::QOP].abs()).max(1e-9),
    )
}

/// Central-difference Jacobian of a map whose output is a perigee vector.
///
/// Differences of the output azimuth are wrapped so branch cuts do not leak
/// into the derivative.
pub(crate) fn central_jacobian<F>(f: F, x: &BoundVector, steps: &BoundVector) -> BoundMatrix
where
    F: Fn(&BoundVector) -> BoundVector,
{
    let mut jacobian = BoundMatrix::zeros();
    for j in 0..5 {
        let h = steps[j];
        let mut plus = *x;
        plus[j] += h;
        let mut minus = *x;
        minus[j] -= h;
        let mut diff = f(&plus) - f(&minus);
        diff[bound::PHI] = wrap_angle(diff[bound::PHI]);
        jacobian.set_column(j, &(diff / (2.0 * h)));
    }
    jacobian
}
