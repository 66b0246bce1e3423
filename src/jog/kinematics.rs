// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the differential kinematics used for Cartesian jogging and the velocity
//! scaling policy shared by singularity and collision avoidance.
use nalgebra::{DMatrix, DVector, SVD};

use crate::exception::{create_model_exception, JogResult};
use crate::utils::all_finite;

/// Singular values at or below this value are treated as zero in the pseudoinverse.
pub static SINGULAR_VALUE_EPS: f64 = 1e-9;

/// Largest joint-space step (norm, in rad) used to check whether a motion approaches a
/// singularity.
pub static SINGULARITY_LOOKAHEAD_MAX_STEP: f64 = 0.01;

/// Truncated pseudoinverse of a Jacobian together with its smallest singular value.
#[derive(Debug, Clone)]
pub struct JacobianInverse {
    pub pseudo_inverse: DMatrix<f64>,
    pub smallest_singular_value: f64,
}

/// Computes `J⁺ = V Σ⁺ Uᵗ` from the SVD of `jacobian`.
///
/// # Errors
/// * ModelException if the Jacobian contains NaN or infinite entries or the SVD fails.
pub fn invert_jacobian(jacobian: &DMatrix<f64>) -> JogResult<JacobianInverse> {
    if jacobian.is_empty() || !all_finite(jacobian.iter()) {
        return Err(create_model_exception(
            "Jacobian is empty or contains non-finite values",
        ));
    }
    let smallest_singular_value = smallest_singular_value(jacobian);
    let svd = SVD::new(jacobian.clone(), true, true);
    let pseudo_inverse = svd
        .pseudo_inverse(SINGULAR_VALUE_EPS)
        .map_err(create_model_exception)?;
    Ok(JacobianInverse {
        pseudo_inverse,
        smallest_singular_value,
    })
}

/// Returns the smallest singular value of `jacobian`.
pub fn smallest_singular_value(jacobian: &DMatrix<f64>) -> f64 {
    jacobian
        .singular_values()
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

/// Maps a Cartesian increment `[dx, dy, dz, drx, dry, drz]` to joint increments.
pub fn joint_increments(pseudo_inverse: &DMatrix<f64>, delta_x: &DVector<f64>) -> DVector<f64> {
    pseudo_inverse * delta_x
}

/// Maps a proximity value onto a velocity scale in [0, 1].
///
/// At or below `hard_stop_threshold` the scale is exactly 0, at or above `lower_threshold` it is
/// 1 and in between it ramps linearly. NaN is treated as "no information" and yields 0.
pub fn proximity_scale(value: f64, lower_threshold: f64, hard_stop_threshold: f64) -> f64 {
    if value.is_nan() || value <= hard_stop_threshold {
        0.
    } else if value >= lower_threshold {
        1.
    } else {
        ((value - hard_stop_threshold) / (lower_threshold - hard_stop_threshold)).clamp(0., 1.)
    }
}

/// Velocity scale for singularity avoidance.
///
/// `sigma_now` is the smallest singular value at the current configuration, `sigma_ahead` the
/// one after a small step along the commanded motion. Motion is only slowed down if it does not
/// increase the smallest singular value, ties count as approaching.
pub fn singularity_scale(
    sigma_now: f64,
    sigma_ahead: f64,
    lower_threshold: f64,
    hard_stop_threshold: f64,
) -> f64 {
    let approaching = !(sigma_ahead > sigma_now);
    if approaching {
        proximity_scale(sigma_now, lower_threshold, hard_stop_threshold)
    } else {
        1.
    }
}

/// Scales `delta_theta` into a lookahead step of at most
/// [`SINGULARITY_LOOKAHEAD_MAX_STEP`](`SINGULARITY_LOOKAHEAD_MAX_STEP`). Returns None for a zero step.
pub fn singularity_lookahead_step(delta_theta: &DVector<f64>) -> Option<DVector<f64>> {
    let norm = delta_theta.norm();
    if !(norm > f64::EPSILON) || !norm.is_finite() {
        return None;
    }
    if norm > SINGULARITY_LOOKAHEAD_MAX_STEP {
        Some(delta_theta * (SINGULARITY_LOOKAHEAD_MAX_STEP / norm))
    } else {
        Some(delta_theta.clone())
    }
}
