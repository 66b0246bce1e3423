// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains functions for keeping joint increments within the velocity and position limits.
//!
//! Limits are enforced per joint: only the component that would violate a limit is clamped,
//! the other joints keep moving.

use nalgebra::DVector;

use crate::model::JointLimits;

/// Limits the increment of a single joint.
///
/// # Arguments
/// * `limits` - Limits of the joint.
/// * `position` - Current joint position.
/// * `increment` - Requested joint increment for this cycle.
/// * `publish_period` - Duration of one cycle in seconds.
/// * `margin` - The joint stops this far before its position limits.
/// # Return
/// The clamped increment. Applying the function to its own result returns the same value.
pub fn limit_joint_increment(
    limits: &JointLimits,
    position: f64,
    increment: f64,
    publish_period: f64,
    margin: f64,
) -> f64 {
    let max_increment = f64::abs(limits.max_velocity * publish_period);
    let mut limited = f64::max(f64::min(increment, max_increment), -max_increment);

    let lower = limits.min_position + margin;
    let upper = limits.max_position - margin;
    if limited < 0. && position + limited < lower {
        // move at most onto the margin, never further out
        limited = f64::min(0., lower - position);
    } else if limited > 0. && position + limited > upper {
        limited = f64::max(0., upper - position);
    }
    limited
}

/// Limits the increments of all joints of the group.
///
/// # Arguments
/// * `limits` - Per-joint limits, in group order.
/// * `positions` - Current joint positions.
/// * `increments` - Requested joint increments for this cycle.
/// * `publish_period` - Duration of one cycle in seconds.
/// * `margin` - Joints stop this far before their position limits.
/// # Panics
/// * if the lengths of `limits`, `positions` and `increments` differ.
/// # Return
/// Vector of clamped increments.
pub fn limit_joint_increments(
    limits: &[JointLimits],
    positions: &[f64],
    increments: &DVector<f64>,
    publish_period: f64,
    margin: f64,
) -> DVector<f64> {
    assert_eq!(limits.len(), increments.len());
    assert_eq!(positions.len(), increments.len());
    DVector::from_iterator(
        increments.len(),
        limits
            .iter()
            .zip(positions.iter())
            .zip(increments.iter())
            .map(|((limits, &position), &increment)| {
                limit_joint_increment(limits, position, increment, publish_period, margin)
            }),
    )
}

/// Clamps positions into the hard position limits and zeroes the velocity of every clamped
/// joint.
///
/// # Return
/// Names of the joints which had to be clamped.
pub fn clamp_to_position_limits<'a>(
    limits: &'a [JointLimits],
    positions: &mut [f64],
    velocities: &mut [f64],
) -> Vec<&'a str> {
    let mut clamped = Vec::new();
    for (i, limits) in limits.iter().enumerate() {
        if positions[i] < limits.min_position || positions[i] > limits.max_position {
            positions[i] = f64::max(f64::min(positions[i], limits.max_position), limits.min_position);
            velocities[i] = 0.;
            clamped.push(limits.name.as_str());
        }
    }
    clamped
}
