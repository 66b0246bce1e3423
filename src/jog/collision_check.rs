// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the collision monitor which slows the robot down close to obstacles.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::exception::JogResult;
use crate::jog::control_tools::Rate;
use crate::jog::kinematics::proximity_scale;
use crate::jog::parameters::JogParameters;
use crate::jog::shared_state::SharedState;
use crate::jog::types::JointState;
use crate::model::{ModelClient, RobotModel};

/// How often [`CollisionMonitor::run`] looks for the first joint state.
pub static JOINT_STATE_POLL_PERIOD: Duration = Duration::from_millis(5);

/// Periodically queries the minimum collision distance and publishes a velocity scale in
/// [0, 1] to the [`SharedState`].
///
/// The scale is 0 at or below `hard_stop_collision_proximity_threshold`, 1 at or above
/// `lower_collision_proximity_threshold` and ramps linearly in between. Without joint state or
/// with an unavailable model the scale is 0.
///
/// The model only gets to see the joints of the active group, in group order.
pub struct CollisionMonitor<'m, M: RobotModel + ?Sized> {
    model: ModelClient<'m, M>,
    joint_names: Vec<String>,
    lower_threshold: f64,
    hard_stop_threshold: f64,
    period: Duration,
}

impl<'m, M: RobotModel + ?Sized> CollisionMonitor<'m, M> {
    /// Creates a monitor for the group `joint_names`, usually
    /// [`JogCalcs::joint_names`](`crate::JogCalcs::joint_names`).
    pub fn new(
        parameters: &JogParameters,
        model: ModelClient<'m, M>,
        joint_names: Vec<String>,
    ) -> Self {
        CollisionMonitor {
            model,
            joint_names,
            lower_threshold: parameters.lower_collision_proximity_threshold,
            hard_stop_threshold: parameters.hard_stop_collision_proximity_threshold,
            period: parameters.collision_check_period(),
        }
    }

    /// Computes the velocity scale for the latest joint state and stores it.
    ///
    /// # Return
    /// The stored scale.
    pub fn check_once(&self, shared: &SharedState) -> f64 {
        let previous = shared.collision_velocity_scale();
        let joints = match shared.joints() {
            Some(joints) => joints,
            None => {
                if previous > 0. {
                    debug!("No joint state yet, collision velocity scale is 0");
                }
                shared.set_collision_velocity_scale(0.);
                return 0.;
            }
        };
        let scale = match self.query_scale(&joints) {
            Ok(scale) => scale,
            Err(error) => {
                if previous > 0. {
                    warn!("Collision check unavailable, halting: {}", error);
                }
                shared.set_collision_velocity_scale(0.);
                return 0.;
            }
        };
        if scale <= 0. && previous > 0. {
            warn!("Very close to a collision. Halting.");
        } else if scale > 0. && previous <= 0. {
            info!("Collision velocity scale rose to {:.3}", scale);
        } else if scale < 1. {
            debug!("Close to a collision, velocity scale {:.3}", scale);
        }
        shared.set_collision_velocity_scale(scale);
        scale
    }

    fn query_scale(&self, joints: &JointState) -> JogResult<f64> {
        let group = joints.group(&self.joint_names)?;
        let distance = self
            .model
            .query("collision distance query", move |model| {
                model.min_collision_distance(&group)
            })?;
        Ok(proximity_scale(
            distance,
            self.lower_threshold,
            self.hard_stop_threshold,
        ))
    }

    /// Runs [`check_once`](`Self::check_once`) at the collision check rate until `shutdown` is
    /// set.
    ///
    /// Until the first joint state arrives the scale stays 0 and the monitor checks every
    /// [`JOINT_STATE_POLL_PERIOD`], so motion does not wait a whole collision check period.
    pub fn run(&self, shared: &SharedState, shutdown: &AtomicBool) {
        let mut rate = Rate::new(self.period);
        while !shutdown.load(Ordering::SeqCst) {
            if shared.joints().is_none() {
                self.check_once(shared);
                thread::sleep(Duration::min(JOINT_STATE_POLL_PERIOD, self.period));
                rate = Rate::new(self.period);
                continue;
            }
            self.check_once(shared);
            if !rate.sleep() {
                debug!("Collision check missed its deadline");
            }
        }
    }
}
