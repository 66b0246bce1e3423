// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the calculation loop which turns jog commands into joint trajectories.
use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::exception::{create_command_exception, create_model_exception, JogException, JogResult};
use crate::jog::joint_limiting::{clamp_to_position_limits, limit_joint_increments};
use crate::jog::kinematics::{
    invert_jacobian, joint_increments, singularity_lookahead_step, singularity_scale,
    smallest_singular_value, JacobianInverse,
};
use crate::jog::low_pass_filter::LowPassFilter;
use crate::jog::parameters::{CommandInType, JogParameters};
use crate::jog::shared_state::SharedState;
use crate::jog::types::{
    Header, JointJog, JointState, JointTrajectory, TrajectoryPoint, TwistStamped, VelocityCommand,
};
use crate::model::{JointLimits, ModelClient, RobotModel};
use crate::utils::all_finite;

/// Result of the kinematic part of one cycle.
#[derive(Debug, Clone, PartialEq)]
enum Motion {
    /// Joint increments for this cycle, before limit enforcement and filtering.
    Increment(DVector<f64>),
    /// Velocity was scaled to zero, the reason is attached.
    HardStop(String),
}

/// Jogging calculations for one joint group.
///
/// [`spin_once`](`Self::spin_once`) runs one cycle: it reads the latest command, joint state
/// and collision scale from the [`SharedState`] and writes the next trajectory back. Model
/// queries go through a [`ModelClient`], so a hanging model delays a cycle by at most
/// `model_query_timeout`.
pub struct JogCalcs<'m, M: RobotModel + ?Sized> {
    parameters: JogParameters,
    model: ModelClient<'m, M>,
    limits: Vec<JointLimits>,
    joint_names: Vec<String>,
    velocity_filters: Vec<LowPassFilter>,
    position_filters: Vec<LowPassFilter>,
    previous_velocities: Vec<f64>,
    filters_initialized: bool,
    halt_msgs_published: usize,
    halt_reason: Option<String>,
}

impl<'m, M: RobotModel + ?Sized> JogCalcs<'m, M> {
    /// Creates the calculations for the joint group described by the model's joint limits.
    ///
    /// # Errors
    /// * ConfigException if the parameters are invalid.
    /// * ModelException if the joint limits cannot be read or are empty.
    pub fn new(parameters: JogParameters, model: ModelClient<'m, M>) -> JogResult<Self> {
        parameters.validate()?;
        let limits = model.query("joint limits query", |model| model.joint_limits())?;
        if limits.is_empty() {
            return Err(create_model_exception(
                "robot model reported an empty joint group",
            ));
        }
        let joint_names: Vec<String> = limits.iter().map(|x| x.name.clone()).collect();
        let num_joints = joint_names.len();
        info!("Jogging {} joints: {:?}", num_joints, joint_names);
        Ok(JogCalcs {
            velocity_filters: vec![LowPassFilter::new(parameters.low_pass_filter_coeff); num_joints],
            position_filters: vec![LowPassFilter::new(parameters.low_pass_filter_coeff); num_joints],
            previous_velocities: vec![0.; num_joints],
            parameters,
            model,
            limits,
            joint_names,
            filters_initialized: false,
            halt_msgs_published: 0,
            halt_reason: None,
        })
    }

    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    pub fn limits(&self) -> &[JointLimits] {
        &self.limits
    }

    /// Runs one calculation cycle at time `now`.
    ///
    /// # Errors
    /// * JointStateException if the latest joint state does not contain the group. Nothing is
    /// written in this case.
    /// * CommandException if the latest command is malformed. The last trajectory is kept but
    /// not published again.
    pub fn spin_once(&mut self, shared: &SharedState, now: Instant) -> JogResult<()> {
        let incoming = match shared.joints() {
            Some(joints) => joints,
            None => {
                debug!("Waiting for the first joint state");
                return Ok(());
            }
        };
        let joint_state = incoming.group(&self.joint_names)?;
        if !all_finite(&joint_state.position) {
            return Err(JogException::JointStateException {
                message: "joint state contains non-finite positions".to_string(),
            });
        }
        if !self.filters_initialized {
            self.reset_filters(&joint_state.position);
            self.filters_initialized = true;
        }

        let record = shared.command();
        let stale = match record.stamp() {
            Some(stamp) => {
                now.saturating_duration_since(stamp)
                    > self.parameters.incoming_command_timeout_duration()
            }
            None => true,
        };
        if stale && !shared.command_is_stale() && record.command.is_some() {
            warn!(
                "Stale command. No command for more than {} s, halting.",
                self.parameters.incoming_command_timeout
            );
        }
        shared.set_command_is_stale(stale);

        let command = match record.command {
            Some(command) if !stale && !record.zero_command => command,
            _ => {
                self.halt_idle(shared, &joint_state, now);
                return Ok(());
            }
        };

        let motion = match &command {
            VelocityCommand::Cartesian(command) => {
                self.cartesian_jog_calcs(command, &joint_state, shared)
            }
            VelocityCommand::Joint(command) => self.joint_jog_calcs(command),
        };
        match motion {
            Ok(Motion::Increment(delta_theta)) => {
                let trajectory = self.apply_increment(&joint_state, &delta_theta, now);
                shared.set_outgoing(trajectory, true);
                self.halt_msgs_published = 0;
                self.set_halt_reason(shared, None);
                Ok(())
            }
            Ok(Motion::HardStop(reason)) => {
                self.halt_hard(shared, &joint_state, now, reason);
                Ok(())
            }
            Err(JogException::ModelException { message }) => {
                self.halt_hard(
                    shared,
                    &joint_state,
                    now,
                    format!("robot model unavailable: {}", message),
                );
                Ok(())
            }
            Err(error) => {
                shared.suppress_publishing();
                Err(error)
            }
        }
    }

    fn cartesian_jog_calcs(
        &mut self,
        command: &TwistStamped,
        joint_state: &JointState,
        shared: &SharedState,
    ) -> JogResult<Motion> {
        let delta_x = self.scale_cartesian_command(command)?;
        let jacobian = self.query_jacobian(joint_state)?;
        let inverse = invert_jacobian(&jacobian)?;
        let delta_theta = joint_increments(&inverse.pseudo_inverse, &delta_x);

        let singularity_scale = self.decelerate_for_singularity(joint_state, &inverse, &delta_theta)?;
        if singularity_scale <= 0. {
            return Ok(Motion::HardStop(format!(
                "close to a singularity (smallest singular value {:.5})",
                inverse.smallest_singular_value
            )));
        }
        let collision_scale = shared.collision_velocity_scale();
        if collision_scale <= 0. {
            return Ok(Motion::HardStop(
                "collision velocity scale is zero".to_string(),
            ));
        }
        let scale = f64::min(singularity_scale * collision_scale, 1.);
        if scale < 1. {
            debug!(
                "Decelerating: singularity scale {:.3}, collision scale {:.3}",
                singularity_scale, collision_scale
            );
        }
        Ok(Motion::Increment(delta_theta * scale))
    }

    fn joint_jog_calcs(&mut self, command: &JointJog) -> JogResult<Motion> {
        Ok(Motion::Increment(self.scale_joint_command(command)?))
    }

    /// Converts a twist into the Cartesian increment of one cycle.
    fn scale_cartesian_command(&self, command: &TwistStamped) -> JogResult<DVector<f64>> {
        if !command.header.frame_id.is_empty()
            && command.header.frame_id != self.parameters.planning_frame
        {
            return Err(create_command_exception(format!(
                "command frame {} does not match the planning frame {}",
                command.header.frame_id, self.parameters.planning_frame
            )));
        }
        let twist = command.twist.to_vector();
        if !all_finite(twist.iter()) {
            return Err(create_command_exception(
                "nan in incoming command. Skipping this datapoint.",
            ));
        }
        let delta_x = match self.parameters.command_in_type {
            CommandInType::Unitless => {
                if twist.iter().any(|x| x.abs() > 1.) {
                    return Err(create_command_exception(
                        "Component of incoming command is >1. Skipping this datapoint.",
                    ));
                }
                let mut delta_x = twist;
                for i in 0..3 {
                    delta_x[i] *= self.parameters.linear_scale;
                    delta_x[i + 3] *= self.parameters.rotational_scale;
                }
                delta_x
            }
            CommandInType::SpeedUnits => twist * self.parameters.publish_period,
        };
        Ok(DVector::from_column_slice(delta_x.as_slice()))
    }

    /// Converts a joint command into the joint increments of one cycle.
    fn scale_joint_command(&self, command: &JointJog) -> JogResult<DVector<f64>> {
        if command.joint_names.len() != command.deltas.len() {
            return Err(create_command_exception(format!(
                "joint command has {} names but {} deltas",
                command.joint_names.len(),
                command.deltas.len()
            )));
        }
        if !all_finite(&command.deltas) {
            return Err(create_command_exception(
                "nan in incoming joint command. Skipping this datapoint.",
            ));
        }
        let mut delta_theta = DVector::zeros(self.joint_names.len());
        for (name, &delta) in command.joint_names.iter().zip(command.deltas.iter()) {
            let index = self
                .joint_names
                .iter()
                .position(|joint| joint == name)
                .ok_or_else(|| {
                    create_command_exception(format!("joint {} is not part of the group", name))
                })?;
            delta_theta[index] = match self.parameters.command_in_type {
                CommandInType::Unitless => {
                    if delta.abs() > 1. {
                        return Err(create_command_exception(
                            "Component of incoming joint command is >1. Skipping this datapoint.",
                        ));
                    }
                    delta * self.parameters.joint_scale
                }
                CommandInType::SpeedUnits => delta * self.parameters.publish_period,
            };
        }
        Ok(delta_theta)
    }

    fn query_jacobian(&self, joint_state: &JointState) -> JogResult<DMatrix<f64>> {
        let state = joint_state.clone();
        let jacobian = self
            .model
            .query("Jacobian query", move |model| model.jacobian(&state))?;
        if jacobian.nrows() != 6 || jacobian.ncols() != self.joint_names.len() {
            return Err(create_model_exception(format!(
                "expected a 6x{} Jacobian, got {}x{}",
                self.joint_names.len(),
                jacobian.nrows(),
                jacobian.ncols()
            )));
        }
        Ok(jacobian)
    }

    /// Velocity scale for the commanded motion near a singularity.
    ///
    /// Evaluates the smallest singular value a small step along `delta_theta` ahead. Motion which
    /// increases it is never slowed down.
    fn decelerate_for_singularity(
        &self,
        joint_state: &JointState,
        inverse: &JacobianInverse,
        delta_theta: &DVector<f64>,
    ) -> JogResult<f64> {
        let sigma = inverse.smallest_singular_value;
        let lower = self.parameters.lower_singularity_threshold;
        let hard_stop = self.parameters.hard_stop_singularity_threshold;
        if sigma >= lower {
            return Ok(1.);
        }
        let sigma_ahead = match singularity_lookahead_step(delta_theta) {
            Some(step) => {
                let mut ahead = joint_state.clone();
                ahead
                    .position
                    .iter_mut()
                    .zip(step.iter())
                    .for_each(|(position, delta)| *position += delta);
                smallest_singular_value(&self.query_jacobian(&ahead)?)
            }
            None => sigma,
        };
        Ok(singularity_scale(sigma, sigma_ahead, lower, hard_stop))
    }

    /// Enforces the joint limits, filters and integrates the increments and composes the
    /// trajectory.
    ///
    /// The filter can overshoot a clamped step, so the filtered velocity is clamped to the
    /// velocity limit again before integrating.
    fn apply_increment(
        &mut self,
        joint_state: &JointState,
        delta_theta: &DVector<f64>,
        now: Instant,
    ) -> JointTrajectory {
        let period = self.parameters.publish_period;
        let delta_theta = limit_joint_increments(
            &self.limits,
            &joint_state.position,
            delta_theta,
            period,
            self.parameters.joint_limit_margin,
        );
        let num_joints = self.joint_names.len();
        let mut positions = Vec::with_capacity(num_joints);
        let mut velocities = Vec::with_capacity(num_joints);
        for i in 0..num_joints {
            let max_velocity = self.limits[i].max_velocity.abs();
            let mut velocity = f64::max(
                f64::min(
                    self.velocity_filters[i].filter(delta_theta[i] / period),
                    max_velocity,
                ),
                -max_velocity,
            );
            let mut position = joint_state.position[i] + velocity * period;
            if self.parameters.publish_joint_positions {
                position = self.position_filters[i].filter(position);
            }
            if !velocity.is_finite() || !position.is_finite() {
                warn!("nan in filter output of joint {}", self.joint_names[i]);
                position = joint_state.position[i];
                velocity = 0.;
                self.velocity_filters[i].reset(0.);
                self.position_filters[i].reset(position);
            }
            positions.push(position);
            velocities.push(velocity);
        }
        let clamped = clamp_to_position_limits(&self.limits, &mut positions, &mut velocities);
        if !clamped.is_empty() {
            debug!("Clamped joints {:?} to their position limits", clamped);
        }
        let accelerations = velocities
            .iter()
            .zip(self.previous_velocities.iter())
            .map(|(velocity, previous)| (velocity - previous) / period)
            .collect();
        self.previous_velocities = velocities.clone();
        self.compose_outgoing_message(now, positions, velocities, accelerations)
    }

    /// Holds the current position with zero velocity and resets the filters, so motion resumes
    /// without a jump.
    fn halt(&mut self, joint_state: &JointState, now: Instant) -> JointTrajectory {
        self.reset_filters(&joint_state.position);
        let num_joints = self.joint_names.len();
        self.previous_velocities = vec![0.; num_joints];
        self.compose_outgoing_message(
            now,
            joint_state.position.clone(),
            vec![0.; num_joints],
            vec![0.; num_joints],
        )
    }

    /// Halt because the command is stale or zero. Only the first few halt messages get
    /// published.
    fn halt_idle(&mut self, shared: &SharedState, joint_state: &JointState, now: Instant) {
        let trajectory = self.halt(joint_state, now);
        let publish = self.halt_msgs_published < self.parameters.num_halt_msgs_to_publish;
        if publish {
            self.halt_msgs_published += 1;
        }
        shared.set_outgoing(trajectory, publish);
        self.set_halt_reason(shared, None);
    }

    /// Halt because the velocity was scaled to zero or the model is unavailable.
    fn halt_hard(
        &mut self,
        shared: &SharedState,
        joint_state: &JointState,
        now: Instant,
        reason: String,
    ) {
        let trajectory = self.halt(joint_state, now);
        shared.set_outgoing(trajectory, true);
        self.set_halt_reason(shared, Some(reason));
    }

    fn set_halt_reason(&mut self, shared: &SharedState, reason: Option<String>) {
        if reason != self.halt_reason {
            match &reason {
                Some(reason) => warn!("Halting: {}", reason),
                None => info!("Hard stop cleared"),
            }
            self.halt_reason = reason;
        }
        shared.set_warning_active(self.halt_reason.is_some());
    }

    fn reset_filters(&mut self, positions: &[f64]) {
        for (filter, &position) in self.position_filters.iter_mut().zip(positions.iter()) {
            filter.reset(position);
        }
        for filter in self.velocity_filters.iter_mut() {
            filter.reset(0.);
        }
    }

    fn compose_outgoing_message(
        &self,
        now: Instant,
        positions: Vec<f64>,
        velocities: Vec<f64>,
        accelerations: Vec<f64>,
    ) -> JointTrajectory {
        let point = TrajectoryPoint {
            positions: if self.parameters.publish_joint_positions {
                positions
            } else {
                Vec::new()
            },
            velocities: if self.parameters.publish_joint_velocities {
                velocities
            } else {
                Vec::new()
            },
            accelerations: if self.parameters.publish_joint_accelerations {
                accelerations
            } else {
                Vec::new()
            },
            time_from_start: self.parameters.publish_period_duration(),
        };
        let mut trajectory = JointTrajectory {
            header: Header::new(
                now + self.parameters.publish_delay_duration(),
                self.parameters.planning_frame.clone(),
            ),
            joint_names: self.joint_names.clone(),
            points: vec![point],
        };
        self.insert_redundant_points_into_trajectory(&mut trajectory);
        trajectory
    }

    /// Pads the trajectory with copies of its first point, one publish period apart, until it
    /// has `min_points_per_publish` points.
    fn insert_redundant_points_into_trajectory(&self, trajectory: &mut JointTrajectory) {
        let first = match trajectory.points.first() {
            Some(point) => point.clone(),
            None => return,
        };
        let period = self.parameters.publish_period_duration();
        for i in trajectory.points.len() + 1..=self.parameters.min_points_per_publish {
            let mut point = first.clone();
            point.time_from_start = period * i as u32;
            trajectory.points.push(point);
        }
    }
}
