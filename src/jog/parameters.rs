// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the parameters of the jogging server.
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exception::{create_config_exception, JogResult};
use crate::jog::control_tools::RealtimeConfig;
use crate::jog::types::DEFAULT_ZERO_COMMAND_TOLERANCE;
use crate::utils::seconds;

/// Units of incoming commands.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandInType {
    /// Components are in [-1, 1] and get multiplied by the configured scales.
    Unitless,
    /// Components are in m/s and rad/s.
    SpeedUnits,
}

/// Format of the outgoing command.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutType {
    JointTrajectory,
    /// A flat array with either the positions or the velocities of the first point.
    Float64MultiArray,
}

/// Parameters of the jogging server.
///
/// Missing entries fall back to [`Default`]. All loaders call [`validate`](`Self::validate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogParameters {
    /// Frame of the Jacobian and of the output trajectory.
    pub planning_frame: String,
    pub command_in_type: CommandInType,
    pub command_out_type: CommandOutType,
    /// Max linear increment per publish period for unitless commands, in m.
    pub linear_scale: f64,
    /// Max rotational increment per publish period for unitless commands, in rad.
    pub rotational_scale: f64,
    /// Max joint increment per publish period for unitless joint commands, in rad.
    pub joint_scale: f64,
    /// Start decelerating when the smallest singular value of the Jacobian drops below this.
    pub lower_singularity_threshold: f64,
    /// Halt when the smallest singular value of the Jacobian drops to this value.
    pub hard_stop_singularity_threshold: f64,
    /// Start decelerating when closer to a collision than this, in m.
    pub lower_collision_proximity_threshold: f64,
    /// Halt when this close to a collision, in m.
    pub hard_stop_collision_proximity_threshold: f64,
    /// Larger values mean more smoothing.
    pub low_pass_filter_coeff: f64,
    /// Period of the calculation and publishing loops, in s.
    pub publish_period: f64,
    /// Added to the cycle time to get the stamp of the outgoing trajectory, in s.
    pub publish_delay: f64,
    /// Halt if no new command arrived for this long, in s.
    pub incoming_command_timeout: f64,
    /// Command components up to this magnitude count as zero.
    pub zero_command_tolerance: f64,
    /// Joints are stopped this far before their position limits, in rad.
    pub joint_limit_margin: f64,
    pub collision_check: bool,
    /// Rate of the collision monitor, in Hz.
    pub collision_check_rate: f64,
    /// Maximum time a robot model query may take, in s.
    pub model_query_timeout: f64,
    pub publish_joint_positions: bool,
    pub publish_joint_velocities: bool,
    pub publish_joint_accelerations: bool,
    /// Outgoing trajectories are padded with redundant points up to this count.
    pub min_points_per_publish: usize,
    /// Number of halt messages published after the commands became zero or stale.
    pub num_halt_msgs_to_publish: usize,
    pub realtime_config: RealtimeConfig,
}

impl Default for JogParameters {
    fn default() -> Self {
        JogParameters {
            planning_frame: "base_link".to_string(),
            command_in_type: CommandInType::Unitless,
            command_out_type: CommandOutType::JointTrajectory,
            linear_scale: 0.003,
            rotational_scale: 0.006,
            joint_scale: 0.01,
            lower_singularity_threshold: 0.05,
            hard_stop_singularity_threshold: 0.01,
            lower_collision_proximity_threshold: 0.05,
            hard_stop_collision_proximity_threshold: 0.01,
            low_pass_filter_coeff: 2.,
            publish_period: 0.008,
            publish_delay: 0.005,
            incoming_command_timeout: 1.,
            zero_command_tolerance: DEFAULT_ZERO_COMMAND_TOLERANCE,
            joint_limit_margin: 0.1,
            collision_check: true,
            collision_check_rate: 10.,
            model_query_timeout: 0.05,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: false,
            min_points_per_publish: 1,
            num_halt_msgs_to_publish: 4,
            realtime_config: RealtimeConfig::Ignore,
        }
    }
}

impl JogParameters {
    /// Reads and validates parameters from a TOML file.
    /// # Errors
    /// * ConfigException if the file cannot be read, parsed or is inconsistent.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> JogResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            create_config_exception(format!(
                "unable to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        JogParameters::from_toml_str(&content)
    }

    /// Parses and validates parameters from a TOML string.
    /// # Errors
    /// * ConfigException if the string cannot be parsed or is inconsistent.
    pub fn from_toml_str(content: &str) -> JogResult<Self> {
        let parameters: JogParameters = toml::from_str(content)
            .map_err(|e| create_config_exception(format!("unable to parse parameters: {}", e)))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Checks that the parameters are consistent.
    /// # Errors
    /// * ConfigException describing the first violated rule.
    pub fn validate(&self) -> JogResult<()> {
        let positive = [
            ("linear_scale", self.linear_scale),
            ("rotational_scale", self.rotational_scale),
            ("joint_scale", self.joint_scale),
            ("low_pass_filter_coeff", self.low_pass_filter_coeff),
            ("publish_period", self.publish_period),
            ("incoming_command_timeout", self.incoming_command_timeout),
            ("collision_check_rate", self.collision_check_rate),
            ("model_query_timeout", self.model_query_timeout),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.) {
                return Err(create_config_exception(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        let non_negative = [
            ("publish_delay", self.publish_delay),
            ("joint_limit_margin", self.joint_limit_margin),
            ("zero_command_tolerance", self.zero_command_tolerance),
            (
                "hard_stop_singularity_threshold",
                self.hard_stop_singularity_threshold,
            ),
            (
                "hard_stop_collision_proximity_threshold",
                self.hard_stop_collision_proximity_threshold,
            ),
        ];
        for (name, value) in non_negative.iter() {
            if !(value.is_finite() && *value >= 0.) {
                return Err(create_config_exception(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }
        if !(self.lower_singularity_threshold > self.hard_stop_singularity_threshold)
            || !self.lower_singularity_threshold.is_finite()
        {
            return Err(create_config_exception(
                "lower_singularity_threshold must be greater than hard_stop_singularity_threshold",
            ));
        }
        if !(self.lower_collision_proximity_threshold > self.hard_stop_collision_proximity_threshold)
            || !self.lower_collision_proximity_threshold.is_finite()
        {
            return Err(create_config_exception(
                "lower_collision_proximity_threshold must be greater than hard_stop_collision_proximity_threshold",
            ));
        }
        if !self.publish_joint_positions
            && !self.publish_joint_velocities
            && !self.publish_joint_accelerations
        {
            return Err(create_config_exception(
                "at least one of publish_joint_positions, publish_joint_velocities and publish_joint_accelerations must be set",
            ));
        }
        if self.command_out_type == CommandOutType::Float64MultiArray
            && self.publish_joint_positions == self.publish_joint_velocities
        {
            return Err(create_config_exception(
                "float64_multi_array output needs exactly one of publish_joint_positions and publish_joint_velocities",
            ));
        }
        if self.min_points_per_publish == 0 {
            return Err(create_config_exception(
                "min_points_per_publish must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn publish_period_duration(&self) -> Duration {
        seconds(self.publish_period)
    }

    pub fn publish_delay_duration(&self) -> Duration {
        seconds(self.publish_delay)
    }

    pub fn incoming_command_timeout_duration(&self) -> Duration {
        seconds(self.incoming_command_timeout)
    }

    pub fn collision_check_period(&self) -> Duration {
        seconds(1. / self.collision_check_rate)
    }

    pub fn model_query_timeout_duration(&self) -> Duration {
        seconds(self.model_query_timeout)
    }
}
