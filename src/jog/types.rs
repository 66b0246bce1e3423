// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the message types exchanged with the command and output transports.
use std::time::{Duration, Instant};

use nalgebra::{Vector3, Vector6};

use crate::exception::{JogException, JogResult};

/// Components whose magnitude is at or below this value count as zero when deciding
/// whether a command requests any motion at all, unless configured otherwise.
pub static DEFAULT_ZERO_COMMAND_TOLERANCE: f64 = 1e-6;

/// Time and coordinate frame of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Arrival time of the message.
    pub stamp: Instant,
    /// Coordinate frame the data is expressed in. An empty frame means the planning frame.
    pub frame_id: String,
}

impl Header {
    pub fn new<S: Into<String>>(stamp: Instant, frame_id: S) -> Self {
        Header {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// Linear and angular velocity of the end effector.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Twist {
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
}

impl Twist {
    pub fn new(linear: [f64; 3], angular: [f64; 3]) -> Self {
        Twist {
            linear: Vector3::from(linear),
            angular: Vector3::from(angular),
        }
    }
    /// stacks the twist into `[vx, vy, vz, wx, wy, wz]`
    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.linear.x,
            self.linear.y,
            self.linear.z,
            self.angular.x,
            self.angular.y,
            self.angular.z,
        )
    }
}

/// A Cartesian jog command.
#[derive(Debug, Clone, PartialEq)]
pub struct TwistStamped {
    pub header: Header,
    pub twist: Twist,
}

impl TwistStamped {
    pub fn new(header: Header, twist: Twist) -> Self {
        TwistStamped { header, twist }
    }
}

/// A joint jog command. Only the named joints are moved.
#[derive(Debug, Clone, PartialEq)]
pub struct JointJog {
    pub header: Header,
    pub joint_names: Vec<String>,
    pub deltas: Vec<f64>,
}

impl JointJog {
    pub fn new(header: Header, joint_names: Vec<String>, deltas: Vec<f64>) -> Self {
        JointJog {
            header,
            joint_names,
            deltas,
        }
    }
}

/// Latest jog command, either Cartesian or joint space.
#[derive(Debug, Clone, PartialEq)]
pub enum VelocityCommand {
    Cartesian(TwistStamped),
    Joint(JointJog),
}

impl VelocityCommand {
    pub fn stamp(&self) -> Instant {
        match self {
            VelocityCommand::Cartesian(command) => command.header.stamp,
            VelocityCommand::Joint(command) => command.header.stamp,
        }
    }

    /// Determines whether every component of the command is at most `tolerance` away from
    /// zero. NaN components never count as zero.
    pub fn is_zero(&self, tolerance: f64) -> bool {
        match self {
            VelocityCommand::Cartesian(command) => command
                .twist
                .to_vector()
                .iter()
                .all(|x| x.abs() <= tolerance),
            VelocityCommand::Joint(command) => command.deltas.iter().all(|x| x.abs() <= tolerance),
        }
    }
}

impl From<TwistStamped> for VelocityCommand {
    fn from(command: TwistStamped) -> Self {
        VelocityCommand::Cartesian(command)
    }
}

impl From<JointJog> for VelocityCommand {
    fn from(command: JointJog) -> Self {
        VelocityCommand::Joint(command)
    }
}

/// Measured joint state of the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    pub stamp: Instant,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    /// may be empty if the robot does not report velocities
    pub velocity: Vec<f64>,
}

impl JointState {
    pub fn new(stamp: Instant, name: Vec<String>, position: Vec<f64>, velocity: Vec<f64>) -> Self {
        JointState {
            stamp,
            name,
            position,
            velocity,
        }
    }

    /// Extracts the joints in `group` (in that order) from this state.
    ///
    /// # Errors
    /// * JointStateException if a joint of the group is missing or the vectors have
    /// inconsistent lengths.
    pub fn group(&self, group: &[String]) -> JogResult<JointState> {
        if self.position.len() != self.name.len()
            || (!self.velocity.is_empty() && self.velocity.len() != self.name.len())
        {
            return Err(JogException::JointStateException {
                message: format!(
                    "joint state has {} names, {} positions and {} velocities",
                    self.name.len(),
                    self.position.len(),
                    self.velocity.len()
                ),
            });
        }
        let mut position = Vec::with_capacity(group.len());
        let mut velocity = Vec::with_capacity(group.len());
        for joint in group {
            let index = self.name.iter().position(|name| name == joint).ok_or_else(|| {
                JogException::JointStateException {
                    message: format!("joint {} is missing in the joint state", joint),
                }
            })?;
            position.push(self.position[index]);
            velocity.push(self.velocity.get(index).copied().unwrap_or(0.));
        }
        Ok(JointState {
            stamp: self.stamp,
            name: group.to_vec(),
            position,
            velocity,
        })
    }
}

/// One point of a joint trajectory. Vectors which are not requested by the output mode are empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
    pub time_from_start: Duration,
}

/// Short joint trajectory holding the next increment(s) of motion.
#[derive(Debug, Clone, PartialEq)]
pub struct JointTrajectory {
    pub header: Header,
    pub joint_names: Vec<String>,
    pub points: Vec<TrajectoryPoint>,
}

/// Command handed to the output transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingCommand {
    JointTrajectory(JointTrajectory),
    /// positions or velocities of the first trajectory point
    Float64MultiArray(Vec<f64>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn zero_command_test() {
        let header = Header::new(Instant::now(), "");
        let zero: VelocityCommand =
            TwistStamped::new(header.clone(), Twist::new([0.; 3], [0.; 3])).into();
        assert!(zero.is_zero(DEFAULT_ZERO_COMMAND_TOLERANCE));
        let moving: VelocityCommand =
            TwistStamped::new(header.clone(), Twist::new([0.; 3], [0., 0., 0.1])).into();
        assert!(!moving.is_zero(DEFAULT_ZERO_COMMAND_TOLERANCE));
        let joint: VelocityCommand =
            JointJog::new(header.clone(), names(&["a", "b"]), vec![0., -0.2]).into();
        assert!(!joint.is_zero(DEFAULT_ZERO_COMMAND_TOLERANCE));

        // teleop jitter
        let jitter: VelocityCommand =
            TwistStamped::new(header.clone(), Twist::new([1e-9, -2e-9, 0.], [0.; 3])).into();
        assert!(jitter.is_zero(DEFAULT_ZERO_COMMAND_TOLERANCE));
        assert!(!jitter.is_zero(0.));
        let nan: VelocityCommand =
            JointJog::new(header, names(&["a"]), vec![f64::NAN]).into();
        assert!(!nan.is_zero(DEFAULT_ZERO_COMMAND_TOLERANCE));
    }

    #[test]
    fn group_extraction_test() {
        let state = JointState::new(
            Instant::now(),
            names(&["gripper", "j2", "j1"]),
            vec![0.5, 2., 1.],
            vec![0., 0.2, 0.1],
        );
        let group = state.group(&names(&["j1", "j2"])).unwrap();
        assert_eq!(group.name, names(&["j1", "j2"]));
        assert_eq!(group.position, vec![1., 2.]);
        assert_eq!(group.velocity, vec![0.1, 0.2]);
    }

    #[test]
    fn group_extraction_missing_joint_test() {
        let state = JointState::new(Instant::now(), names(&["j1"]), vec![1.], vec![]);
        let group = state.group(&names(&["j1"])).unwrap();
        assert_eq!(group.velocity, vec![0.]);
        assert!(matches!(
            state.group(&names(&["j1", "j2"])),
            Err(JogException::JointStateException { .. })
        ));
        let broken = JointState::new(Instant::now(), names(&["j1", "j2"]), vec![1.], vec![]);
        assert!(broken.group(&names(&["j1"])).is_err());
    }
}
