// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # jog-arm-rs
//! jog-arm-rs turns a stream of velocity commands (Cartesian twists or joint jogs) into smooth,
//! limit-respecting joint trajectories for a robot arm.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE JOGGING THE ROBOT!**
//!
//! ## Design
//! Three loops share one [`SharedState`](`crate::SharedState`):
//! * command ingestion stores the latest command and joint state whenever a message arrives.
//! * the [`CollisionMonitor`](`crate::jog::collision_check::CollisionMonitor`) periodically turns
//! the distance to the closest obstacle into a velocity scale.
//! * [`JogCalcs`](`crate::JogCalcs`) runs at the publish rate. It maps the command onto joint
//! increments (through the Jacobian pseudoinverse for Cartesian commands), slows down close to
//! singularities and collisions, enforces the joint limits, filters the result and writes the
//! next trajectory.
//!
//! If no command arrives for longer than `incoming_command_timeout`, or the command is zero, the
//! robot is halted at its current position.
//!
//! The kinematics and the collision distance come from a [`RobotModel`](`crate::RobotModel`),
//! the trajectories go out through a [`TrajectoryPublisher`](`crate::TrajectoryPublisher`).
//!
//! The library is divided into the following modules:
//! * [jog](`crate::jog`) - contains the jogging loops and their building blocks.
//! * [model](`crate::model`) - contains the interface to the robot model.
//! * [exception](`crate::exception`) - contains the error type.
//!
//! # Example:
//!```no_run
//! use std::time::Instant;
//! use jog_arm::{
//!     Header, JogParameters, JogResult, JogServer, JointState, OutgoingCommand, RobotModel,
//!     TrajectoryPublisher, Twist, TwistStamped,
//! };
//!
//! struct Printer;
//!
//! impl TrajectoryPublisher for Printer {
//!     fn publish_command(&mut self, command: OutgoingCommand) {
//!         println!("{:?}", command);
//!     }
//!     fn publish_warning(&mut self, active: bool) {
//!         println!("halted: {}", active);
//!     }
//! }
//!
//! fn jog(model: &dyn RobotModel, joints: JointState) -> JogResult<()> {
//!     let parameters = JogParameters::load_from_file("jog_settings.toml")?;
//!     let server = JogServer::new(parameters, model)?;
//!     server.joint_state(joints);
//!     std::thread::scope(|s| {
//!         s.spawn(|| {
//!             for _ in 0..100 {
//!                 server.delta_cartesian_cmd(TwistStamped::new(
//!                     Header::new(Instant::now(), "base_link"),
//!                     Twist::new([0.5, 0., 0.], [0., 0., 0.]),
//!                 ));
//!                 std::thread::sleep(std::time::Duration::from_millis(10));
//!             }
//!             server.shutdown();
//!         });
//!         server.run(&mut Printer)
//!     })
//! }
//! ```
//!
//! The robot model is usually backed by a kinematics library or a planning scene. Queries run
//! on a [`ModelClient`](`crate::ModelClient`) worker thread. The loops wait at most
//! `model_query_timeout` for an answer, a late answer halts the robot like a failed one.

pub mod exception;
pub mod jog;
pub mod model;
pub mod utils;

pub use exception::{JogException, JogResult};
pub use jog::collision_check::CollisionMonitor;
pub use jog::control_tools::RealtimeConfig;
pub use jog::jog_calcs::JogCalcs;
pub use jog::jog_server::{JogServer, TrajectoryPublisher};
pub use jog::low_pass_filter::{LowPassFilter, DEFAULT_FILTER_COEFF};
pub use jog::parameters::{CommandInType, CommandOutType, JogParameters};
pub use jog::shared_state::SharedState;
pub use jog::types::*;
pub use model::{JointLimits, ModelClient, RobotModel};
pub use utils::*;
