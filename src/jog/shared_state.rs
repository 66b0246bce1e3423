// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the state shared between command ingestion, collision checking and the
//! calculation loop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::jog::types::{
    JointState, JointTrajectory, VelocityCommand, DEFAULT_ZERO_COMMAND_TOLERANCE,
};
use crate::utils::lock;

/// Latest command together with its derived flags. Always replaced as a whole.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command: Option<VelocityCommand>,
    /// true if every component of the latest command is zero (or if there is no command yet)
    pub zero_command: bool,
}

impl CommandRecord {
    /// arrival time of the latest command
    pub fn stamp(&self) -> Option<Instant> {
        self.command.as_ref().map(|command| command.stamp())
    }
}

impl Default for CommandRecord {
    fn default() -> Self {
        CommandRecord {
            command: None,
            zero_command: true,
        }
    }
}

/// Latest output of the calculation loop. Always replaced as a whole.
#[derive(Debug, Clone, Default)]
pub struct OutgoingRecord {
    pub trajectory: Option<JointTrajectory>,
    pub ok_to_publish: bool,
}

/// Synchronized state of the jogging server.
///
/// Every record is guarded on its own, so the collision monitor never waits for the
/// calculation loop and vice versa. Readers get copies and never observe half-written records.
#[derive(Debug)]
pub struct SharedState {
    command: Mutex<CommandRecord>,
    joints: Mutex<Option<JointState>>,
    collision_velocity_scale: Mutex<f64>,
    outgoing: Mutex<OutgoingRecord>,
    command_is_stale: AtomicBool,
    warning_active: AtomicBool,
    zero_command_tolerance: f64,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState::with_zero_command_tolerance(DEFAULT_ZERO_COMMAND_TOLERANCE)
    }

    /// Creates the state. Command components up to `zero_command_tolerance` count as zero.
    pub fn with_zero_command_tolerance(zero_command_tolerance: f64) -> Self {
        SharedState {
            command: Mutex::new(CommandRecord::default()),
            joints: Mutex::new(None),
            collision_velocity_scale: Mutex::new(1.),
            outgoing: Mutex::new(OutgoingRecord::default()),
            command_is_stale: AtomicBool::new(false),
            warning_active: AtomicBool::new(false),
            zero_command_tolerance,
        }
    }

    /// Replaces the latest command and updates the zero command flag.
    pub fn set_command(&self, command: VelocityCommand) {
        let record = CommandRecord {
            zero_command: command.is_zero(self.zero_command_tolerance),
            command: Some(command),
        };
        *lock(&self.command) = record;
    }

    pub fn command(&self) -> CommandRecord {
        lock(&self.command).clone()
    }

    pub fn set_joints(&self, joints: JointState) {
        *lock(&self.joints) = Some(joints);
    }

    pub fn joints(&self) -> Option<JointState> {
        lock(&self.joints).clone()
    }

    /// Stores the collision velocity scale, clamped into [0, 1]. NaN is stored as 0.
    pub fn set_collision_velocity_scale(&self, scale: f64) {
        let scale = if scale.is_nan() {
            0.
        } else {
            scale.clamp(0., 1.)
        };
        *lock(&self.collision_velocity_scale) = scale;
    }

    pub fn collision_velocity_scale(&self) -> f64 {
        *lock(&self.collision_velocity_scale)
    }

    /// Replaces the outgoing trajectory and the publish flag in one step.
    pub fn set_outgoing(&self, trajectory: JointTrajectory, ok_to_publish: bool) {
        *lock(&self.outgoing) = OutgoingRecord {
            trajectory: Some(trajectory),
            ok_to_publish,
        };
    }

    /// Keeps the last trajectory but stops it from being published.
    pub fn suppress_publishing(&self) {
        lock(&self.outgoing).ok_to_publish = false;
    }

    pub fn outgoing(&self) -> OutgoingRecord {
        lock(&self.outgoing).clone()
    }

    /// Returns a copy of the trajectory if it may be published.
    pub fn trajectory_to_publish(&self) -> Option<JointTrajectory> {
        let outgoing = lock(&self.outgoing);
        if outgoing.ok_to_publish {
            outgoing.trajectory.clone()
        } else {
            None
        }
    }

    pub fn set_command_is_stale(&self, stale: bool) {
        self.command_is_stale.store(stale, Ordering::SeqCst);
    }

    pub fn command_is_stale(&self) -> bool {
        self.command_is_stale.load(Ordering::SeqCst)
    }

    pub fn set_warning_active(&self, active: bool) {
        self.warning_active.store(active, Ordering::SeqCst);
    }

    pub fn warning_active(&self) -> bool {
        self.warning_active.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new()
    }
}
