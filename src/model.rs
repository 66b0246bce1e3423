// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the interface to the robot model service.
//!
//! Forward kinematics, Jacobians and collision checking are provided by an external service
//! (for example a URDF based kinematics library or a planning scene). The jogging core only
//! talks to it through the [`RobotModel`] trait.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::Scope;
use std::time::Duration;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::exception::{create_model_exception, JogException, JogResult};
use crate::jog::types::JointState;

/// Position and velocity bounds of one joint of the active group.
///
/// Continuous joints use infinite position bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointLimits {
    pub name: String,
    pub min_position: f64,
    pub max_position: f64,
    /// maximum absolute velocity in rad/s
    pub max_velocity: f64,
}

impl JointLimits {
    pub fn new<S: Into<String>>(
        name: S,
        min_position: f64,
        max_position: f64,
        max_velocity: f64,
    ) -> Self {
        JointLimits {
            name: name.into(),
            min_position,
            max_position,
            max_velocity,
        }
    }
    /// creates limits for a joint without position bounds
    pub fn continuous<S: Into<String>>(name: S, max_velocity: f64) -> Self {
        JointLimits::new(name, f64::NEG_INFINITY, f64::INFINITY, max_velocity)
    }
}

/// Robot model service used by the jogging loops.
///
/// Implementations should return within a bounded time. The jogging loops call the model through
/// a [`ModelClient`], which treats a late answer like a failed one.
#[cfg_attr(test, mockall::automock)]
pub trait RobotModel: Send + Sync {
    /// Calculates the 6xN Jacobian of the active group for the given joint state.
    ///
    /// Rows are `[vx, vy, vz, wx, wy, wz]` in the planning frame, columns follow the order of
    /// [`joint_limits`](`Self::joint_limits`).
    fn jacobian(&self, joint_state: &JointState) -> JogResult<DMatrix<f64>>;

    /// Returns the limits of the active group. The order defines the joint order of the group.
    fn joint_limits(&self) -> JogResult<Vec<JointLimits>>;

    /// Calculates the minimum distance between the robot and the scene (or itself) in meters.
    /// Zero or a negative value means the robot is in collision.
    ///
    /// Like for [`jacobian`](`Self::jacobian`), `joint_state` holds exactly the joints of the
    /// active group in the order of [`joint_limits`](`Self::joint_limits`).
    fn min_collision_distance(&self, joint_state: &JointState) -> JogResult<f64>;
}

type ModelRequest<'s, M> = Box<dyn FnOnce(&M) + Send + 's>;

/// Handle to a worker thread which runs queries against a [`RobotModel`].
///
/// A query waits at most `timeout` for its answer and fails with a ModelException afterwards,
/// even if the model call itself hangs. While a late answer is still being computed, further
/// queries fail right away instead of queueing up behind it.
///
/// The worker lives in a [`std::thread::scope`] and stops when the client is dropped.
pub struct ModelClient<'s, M: RobotModel + ?Sized> {
    requests: Sender<ModelRequest<'s, M>>,
    busy: Arc<AtomicBool>,
    timeout: Duration,
}

impl<'s, M: RobotModel + ?Sized> ModelClient<'s, M> {
    /// Spawns the worker thread on `scope`.
    pub fn spawn<'env>(scope: &'s Scope<'s, 'env>, model: &'s M, timeout: Duration) -> Self {
        let (requests, receiver) = mpsc::channel::<ModelRequest<'s, M>>();
        scope.spawn(move || {
            for request in receiver {
                request(model);
            }
        });
        ModelClient {
            requests,
            busy: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Runs `query` on the worker and waits for its answer.
    ///
    /// # Errors
    /// * ModelException if the query fails, does not answer within the timeout or an earlier
    /// query is still running. Other errors of the query are wrapped into a ModelException.
    pub fn query<T, F>(&self, what: &str, query: F) -> JogResult<T>
    where
        T: Send + 's,
        F: FnOnce(&M) -> JogResult<T> + Send + 's,
    {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(create_model_exception(format!(
                "{} skipped, an earlier query is still running",
                what
            )));
        }
        let busy = self.busy.clone();
        let (reply, answer) = mpsc::channel();
        let request: ModelRequest<'s, M> = Box::new(move |model: &M| {
            let result = query(model);
            busy.store(false, Ordering::SeqCst);
            // nobody listens any more if the caller timed out
            let _ = reply.send(result);
        });
        if self.requests.send(request).is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(create_model_exception(format!(
                "{} failed: the robot model worker stopped",
                what
            )));
        }
        match answer.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(|error| match error {
                JogException::ModelException { .. } => error,
                other => create_model_exception(format!("{} failed: {}", what, other)),
            }),
            Err(RecvTimeoutError::Timeout) => Err(create_model_exception(format!(
                "{} took longer than the allowed {:?}",
                what, self.timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(create_model_exception(format!(
                "{} failed: the robot model worker stopped",
                what
            ))),
        }
    }
}
