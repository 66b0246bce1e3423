// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`JogServer`](`JogServer`) which ties command ingestion, collision checking,
//! the calculation loop and publishing together.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::exception::{JogException, JogResult};
use crate::jog::collision_check::CollisionMonitor;
use crate::jog::control_tools::{apply_realtime_config, Rate};
use crate::jog::jog_calcs::JogCalcs;
use crate::jog::parameters::{CommandOutType, JogParameters};
use crate::jog::shared_state::SharedState;
use crate::jog::types::{JointJog, JointState, JointTrajectory, OutgoingCommand, TwistStamped};
use crate::model::{ModelClient, RobotModel};

/// Output side of the server, e.g. a bridge to the robot controller.
#[cfg_attr(test, mockall::automock)]
pub trait TrajectoryPublisher {
    /// Sends the next command to the robot controller.
    fn publish_command(&mut self, command: OutgoingCommand);
    /// Signals whether the robot was halted because of a singularity, a collision or an
    /// unavailable robot model. Only called when the value changes.
    fn publish_warning(&mut self, active: bool);
}

/// What the publishing loop already sent.
#[derive(Debug, Default)]
struct PublishedState {
    warning: Option<bool>,
    stamp: Option<Instant>,
}

/// Velocity jogging server for one joint group.
///
/// Commands and joint states can be fed from any thread while [`run`](`Self::run`) is active.
///
/// # Example
/// ```no_run
/// use jog_arm::{JogParameters, JogServer, OutgoingCommand, RobotModel, TrajectoryPublisher};
///
/// struct Printer;
/// impl TrajectoryPublisher for Printer {
///     fn publish_command(&mut self, command: OutgoingCommand) {
///         println!("{:?}", command);
///     }
///     fn publish_warning(&mut self, active: bool) {
///         println!("warning: {}", active);
///     }
/// }
///
/// fn serve(model: &dyn RobotModel) -> jog_arm::JogResult<()> {
///     let server = JogServer::new(JogParameters::default(), model)?;
///     std::thread::scope(|s| {
///         s.spawn(|| {
///             // feed commands and joint states here
///             server.shutdown();
///         });
///         server.run(&mut Printer)
///     })
/// }
/// ```
pub struct JogServer<'m, M: RobotModel + ?Sized> {
    parameters: JogParameters,
    model: &'m M,
    shared: SharedState,
    shutdown: AtomicBool,
}

impl<'m, M: RobotModel + ?Sized> JogServer<'m, M> {
    /// Creates a new server.
    ///
    /// # Errors
    /// * ConfigException if the parameters are invalid.
    pub fn new(parameters: JogParameters, model: &'m M) -> JogResult<Self> {
        parameters.validate()?;
        let shared = SharedState::with_zero_command_tolerance(parameters.zero_command_tolerance);
        Ok(JogServer {
            parameters,
            model,
            shared,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn parameters(&self) -> &JogParameters {
        &self.parameters
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Stores a Cartesian command. It replaces any previous command.
    pub fn delta_cartesian_cmd(&self, command: TwistStamped) {
        self.shared.set_command(command.into());
    }

    /// Stores a joint command. It replaces any previous command.
    pub fn delta_joint_cmd(&self, command: JointJog) {
        self.shared.set_command(command.into());
    }

    /// Stores the latest measured joint state.
    pub fn joint_state(&self, joint_state: JointState) {
        self.shared.set_joints(joint_state);
    }

    /// Makes [`run`](`Self::run`) return after the current cycle.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs the server until [`shutdown`](`Self::shutdown`) is called.
    ///
    /// The calculation loop and the collision monitor run on their own threads, the publishing
    /// loop runs on the calling thread. Each of the two loops queries the model through its own
    /// [`ModelClient`] worker thread.
    /// # Errors
    /// * ModelException if the joint limits of the group cannot be read.
    /// * RealTimeException if realtime priority is enforced but not available.
    pub fn run<P: TrajectoryPublisher + ?Sized>(&self, publisher: &mut P) -> JogResult<()> {
        let timeout = self.parameters.model_query_timeout_duration();
        let result = thread::scope(|s| {
            let mut calcs = JogCalcs::new(
                self.parameters.clone(),
                ModelClient::spawn(s, self.model, timeout),
            )?;
            let collision_monitor = if self.parameters.collision_check {
                let monitor = CollisionMonitor::new(
                    &self.parameters,
                    ModelClient::spawn(s, self.model, timeout),
                    calcs.joint_names().to_vec(),
                );
                if self.shared.joints().is_some() {
                    // the first cycles must not run with an unchecked scale
                    monitor.check_once(&self.shared);
                } else {
                    debug!("No joint state yet, collision velocity scale starts at 0");
                    self.shared.set_collision_velocity_scale(0.);
                }
                Some(monitor)
            } else {
                None
            };
            info!(
                "Jog server running with a period of {} s",
                self.parameters.publish_period
            );
            let calc_thread = s.spawn(move || self.run_calcs(&mut calcs));
            if let Some(monitor) = collision_monitor {
                s.spawn(move || monitor.run(&self.shared, &self.shutdown));
            }
            self.publish_loop(publisher);
            calc_thread
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        });
        info!("Jog server stopped");
        result
    }

    fn run_calcs(&self, calcs: &mut JogCalcs<M>) -> JogResult<()> {
        if let Err(error) = apply_realtime_config(self.parameters.realtime_config) {
            warn!("Unable to start the calculation loop: {}", error);
            self.shutdown();
            return Err(error);
        }
        let mut rate = Rate::new(self.parameters.publish_period_duration());
        let mut last_error: Option<JogException> = None;
        while !self.is_shutdown() {
            match calcs.spin_once(&self.shared, Instant::now()) {
                Ok(()) => last_error = None,
                Err(error) => {
                    if last_error.as_ref() != Some(&error) {
                        warn!("Skipping cycle: {}", error);
                    }
                    last_error = Some(error);
                }
            }
            if !rate.sleep() {
                debug!("Calculation cycle missed its deadline");
            }
        }
        Ok(())
    }

    fn publish_loop<P: TrajectoryPublisher + ?Sized>(&self, publisher: &mut P) {
        let mut rate = Rate::new(self.parameters.publish_period_duration());
        let mut published = PublishedState::default();
        while !self.is_shutdown() {
            self.publish_once(publisher, &mut published);
            rate.sleep();
        }
    }

    /// Forwards the warning flag if it changed and the latest trajectory if it may be published
    /// and was not sent before.
    fn publish_once<P: TrajectoryPublisher + ?Sized>(
        &self,
        publisher: &mut P,
        published: &mut PublishedState,
    ) {
        let warning = self.shared.warning_active();
        if published.warning != Some(warning) {
            publisher.publish_warning(warning);
            published.warning = Some(warning);
        }
        let trajectory = match self.shared.trajectory_to_publish() {
            Some(trajectory) => trajectory,
            None => return,
        };
        if published.stamp == Some(trajectory.header.stamp) {
            return;
        }
        published.stamp = Some(trajectory.header.stamp);
        if let Some(command) = self.to_outgoing_command(trajectory) {
            publisher.publish_command(command);
        }
    }

    fn to_outgoing_command(&self, trajectory: JointTrajectory) -> Option<OutgoingCommand> {
        match self.parameters.command_out_type {
            CommandOutType::JointTrajectory => Some(OutgoingCommand::JointTrajectory(trajectory)),
            CommandOutType::Float64MultiArray => {
                let point = trajectory.points.into_iter().next()?;
                if self.parameters.publish_joint_positions {
                    Some(OutgoingCommand::Float64MultiArray(point.positions))
                } else {
                    Some(OutgoingCommand::Float64MultiArray(point.velocities))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jog::types::{Header, Twist};
    use crate::model::{JointLimits, MockRobotModel};
    use mockall::predicate::eq;
    use nalgebra::DMatrix;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        commands: Vec<OutgoingCommand>,
        warnings: Vec<bool>,
    }

    impl TrajectoryPublisher for RecordingPublisher {
        fn publish_command(&mut self, command: OutgoingCommand) {
            self.commands.push(command);
        }
        fn publish_warning(&mut self, active: bool) {
            self.warnings.push(active);
        }
    }

    fn names() -> Vec<String> {
        (1..=6).map(|i| format!("j{}", i)).collect()
    }

    fn model(distance: f64) -> MockRobotModel {
        let mut model = MockRobotModel::new();
        model.expect_joint_limits().returning(|| {
            Ok(names()
                .into_iter()
                .map(|name| JointLimits::new(name, -3., 3., 1.))
                .collect())
        });
        model
            .expect_jacobian()
            .returning(|_| Ok(DMatrix::identity(6, 6)));
        model
            .expect_min_collision_distance()
            .returning(move |_| Ok(distance));
        model
    }

    fn parameters() -> JogParameters {
        JogParameters {
            publish_period: 0.005,
            collision_check_rate: 100.,
            model_query_timeout: 0.5,
            ..JogParameters::default()
        }
    }

    /// Runs `cycles` calculation cycles, 5 ms apart, on `shared`.
    fn spin_cycles(
        parameters: JogParameters,
        model: &MockRobotModel,
        shared: &SharedState,
        cycles: u64,
    ) {
        thread::scope(|s| {
            let client = ModelClient::spawn(s, model, Duration::from_secs(1));
            let mut calcs = JogCalcs::new(parameters, client).unwrap();
            let now = Instant::now();
            for k in 0..cycles {
                calcs
                    .spin_once(shared, now + Duration::from_millis(5 * k))
                    .unwrap();
            }
        });
    }

    fn twist(linear: [f64; 3]) -> TwistStamped {
        TwistStamped::new(Header::new(Instant::now(), ""), Twist::new(linear, [0.; 3]))
    }

    fn joint_state() -> JointState {
        JointState::new(Instant::now(), names(), vec![0.; 6], vec![0.; 6])
    }

    #[test]
    fn invalid_parameters_are_rejected_test() {
        let model = model(1.);
        let parameters = JogParameters {
            lower_singularity_threshold: 0.001,
            ..parameters()
        };
        assert!(matches!(
            JogServer::new(parameters, &model),
            Err(JogException::ConfigException { .. })
        ));
    }

    #[test]
    fn ingestion_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        server.delta_cartesian_cmd(twist([0.1, 0., 0.]));
        assert!(!server.shared().command().zero_command);
        server.delta_joint_cmd(JointJog::new(
            Header::new(Instant::now(), ""),
            vec!["j1".to_string()],
            vec![0.],
        ));
        assert!(server.shared().command().zero_command);
        server.joint_state(joint_state());
        assert_eq!(server.shared().joints().unwrap().name, names());
    }

    #[test]
    fn publish_once_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        server.joint_state(joint_state());
        server.delta_cartesian_cmd(twist([0.5, 0., 0.]));
        spin_cycles(parameters(), &model, server.shared(), 1);

        let mut publisher = MockTrajectoryPublisher::new();
        publisher
            .expect_publish_warning()
            .with(eq(false))
            .times(1)
            .return_const(());
        publisher
            .expect_publish_command()
            .withf(|command| matches!(command, OutgoingCommand::JointTrajectory(_)))
            .times(1)
            .return_const(());
        let mut published = PublishedState::default();
        server.publish_once(&mut publisher, &mut published);
        // neither the warning nor the same trajectory are sent twice
        server.publish_once(&mut publisher, &mut published);
    }

    #[test]
    fn suppressed_trajectory_is_not_published_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        server.joint_state(joint_state());
        spin_cycles(parameters(), &model, server.shared(), 10);
        assert!(!server.shared().outgoing().ok_to_publish);

        let mut publisher = MockTrajectoryPublisher::new();
        publisher.expect_publish_warning().return_const(());
        publisher.expect_publish_command().times(0);
        server.publish_once(&mut publisher, &mut PublishedState::default());
    }

    #[test]
    fn float64_multi_array_output_test() {
        let model = model(1.);
        let parameters = JogParameters {
            command_out_type: CommandOutType::Float64MultiArray,
            publish_joint_positions: false,
            ..parameters()
        };
        let server = JogServer::new(parameters.clone(), &model).unwrap();
        server.joint_state(joint_state());
        server.delta_joint_cmd(JointJog::new(
            Header::new(Instant::now(), ""),
            vec!["j3".to_string()],
            vec![1.],
        ));
        spin_cycles(parameters, &model, server.shared(), 1);

        let mut publisher = RecordingPublisher::default();
        server.publish_once(&mut publisher, &mut PublishedState::default());
        assert_eq!(publisher.commands.len(), 1);
        match &publisher.commands[0] {
            OutgoingCommand::Float64MultiArray(data) => {
                assert_eq!(data.len(), 6);
                assert!(data[2] > 0.);
                assert_eq!(data[0], 0.);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn run_until_shutdown_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        let mut publisher = RecordingPublisher::default();
        server.joint_state(joint_state());
        let result = thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..40 {
                    server.delta_cartesian_cmd(twist([0.5, 0., 0.]));
                    thread::sleep(Duration::from_millis(5));
                }
                server.shutdown();
            });
            server.run(&mut publisher)
        });
        assert!(result.is_ok());
        assert_eq!(publisher.warnings.first(), Some(&false));
        assert!(publisher.commands.iter().any(|command| match command {
            OutgoingCommand::JointTrajectory(trajectory) =>
                trajectory.points[0].velocities[0] > 0.,
            _ => false,
        }));
    }

    #[test]
    fn collision_halts_running_server_test() {
        let model = model(0.);
        let server = JogServer::new(parameters(), &model).unwrap();
        let mut publisher = RecordingPublisher::default();
        server.joint_state(joint_state());
        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..40 {
                    server.delta_cartesian_cmd(twist([0.5, 0., 0.]));
                    thread::sleep(Duration::from_millis(5));
                }
                server.shutdown();
            });
            server.run(&mut publisher)
        })
        .unwrap();
        assert!(publisher.warnings.contains(&true));
        assert!(publisher.commands.iter().all(|command| match command {
            OutgoingCommand::JointTrajectory(trajectory) => trajectory.points[0]
                .velocities
                .iter()
                .all(|x| *x == 0.),
            _ => false,
        }));
    }

    #[test]
    fn start_without_joint_state_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        let mut publisher = RecordingPublisher::default();
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                server.joint_state(joint_state());
                thread::sleep(Duration::from_millis(30));
                for _ in 0..40 {
                    server.joint_state(joint_state());
                    server.delta_cartesian_cmd(twist([0.5, 0., 0.]));
                    thread::sleep(Duration::from_millis(5));
                }
                server.shutdown();
            });
            server.run(&mut publisher)
        })
        .unwrap();
        assert!(!publisher.warnings.contains(&true));
        assert_eq!(server.shared().collision_velocity_scale(), 1.);
        assert!(publisher.commands.iter().any(|command| match command {
            OutgoingCommand::JointTrajectory(trajectory) =>
                trajectory.points[0].velocities[0] > 0.,
            _ => false,
        }));
    }

    #[test]
    fn shutdown_before_run_test() {
        let model = model(1.);
        let server = JogServer::new(parameters(), &model).unwrap();
        server.shutdown();
        let mut publisher = RecordingPublisher::default();
        assert!(server.run(&mut publisher).is_ok());
        assert!(publisher.commands.is_empty());
    }
}
