// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use nalgebra::DMatrix;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jog_arm::{
    Header, JogException, JogParameters, JogResult, JogServer, JointLimits, JointState,
    OutgoingCommand, RobotModel, TrajectoryPublisher, Twist, TwistStamped,
};

/// An example jogging a simulated planar arm with three revolute joints towards a wall.
///
/// The arm moves in the x-y plane of the planning frame. It slows down and stops in front of
/// the wall or when it gets stretched out (singular).
#[derive(Parser, Debug)]
#[clap(author, version, name = "jog_planar")]
struct CommandLineArguments {
    /// TOML file with jogging parameters. The defaults are used if omitted
    #[clap(long)]
    pub config: Option<String>,
    /// Unitless linear x command in [-1, 1]
    #[clap(long, default_value_t = 0.5)]
    pub vx: f64,
    /// Unitless linear y command in [-1, 1]
    #[clap(long, default_value_t = 0.)]
    pub vy: f64,
    /// x coordinate of the wall in meters
    #[clap(long, default_value_t = 1.8)]
    pub wall: f64,
    /// How long commands are sent, in seconds
    #[clap(long, default_value_t = 5.)]
    pub duration: f64,
}

struct PlanarArm {
    link_lengths: [f64; 3],
    wall_x: f64,
}

impl PlanarArm {
    fn joint_names() -> Vec<String> {
        vec![
            "shoulder".to_string(),
            "elbow".to_string(),
            "wrist".to_string(),
        ]
    }

    /// absolute angle of every link
    fn link_angles(&self, joint_state: &JointState) -> JogResult<[f64; 3]> {
        if joint_state.position.len() != 3 {
            return Err(JogException::ModelException {
                message: format!("expected 3 joints, got {}", joint_state.position.len()),
            });
        }
        let q = &joint_state.position;
        Ok([q[0], q[0] + q[1], q[0] + q[1] + q[2]])
    }
}

impl RobotModel for PlanarArm {
    fn jacobian(&self, joint_state: &JointState) -> JogResult<DMatrix<f64>> {
        let angles = self.link_angles(joint_state)?;
        let mut jacobian = DMatrix::zeros(6, 3);
        for joint in 0..3 {
            for link in joint..3 {
                jacobian[(0, joint)] -= self.link_lengths[link] * angles[link].sin();
                jacobian[(1, joint)] += self.link_lengths[link] * angles[link].cos();
            }
            jacobian[(5, joint)] = 1.;
        }
        Ok(jacobian)
    }

    fn joint_limits(&self) -> JogResult<Vec<JointLimits>> {
        Ok(PlanarArm::joint_names()
            .into_iter()
            .map(|name| JointLimits::new(name, -2.8, 2.8, 1.5))
            .collect())
    }

    fn min_collision_distance(&self, joint_state: &JointState) -> JogResult<f64> {
        let angles = self.link_angles(joint_state)?;
        let mut x = 0.;
        let mut max_x = 0.;
        for (length, angle) in self.link_lengths.iter().zip(angles.iter()) {
            x += length * angle.cos();
            max_x = f64::max(max_x, x);
        }
        Ok(self.wall_x - max_x)
    }
}

/// Position controlled joints which reach every commanded point instantly.
struct SimulatedController<'a> {
    positions: &'a Mutex<Vec<f64>>,
    published: usize,
}

impl<'a> TrajectoryPublisher for SimulatedController<'a> {
    fn publish_command(&mut self, command: OutgoingCommand) {
        if let OutgoingCommand::JointTrajectory(trajectory) = command {
            if let Some(point) = trajectory.points.first() {
                if !point.positions.is_empty() {
                    *self.positions.lock().unwrap() = point.positions.clone();
                }
            }
            self.published += 1;
        }
    }

    fn publish_warning(&mut self, active: bool) {
        if active {
            info!("Jogging halted");
        } else {
            info!("Jogging active");
        }
    }
}

fn main() -> JogResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = CommandLineArguments::parse();
    let parameters = match &args.config {
        Some(path) => JogParameters::load_from_file(path)?,
        None => JogParameters::default(),
    };
    let arm = PlanarArm {
        link_lengths: [1., 0.8, 0.5],
        wall_x: args.wall,
    };
    let server = JogServer::new(parameters, &arm)?;
    let positions = Mutex::new(vec![0.3, 0.6, 0.6]);
    let mut controller = SimulatedController {
        positions: &positions,
        published: 0,
    };

    thread::scope(|s| {
        s.spawn(|| {
            let start = Instant::now();
            while start.elapsed().as_secs_f64() < args.duration {
                let now = Instant::now();
                let current = positions.lock().unwrap().clone();
                server.joint_state(JointState::new(
                    now,
                    PlanarArm::joint_names(),
                    current,
                    vec![],
                ));
                server.delta_cartesian_cmd(TwistStamped::new(
                    Header::new(now, ""),
                    Twist::new([args.vx, args.vy, 0.], [0.; 3]),
                ));
                thread::sleep(Duration::from_millis(10));
            }
            // let the watchdog halt the arm before stopping
            thread::sleep(Duration::from_secs_f64(
                server.parameters().incoming_command_timeout + 0.1,
            ));
            server.shutdown();
        });
        server.run(&mut controller)
    })?;

    let final_positions = positions.lock().unwrap().clone();
    let distance = arm.min_collision_distance(&JointState::new(
        Instant::now(),
        PlanarArm::joint_names(),
        final_positions.clone(),
        vec![],
    ))?;
    println!(
        "published {} trajectories, final joint positions {:?}, distance to the wall {:.3} m",
        controller.published, final_positions, distance
    );
    Ok(())
}
