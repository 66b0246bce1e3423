// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains everything needed to jog a robot arm: the calculation loop, the collision monitor,
//! the shared state and the server tying them together.

pub mod collision_check;
pub mod control_tools;
pub mod jog_calcs;
pub mod jog_server;
pub mod joint_limiting;
pub mod kinematics;
pub mod low_pass_filter;
pub mod parameters;
pub mod shared_state;
pub mod types;
