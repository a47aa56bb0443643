use std::f64::consts::{PI, TAU};

use tracing::debug;

use crate::plugin::RobotModel;
use crate::types::{JointKind, JointState, TrajectoryContext};
use crate::{Error, Result};

/// Magnitude of the shortest rotation from `a` to `b`
fn shortest_angular_distance(a: f64, b: f64) -> f64 {
    let d = (b - a).rem_euclid(TAU);
    if d > PI {
        TAU - d
    } else {
        d
    }
}

/// Compares the first waypoint of each part of the context against the
/// observed robot state
///
/// Revolute and continuous joints are compared via the shortest angular
/// distance, prismatic joints via the absolute difference, fixed joints are
/// skipped. Multi-DOF parts are not validated (the state sample carries
/// scalar positions only). A tolerance of 0 disables validation entirely.
pub fn validate_start_state(
    context: &TrajectoryContext,
    state: &JointState,
    model: &dyn RobotModel,
    tolerance: f64,
) -> Result<()> {
    if tolerance <= 0.0 {
        return Ok(());
    }
    let mut offending = Vec::new();
    for part in &context.parts {
        if !part.multi_dof_trajectory.is_empty() {
            debug!("multi-DOF part start state is not validated");
        }
        let trajectory = &part.joint_trajectory;
        let Some(first) = trajectory.points.first() else {
            continue;
        };
        for (column, name) in trajectory.joint_names.iter().enumerate() {
            let Some(target) = first.positions.get(column).copied() else {
                return Err(Error::invalid_data(format!(
                    "no start position for joint {}",
                    name
                )));
            };
            let Some(current) = state.position_of(name) else {
                return Err(Error::StartState(format!("no state for joint {}", name)));
            };
            let deviation = match model.joint_kind(name) {
                Some(JointKind::Fixed) => continue,
                Some(JointKind::Revolute | JointKind::Continuous) => {
                    shortest_angular_distance(current, target)
                }
                // prismatic and unknown joints: plain distance
                _ => (target - current).abs(),
            };
            if deviation > tolerance {
                offending.push(format!(
                    "{}: |{:.4} - {:.4}| = {:.4} > {:.4}",
                    name, current, target, deviation, tolerance
                ));
            }
        }
    }
    if offending.is_empty() {
        Ok(())
    } else {
        Err(Error::StartState(offending.join("; ")))
    }
}
