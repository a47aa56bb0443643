use std::collections::BTreeMap;

use crate::registry::ControllerInfo;
use crate::types::{
    JointTrajectory, MultiDofPoint, MultiDofTrajectory, RobotTrajectory, TrajectoryPoint,
};
use crate::{Error, Result};

/// Splits a trajectory into per-controller parts
///
/// Returns one part per selected controller, parallel to `selected`, each
/// restricted to the joints assigned to that controller. A joint listed by
/// several selected controllers is assigned to the one with the smallest
/// joint set (ties by name), so no joint is driven twice. Waypoint timing is
/// preserved; value rows are reindexed to the new joint ordering.
pub fn distribute_trajectory(
    trajectory: &RobotTrajectory,
    selected: &[ControllerInfo],
) -> Result<Vec<RobotTrajectory>> {
    let assignment = assign_joints(trajectory, selected)?;
    let mut parts = Vec::with_capacity(selected.len());
    for (index, _) in selected.iter().enumerate() {
        let single_columns: Vec<usize> = trajectory
            .joint_trajectory
            .joint_names
            .iter()
            .enumerate()
            .filter(|(_, name)| assignment[name.as_ref() as &str] == index)
            .map(|(i, _)| i)
            .collect();
        let multi_columns: Vec<usize> = trajectory
            .multi_dof_trajectory
            .joint_names
            .iter()
            .enumerate()
            .filter(|(_, name)| assignment[name.as_ref() as &str] == index)
            .map(|(i, _)| i)
            .collect();
        parts.push(RobotTrajectory {
            joint_trajectory: split_single(&trajectory.joint_trajectory, &single_columns)?,
            multi_dof_trajectory: split_multi(&trajectory.multi_dof_trajectory, &multi_columns)?,
        });
    }
    Ok(parts)
}

/// Maps every actuated joint to the index of its assigned controller
fn assign_joints<'a>(
    trajectory: &'a RobotTrajectory,
    selected: &[ControllerInfo],
) -> Result<BTreeMap<&'a str, usize>> {
    // assignment prefers smaller joint sets, ties by name
    let mut order: Vec<usize> = (0..selected.len()).collect();
    order.sort_by_key(|&i| selected[i].sort_key());
    let mut assignment = BTreeMap::new();
    let mut unassigned = Vec::new();
    for name in trajectory
        .joint_trajectory
        .joint_names
        .iter()
        .chain(trajectory.multi_dof_trajectory.joint_names.iter())
    {
        match order
            .iter()
            .find(|&&i| selected[i].joints.contains(name))
            .copied()
        {
            Some(index) => {
                assignment.insert(name.as_ref() as &str, index);
            }
            None => unassigned.push(name.as_ref() as &str),
        }
    }
    if unassigned.is_empty() {
        Ok(assignment)
    } else {
        Err(Error::Unassigned(unassigned.join(", ")))
    }
}

fn pick(row: &[f64], columns: &[usize], total: usize, what: &str) -> Result<Vec<f64>> {
    if row.is_empty() {
        return Ok(Vec::new());
    }
    if row.len() != total {
        return Err(Error::invalid_data(format!(
            "{} row length {} does not match {} joint names",
            what,
            row.len(),
            total
        )));
    }
    Ok(columns.iter().map(|&i| row[i]).collect())
}

fn split_single(trajectory: &JointTrajectory, columns: &[usize]) -> Result<JointTrajectory> {
    if columns.is_empty() {
        return Ok(JointTrajectory::default());
    }
    let total = trajectory.joint_names.len();
    let mut points = Vec::with_capacity(trajectory.points.len());
    for point in &trajectory.points {
        points.push(TrajectoryPoint {
            time_from_start: point.time_from_start,
            positions: pick(&point.positions, columns, total, "positions")?,
            velocities: pick(&point.velocities, columns, total, "velocities")?,
            accelerations: pick(&point.accelerations, columns, total, "accelerations")?,
            effort: pick(&point.effort, columns, total, "effort")?,
        });
    }
    Ok(JointTrajectory {
        joint_names: columns
            .iter()
            .map(|&i| trajectory.joint_names[i].clone())
            .collect(),
        points,
    })
}

fn split_multi(trajectory: &MultiDofTrajectory, columns: &[usize]) -> Result<MultiDofTrajectory> {
    if columns.is_empty() {
        return Ok(MultiDofTrajectory::default());
    }
    let total = trajectory.joint_names.len();
    let mut points = Vec::with_capacity(trajectory.points.len());
    for point in &trajectory.points {
        if point.transforms.len() != total {
            return Err(Error::invalid_data(format!(
                "transform row length {} does not match {} joint names",
                point.transforms.len(),
                total
            )));
        }
        points.push(MultiDofPoint {
            time_from_start: point.time_from_start,
            transforms: columns.iter().map(|&i| point.transforms[i]).collect(),
        });
    }
    Ok(MultiDofTrajectory {
        joint_names: columns
            .iter()
            .map(|&i| trajectory.joint_names[i].clone())
            .collect(),
        points,
    })
}
