use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bma_ts::Monotonic;
use serde::{Deserialize, Serialize};

/// Kind of a robot joint, as reported by the robot model collaborator
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointKind {
    /// Rotational joint with position bounds
    Revolute,
    /// Rotational joint with no bounds (full turns allowed)
    Continuous,
    /// Linear joint
    Prismatic,
    /// Immovable joint, never actuated
    Fixed,
}

/// A single waypoint of a joint-space trajectory
///
/// The velocity, acceleration and effort rows are optional: an empty vector
/// means the row is not present. A non-empty row MUST match the joint name
/// list of the owning trajectory in length.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Time offset of the waypoint from the trajectory start
    pub time_from_start: Duration,
    /// Joint positions, one per joint name
    pub positions: Vec<f64>,
    /// Joint velocities (optional row)
    pub velocities: Vec<f64>,
    /// Joint accelerations (optional row)
    pub accelerations: Vec<f64>,
    /// Joint efforts (optional row)
    pub effort: Vec<f64>,
}

/// A single-DOF joint trajectory: one value column per joint name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointTrajectory {
    /// Names of the actuated joints
    pub joint_names: Vec<Arc<str>>,
    /// Trajectory waypoints, ordered by `time_from_start`
    pub points: Vec<TrajectoryPoint>,
}

impl JointTrajectory {
    /// Returns true if the trajectory has no joints or no waypoints
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joint_names.is_empty() || self.points.is_empty()
    }
    /// Nominal duration: the time offset of the last waypoint
    #[inline]
    pub fn duration(&self) -> Duration {
        self.points
            .last()
            .map_or(Duration::ZERO, |p| p.time_from_start)
    }
}

/// A rigid body transform of a multi-DOF joint
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Transform {
    /// Translation (x, y, z)
    pub translation: [f64; 3],
    /// Rotation quaternion (x, y, z, w)
    pub rotation: [f64; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// A single waypoint of a multi-DOF trajectory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiDofPoint {
    /// Time offset of the waypoint from the trajectory start
    pub time_from_start: Duration,
    /// One transform per joint name
    pub transforms: Vec<Transform>,
}

/// A multi-DOF joint trajectory (free-floating and planar joints)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiDofTrajectory {
    /// Names of the actuated multi-DOF joints
    pub joint_names: Vec<Arc<str>>,
    /// Trajectory waypoints, ordered by `time_from_start`
    pub points: Vec<MultiDofPoint>,
}

impl MultiDofTrajectory {
    /// Returns true if the trajectory has no joints or no waypoints
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joint_names.is_empty() || self.points.is_empty()
    }
    /// Nominal duration: the time offset of the last waypoint
    #[inline]
    pub fn duration(&self) -> Duration {
        self.points
            .last()
            .map_or(Duration::ZERO, |p| p.time_from_start)
    }
}

/// A complete robot trajectory: two parallel sub-structures, either of which
/// may be empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotTrajectory {
    /// The single-DOF part
    pub joint_trajectory: JointTrajectory,
    /// The multi-DOF part
    pub multi_dof_trajectory: MultiDofTrajectory,
}

impl RobotTrajectory {
    /// The union of joint names across both sub-structures
    pub fn actuated_joints(&self) -> BTreeSet<Arc<str>> {
        self.joint_trajectory
            .joint_names
            .iter()
            .chain(self.multi_dof_trajectory.joint_names.iter())
            .cloned()
            .collect()
    }
    /// Returns true if both sub-structures are empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joint_trajectory.is_empty() && self.multi_dof_trajectory.is_empty()
    }
    /// Nominal duration: the maximum across both sub-structures
    #[inline]
    pub fn duration(&self) -> Duration {
        self.joint_trajectory
            .duration()
            .max(self.multi_dof_trajectory.duration())
    }
}

impl From<JointTrajectory> for RobotTrajectory {
    fn from(joint_trajectory: JointTrajectory) -> Self {
        Self {
            joint_trajectory,
            multi_dof_trajectory: <_>::default(),
        }
    }
}

impl From<&JointState> for RobotTrajectory {
    /// Normalises a joint state into a single-waypoint trajectory at time 0
    fn from(state: &JointState) -> Self {
        JointTrajectory {
            joint_names: state.names.clone(),
            points: vec![TrajectoryPoint {
                time_from_start: Duration::ZERO,
                positions: state.positions.clone(),
                velocities: state.velocities.clone(),
                ..Default::default()
            }],
        }
        .into()
    }
}

/// A live joint state sample
#[derive(Debug, Clone)]
pub struct JointState {
    /// Joint names
    pub names: Vec<Arc<str>>,
    /// Joint positions, one per name
    pub positions: Vec<f64>,
    /// Joint velocities, one per name (may be empty if not sampled)
    pub velocities: Vec<f64>,
    /// Monotonic sample time
    pub stamp: Monotonic,
}

impl JointState {
    /// Position of the given joint, None if not sampled
    pub fn position_of(&self, joint: &str) -> Option<f64> {
        let pos = self.names.iter().position(|n| n.as_ref() == joint)?;
        self.positions.get(pos).copied()
    }
    /// Velocity of the given joint, None if not sampled
    pub fn velocity_of(&self, joint: &str) -> Option<f64> {
        let pos = self.names.iter().position(|n| n.as_ref() == joint)?;
        self.velocities.get(pos).copied()
    }
}

/// Execution status, reported by controller handles and the executors
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    /// No execution has been performed yet (or the status is lost)
    #[default]
    Unknown,
    /// Execution is in progress
    Running,
    /// Execution finished successfully
    Succeeded,
    /// Execution was cancelled by a stop request
    Preempted,
    /// Execution overran its deadline and was cancelled
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
    /// Execution was aborted before or during dispatch
    Aborted,
    /// The controller reported a failure
    Failed,
}

impl ExecutionStatus {
    /// Returns true while the execution is in progress
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, ExecutionStatus::Running)
    }
    /// Returns true for final statuses (neither unknown nor running)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Unknown | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Unknown => "UNKNOWN",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Preempted => "PREEMPTED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// A trajectory bound to the controllers selected to execute it
///
/// The parts list is parallel to the controller list: `parts[i]` contains
/// exactly the rows of the original trajectory actuated by `controllers[i]`.
/// The originating request is retained for progress queries.
#[derive(Debug, Clone)]
pub struct TrajectoryContext {
    /// Selected controller names, in selection order
    pub controllers: Vec<Arc<str>>,
    /// One trajectory part per selected controller
    pub parts: Vec<RobotTrajectory>,
    /// The originating request
    pub trajectory: RobotTrajectory,
}
