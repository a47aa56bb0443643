use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionStatus, JointKind, JointState, RobotTrajectory};
use crate::Result;

/// Activity flags of a controller, as reported by the manager plugin
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// The controller is loaded and commands its joints
    pub active: bool,
    /// The controller is the default one for its joints
    pub default: bool,
}

/// Read-only kinematic description of the robot
pub trait RobotModel: Send + Sync {
    /// All joint names known to the model
    fn joint_names(&self) -> Vec<Arc<str>>;
    /// Kind of the given joint, None if unknown
    fn joint_kind(&self, joint: &str) -> Option<JointKind>;
    /// Joints of a named joint group, None if the group is unknown
    fn group_joints(&self, group: &str) -> Option<Vec<Arc<str>>>;
    /// Position bounds of the given joint, None if unbounded or unknown
    fn joint_bounds(&self, joint: &str) -> Option<(f64, f64)>;
}

/// Live robot state sampler
pub trait StateMonitor: Send + Sync {
    /// The most recent state sample, None if no fresh state is available
    fn current_state(&self) -> Option<JointState>;
}

/// An opaque runtime object representing one in-flight trajectory part on one
/// controller
///
/// Handles are obtained from the [`ControllerManager`] per dispatch and live
/// for a single part. [`ControllerHandle::last_execution_status`] MUST be
/// non-blocking: the executors poll it under a mutex.
pub trait ControllerHandle: Send {
    /// Starts executing the given part
    fn send_trajectory(&mut self, part: &RobotTrajectory) -> Result<()>;
    /// Requests cancellation of the running part (best-effort)
    fn cancel(&mut self) -> Result<()>;
    /// Blocks until the part reaches a terminal status or the timeout expires,
    /// returns the status observed last
    fn wait_for_execution(&mut self, timeout: Option<Duration>) -> ExecutionStatus;
    /// The current status of the part (non-blocking)
    fn last_execution_status(&self) -> ExecutionStatus;
}

/// The controller manager plugin
///
/// The concrete implementation is injected at construction so tests can
/// supply a simulated one (see the `sim` module).
pub trait ControllerManager: Send + Sync {
    /// Names of all known controllers
    fn controller_names(&self) -> Vec<Arc<str>>;
    /// Joints actuated by the given controller
    fn controller_joints(&self, name: &str) -> Result<BTreeSet<Arc<str>>>;
    /// Activity state of the given controller
    fn controller_state(&self, name: &str) -> Result<ControllerState>;
    /// Atomically activates and deactivates the given controllers
    fn switch_controllers(&self, activate: &[Arc<str>], deactivate: &[Arc<str>]) -> Result<()>;
    /// Obtains a fresh handle for the given controller
    fn controller_handle(&self, name: &str) -> Result<Box<dyn ControllerHandle>>;
}

/// An opaque key/value parameter source, read at construction
pub trait ParamSource: Send + Sync {
    /// Numeric parameter by key, None if absent
    fn get_f64(&self, key: &str) -> Option<f64>;
}
