use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bma_ts::Monotonic;
use parking_lot::Mutex;

use crate::plugin::{
    ControllerHandle, ControllerManager, ControllerState, ParamSource, RobotModel, StateMonitor,
};
use crate::types::{ExecutionStatus, JointKind, JointState, RobotTrajectory};
use crate::{Error, Result};

/// Robot model fixture with scriptable joints and joint groups
#[derive(Default)]
pub struct SimRobotModel {
    joints: Vec<(Arc<str>, JointKind)>,
    groups: BTreeMap<Arc<str>, Vec<Arc<str>>>,
}

impl SimRobotModel {
    /// Creates a new model with no joints
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a joint, can be used as a build pattern
    pub fn with_joint(mut self, name: &str, kind: JointKind) -> Self {
        self.joints.push((name.into(), kind));
        self
    }
    /// Adds a named joint group, can be used as a build pattern
    pub fn with_group(mut self, name: &str, joints: &[&str]) -> Self {
        self.groups
            .insert(name.into(), joints.iter().map(|&j| Arc::from(j)).collect());
        self
    }
}

impl RobotModel for SimRobotModel {
    fn joint_names(&self) -> Vec<Arc<str>> {
        self.joints.iter().map(|(name, _)| name.clone()).collect()
    }
    fn joint_kind(&self, joint: &str) -> Option<JointKind> {
        self.joints
            .iter()
            .find(|(name, _)| name.as_ref() == joint)
            .map(|&(_, kind)| kind)
    }
    fn group_joints(&self, group: &str) -> Option<Vec<Arc<str>>> {
        self.groups.get(group).cloned()
    }
    fn joint_bounds(&self, _joint: &str) -> Option<(f64, f64)> {
        None
    }
}

/// State monitor fixture returning a pre-set joint state sample
#[derive(Default, Clone)]
pub struct SimStateMonitor {
    state: Arc<Mutex<Option<JointState>>>,
}

impl SimStateMonitor {
    /// Creates a new monitor with no state available
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the sample returned to the executors
    pub fn set(&self, names: &[&str], positions: &[f64], velocities: &[f64]) {
        *self.state.lock() = Some(JointState {
            names: names.iter().map(|&n| Arc::from(n)).collect(),
            positions: positions.to_vec(),
            velocities: velocities.to_vec(),
            stamp: Monotonic::now(),
        });
    }
    /// Drops the sample: the monitor reports no state available
    pub fn clear(&self) {
        *self.state.lock() = None;
    }
}

impl StateMonitor for SimStateMonitor {
    fn current_state(&self) -> Option<JointState> {
        self.state.lock().clone()
    }
}

struct SimController {
    joints: BTreeSet<Arc<str>>,
    state: ControllerState,
    execution_time: Option<Duration>,
    final_status: ExecutionStatus,
    fail_handle: bool,
}

#[derive(Default)]
struct SimInner {
    controllers: BTreeMap<Arc<str>, SimController>,
    switch_requests: Vec<(Vec<Arc<str>>, Vec<Arc<str>>)>,
    fail_switches: bool,
    dispatched: Vec<(Arc<str>, Vec<Arc<str>>)>,
    cancelled: Vec<Arc<str>>,
}

/// Controller manager fixture with scriptable controllers and handles
///
/// Handles execute on wall clock: a dispatched part is RUNNING until its
/// nominal duration (or the per-controller override) elapses, then reports
/// the configured final status. Switch and dispatch requests are recorded for
/// assertions.
#[derive(Default, Clone)]
pub struct SimControllerManager {
    inner: Arc<Mutex<SimInner>>,
}

impl SimControllerManager {
    /// Creates a new manager with no controllers
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a controller, can be used as a build pattern
    pub fn with_controller(self, name: &str, joints: &[&str], active: bool) -> Self {
        self.inner.lock().controllers.insert(
            name.into(),
            SimController {
                joints: joints.iter().map(|&j| Arc::from(j)).collect(),
                state: ControllerState {
                    active,
                    default: false,
                },
                execution_time: None,
                final_status: ExecutionStatus::Succeeded,
                fail_handle: false,
            },
        );
        self
    }
    /// Flips the activity flag directly, bypassing switch bookkeeping
    pub fn set_active(&self, name: &str, active: bool) {
        if let Some(controller) = self.inner.lock().controllers.get_mut(name) {
            controller.state.active = active;
        }
    }
    /// Overrides the wall-clock runtime of the controller's parts
    pub fn set_execution_time(&self, name: &str, time: Duration) {
        if let Some(controller) = self.inner.lock().controllers.get_mut(name) {
            controller.execution_time = Some(time);
        }
    }
    /// Sets the terminal status the controller's parts report
    pub fn set_final_status(&self, name: &str, status: ExecutionStatus) {
        if let Some(controller) = self.inner.lock().controllers.get_mut(name) {
            controller.final_status = status;
        }
    }
    /// Makes every switch request fail
    pub fn fail_switches(&self, value: bool) {
        self.inner.lock().fail_switches = value;
    }
    /// Makes handle acquisition fail for the given controller
    pub fn fail_handles(&self, name: &str, value: bool) {
        if let Some(controller) = self.inner.lock().controllers.get_mut(name) {
            controller.fail_handle = value;
        }
    }
    /// All switch requests seen so far, in order
    pub fn switch_requests(&self) -> Vec<(Vec<Arc<str>>, Vec<Arc<str>>)> {
        self.inner.lock().switch_requests.clone()
    }
    /// All dispatched parts so far: (controller, part joint names), in order
    pub fn dispatched(&self) -> Vec<(Arc<str>, Vec<Arc<str>>)> {
        self.inner.lock().dispatched.clone()
    }
    /// Controllers whose handles have been cancelled, in order
    pub fn cancelled(&self) -> Vec<Arc<str>> {
        self.inner.lock().cancelled.clone()
    }
}

impl ControllerManager for SimControllerManager {
    fn controller_names(&self) -> Vec<Arc<str>> {
        self.inner.lock().controllers.keys().cloned().collect()
    }
    fn controller_joints(&self, name: &str) -> Result<BTreeSet<Arc<str>>> {
        self.inner
            .lock()
            .controllers
            .get(name)
            .map(|c| c.joints.clone())
            .ok_or_else(|| Error::UnknownController(name.into()))
    }
    fn controller_state(&self, name: &str) -> Result<ControllerState> {
        self.inner
            .lock()
            .controllers
            .get(name)
            .map(|c| c.state)
            .ok_or_else(|| Error::UnknownController(name.into()))
    }
    fn switch_controllers(&self, activate: &[Arc<str>], deactivate: &[Arc<str>]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .switch_requests
            .push((activate.to_vec(), deactivate.to_vec()));
        if inner.fail_switches {
            return Err(Error::failed("switch rejected"));
        }
        for name in activate.iter().chain(deactivate.iter()) {
            if !inner.controllers.contains_key(name.as_ref()) {
                return Err(Error::UnknownController(name.to_string()));
            }
        }
        for name in activate {
            if let Some(controller) = inner.controllers.get_mut(name.as_ref()) {
                controller.state.active = true;
            }
        }
        for name in deactivate {
            if let Some(controller) = inner.controllers.get_mut(name.as_ref()) {
                controller.state.active = false;
            }
        }
        Ok(())
    }
    fn controller_handle(&self, name: &str) -> Result<Box<dyn ControllerHandle>> {
        let inner = self.inner.lock();
        let Some((key, controller)) = inner.controllers.get_key_value(name) else {
            return Err(Error::UnknownController(name.into()));
        };
        if controller.fail_handle {
            return Err(Error::handle(format!("handle unavailable: {}", name)));
        }
        Ok(Box::new(SimHandle {
            name: key.clone(),
            inner: self.inner.clone(),
            execution_time: controller.execution_time,
            final_status: controller.final_status,
            started: None,
            preempted: false,
        }))
    }
}

/// Scriptable in-flight part handle produced by [`SimControllerManager`]
pub struct SimHandle {
    name: Arc<str>,
    inner: Arc<Mutex<SimInner>>,
    execution_time: Option<Duration>,
    final_status: ExecutionStatus,
    started: Option<(Monotonic, Duration)>,
    preempted: bool,
}

impl ControllerHandle for SimHandle {
    fn send_trajectory(&mut self, part: &RobotTrajectory) -> Result<()> {
        let runtime = self.execution_time.unwrap_or_else(|| part.duration());
        self.started = Some((Monotonic::now(), runtime));
        self.inner
            .lock()
            .dispatched
            .push((self.name.clone(), part.joint_trajectory.joint_names.clone()));
        Ok(())
    }
    fn cancel(&mut self) -> Result<()> {
        if self.last_execution_status().is_running() {
            self.preempted = true;
        }
        self.inner.lock().cancelled.push(self.name.clone());
        Ok(())
    }
    fn wait_for_execution(&mut self, timeout: Option<Duration>) -> ExecutionStatus {
        let waited = Monotonic::now();
        loop {
            let status = self.last_execution_status();
            if status.is_terminal() {
                return status;
            }
            if let Some(timeout) = timeout {
                if waited.elapsed() >= timeout {
                    return status;
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
    fn last_execution_status(&self) -> ExecutionStatus {
        if self.preempted {
            return ExecutionStatus::Preempted;
        }
        match self.started {
            None => ExecutionStatus::Unknown,
            Some((started, runtime)) if started.elapsed() >= runtime => self.final_status,
            Some(_) => ExecutionStatus::Running,
        }
    }
}

/// Parameter source fixture backed by a key/value map
#[derive(Default, Clone)]
pub struct SimParams {
    values: BTreeMap<String, f64>,
}

impl SimParams {
    /// Creates an empty parameter source
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a value, can be used as a build pattern
    pub fn with_value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_owned(), value);
        self
    }
}

impl ParamSource for SimParams {
    fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let sim = SimControllerManager::new().with_controller("arm", &["j1"], true);
        let mut handle = sim.controller_handle("arm").unwrap();
        assert_eq!(handle.last_execution_status(), ExecutionStatus::Unknown);
        let trajectory: RobotTrajectory = crate::types::JointTrajectory {
            joint_names: vec!["j1".into()],
            points: vec![crate::types::TrajectoryPoint {
                time_from_start: Duration::from_millis(30),
                positions: vec![1.0],
                ..Default::default()
            }],
        }
        .into();
        handle.send_trajectory(&trajectory).unwrap();
        assert!(handle.last_execution_status().is_running());
        let status = handle.wait_for_execution(Some(Duration::from_secs(1)));
        assert_eq!(status, ExecutionStatus::Succeeded);
        assert_eq!(sim.dispatched().len(), 1);
    }

    #[test]
    fn test_handle_cancel() {
        let sim = SimControllerManager::new().with_controller("arm", &["j1"], true);
        sim.set_execution_time("arm", Duration::from_secs(5));
        let mut handle = sim.controller_handle("arm").unwrap();
        handle
            .send_trajectory(&RobotTrajectory::default())
            .unwrap();
        assert!(handle.last_execution_status().is_running());
        handle.cancel().unwrap();
        assert_eq!(handle.last_execution_status(), ExecutionStatus::Preempted);
        assert_eq!(sim.cancelled().len(), 1);
    }

    #[test]
    fn test_final_status_override() {
        let sim = SimControllerManager::new().with_controller("arm", &["j1"], true);
        sim.set_final_status("arm", ExecutionStatus::Failed);
        let mut handle = sim.controller_handle("arm").unwrap();
        handle
            .send_trajectory(&RobotTrajectory::default())
            .unwrap();
        assert_eq!(
            handle.wait_for_execution(None),
            ExecutionStatus::Failed
        );
    }
}
