use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use crate::continuous::{run_continuous, QueueSlot};
use crate::distribute::distribute_trajectory;
use crate::events::{EventBus, EXECUTION_EVENT_TOPIC};
use crate::executor::{run_batch, ExecSlot, RunState, Shared, TimeIndex};
use crate::plugin::{ControllerManager, ParamSource, RobotModel, StateMonitor};
use crate::registry::{ControllerRegistry, CONTROLLER_INFO_MAX_AGE};
use crate::select::select_controllers;
use crate::types::{ExecutionStatus, JointState, RobotTrajectory, TrajectoryContext};
use crate::{Error, Result};

/// Invoked exactly once per `execute` batch with the aggregate status
pub type ExecutionCompleteCallback = Box<dyn FnOnce(ExecutionStatus) + Send + 'static>;
/// Invoked with the queue index of each successfully completed context
pub type PartCompleteCallback = Box<dyn Fn(usize) + Send + 'static>;

/// The trajectory execution manager
///
/// Trajectories are configured by [`TrajectoryExecutionManager::push`]
/// (controller selection and distribution happen there), executed in push
/// order by [`TrajectoryExecutionManager::execute`] and monitored against
/// per-controller deadlines. [`TrajectoryExecutionManager::push_and_execute`]
/// bypasses the queue and feeds the continuous executor instead.
///
/// The execution callbacks run on the worker thread and MUST NOT call back
/// into the manager.
pub struct TrajectoryExecutionManager {
    shared: Arc<Shared>,
}

impl TrajectoryExecutionManager {
    /// Creates a manager on top of the given collaborators with the default
    /// configuration
    pub fn new(
        model: Arc<dyn RobotModel>,
        controllers: Arc<dyn ControllerManager>,
        monitor: Arc<dyn StateMonitor>,
    ) -> Self {
        let registry = ControllerRegistry::new(controllers.clone());
        Self {
            shared: Arc::new(Shared {
                model,
                controllers,
                monitor,
                registry,
                config: Mutex::new(ExecutionConfig::default()),
                exec: Mutex::new(ExecSlot::default()),
                exec_cv: Condvar::new(),
                queue: Mutex::new(QueueSlot::default()),
                queue_cv: Condvar::new(),
                time_index: Mutex::new(TimeIndex::default()),
            }),
        }
    }
    /// Creates a manager and reads per-controller scaling/margin overrides
    /// from the given parameter source
    pub fn new_with_params(
        model: Arc<dyn RobotModel>,
        controllers: Arc<dyn ControllerManager>,
        monitor: Arc<dyn StateMonitor>,
        params: &dyn ParamSource,
    ) -> Self {
        let manager = Self::new(model, controllers, monitor);
        let names = manager.shared.controllers.controller_names();
        manager.shared.config.lock().load_overrides(params, &names);
        manager
    }

    /// Enables/disables controller activation management
    pub fn set_manage_controllers(&self, value: bool) {
        self.shared.config.lock().manage_controllers = value;
    }
    /// Enables/disables execution duration monitoring
    pub fn set_execution_duration_monitoring(&self, value: bool) {
        self.shared.config.lock().execution_duration_monitoring = value;
    }
    /// Sets the global expected duration scaling
    pub fn set_allowed_execution_duration_scaling(&self, value: f64) {
        self.shared.config.lock().allowed_execution_duration_scaling = value;
    }
    /// Sets the global goal duration margin
    pub fn set_allowed_goal_duration_margin(&self, value: Duration) {
        self.shared.config.lock().allowed_goal_duration_margin = value;
    }
    /// Sets the start state tolerance (0 disables validation)
    pub fn set_allowed_start_tolerance(&self, value: f64) {
        self.shared.config.lock().allowed_start_tolerance = value;
    }
    /// Enables/disables the robot-stop wait after a successful batch
    pub fn set_wait_for_trajectory_completion(&self, value: bool) {
        self.shared.config.lock().wait_for_trajectory_completion = value;
    }
    /// A copy of the current configuration
    pub fn config(&self) -> ExecutionConfig {
        self.shared.config.lock().clone()
    }
    /// Replaces the configuration
    pub fn set_config(&self, config: ExecutionConfig) {
        *self.shared.config.lock() = config;
    }

    /// Configures a context for the trajectory and appends it to the
    /// sequential queue
    ///
    /// An empty `controllers` slice allows any known controller. Fails if the
    /// trajectory has no joints, no cover exists, distribution fails or the
    /// executor is not idle.
    pub fn push(&self, trajectory: RobotTrajectory, controllers: &[Arc<str>]) -> Result<()> {
        if self.shared.exec.lock().run != RunState::Idle {
            return Err(Error::Busy);
        }
        let context = self.configure(trajectory, controllers)?;
        let mut slot = self.shared.exec.lock();
        if slot.run != RunState::Idle {
            return Err(Error::Busy);
        }
        debug!(controllers = ?context.controllers, "trajectory queued");
        slot.contexts.push(context);
        Ok(())
    }

    /// Starts executing the queued contexts on a worker thread and returns
    /// immediately
    ///
    /// The completion callback receives the final aggregate status exactly
    /// once; the part callback receives the index of each context that
    /// completes successfully. With an empty queue the callback is invoked
    /// with `SUCCEEDED` synchronously. Fails if an execution is already in
    /// progress.
    pub fn execute(
        &self,
        callback: Option<ExecutionCompleteCallback>,
        part_callback: Option<PartCompleteCallback>,
        auto_clear: bool,
    ) -> Result<()> {
        let previous = {
            let mut slot = self.shared.exec.lock();
            if slot.run != RunState::Idle {
                return Err(Error::Busy);
            }
            slot.worker.take()
        };
        if let Some(worker) = previous {
            // the previous batch is done, reap its thread
            let _ = worker.join();
        }
        let mut slot = self.shared.exec.lock();
        if slot.run != RunState::Idle {
            return Err(Error::Busy);
        }
        if slot.contexts.is_empty() {
            drop(slot);
            self.shared.time_index.lock().last_status = ExecutionStatus::Succeeded;
            if let Some(cb) = callback {
                cb(ExecutionStatus::Succeeded);
            }
            return Ok(());
        }
        slot.run = RunState::Validating;
        slot.execution_complete = false;
        slot.stop_requested = false;
        self.shared.time_index.lock().stamps.clear();
        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("traj-executor".into())
            .spawn(move || run_batch(&shared, callback, part_callback, auto_clear))
        {
            Ok(worker) => {
                slot.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                slot.run = RunState::Idle;
                slot.execution_complete = true;
                Err(e.into())
            }
        }
    }

    /// `execute` followed by `wait_for_execution`
    pub fn execute_and_wait(&self, auto_clear: bool) -> Result<ExecutionStatus> {
        self.execute(None, None, auto_clear)?;
        Ok(self.wait_for_execution())
    }

    /// Blocks until the sequential executor is idle and returns the last
    /// aggregate status
    ///
    /// If the continuous executor is active, it is stopped: waiting for
    /// execution and continuous execution are mutually exclusive by contract.
    pub fn wait_for_execution(&self) -> ExecutionStatus {
        self.shared.stop_continuous();
        let mut slot = self.shared.exec.lock();
        while !slot.execution_complete {
            self.shared.exec_cv.wait(&mut slot);
        }
        drop(slot);
        self.last_execution_status()
    }

    /// Configures a context for the trajectory and hands it to the continuous
    /// executor, bypassing the sequential queue
    ///
    /// Execution is fire-and-forget: the context status is recorded into the
    /// last status readback, no callbacks are invoked.
    pub fn push_and_execute(
        &self,
        trajectory: RobotTrajectory,
        controllers: &[Arc<str>],
    ) -> Result<()> {
        let context = self.configure(trajectory, controllers)?;
        let mut queue = self.shared.queue.lock();
        if queue.worker.as_ref().map_or(true, JoinHandle::is_finished) {
            let shared = self.shared.clone();
            queue.worker = Some(
                thread::Builder::new()
                    .name("traj-continuous".into())
                    .spawn(move || run_continuous(shared))?,
            );
        }
        queue.deque.push_back(context);
        self.shared.queue_cv.notify_all();
        Ok(())
    }

    /// Normalises a joint state into a single-waypoint trajectory at time 0
    /// and hands it to the continuous executor
    pub fn push_and_execute_state(
        &self,
        state: &JointState,
        controllers: &[Arc<str>],
    ) -> Result<()> {
        self.push_and_execute(RobotTrajectory::from(state), controllers)
    }

    /// Cancels whichever executor is active; never fails
    pub fn stop_execution(&self, auto_clear: bool) {
        self.shared.stop_execution(auto_clear);
    }

    /// Deletes the sequential queue; legal only while the executor is idle
    pub fn clear(&self) -> Result<()> {
        let mut slot = self.shared.exec.lock();
        if slot.run != RunState::Idle {
            return Err(Error::Busy);
        }
        slot.contexts.clear();
        self.shared.time_index.lock().stamps.clear();
        Ok(())
    }

    /// The expected (context index, waypoint index) pair for the current
    /// time, None when idle or under continuous execution
    pub fn current_expected_trajectory_index(&self) -> Option<(usize, usize)> {
        let slot = self.shared.exec.lock();
        let index = slot.current_index?;
        let context = slot.contexts.get(index)?;
        let time_index = self.shared.time_index.lock();
        let stamp = time_index.stamps.get(index)?;
        let elapsed = stamp.elapsed();
        let points = &context.trajectory.joint_trajectory.points;
        if points.is_empty() {
            return Some((index, 0));
        }
        let waypoint = points
            .partition_point(|p| p.time_from_start < elapsed)
            .min(points.len() - 1);
        Some((index, waypoint))
    }

    /// The aggregate status of the last executed context/batch
    pub fn last_execution_status(&self) -> ExecutionStatus {
        self.shared.time_index.lock().last_status
    }

    /// A copy of the queued contexts
    pub fn trajectories(&self) -> Vec<TrajectoryContext> {
        self.shared.exec.lock().contexts.clone()
    }

    /// Number of contexts waiting in the continuous queue
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().deque.len()
    }

    /// Returns true if every listed controller is active
    pub fn are_controllers_active(&self, names: &[Arc<str>]) -> bool {
        if let Err(e) = self
            .shared
            .registry
            .refresh_if_older_than(CONTROLLER_INFO_MAX_AGE)
        {
            warn!(error = %e, "controller registry refresh failed");
        }
        self.shared.registry.are_active(names)
    }

    /// Makes sure the listed controllers are active, switching if controller
    /// management is enabled
    pub fn ensure_active_controllers(&self, names: &[Arc<str>]) -> Result<()> {
        let manage = self.shared.config.lock().manage_controllers;
        self.shared.registry.ensure_active(names, manage)
    }

    /// Selects a cover for the given joints and makes it active
    pub fn ensure_active_controllers_for_joints(
        &self,
        joints: &BTreeSet<Arc<str>>,
    ) -> Result<()> {
        self.shared
            .registry
            .refresh_if_older_than(CONTROLLER_INFO_MAX_AGE)?;
        let available = self.shared.registry.snapshot();
        let selected = select_controllers(joints, &available)?;
        let names: Vec<Arc<str>> = selected.iter().map(|info| info.name.clone()).collect();
        self.ensure_active_controllers(&names)
    }

    /// Selects a cover for the joints of a named group and makes it active
    pub fn ensure_active_controllers_for_group(&self, group: &str) -> Result<()> {
        let joints = self
            .shared
            .model
            .group_joints(group)
            .ok_or_else(|| Error::invalid_data(format!("unknown joint group: {}", group)))?;
        self.ensure_active_controllers_for_joints(&joints.into_iter().collect())
    }

    /// Maps a textual event to an executor operation ("stop" cancels the
    /// active executor; anything else is logged and ignored)
    pub fn process_event(&self, event: &str) {
        self.shared.process_event(event);
    }

    /// Subscribes the manager to the execution event topic of the given bus
    ///
    /// Events are processed synchronously on the publisher's thread. The
    /// subscription holds a weak reference and outlives the manager safely.
    pub fn bind_event_bus(&self, bus: &EventBus) {
        let weak = Arc::downgrade(&self.shared);
        bus.subscribe(EXECUTION_EVENT_TOPIC, move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.process_event(event);
            }
        });
    }

    /// The controller registry
    pub fn registry(&self) -> &ControllerRegistry {
        &self.shared.registry
    }

    fn configure(
        &self,
        trajectory: RobotTrajectory,
        controllers: &[Arc<str>],
    ) -> Result<TrajectoryContext> {
        let actuated = trajectory.actuated_joints();
        if actuated.is_empty() {
            return Err(Error::EmptyTrajectory);
        }
        self.shared
            .registry
            .refresh_if_older_than(CONTROLLER_INFO_MAX_AGE)?;
        let mut available = self.shared.registry.snapshot();
        if !controllers.is_empty() {
            for name in controllers {
                if !available.iter().any(|info| info.name == *name) {
                    return Err(Error::UnknownController(name.to_string()));
                }
            }
            let restricted: BTreeSet<&str> = controllers.iter().map(|n| n.as_ref()).collect();
            available.retain(|info| restricted.contains(info.name.as_ref()));
        }
        let selected = select_controllers(&actuated, &available)?;
        let parts = distribute_trajectory(&trajectory, &selected)?;
        Ok(TrajectoryContext {
            controllers: selected.into_iter().map(|info| info.name).collect(),
            parts,
            trajectory,
        })
    }
}

impl Drop for TrajectoryExecutionManager {
    fn drop(&mut self) {
        self.shared.stop_execution(true);
        let worker = self.shared.exec.lock().worker.take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
        let worker = {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            self.shared.queue_cv.notify_all();
            queue.worker.take()
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SimControllerManager, SimRobotModel, SimStateMonitor};
    use crate::types::{JointKind, JointTrajectory, TrajectoryPoint};

    fn setup() -> (
        SimControllerManager,
        SimStateMonitor,
        TrajectoryExecutionManager,
    ) {
        let model = Arc::new(
            SimRobotModel::new()
                .with_joint("j1", JointKind::Revolute)
                .with_joint("j2", JointKind::Revolute)
                .with_joint("j3", JointKind::Prismatic)
                .with_group("manipulator", &["j1", "j2"]),
        );
        let sim = SimControllerManager::new()
            .with_controller("arm", &["j1", "j2"], true)
            .with_controller("gripper", &["j3"], true);
        let monitor = SimStateMonitor::new();
        monitor.set(&["j1", "j2", "j3"], &[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);
        let manager =
            TrajectoryExecutionManager::new(model, Arc::new(sim.clone()), Arc::new(monitor.clone()));
        (sim, monitor, manager)
    }

    fn traj(names: &[&str], ms: u64) -> RobotTrajectory {
        JointTrajectory {
            joint_names: names.iter().map(|&n| Arc::from(n)).collect(),
            points: vec![
                TrajectoryPoint {
                    time_from_start: Duration::from_millis(ms / 2),
                    positions: vec![0.0; names.len()],
                    velocities: vec![0.0; names.len()],
                    ..Default::default()
                },
                TrajectoryPoint {
                    time_from_start: Duration::from_millis(ms),
                    positions: vec![0.5; names.len()],
                    velocities: vec![0.0; names.len()],
                    ..Default::default()
                },
            ],
        }
        .into()
    }

    #[test]
    fn test_simple_execution() {
        let (sim, _monitor, manager) = setup();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let parts = Arc::new(Mutex::new(Vec::new()));
        manager.push(traj(&["j1", "j2", "j3"], 100), &[]).unwrap();
        {
            let statuses = statuses.clone();
            let parts = parts.clone();
            manager
                .execute(
                    Some(Box::new(move |status| statuses.lock().push(status))),
                    Some(Box::new(move |index| parts.lock().push(index))),
                    true,
                )
                .unwrap();
        }
        let status = manager.wait_for_execution();
        assert_eq!(status, ExecutionStatus::Succeeded);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(statuses.lock().clone(), [ExecutionStatus::Succeeded]);
        assert_eq!(parts.lock().clone(), [0]);
        let dispatched = sim.dispatched();
        assert_eq!(dispatched.len(), 2);
        // selection order: smaller joint set first
        assert_eq!(dispatched[0].0.as_ref(), "gripper");
        assert_eq!(dispatched[1].0.as_ref(), "arm");
        let gripper_joints: Vec<&str> = dispatched[0].1.iter().map(|j| j.as_ref()).collect();
        let arm_joints: Vec<&str> = dispatched[1].1.iter().map(|j| j.as_ref()).collect();
        assert_eq!(gripper_joints, ["j3"]);
        assert_eq!(arm_joints, ["j1", "j2"]);
        assert!(manager.current_expected_trajectory_index().is_none());
        assert!(manager.trajectories().is_empty());
    }

    #[test]
    fn test_push_clear() {
        let (_sim, _monitor, manager) = setup();
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        manager.push(traj(&["j3"], 100), &[]).unwrap();
        assert_eq!(manager.trajectories().len(), 2);
        manager.clear().unwrap();
        assert!(manager.trajectories().is_empty());
        assert!(manager.current_expected_trajectory_index().is_none());
    }

    #[test]
    fn test_push_rejections() {
        let (_sim, _monitor, manager) = setup();
        let err = manager
            .push(RobotTrajectory::default(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::EmptyTrajectory), "{}", err);
        let err = manager
            .push(traj(&["j1", "j2"], 100), &["gripper".into()])
            .unwrap_err();
        assert!(matches!(err, Error::NoCover(_)), "{}", err);
        let err = manager
            .push(traj(&["j1"], 100), &["bogus".into()])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownController(_)), "{}", err);
    }

    #[test]
    fn test_execute_stop_preempted() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_secs(2));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        {
            let statuses = statuses.clone();
            manager
                .execute(
                    Some(Box::new(move |status| statuses.lock().push(status))),
                    None,
                    true,
                )
                .unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        manager.stop_execution(true);
        assert_eq!(manager.last_execution_status(), ExecutionStatus::Preempted);
        assert!(manager.current_expected_trajectory_index().is_none());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(statuses.lock().clone(), [ExecutionStatus::Preempted]);
        assert!(sim.cancelled().iter().any(|n| n.as_ref() == "arm"));
        assert!(manager.trajectories().is_empty());
    }

    #[test]
    fn test_deadline_timeout() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_millis(500));
        manager.set_allowed_execution_duration_scaling(1.2);
        manager.set_allowed_goal_duration_margin(Duration::from_millis(10));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        {
            let statuses = statuses.clone();
            manager
                .execute(
                    Some(Box::new(move |status| statuses.lock().push(status))),
                    None,
                    true,
                )
                .unwrap();
        }
        let status = manager.wait_for_execution();
        assert_eq!(status, ExecutionStatus::TimedOut);
        assert!(sim.cancelled().iter().any(|n| n.as_ref() == "arm"));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(statuses.lock().clone(), [ExecutionStatus::TimedOut]);
    }

    #[test]
    fn test_monitoring_disabled_allows_overrun() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_millis(300));
        manager.set_execution_duration_monitoring(false);
        manager.set_allowed_goal_duration_margin(Duration::ZERO);
        manager.push(traj(&["j1", "j2"], 50), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);
        assert!(sim.cancelled().is_empty());
    }

    #[test]
    fn test_unmanaged_inactive_aborts() {
        let (sim, _monitor, manager) = setup();
        sim.set_active("arm", false);
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Aborted);
        assert!(sim.dispatched().is_empty());
    }

    #[test]
    fn test_managed_activates() {
        let (sim, _monitor, manager) = setup();
        sim.set_active("arm", false);
        manager.set_manage_controllers(true);
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);
        let requests = sim.switch_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0[0].as_ref(), "arm");
        assert!(requests[0].1.is_empty());
    }

    #[test]
    fn test_start_state_deviation_aborts() {
        let (sim, monitor, manager) = setup();
        monitor.set(&["j1", "j2", "j3"], &[1.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Aborted);
        assert!(sim.dispatched().is_empty());
        // zero tolerance disables the check
        manager.set_allowed_start_tolerance(0.0);
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_handle_failure_cancels_dispatched() {
        let (sim, _monitor, manager) = setup();
        sim.fail_handles("arm", true);
        sim.set_execution_time("gripper", Duration::from_millis(300));
        manager.push(traj(&["j1", "j2", "j3"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Aborted);
        // the gripper part went out first and had to be cancelled
        assert_eq!(sim.dispatched().len(), 1);
        assert!(sim.cancelled().iter().any(|n| n.as_ref() == "gripper"));
    }

    #[test]
    fn test_controller_failure_aggregated() {
        let (sim, _monitor, manager) = setup();
        sim.set_final_status("gripper", ExecutionStatus::Failed);
        manager.push(traj(&["j1", "j2", "j3"], 100), &[]).unwrap();
        let status = manager.execute_and_wait(true).unwrap();
        assert_eq!(status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_busy_guards() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_millis(500));
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        manager.execute(None, None, true).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(
            manager.push(traj(&["j3"], 100), &[]).unwrap_err(),
            Error::Busy
        ));
        assert!(matches!(
            manager.execute(None, None, true).unwrap_err(),
            Error::Busy
        ));
        assert!(matches!(manager.clear().unwrap_err(), Error::Busy));
        manager.stop_execution(true);
        assert_eq!(manager.last_execution_status(), ExecutionStatus::Preempted);
    }

    #[test]
    fn test_empty_queue_executes_immediately() {
        let (_sim, _monitor, manager) = setup();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        {
            let statuses = statuses.clone();
            manager
                .execute(
                    Some(Box::new(move |status| statuses.lock().push(status))),
                    None,
                    true,
                )
                .unwrap();
        }
        assert_eq!(statuses.lock().clone(), [ExecutionStatus::Succeeded]);
        assert_eq!(manager.last_execution_status(), ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_expected_trajectory_index() {
        let (_sim, _monitor, manager) = setup();
        manager.push(traj(&["j1", "j2"], 400), &[]).unwrap();
        manager.execute(None, None, true).unwrap();
        thread::sleep(Duration::from_millis(100));
        let (context, waypoint) = manager.current_expected_trajectory_index().unwrap();
        assert_eq!(context, 0);
        assert_eq!(waypoint, 0);
        thread::sleep(Duration::from_millis(200));
        let (context, waypoint) = manager.current_expected_trajectory_index().unwrap();
        assert_eq!(context, 0);
        assert_eq!(waypoint, 1);
        manager.wait_for_execution();
        assert!(manager.current_expected_trajectory_index().is_none());
    }

    #[test]
    fn test_continuous_overlap() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_millis(300));
        sim.set_execution_time("gripper", Duration::from_millis(50));
        manager.push_and_execute(traj(&["j1", "j2"], 100), &[]).unwrap();
        manager.push_and_execute(traj(&["j3"], 100), &[]).unwrap();
        manager.push_and_execute(traj(&["j1", "j2"], 100), &[]).unwrap();
        thread::sleep(Duration::from_millis(150));
        // the gripper context overlapped the still-running arm context, the
        // third context has to wait for the arm handle
        let dispatched = sim.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0].0.as_ref(), "arm");
        assert_eq!(dispatched[1].0.as_ref(), "gripper");
        thread::sleep(Duration::from_millis(400));
        let dispatched = sim.dispatched();
        assert_eq!(dispatched.len(), 3);
        assert_eq!(dispatched[2].0.as_ref(), "arm");
    }

    #[test]
    fn test_push_and_execute_state() {
        let (sim, _monitor, manager) = setup();
        let state = JointState {
            names: vec!["j3".into()],
            positions: vec![0.2],
            velocities: vec![0.0],
            stamp: bma_ts::Monotonic::now(),
        };
        manager.push_and_execute_state(&state, &[]).unwrap();
        thread::sleep(Duration::from_millis(100));
        let dispatched = sim.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0.as_ref(), "gripper");
        assert_eq!(manager.last_execution_status(), ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_wait_stops_continuous() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_millis(500));
        manager.push_and_execute(traj(&["j1", "j2"], 100), &[]).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sim.dispatched().len(), 1);
        manager.wait_for_execution();
        thread::sleep(Duration::from_millis(100));
        assert!(sim.cancelled().iter().any(|n| n.as_ref() == "arm"));
        assert_eq!(manager.queued(), 0);
    }

    #[test]
    fn test_event_bus_stop() {
        let (_sim, _monitor, manager) = setup();
        let bus = EventBus::new();
        manager.bind_event_bus(&bus);
        manager.push(traj(&["j1", "j2"], 2000), &[]).unwrap();
        manager.execute(None, None, true).unwrap();
        thread::sleep(Duration::from_millis(50));
        bus.publish(EXECUTION_EVENT_TOPIC, "stop");
        assert_eq!(manager.last_execution_status(), ExecutionStatus::Preempted);
        assert!(manager.current_expected_trajectory_index().is_none());
        // unknown events are ignored
        bus.publish(EXECUTION_EVENT_TOPIC, "hold");
    }

    #[test]
    fn test_drop_during_execution_joins() {
        let (sim, _monitor, manager) = setup();
        sim.set_execution_time("arm", Duration::from_secs(3));
        manager.push(traj(&["j1", "j2"], 100), &[]).unwrap();
        manager.execute(None, None, true).unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(manager);
        assert!(sim.cancelled().iter().any(|n| n.as_ref() == "arm"));
    }

    #[test]
    fn test_group_activation() {
        let (sim, _monitor, manager) = setup();
        sim.set_active("arm", false);
        manager.set_manage_controllers(true);
        manager
            .ensure_active_controllers_for_group("manipulator")
            .unwrap();
        assert_eq!(sim.switch_requests().len(), 1);
        assert!(manager.are_controllers_active(&["arm".into()]));
        assert!(matches!(
            manager
                .ensure_active_controllers_for_group("bogus")
                .unwrap_err(),
            Error::InvalidData(_)
        ));
    }

    #[test]
    fn test_sequential_batch_order() {
        let (sim, _monitor, manager) = setup();
        let parts = Arc::new(Mutex::new(Vec::new()));
        manager.push(traj(&["j1", "j2"], 50), &[]).unwrap();
        manager.push(traj(&["j3"], 50), &[]).unwrap();
        {
            let parts = parts.clone();
            manager
                .execute(None, Some(Box::new(move |index| parts.lock().push(index))), true)
                .unwrap();
        }
        let status = manager.wait_for_execution();
        assert_eq!(status, ExecutionStatus::Succeeded);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(parts.lock().clone(), [0, 1]);
        let dispatched = sim.dispatched();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0].0.as_ref(), "arm");
        assert_eq!(dispatched[1].0.as_ref(), "gripper");
    }
}
