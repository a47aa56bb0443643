use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bma_ts::Monotonic;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::config::ExecutionConfig;
use crate::continuous::QueueSlot;
use crate::manager::{ExecutionCompleteCallback, PartCompleteCallback};
use crate::plugin::{ControllerHandle, ControllerManager, RobotModel, StateMonitor};
use crate::registry::ControllerRegistry;
use crate::types::{ExecutionStatus, TrajectoryContext};
use crate::validate::validate_start_state;

/// Poll step of the executor wait loops
pub(crate) const POLL_STEP: Duration = Duration::from_millis(10);
/// How long cancelled handles are given to acknowledge before the status is
/// reported anyway
const CANCEL_ACK_TIMEOUT: Duration = Duration::from_millis(250);
/// Budget of the robot-stop waiter
const WAIT_FOR_STOP_TIMEOUT: Duration = Duration::from_secs(1);
/// A joint moving slower than this is considered stopped
const IDLE_VELOCITY_EPS: f64 = 1e-3;
/// Consecutive idle samples required by the robot-stop waiter
const IDLE_SAMPLES: usize = 3;

/// Sequential executor run state
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub(crate) enum RunState {
    #[default]
    Idle,
    Validating,
    Executing,
    Cancelling,
}

/// State of the sequential executor, guarded by the execution state mutex
pub(crate) struct ExecSlot {
    /// The queued contexts, executed in push order
    pub contexts: Vec<TrajectoryContext>,
    pub run: RunState,
    /// Index of the context being executed, None when idle
    pub current_index: Option<usize>,
    /// Handles of the context being executed
    pub active_handles: Vec<Box<dyn ControllerHandle>>,
    pub stop_requested: bool,
    pub execution_complete: bool,
    pub worker: Option<JoinHandle<()>>,
}

impl Default for ExecSlot {
    fn default() -> Self {
        Self {
            contexts: Vec::new(),
            run: RunState::Idle,
            current_index: None,
            active_handles: Vec::new(),
            stop_requested: false,
            execution_complete: true,
            worker: None,
        }
    }
}

/// Per-context start stamps and the last aggregate status
#[derive(Default)]
pub(crate) struct TimeIndex {
    pub stamps: Vec<Monotonic>,
    pub last_status: ExecutionStatus,
}

/// State shared between the façade and both executor workers
pub(crate) struct Shared {
    pub model: Arc<dyn RobotModel>,
    pub controllers: Arc<dyn ControllerManager>,
    pub monitor: Arc<dyn StateMonitor>,
    pub registry: ControllerRegistry,
    pub config: Mutex<ExecutionConfig>,
    pub exec: Mutex<ExecSlot>,
    pub exec_cv: Condvar,
    pub queue: Mutex<QueueSlot>,
    pub queue_cv: Condvar,
    pub time_index: Mutex<TimeIndex>,
}

impl Shared {
    /// Cancels whichever executor is active and waits for the sequential
    /// worker to reach idle. Idempotent, safe from any thread except the
    /// execution callbacks themselves.
    pub(crate) fn stop_execution(&self, auto_clear: bool) {
        {
            let mut slot = self.exec.lock();
            if !slot.execution_complete {
                slot.stop_requested = true;
                slot.run = RunState::Cancelling;
                for handle in &mut slot.active_handles {
                    if let Err(e) = handle.cancel() {
                        warn!(error = %e, "handle cancel failed");
                    }
                }
                self.exec_cv.notify_all();
                while !slot.execution_complete {
                    self.exec_cv.wait(&mut slot);
                }
            }
            if auto_clear {
                slot.contexts.clear();
                self.time_index.lock().stamps.clear();
            }
        }
        self.stop_continuous();
    }
    /// Asks the continuous executor to cancel its handles and drop its queue
    pub(crate) fn stop_continuous(&self) {
        let mut queue = self.queue.lock();
        if queue.worker.is_some() {
            queue.stop_requested = true;
            self.queue_cv.notify_all();
        }
    }
    /// Maps a textual event to an executor operation
    pub(crate) fn process_event(&self, event: &str) {
        match event {
            "stop" => {
                warn!("stop event received, stopping execution");
                self.stop_execution(true);
            }
            other => warn!(event = other, "unknown execution event ignored"),
        }
    }
}

/// The sequential worker: executes the queued contexts in order, one at a
/// time, then reports the aggregate status exactly once
pub(crate) fn run_batch(
    shared: &Arc<Shared>,
    callback: Option<ExecutionCompleteCallback>,
    part_callback: Option<PartCompleteCallback>,
    auto_clear: bool,
) {
    let mut status = ExecutionStatus::Succeeded;
    let mut index = 0;
    loop {
        let context = {
            let mut slot = shared.exec.lock();
            if index >= slot.contexts.len() {
                break;
            }
            if slot.stop_requested {
                status = ExecutionStatus::Preempted;
                break;
            }
            slot.run = RunState::Validating;
            slot.current_index = Some(index);
            slot.contexts[index].clone()
        };
        shared.time_index.lock().stamps.push(Monotonic::now());
        status = execute_context(shared, &context);
        if status == ExecutionStatus::Succeeded {
            if let Some(cb) = &part_callback {
                cb(index);
            }
            index += 1;
        } else {
            break;
        }
    }
    if status == ExecutionStatus::Succeeded && shared.config.lock().wait_for_trajectory_completion
    {
        wait_for_robot_to_stop(shared);
    }
    debug!(status = %status, "execution batch finished");
    shared.time_index.lock().last_status = status;
    {
        let mut slot = shared.exec.lock();
        slot.current_index = None;
        slot.active_handles.clear();
        slot.run = RunState::Idle;
        slot.stop_requested = false;
        slot.execution_complete = true;
        if auto_clear {
            slot.contexts.clear();
            shared.time_index.lock().stamps.clear();
        }
        shared.exec_cv.notify_all();
    }
    if let Some(cb) = callback {
        cb(status);
    }
}

fn execute_context(shared: &Arc<Shared>, context: &TrajectoryContext) -> ExecutionStatus {
    let (manage, tolerance) = {
        let config = shared.config.lock();
        (config.manage_controllers, config.allowed_start_tolerance)
    };
    if let Err(e) = shared.registry.ensure_active(&context.controllers, manage) {
        error!(error = %e, "controller activation failed");
        return ExecutionStatus::Aborted;
    }
    if tolerance > 0.0 {
        let Some(state) = shared.monitor.current_state() else {
            error!("no robot state available, aborting");
            return ExecutionStatus::Aborted;
        };
        if let Err(e) = validate_start_state(context, &state, &*shared.model, tolerance) {
            error!(error = %e, "start state validation failed");
            return ExecutionStatus::Aborted;
        }
    }
    if shared.exec.lock().stop_requested {
        return ExecutionStatus::Preempted;
    }
    let mut handles: Vec<Box<dyn ControllerHandle>> = Vec::with_capacity(context.controllers.len());
    for (name, part) in context.controllers.iter().zip(context.parts.iter()) {
        let dispatched = shared
            .controllers
            .controller_handle(name)
            .and_then(|mut handle| {
                handle.send_trajectory(part)?;
                Ok(handle)
            });
        match dispatched {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(controller = %name, error = %e, "dispatch failed");
                for handle in &mut handles {
                    if let Err(e) = handle.cancel() {
                        warn!(error = %e, "handle cancel failed");
                    }
                }
                return ExecutionStatus::Aborted;
            }
        }
    }
    let started = Monotonic::now();
    let deadline = {
        let config = shared.config.lock();
        if config.execution_duration_monitoring {
            let mut expected = Duration::ZERO;
            for (name, part) in context.controllers.iter().zip(context.parts.iter()) {
                let scaled =
                    part.duration().mul_f64(config.duration_scaling(name)) + config.goal_margin(name);
                expected = expected.max(scaled);
            }
            Some(expected)
        } else {
            None
        }
    };
    let mut slot = shared.exec.lock();
    if slot.stop_requested {
        for handle in &mut handles {
            let _ = handle.cancel();
        }
        return ExecutionStatus::Preempted;
    }
    slot.run = RunState::Executing;
    slot.active_handles = handles;
    loop {
        if slot.stop_requested {
            // a stop raced the dispatch: make sure every handle sees it
            for handle in &mut slot.active_handles {
                let _ = handle.cancel();
            }
            return ExecutionStatus::Preempted;
        }
        if let Some(aggregate) = poll_handles(&slot.active_handles) {
            return aggregate;
        }
        let timeout = match deadline {
            Some(deadline) => {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "execution deadline exceeded, cancelling"
                    );
                    cancel_and_ack(shared, &mut slot);
                    return ExecutionStatus::TimedOut;
                }
                (deadline - elapsed).min(POLL_STEP)
            }
            None => POLL_STEP,
        };
        shared.exec_cv.wait_for(&mut slot, timeout);
    }
}

/// Some(aggregate) once every handle is terminal: SUCCEEDED iff all
/// succeeded, else the first non-success status in handle order
fn poll_handles(handles: &[Box<dyn ControllerHandle>]) -> Option<ExecutionStatus> {
    if handles
        .iter()
        .any(|handle| handle.last_execution_status().is_running())
    {
        return None;
    }
    let mut aggregate = ExecutionStatus::Succeeded;
    for handle in handles {
        let status = handle.last_execution_status();
        if status != ExecutionStatus::Succeeded {
            aggregate = status;
            break;
        }
    }
    Some(aggregate)
}

fn cancel_and_ack(shared: &Shared, slot: &mut MutexGuard<'_, ExecSlot>) {
    for handle in &mut slot.active_handles {
        if let Err(e) = handle.cancel() {
            warn!(error = %e, "handle cancel failed");
        }
    }
    let waited = Monotonic::now();
    while slot
        .active_handles
        .iter()
        .any(|handle| handle.last_execution_status().is_running())
        && waited.elapsed() < CANCEL_ACK_TIMEOUT
    {
        shared.exec_cv.wait_for(slot, POLL_STEP);
    }
}

/// Best-effort wait for the robot to report zero motion after a successful
/// batch; the batch status is kept either way
fn wait_for_robot_to_stop(shared: &Shared) {
    let started = Monotonic::now();
    let mut idle_streak = 0;
    while started.elapsed() < WAIT_FOR_STOP_TIMEOUT {
        let Some(state) = shared.monitor.current_state() else {
            debug!("no robot state available, skipping the stop wait");
            return;
        };
        if !state.velocities.is_empty()
            && state
                .velocities
                .iter()
                .all(|velocity| velocity.abs() < IDLE_VELOCITY_EPS)
        {
            idle_streak += 1;
            if idle_streak >= IDLE_SAMPLES {
                return;
            }
        } else {
            idle_streak = 0;
        }
        thread::sleep(POLL_STEP);
    }
    warn!("the robot did not report a full stop in time");
}
