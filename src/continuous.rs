use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use crate::executor::{Shared, POLL_STEP};
use crate::plugin::ControllerHandle;
use crate::types::{ExecutionStatus, TrajectoryContext};

/// One dispatched part of a continuously executed context
pub(crate) struct ActivePart {
    pub controller: Arc<str>,
    pub handle: Box<dyn ControllerHandle>,
}

/// State of the continuous (push-and-execute) queue
#[derive(Default)]
pub(crate) struct QueueSlot {
    pub deque: VecDeque<TrajectoryContext>,
    pub stop_requested: bool,
    pub shutdown: bool,
    pub active: Vec<ActivePart>,
    pub worker: Option<JoinHandle<()>>,
}

/// The continuous worker: services the push-and-execute queue in FIFO order
///
/// Contexts are dispatched without waiting for the previous context's handles
/// on disjoint controllers; only a part whose controller is still busy waits,
/// and only for that single handle. Context statuses are recorded into the
/// last status readback, no callbacks are invoked.
pub(crate) fn run_continuous(shared: Arc<Shared>) {
    debug!("continuous execution worker started");
    'main: loop {
        let context = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    cancel_active(&mut queue);
                    queue.deque.clear();
                    debug!("continuous execution worker stopped");
                    return;
                }
                if queue.stop_requested {
                    cancel_active(&mut queue);
                    queue.deque.clear();
                    queue.stop_requested = false;
                    continue;
                }
                reap_finished(&shared, &mut queue);
                if let Some(context) = queue.deque.pop_front() {
                    break context;
                }
                shared.queue_cv.wait_for(&mut queue, POLL_STEP);
            }
        };
        let manage = shared.config.lock().manage_controllers;
        if let Err(e) = shared.registry.ensure_active(&context.controllers, manage) {
            error!(error = %e, "controller activation failed, dropping the trajectory");
            shared.time_index.lock().last_status = ExecutionStatus::Aborted;
            continue;
        }
        for (name, part) in context.controllers.iter().zip(context.parts.iter()) {
            // a busy controller delays only its own part
            loop {
                let mut queue = shared.queue.lock();
                if queue.shutdown || queue.stop_requested {
                    continue 'main;
                }
                reap_finished(&shared, &mut queue);
                if queue.active.iter().any(|p| p.controller == *name) {
                    shared.queue_cv.wait_for(&mut queue, POLL_STEP);
                } else {
                    break;
                }
            }
            let dispatched = shared
                .controllers
                .controller_handle(name)
                .and_then(|mut handle| {
                    handle.send_trajectory(part)?;
                    Ok(handle)
                });
            match dispatched {
                Ok(handle) => shared.queue.lock().active.push(ActivePart {
                    controller: name.clone(),
                    handle,
                }),
                Err(e) => {
                    error!(controller = %name, error = %e, "dispatch failed, dropping the trajectory");
                    shared.time_index.lock().last_status = ExecutionStatus::Aborted;
                    continue 'main;
                }
            }
        }
    }
}

fn cancel_active(queue: &mut QueueSlot) {
    for part in &mut queue.active {
        if let Err(e) = part.handle.cancel() {
            warn!(error = %e, "handle cancel failed");
        }
    }
    queue.active.clear();
}

/// Removes finished handles from the active list, recording their statuses
fn reap_finished(shared: &Shared, queue: &mut QueueSlot) {
    let mut i = 0;
    while i < queue.active.len() {
        let status = queue.active[i].handle.last_execution_status();
        if status.is_running() {
            i += 1;
            continue;
        }
        let part = queue.active.swap_remove(i);
        debug!(controller = %part.controller, status = %status, "continuous part finished");
        shared.time_index.lock().last_status = status;
    }
}
