#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", "README.md"))]
#![deny(missing_docs)]
use core::fmt;
use std::env;
use std::io::Write;

pub use log::LevelFilter;

/// Execution configuration and per-controller overrides
pub mod config;
/// Per-controller trajectory distribution
pub mod distribute;
/// In-process event bus and the execution event topic
pub mod events;
/// The public façade
pub mod manager;
/// Collaborator interfaces: robot model, state monitor, controller manager plugin
pub mod plugin;
/// Controller registry
pub mod registry;
/// Minimum-cover controller selection
pub mod select;
/// Simulated collaborators for tests and development
pub mod sim;
/// Data model: trajectories, joint state, execution status
pub mod types;
/// Start-state validation
pub mod validate;

mod continuous;
mod executor;

/// The crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The trajectory contains no joints
    #[error("trajectory contains no joints")]
    EmptyTrajectory,
    /// No combination of available controllers covers the requested joints
    #[error("no controller cover for joints: {0}")]
    NoCover(String),
    /// Distribution left joints unassigned
    #[error("joints not covered by the selected controllers: {0}")]
    Unassigned(String),
    /// The controller is not known to the registry / manager plugin
    #[error("unknown controller: {0}")]
    UnknownController(String),
    /// Controller management is off and required controllers are not active
    #[error("controllers are not active: {0}")]
    ControllersInactive(String),
    /// The controller manager plugin rejected an activation switch
    #[error("controller switch failed: {0}")]
    SwitchFailed(String),
    /// The first trajectory waypoint deviates from the observed robot state
    #[error("start state deviates from the trajectory: {0}")]
    StartState(String),
    /// No fresh robot state sample is available
    #[error("robot state unavailable")]
    StateUnavailable,
    /// Controller handle acquisition or dispatch errors
    #[error("controller handle error: {0}")]
    Handle(String),
    /// The executor is not idle
    #[error("executor busy")]
    Busy,
    /// Timeouts
    #[error("timed out")]
    Timeout,
    /// Standard I/O errors
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    /// Invalid data received / parameters provided
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// All other errors
    #[error("operation failed: {0}")]
    Failed(String),
}

impl Error {
    /// Creates new invalid data error
    pub fn invalid_data<S: fmt::Display>(msg: S) -> Self {
        Error::InvalidData(msg.to_string())
    }
    /// Creates new controller handle error
    pub fn handle<S: fmt::Display>(msg: S) -> Self {
        Error::Handle(msg.to_string())
    }
    /// Creates new function failed error
    pub fn failed<S: fmt::Display>(msg: S) -> Self {
        Error::Failed(msg.to_string())
    }
}

/// Returns true if started in production mode (as a systemd unit)
pub fn is_production() -> bool {
    env::var("INVOCATION_ID").map_or(false, |v| !v.is_empty())
}

/// Configures stdout logger with the given filter. If started in production mode, does not log
/// timestamps
pub fn configure_logger(filter: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout);
    builder.filter_level(filter);
    if is_production() {
        builder.format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()));
    }
    builder.init();
}

/// Prelude module
pub mod prelude {
    pub use crate::config::ExecutionConfig;
    pub use crate::events::{EventBus, EXECUTION_EVENT_TOPIC};
    pub use crate::manager::{
        ExecutionCompleteCallback, PartCompleteCallback, TrajectoryExecutionManager,
    };
    pub use crate::plugin::{
        ControllerHandle, ControllerManager, ControllerState, ParamSource, RobotModel,
        StateMonitor,
    };
    pub use crate::types::{
        ExecutionStatus, JointKind, JointState, JointTrajectory, MultiDofPoint,
        MultiDofTrajectory, RobotTrajectory, TrajectoryContext, TrajectoryPoint, Transform,
    };
    pub use bma_ts::Monotonic;
    pub use std::time::Duration;
}
