use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plugin::ParamSource;
use crate::{Error, Result};

/// Parameter key prefix for per-controller execution duration scaling
pub const PARAM_DURATION_SCALING: &str = "allowed_execution_duration_scaling";
/// Parameter key prefix for per-controller goal duration margin (seconds)
pub const PARAM_GOAL_MARGIN: &str = "allowed_goal_duration_margin";

/// Static execution configuration
///
/// The values are set before `execute` and are not changed by the executors.
/// Per-controller overrides take precedence over the global scaling/margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Activate/deactivate controllers as required (off: required controllers
    /// must already be active)
    pub manage_controllers: bool,
    /// Expected duration multiplier applied before the goal margin
    pub allowed_execution_duration_scaling: f64,
    /// Time added after the scaled expected duration
    pub allowed_goal_duration_margin: Duration,
    /// Maximum allowed deviation of the first waypoint from the observed
    /// state, radians (or meters for prismatic joints). 0 disables validation
    pub allowed_start_tolerance: f64,
    /// After a successful batch, wait for the robot to report zero motion
    pub wait_for_trajectory_completion: bool,
    /// Cancel parts which overrun their deadline
    pub execution_duration_monitoring: bool,
    /// Per-controller duration scaling overrides
    pub duration_scaling_overrides: BTreeMap<Arc<str>, f64>,
    /// Per-controller goal margin overrides
    pub goal_margin_overrides: BTreeMap<Arc<str>, Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            manage_controllers: false,
            allowed_execution_duration_scaling: 1.1,
            allowed_goal_duration_margin: Duration::from_millis(500),
            allowed_start_tolerance: 0.01,
            wait_for_trajectory_completion: true,
            execution_duration_monitoring: true,
            duration_scaling_overrides: <_>::default(),
            goal_margin_overrides: <_>::default(),
        }
    }
}

impl ExecutionConfig {
    /// Duration scaling for the given controller (override or global)
    pub fn duration_scaling(&self, controller: &str) -> f64 {
        self.duration_scaling_overrides
            .get(controller)
            .copied()
            .unwrap_or(self.allowed_execution_duration_scaling)
    }
    /// Goal duration margin for the given controller (override or global)
    pub fn goal_margin(&self, controller: &str) -> Duration {
        self.goal_margin_overrides
            .get(controller)
            .copied()
            .unwrap_or(self.allowed_goal_duration_margin)
    }
    /// Reads per-controller overrides from a parameter source
    ///
    /// Keys are `allowed_execution_duration_scaling/<controller>` and
    /// `allowed_goal_duration_margin/<controller>` (seconds); absent keys fall
    /// back to the globals.
    pub fn load_overrides(&mut self, params: &dyn ParamSource, controllers: &[Arc<str>]) {
        for name in controllers {
            if let Some(v) = params.get_f64(&format!("{}/{}", PARAM_DURATION_SCALING, name)) {
                self.duration_scaling_overrides.insert(name.clone(), v);
            }
            if let Some(v) = params.get_f64(&format!("{}/{}", PARAM_GOAL_MARGIN, name)) {
                self.goal_margin_overrides
                    .insert(name.clone(), Duration::from_secs_f64(v));
            }
        }
    }
}

/// Loads the configuration from a JSON file
pub fn load<P: AsRef<Path>>(path: P) -> Result<ExecutionConfig> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(Error::invalid_data)
}

/// Saves the configuration to a JSON file
pub fn save<P: AsRef<Path>>(path: P, config: &ExecutionConfig) -> Result<()> {
    let mut file = File::create(path)?;
    let data = serde_json::to_vec_pretty(config).map_err(Error::failed)?;
    file.write_all(&data)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimParams;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert!(!config.manage_controllers);
        assert!(config.execution_duration_monitoring);
        assert!(config.wait_for_trajectory_completion);
        insta::assert_snapshot!(config.allowed_execution_duration_scaling, @"1.1");
        insta::assert_snapshot!(config.allowed_start_tolerance, @"0.01");
        assert_eq!(config.allowed_goal_duration_margin, Duration::from_millis(500));
    }

    #[test]
    fn test_override_fallback() {
        let params = SimParams::new()
            .with_value("allowed_execution_duration_scaling/arm", 2.0)
            .with_value("allowed_goal_duration_margin/arm", 1.5);
        let mut config = ExecutionConfig::default();
        config.load_overrides(&params, &["arm".into(), "gripper".into()]);
        assert_eq!(config.duration_scaling("arm"), 2.0);
        assert_eq!(config.goal_margin("arm"), Duration::from_millis(1500));
        assert_eq!(config.duration_scaling("gripper"), 1.1);
        assert_eq!(config.goal_margin("gripper"), Duration::from_millis(500));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = ExecutionConfig::default();
        config.manage_controllers = true;
        config.duration_scaling_overrides.insert("arm".into(), 1.5);
        let data = serde_json::to_string(&config).unwrap();
        let parsed: ExecutionConfig = serde_json::from_str(&data).unwrap();
        assert!(parsed.manage_controllers);
        assert_eq!(parsed.duration_scaling("arm"), 1.5);
    }
}
