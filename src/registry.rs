use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use bma_ts::Monotonic;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::plugin::{ControllerManager, ControllerState};
use crate::{Error, Result};

/// Controller metadata older than this is refreshed from the manager plugin
/// before any selection or activation decision
pub const CONTROLLER_INFO_MAX_AGE: Duration = Duration::from_secs(1);

/// Cached metadata of a known controller
#[derive(Debug, Clone, Serialize)]
pub struct ControllerInfo {
    /// Controller name
    pub name: Arc<str>,
    /// Joints the controller actuates
    pub joints: BTreeSet<Arc<str>>,
    /// Names of other controllers whose joint sets intersect this one's
    /// (always symmetric)
    pub overlapping_controllers: BTreeSet<Arc<str>>,
    /// Activity flags reported by the manager plugin
    pub state: ControllerState,
    /// When the entry was last refreshed
    pub last_update: Monotonic,
}

impl ControllerInfo {
    /// The ordering key used for deterministic selection: joint set size
    /// ascending, then name ascending
    #[inline]
    pub fn sort_key(&self) -> (usize, Arc<str>) {
        (self.joints.len(), self.name.clone())
    }
}

/// Tracks known controllers, their joint sets, activity state and overlap
/// graph, refreshing from the controller manager plugin on a max-age policy
///
/// The internal mutex is a strict leaf: it is never held across plugin calls.
pub struct ControllerRegistry {
    manager: Arc<dyn ControllerManager>,
    known: Mutex<BTreeMap<Arc<str>, ControllerInfo>>,
}

impl ControllerRegistry {
    /// Creates a new, empty registry
    pub fn new(manager: Arc<dyn ControllerManager>) -> Self {
        Self {
            manager,
            known: <_>::default(),
        }
    }
    /// Queries the manager plugin for all known controllers and rebuilds the
    /// registry, including the overlap graph
    pub fn reload(&self) -> Result<()> {
        let names = self.manager.controller_names();
        let now = Monotonic::now();
        let mut fresh: BTreeMap<Arc<str>, ControllerInfo> = BTreeMap::new();
        for name in names {
            let joints = self.manager.controller_joints(&name)?;
            let state = self.manager.controller_state(&name)?;
            fresh.insert(
                name.clone(),
                ControllerInfo {
                    name,
                    joints,
                    overlapping_controllers: <_>::default(),
                    state,
                    last_update: now,
                },
            );
        }
        rebuild_overlaps(&mut fresh);
        debug!(controllers = fresh.len(), "controller registry reloaded");
        *self.known.lock() = fresh;
        Ok(())
    }
    /// Reloads the registry if any entry is older than the given age (an
    /// empty registry is always reloaded)
    pub fn refresh_if_older_than(&self, age: Duration) -> Result<()> {
        let stale = {
            let known = self.known.lock();
            known
                .values()
                .map(|info| info.last_update)
                .min()
                .map_or(true, |oldest| oldest.elapsed() > age)
        };
        if stale {
            self.reload()
        } else {
            Ok(())
        }
    }
    /// Refreshes the activity state of a single controller if its entry is
    /// older than the given age; an unknown controller triggers a full reload
    pub fn refresh_one(&self, name: &str, age: Duration) -> Result<()> {
        {
            let known = self.known.lock();
            match known.get(name) {
                Some(info) if info.last_update.elapsed() <= age => return Ok(()),
                Some(_) => {}
                None => {
                    drop(known);
                    return self.reload();
                }
            }
        }
        let state = self.manager.controller_state(name)?;
        let mut known = self.known.lock();
        if let Some(info) = known.get_mut(name) {
            info.state = state;
            info.last_update = Monotonic::now();
        }
        Ok(())
    }
    /// Returns true if the controller is known and active
    pub fn is_active(&self, name: &str) -> bool {
        self.known
            .lock()
            .get(name)
            .map_or(false, |info| info.state.active)
    }
    /// Returns true if every listed controller is known and active
    pub fn are_active(&self, names: &[Arc<str>]) -> bool {
        let known = self.known.lock();
        names
            .iter()
            .all(|name| known.get(name.as_ref()).map_or(false, |i| i.state.active))
    }
    /// Makes sure the listed controllers are active
    ///
    /// With `manage` off the call succeeds only if all of them already are.
    /// Otherwise active controllers whose joints overlap a requested one but
    /// which are not themselves requested are deactivated, and the missing
    /// ones activated, in a single atomic switch request. A plugin failure is
    /// reported as-is with no retries; the registry reconciles on the next
    /// reload.
    pub fn ensure_active(&self, names: &[Arc<str>], manage: bool) -> Result<()> {
        self.refresh_if_older_than(CONTROLLER_INFO_MAX_AGE)?;
        let (to_activate, to_deactivate) = {
            let known = self.known.lock();
            for name in names {
                if !known.contains_key(name.as_ref()) {
                    return Err(Error::UnknownController(name.to_string()));
                }
            }
            if !manage {
                let inactive: Vec<&str> = names
                    .iter()
                    .filter(|n| !known[n.as_ref()].state.active)
                    .map(|n| n.as_ref())
                    .collect();
                if inactive.is_empty() {
                    return Ok(());
                }
                return Err(Error::ControllersInactive(inactive.join(", ")));
            }
            let requested: BTreeSet<&str> = names.iter().map(|n| n.as_ref()).collect();
            let to_activate: Vec<Arc<str>> = names
                .iter()
                .filter(|n| !known[n.as_ref()].state.active)
                .cloned()
                .collect();
            let mut to_deactivate: BTreeSet<Arc<str>> = BTreeSet::new();
            for name in names {
                for other in &known[name.as_ref()].overlapping_controllers {
                    if requested.contains(other.as_ref()) {
                        continue;
                    }
                    if known.get(other.as_ref()).map_or(false, |i| i.state.active) {
                        to_deactivate.insert(other.clone());
                    }
                }
            }
            if to_activate.is_empty() && to_deactivate.is_empty() {
                return Ok(());
            }
            (to_activate, to_deactivate.into_iter().collect::<Vec<_>>())
        };
        debug!(activate = ?to_activate, deactivate = ?to_deactivate, "switching controllers");
        self.manager
            .switch_controllers(&to_activate, &to_deactivate)
            .map_err(|e| Error::SwitchFailed(e.to_string()))?;
        let mut known = self.known.lock();
        let now = Monotonic::now();
        for name in &to_activate {
            if let Some(info) = known.get_mut(name.as_ref()) {
                info.state.active = true;
                info.last_update = now;
            }
        }
        for name in &to_deactivate {
            if let Some(info) = known.get_mut(name.as_ref()) {
                info.state.active = false;
                info.last_update = now;
            }
        }
        Ok(())
    }
    /// A snapshot of all known controllers, sorted by the selection ordering
    /// key (joint set size ascending, then name)
    pub fn snapshot(&self) -> Vec<ControllerInfo> {
        let mut infos: Vec<ControllerInfo> = self.known.lock().values().cloned().collect();
        infos.sort_by_key(ControllerInfo::sort_key);
        infos
    }
    /// Metadata of a single controller
    pub fn info(&self, name: &str) -> Option<ControllerInfo> {
        self.known.lock().get(name).cloned()
    }
    /// Number of known controllers
    pub fn len(&self) -> usize {
        self.known.lock().len()
    }
    /// Returns true if no controllers are known
    pub fn is_empty(&self) -> bool {
        self.known.lock().is_empty()
    }
}

fn rebuild_overlaps(map: &mut BTreeMap<Arc<str>, ControllerInfo>) {
    let entries: Vec<(Arc<str>, BTreeSet<Arc<str>>)> = map
        .iter()
        .map(|(name, info)| (name.clone(), info.joints.clone()))
        .collect();
    for i in 0..entries.len() {
        for j in i + 1..entries.len() {
            if entries[i].1.is_disjoint(&entries[j].1) {
                continue;
            }
            if let Some(info) = map.get_mut(entries[i].0.as_ref()) {
                info.overlapping_controllers.insert(entries[j].0.clone());
            }
            if let Some(info) = map.get_mut(entries[j].0.as_ref()) {
                info.overlapping_controllers.insert(entries[i].0.clone());
            }
        }
    }
}
