/*
    force.rs - The roster aggregate

    A force is a named, owned collection of groups, each holding an ordered
    list of units, plus C3 networks linking units together. The force is the
    unit of replication and conflict resolution.

    Invariants:
    - every unit belongs to exactly one group
    - group ids and unit ids are unique inside the force
    - `timestamp` never moves backwards under the mutation API below
    - a force without `instance_id` has never been persisted

    Every mutation bumps a revision counter published on a watch channel;
    the sync layer listens to it instead of hooking property setters.
*/

use super::c3::C3Network;
use super::errors::{ModelError, ModelResult};
use super::game_system::GameSystem;
use super::group::Group;
use super::snapshot::{ForceSnapshot, GroupSnapshot, SNAPSHOT_VERSION};
use super::types::{format_timestamp, parse_timestamp, ForceId, GroupId, UnitId};
use super::unit::{Crew, Unit};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex, MutexGuard, TryLockError};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Force {
    instance_id: Option<ForceId>,
    name: String,
    name_lock: bool,
    timestamp: DateTime<Utc>,
    owned: bool,
    game_system: GameSystem,
    groups: Vec<Group>,
    c3_networks: Vec<C3Network>,
    revision: watch::Sender<u64>,
}

impl Force {
    /// Use `GameSystem::new_force` from outside the model
    pub(crate) fn new(game_system: GameSystem, name: impl Into<String>) -> Self {
        let (revision, _) = watch::channel(0);
        Force {
            instance_id: None,
            name: name.into(),
            name_lock: false,
            timestamp: Utc::now(),
            owned: true,
            game_system,
            groups: Vec::new(),
            c3_networks: Vec::new(),
            revision,
        }
    }

    pub fn instance_id(&self) -> Option<&ForceId> {
        self.instance_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_lock(&self) -> bool {
        self.name_lock
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn game_system(&self) -> GameSystem {
        self.game_system
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| &g.id == id)
    }

    pub fn c3_networks(&self) -> &[C3Network] {
        &self.c3_networks
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.groups.iter().flat_map(|g| g.units.iter())
    }

    pub fn unit_count(&self) -> usize {
        self.groups.iter().map(|g| g.units.len()).sum()
    }

    /// Locate a unit and the group holding it
    pub fn find_unit(&self, id: &UnitId) -> Option<(&Group, &Unit)> {
        self.groups
            .iter()
            .find_map(|g| g.unit(id).map(|u| (g, u)))
    }

    /// Current mutation revision
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receive a notification after every mutation
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.timestamp {
            self.timestamp = now;
        }
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn group_mut(&mut self, id: &GroupId) -> ModelResult<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| &g.id == id)
            .ok_or_else(|| ModelError::GroupNotFound(id.clone()))
    }

    fn unit_mut(&mut self, id: &UnitId) -> ModelResult<&mut Unit> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.units.iter_mut())
            .find(|u| u.id() == id)
            .ok_or_else(|| ModelError::UnitNotFound(id.clone()))
    }

    fn contains_unit(&self, id: &UnitId) -> bool {
        self.find_unit(id).is_some()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_name_lock(&mut self, locked: bool) {
        self.name_lock = locked;
        self.touch();
    }

    pub fn add_group(&mut self, name: impl Into<String>) -> GroupId {
        let id = GroupId::generate();
        self.groups.push(Group::new(id.clone(), name));
        self.touch();
        id
    }

    pub fn rename_group(&mut self, id: &GroupId, name: impl Into<String>) -> ModelResult<()> {
        self.group_mut(id)?.name = name.into();
        self.touch();
        Ok(())
    }

    pub fn set_group_name_lock(&mut self, id: &GroupId, locked: bool) -> ModelResult<()> {
        self.group_mut(id)?.name_lock = locked;
        self.touch();
        Ok(())
    }

    pub fn set_group_color(&mut self, id: &GroupId, color: Option<String>) -> ModelResult<()> {
        self.group_mut(id)?.color = color;
        self.touch();
        Ok(())
    }

    /// Remove a group and release every unit in it
    pub fn remove_group(&mut self, id: &GroupId) -> ModelResult<()> {
        let index = self
            .groups
            .iter()
            .position(|g| &g.id == id)
            .ok_or_else(|| ModelError::GroupNotFound(id.clone()))?;
        let group = self.groups.remove(index);
        for unit in group.units {
            self.forget_c3_unit(unit.id());
            unit.release();
        }
        self.touch();
        Ok(())
    }

    /// Append a unit to a group. A colliding unit id is replaced by a fresh one.
    pub fn add_unit(&mut self, group: &GroupId, mut unit: Unit) -> ModelResult<UnitId> {
        if unit.game_system() != self.game_system {
            return Err(ModelError::GameSystemMismatch {
                expected: self.game_system.to_string(),
                actual: unit.game_system().to_string(),
            });
        }
        if self.contains_unit(unit.id()) {
            unit.set_id(UnitId::generate());
        }
        let id = unit.id().clone();
        self.group_mut(group)?.units.push(unit);
        self.touch();
        Ok(id)
    }

    pub fn remove_unit(&mut self, id: &UnitId) -> ModelResult<()> {
        let (group_index, unit_index) = self
            .groups
            .iter()
            .enumerate()
            .find_map(|(gi, g)| g.position_of(id).map(|ui| (gi, ui)))
            .ok_or_else(|| ModelError::UnitNotFound(id.clone()))?;
        let unit = self.groups[group_index].units.remove(unit_index);
        self.forget_c3_unit(unit.id());
        unit.release();
        self.touch();
        Ok(())
    }

    /// Move a unit to `index` inside `to_group` (clamped to the group's length)
    pub fn move_unit(&mut self, id: &UnitId, to_group: &GroupId, index: usize) -> ModelResult<()> {
        if self.group(to_group).is_none() {
            return Err(ModelError::GroupNotFound(to_group.clone()));
        }
        let (group_index, unit_index) = self
            .groups
            .iter()
            .enumerate()
            .find_map(|(gi, g)| g.position_of(id).map(|ui| (gi, ui)))
            .ok_or_else(|| ModelError::UnitNotFound(id.clone()))?;
        let unit = self.groups[group_index].units.remove(unit_index);
        let target = self.group_mut(to_group)?;
        let index = index.min(target.units.len());
        target.units.insert(index, unit);
        self.touch();
        Ok(())
    }

    pub fn set_unit_alias(&mut self, id: &UnitId, alias: Option<String>) -> ModelResult<()> {
        self.unit_mut(id)?.set_alias(alias);
        self.touch();
        Ok(())
    }

    pub fn set_unit_crew(&mut self, id: &UnitId, crew: Crew) -> ModelResult<()> {
        self.unit_mut(id)?.set_crew(crew)?;
        self.touch();
        Ok(())
    }

    pub fn set_unit_destroyed(&mut self, id: &UnitId, destroyed: bool) -> ModelResult<()> {
        self.unit_mut(id)?.set_destroyed(destroyed);
        self.touch();
        Ok(())
    }

    /// Add or replace (by id) a C3 network. Every referenced unit must exist.
    pub fn set_c3_network(&mut self, network: C3Network) -> ModelResult<()> {
        if let Some(missing) = network.referenced_units().find(|id| !self.contains_unit(id)) {
            return Err(ModelError::UnitNotFound(missing.clone()));
        }
        match self.c3_networks.iter_mut().find(|n| n.id == network.id) {
            Some(existing) => *existing = network,
            None => self.c3_networks.push(network),
        }
        self.touch();
        Ok(())
    }

    pub fn remove_c3_network(&mut self, id: &str) -> bool {
        let before = self.c3_networks.len();
        self.c3_networks.retain(|n| n.id != id);
        let removed = self.c3_networks.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    fn forget_c3_unit(&mut self, unit: &UnitId) {
        for network in &mut self.c3_networks {
            network.forget_unit(unit);
        }
        self.c3_networks.retain(|n| !n.is_empty());
    }

    /// Release every unit and clear the roster
    pub fn destroy(&mut self) {
        for group in self.groups.drain(..) {
            for unit in group.units {
                unit.release();
            }
        }
        self.c3_networks.clear();
        self.touch();
    }

    /// Give the force a new identity after an ownership conflict
    pub(crate) fn rekey(&mut self, id: ForceId) {
        self.instance_id = Some(id);
        self.owned = true;
    }

    /// Serialize, assigning an instance id if the force never had one.
    /// This is the only place a force gains its durable identity.
    pub fn to_snapshot(&mut self) -> ForceSnapshot {
        if self.instance_id.is_none() {
            let id = ForceId::generate();
            debug!(instance_id = %id, "assigned instance id");
            self.instance_id = Some(id);
        }
        self.build_snapshot()
    }

    /// Serialize without touching identity. Empty groups are left out.
    pub fn build_snapshot(&self) -> ForceSnapshot {
        ForceSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: Some(format_timestamp(&self.timestamp)),
            instance_id: self.instance_id.clone(),
            game_system: self.game_system,
            name: self.name.clone(),
            name_lock: self.name_lock,
            owned: Some(self.owned),
            groups: self
                .groups
                .iter()
                .filter(|g| !g.is_empty())
                .map(|g| GroupSnapshot {
                    id: g.id.clone(),
                    name: g.name.clone(),
                    name_lock: g.name_lock,
                    color: g.color.clone(),
                    units: g.units.iter().map(Unit::to_value).collect(),
                })
                .collect(),
            c3_networks: if self.c3_networks.is_empty() {
                None
            } else {
                Some(self.c3_networks.clone())
            },
        }
    }

    /// Build a force from a snapshot. Units that fail to decode are logged
    /// and skipped; duplicate group/unit ids get fresh ids.
    pub fn from_snapshot(snapshot: ForceSnapshot) -> ModelResult<Force> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }

        let system = snapshot.game_system;
        let mut force = system.new_force(snapshot.name);
        force.instance_id = snapshot.instance_id;
        force.name_lock = snapshot.name_lock;
        force.timestamp = parse_timestamp(snapshot.timestamp.as_deref());
        force.owned = snapshot.owned.unwrap_or(true);

        let mut seen_groups = HashSet::new();
        let mut seen_units = HashSet::new();
        for group_snapshot in snapshot.groups {
            let mut group_id = group_snapshot.id;
            if !seen_groups.insert(group_id.clone()) {
                let fresh = GroupId::generate();
                warn!(duplicate = %group_id, replacement = %fresh, "duplicate group id in snapshot");
                group_id = fresh;
                seen_groups.insert(group_id.clone());
            }

            let mut group = Group::new(group_id, group_snapshot.name);
            group.name_lock = group_snapshot.name_lock;
            group.color = group_snapshot.color;

            for value in &group_snapshot.units {
                match system.unit_from_value(value) {
                    Ok(mut unit) => {
                        if !seen_units.insert(unit.id().clone()) {
                            let fresh = UnitId::generate();
                            warn!(duplicate = %unit.id(), replacement = %fresh, "duplicate unit id in snapshot");
                            unit.set_id(fresh.clone());
                            seen_units.insert(fresh);
                        }
                        group.units.push(unit);
                    }
                    Err(e) => {
                        warn!(
                            instance_id = ?force.instance_id,
                            group = %group.id,
                            error = %e,
                            "skipping unit that failed to load"
                        );
                    }
                }
            }
            force.groups.push(group);
        }

        force.c3_networks = snapshot.c3_networks.unwrap_or_default();
        Ok(force)
    }

    /// Merge a snapshot into this live force without discarding identity.
    ///
    /// Units missing from the snapshot are released, units present on both
    /// sides are updated in place (runtime state survives), new units are
    /// decoded fresh. Groups are matched by id; groups left empty are pruned.
    pub fn update_from_snapshot(&mut self, snapshot: &ForceSnapshot) -> ModelResult<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        if snapshot.game_system != self.game_system {
            return Err(ModelError::GameSystemMismatch {
                expected: self.game_system.to_string(),
                actual: snapshot.game_system.to_string(),
            });
        }

        let system = self.game_system;
        let mut live_units: HashMap<UnitId, Unit> = HashMap::new();
        let mut live_groups: HashMap<GroupId, Group> = HashMap::new();
        for mut group in self.groups.drain(..) {
            for unit in group.units.drain(..) {
                live_units.insert(unit.id().clone(), unit);
            }
            live_groups.insert(group.id.clone(), group);
        }

        let mut seen_units: HashSet<String> = HashSet::new();
        let mut merged = Vec::with_capacity(snapshot.groups.len());
        for group_snapshot in &snapshot.groups {
            let mut group = live_groups
                .remove(&group_snapshot.id)
                .unwrap_or_else(|| Group::new(group_snapshot.id.clone(), ""));
            group.name = group_snapshot.name.clone();
            group.name_lock = group_snapshot.name_lock;
            group.color = group_snapshot.color.clone();

            for value in &group_snapshot.units {
                let existing = ForceSnapshot::unit_id_of(value)
                    .filter(|id| !seen_units.contains(*id))
                    .and_then(|id| live_units.remove(&UnitId::new(id)));

                let unit = match existing {
                    Some(mut unit) => {
                        if let Err(e) = unit.apply_value(system, value) {
                            warn!(unit_id = %unit.id(), error = %e, "keeping local state of unit");
                        }
                        unit
                    }
                    None => match system.unit_from_value(value) {
                        Ok(mut unit) => {
                            if seen_units.contains(unit.id().as_str()) {
                                unit.set_id(UnitId::generate());
                            }
                            unit
                        }
                        Err(e) => {
                            warn!(group = %group.id, error = %e, "skipping unit that failed to load");
                            continue;
                        }
                    },
                };
                seen_units.insert(unit.id().as_str().to_string());
                group.units.push(unit);
            }
            merged.push(group);
        }

        for (_, unit) in live_units {
            unit.release();
        }
        merged.retain(|g| !g.is_empty());

        self.groups = merged;
        self.name = snapshot.name.clone();
        self.name_lock = snapshot.name_lock;
        self.timestamp = parse_timestamp(snapshot.timestamp.as_deref());
        if let Some(owned) = snapshot.owned {
            self.owned = owned;
        }
        self.c3_networks = snapshot.c3_networks.clone().unwrap_or_default();
        Ok(())
    }
}

/// Shared, lockable reference to a live force
#[derive(Debug, Clone)]
pub struct ForceHandle(Arc<Mutex<Force>>);

/// Non-owning counterpart of `ForceHandle`
#[derive(Debug, Clone)]
pub struct WeakForceHandle(Weak<Mutex<Force>>);

impl ForceHandle {
    pub fn new(force: Force) -> Self {
        ForceHandle(Arc::new(Mutex::new(force)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Force> {
        self.0.lock().await
    }

    /// Lock without waiting; fails if someone else holds the force
    pub fn try_lock(&self) -> Result<MutexGuard<'_, Force>, TryLockError> {
        self.0.try_lock()
    }

    pub async fn instance_id(&self) -> Option<ForceId> {
        self.0.lock().await.instance_id().cloned()
    }

    /// Snapshot the force, assigning an instance id if needed
    pub async fn to_snapshot(&self) -> ForceSnapshot {
        self.0.lock().await.to_snapshot()
    }

    pub fn downgrade(&self) -> WeakForceHandle {
        WeakForceHandle(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ForceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl WeakForceHandle {
    pub fn upgrade(&self) -> Option<ForceHandle> {
        self.0.upgrade().map(ForceHandle)
    }
}
