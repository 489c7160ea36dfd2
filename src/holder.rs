//! The container side of the plugin mechanism.
//!
//! A [`PluginHolder`] owns its plugins in an arena keyed by [`PluginId`] and
//! pairs every plugin with exactly one [`PluginKey`] (a bidirectional map, so
//! either side finds the other). Plugins attached normally are also kept in a
//! dispatch list, newest first; "simple" plugins are stored by key only and do
//! not receive container-wide triggers.
//!
//! Lifecycle triggers delivered by the holder itself, all best effort:
//! * `assign` after a plugin is attached through [`PluginHolder::add_plugin`]
//!   or [`PluginHolder::add_plugin_as_simple`] (not when restoring a save);
//! * `destroy` while a plugin is still attached, when it is deleted;
//! * `unassign` after a plugin was detached, with the holder id as argument.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// used to keep the one-to-one mapping between plugin keys and attached plugins
use bimap::BiMap;
use serde_json::Value;
use tracing::debug;

use crate::def::PluginDef;
use crate::dispatch::{DiagnosticSink, DispatchOutcome, DispatchPolicy, ScriptArgs, TriggerResult};
use crate::error::{PlugError, Result};
use crate::key::{KeyHasher, KeySpace, PluginKey, TagKey, TriggerKey};
use crate::plugin::Plugin;

// ------------- Ids -------------
static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// Non-owning reference from a plugin back to its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(u64);
impl HolderId {
    pub fn next() -> Self {
        Self(NEXT_HOLDER.fetch_add(1, Ordering::Relaxed))
    }
    pub fn get(self) -> u64 {
        self.0
    }
}
impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "holder#{}", self.0)
    }
}

/// Handle of a plugin inside one holder. Never reused by that holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);
impl PluginId {
    pub fn get(self) -> u64 {
        self.0
    }
}

// ------------- PluginHolder -------------
pub struct PluginHolder {
    id: HolderId,
    keys: Arc<KeySpace>,
    sink: Arc<dyn DiagnosticSink>,
    next_plugin: u64,
    kept: HashMap<PluginId, Plugin, KeyHasher>,
    keyed: BiMap<PluginKey, PluginId>,
    // dispatch order, simple plugins are not in here
    list: Vec<PluginId>,
    simple: HashSet<PluginId, KeyHasher>,
    tags: HashMap<TagKey, Value, KeyHasher>,
}

impl PluginHolder {
    pub fn new(keys: Arc<KeySpace>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            id: HolderId::next(),
            keys,
            sink,
            next_plugin: 0,
            kept: HashMap::default(),
            keyed: BiMap::new(),
            list: Vec::new(),
            simple: HashSet::default(),
            tags: HashMap::default(),
        }
    }
    pub fn id(&self) -> HolderId {
        self.id
    }
    pub fn keys(&self) -> &Arc<KeySpace> {
        &self.keys
    }
    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    // ------------- Attaching -------------
    pub fn add_plugin(&mut self, key: &PluginKey, plugin: Plugin) -> Result<PluginId> {
        self.attach(key, plugin, true, true)
    }
    pub fn add_plugin_as_simple(&mut self, key: &PluginKey, plugin: Plugin) -> Result<PluginId> {
        self.attach(key, plugin, false, true)
    }
    pub fn add_new_plugin(&mut self, key: &PluginKey, def: &Arc<PluginDef>) -> Result<PluginId> {
        self.add_plugin(key, def.create())
    }
    pub fn add_new_plugin_as_simple(&mut self, key: &PluginKey, def: &Arc<PluginDef>) -> Result<PluginId> {
        self.add_plugin_as_simple(key, def.create())
    }
    // Same as adding, minus the assign trigger.
    pub fn restore_plugin(&mut self, key: &PluginKey, plugin: Plugin, simple: bool) -> Result<PluginId> {
        self.attach(key, plugin, !simple, false)
    }

    fn attach(&mut self, key: &PluginKey, mut plugin: Plugin, listed: bool, announce: bool) -> Result<PluginId> {
        if plugin.is_detached() {
            return Err(PlugError::Detached);
        }
        if self.keyed.contains_left(key) {
            debug!(holder = %self.id, key = %key, "replacing plugin");
            self.delete_plugin(key);
        }
        plugin.attach(self.id)?;
        self.next_plugin += 1;
        let id = PluginId(self.next_plugin);
        self.keyed.insert(key.clone(), id);
        if listed {
            self.list.insert(0, id);
        } else {
            self.simple.insert(id);
        }
        debug!(holder = %self.id, key = %key, def = plugin.defname().unwrap_or("-"), simple = !listed, "plugin attached");
        let plugin = self.kept.entry(id).or_insert(plugin);
        if announce {
            plugin.try_run(self.keys.assign(), &ScriptArgs::new(), self.sink.as_ref());
        }
        Ok(id)
    }

    // ------------- Lookup -------------
    pub fn get_plugin(&self, key: &PluginKey) -> Option<&Plugin> {
        self.keyed.get_by_left(key).and_then(|id| self.kept.get(id))
    }
    pub fn get_plugin_mut(&mut self, key: &PluginKey) -> Option<&mut Plugin> {
        let id = *self.keyed.get_by_left(key)?;
        self.kept.get_mut(&id)
    }
    pub fn plugin(&self, id: PluginId) -> Option<&Plugin> {
        self.kept.get(&id)
    }
    pub fn plugin_id(&self, key: &PluginKey) -> Option<PluginId> {
        self.keyed.get_by_left(key).copied()
    }
    pub fn key_of(&self, id: PluginId) -> Option<&PluginKey> {
        self.keyed.get_by_right(&id)
    }
    pub fn has_plugin(&self, key: &PluginKey) -> bool {
        self.keyed.contains_left(key)
    }
    pub fn contains(&self, id: PluginId) -> bool {
        self.kept.contains_key(&id)
    }
    pub fn is_simple(&self, key: &PluginKey) -> bool {
        self.plugin_id(key).is_some_and(|id| self.simple.contains(&id))
    }
    /// Plugins that receive container triggers, in dispatch order: newest
    /// first, since every attach puts the plugin at the front of the list.
    pub fn plugins(&self) -> impl Iterator<Item = (&PluginKey, &Plugin)> + '_ {
        self.list.iter().filter_map(move |id| Some((self.keyed.get_by_right(id)?, self.kept.get(id)?)))
    }
    /// Every plugin with its key, simple ones included, in no particular order.
    pub fn all_plugins(&self) -> impl Iterator<Item = (&PluginKey, &Plugin)> + '_ {
        self.keyed.iter().filter_map(move |(key, id)| Some((key, self.kept.get(id)?)))
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }

    // ------------- Detaching -------------
    /// Removes the plugin from the list and the key map and clears its
    /// back-reference in one step. Detaching an id that is not (or no longer)
    /// here does nothing.
    pub fn detach(&mut self, id: PluginId) -> Option<Plugin> {
        let mut plugin = self.kept.remove(&id)?;
        self.keyed.remove_by_right(&id);
        if !self.simple.remove(&id) {
            self.list.retain(|listed| *listed != id);
        }
        plugin.detach();
        debug!(holder = %self.id, def = plugin.defname().unwrap_or("-"), "plugin detached");
        let args = ScriptArgs::with(vec![Value::from(self.id.get())]);
        plugin.try_run(self.keys.unassign(), &args, self.sink.as_ref());
        Some(plugin)
    }
    pub fn remove_plugin(&mut self, key: &PluginKey) -> Option<Plugin> {
        let id = self.plugin_id(key)?;
        self.detach(id)
    }
    /// Delivers `destroy` while the plugin is still attached, then detaches
    /// and drops it. Failing handlers can not prevent the deletion.
    pub fn delete_plugin(&mut self, key: &PluginKey) -> bool {
        match self.plugin_id(key) {
            Some(id) => self.delete(id),
            None => false,
        }
    }
    pub fn delete(&mut self, id: PluginId) -> bool {
        let Some(plugin) = self.kept.get_mut(&id) else {
            return false;
        };
        plugin.try_run(self.keys.destroy(), &ScriptArgs::new(), self.sink.as_ref());
        self.detach(id).is_some()
    }
    pub fn delete_plugins(&mut self) {
        let ids: Vec<PluginId> = self.keyed.right_values().copied().collect();
        for id in ids {
            self.delete(id);
        }
    }

    // ------------- Triggers -------------
    pub fn dispatch(
        &mut self,
        trigger: &TriggerKey,
        args: &ScriptArgs,
        policy: DispatchPolicy,
        cancellable: bool,
    ) -> DispatchOutcome {
        let mut ran = 0;
        let mut failures = Vec::new();
        // position of the first handler of the current plugin in the whole sequence
        let mut offset = 0;
        for id in &self.list {
            let Some(plugin) = self.kept.get_mut(id) else {
                continue;
            };
            let count = plugin.handler_count(trigger);
            match plugin.dispatch(trigger, args, policy, cancellable, self.sink.as_ref()) {
                DispatchOutcome::Completed { ran: r, cancelled, failures: f } => {
                    ran += r;
                    failures.extend(f.into_iter().map(|mut failure| {
                        failure.at += offset;
                        failure
                    }));
                    if cancelled {
                        return DispatchOutcome::Completed { ran, cancelled, failures };
                    }
                }
                DispatchOutcome::Aborted { at, error } => {
                    return DispatchOutcome::Aborted { at: offset + at, error };
                }
            }
            offset += count;
        }
        DispatchOutcome::Completed { ran, cancelled: false, failures }
    }
    pub fn trigger(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> Result<()> {
        self.dispatch(trigger, args, DispatchPolicy::Strict, false)
            .into_result(trigger)
            .map(|_| ())
    }
    pub fn try_trigger(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> DispatchOutcome {
        self.dispatch(trigger, args, DispatchPolicy::BestEffort, false)
    }
    pub fn cancellable_trigger(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> Result<TriggerResult> {
        self.dispatch(trigger, args, DispatchPolicy::Strict, true).into_result(trigger)
    }
    pub fn try_cancellable_trigger(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> TriggerResult {
        self.dispatch(trigger, args, DispatchPolicy::BestEffort, true).result()
    }

    // ------------- Tags -------------
    pub fn set_tag(&mut self, key: &TagKey, value: impl Into<Value>) -> Option<Value> {
        self.tags.insert(key.clone(), value.into())
    }
    pub fn tag(&self, key: &TagKey) -> Option<&Value> {
        self.tags.get(key)
    }
    pub fn has_tag(&self, key: &TagKey) -> bool {
        self.tags.contains_key(key)
    }
    pub fn remove_tag(&mut self, key: &TagKey) -> Option<Value> {
        self.tags.remove(key)
    }
    pub fn clear_tags(&mut self) {
        self.tags.clear();
    }
    pub fn tags(&self) -> impl Iterator<Item = (&TagKey, &Value)> + '_ {
        self.tags.iter()
    }
}

impl fmt::Debug for PluginHolder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PluginHolder")
            .field("id", &self.id)
            .field("plugins", &self.kept.len())
            .field("listed", &self.list.len())
            .field("tags", &self.tags.len())
            .finish()
    }
}
