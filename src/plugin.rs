use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::def::PluginDef;
use crate::dispatch::{
    DiagnosticSink, DispatchOutcome, DispatchPolicy, ScriptArgs, SilentSink, TriggerContext,
    TriggerResult, dispatch,
};
use crate::error::{PlugError, Result};
use crate::holder::HolderId;
use crate::key::{KeySpace, TriggerKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unattached,
    Attached,
    // terminal
    Detached,
}

/// A behavior instance. Made by [`PluginDef::create`], attached to at most
/// one [`crate::holder::PluginHolder`], which owns it while attached.
pub struct Plugin {
    def: Option<Arc<PluginDef>>,
    container: Option<HolderId>,
    state: PluginState,
    fields: Map<String, Value>,
}

impl Plugin {
    pub fn new(def: Option<Arc<PluginDef>>) -> Self {
        let fields = def.as_ref().map(|d| d.defaults().clone()).unwrap_or_default();
        Self::restore(def, fields)
    }
    // Used by loaders, the saved fields replace the definition defaults.
    pub fn restore(def: Option<Arc<PluginDef>>, fields: Map<String, Value>) -> Self {
        Self {
            def,
            container: None,
            state: PluginState::Unattached,
            fields,
        }
    }
    pub fn def(&self) -> Option<&Arc<PluginDef>> {
        self.def.as_ref()
    }
    pub fn defname(&self) -> Option<&str> {
        self.def.as_ref().map(|d| d.defname())
    }
    pub fn container(&self) -> Option<HolderId> {
        self.container
    }
    pub fn state(&self) -> PluginState {
        self.state
    }
    pub fn is_attached(&self) -> bool {
        self.state == PluginState::Attached
    }
    pub fn is_detached(&self) -> bool {
        self.state == PluginState::Detached
    }
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.to_owned(), value.into())
    }
    pub fn handler_count(&self, trigger: &TriggerKey) -> usize {
        self.def.as_ref().map_or(0, |d| d.handlers(trigger).len())
    }

    // ------------- Lifecycle -------------
    pub(crate) fn attach(&mut self, holder: HolderId) -> Result<()> {
        match (self.state, self.container) {
            (PluginState::Unattached, _) => {
                self.container = Some(holder);
                self.state = PluginState::Attached;
                Ok(())
            }
            (PluginState::Attached, Some(current)) => Err(PlugError::AlreadyAttached(current.get())),
            _ => Err(PlugError::Detached),
        }
    }
    // Clears the back-reference. Returns false if there was nothing to detach.
    pub(crate) fn detach(&mut self) -> bool {
        if self.state != PluginState::Attached {
            return false;
        }
        self.container = None;
        self.state = PluginState::Detached;
        true
    }
    /// Deletes an instance no holder owns: `destroy` is delivered best effort,
    /// then the instance is terminal. Attached instances are deleted through
    /// their holder instead.
    pub fn delete(mut self, keys: &KeySpace, sink: &dyn DiagnosticSink) -> DispatchOutcome {
        let outcome = self.try_run(keys.destroy(), &ScriptArgs::new(), sink);
        self.state = PluginState::Detached;
        debug!(def = self.defname().unwrap_or("-"), "plugin deleted");
        outcome
    }

    // ------------- Triggers -------------
    pub fn dispatch(
        &mut self,
        trigger: &TriggerKey,
        args: &ScriptArgs,
        policy: DispatchPolicy,
        cancellable: bool,
        sink: &dyn DiagnosticSink,
    ) -> DispatchOutcome {
        let Some(def) = self.def.as_ref() else {
            return DispatchOutcome::empty();
        };
        let mut ctx = TriggerContext::new(trigger, Some(def.defname()), self.container, &mut self.fields);
        dispatch(def.handlers(trigger), &mut ctx, args, policy, cancellable, sink)
    }
    /// Strict delivery: the first failing handler stops the rest and its
    /// failure is returned.
    pub fn run(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> Result<()> {
        self.dispatch(trigger, args, DispatchPolicy::Strict, false, &SilentSink)
            .into_result(trigger)
            .map(|_| ())
    }
    /// Best-effort delivery: every handler runs, failures only reach `sink`.
    pub fn try_run(&mut self, trigger: &TriggerKey, args: &ScriptArgs, sink: &dyn DiagnosticSink) -> DispatchOutcome {
        self.dispatch(trigger, args, DispatchPolicy::BestEffort, false, sink)
    }
    pub fn run_cancellable(&mut self, trigger: &TriggerKey, args: &ScriptArgs) -> Result<TriggerResult> {
        self.dispatch(trigger, args, DispatchPolicy::Strict, true, &SilentSink)
            .into_result(trigger)
    }
    pub fn try_run_cancellable(
        &mut self,
        trigger: &TriggerKey,
        args: &ScriptArgs,
        sink: &dyn DiagnosticSink,
    ) -> TriggerResult {
        self.dispatch(trigger, args, DispatchPolicy::BestEffort, true, sink).result()
    }
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("def", &self.defname())
            .field("container", &self.container)
            .field("state", &self.state)
            .field("fields", &self.fields)
            .finish()
    }
}
