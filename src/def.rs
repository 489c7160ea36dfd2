use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::dispatch::{Handler, HandlerResult, ScriptArgs, TriggerContext, handler};
use crate::key::{KeyHasher, TriggerKey};
use crate::plugin::Plugin;

// ------------- Provenance -------------
/// Where a definition was loaded from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub file: String,
    pub line: usize,
}
impl Provenance {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self { file: file.into(), line }
    }
}
impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

// ------------- PluginDef -------------
/// Static description of a pluggable behavior. Holds no instances, it only
/// knows how to make them.
pub struct PluginDef {
    defname: String,
    provenance: Provenance,
    defaults: Map<String, Value>,
    triggers: HashMap<TriggerKey, Vec<Handler>, KeyHasher>,
}

impl PluginDef {
    pub fn builder(defname: impl Into<String>, provenance: Provenance) -> PluginDefBuilder {
        PluginDefBuilder {
            defname: defname.into(),
            provenance,
            defaults: Map::new(),
            triggers: HashMap::default(),
        }
    }
    pub fn defname(&self) -> &str {
        &self.defname
    }
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }
    pub fn handlers(&self, trigger: &TriggerKey) -> &[Handler] {
        self.triggers.get(trigger).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn has_trigger(&self, trigger: &TriggerKey) -> bool {
        self.triggers.contains_key(trigger)
    }
    /// A fresh, unattached instance wired to this definition.
    pub fn create(self: &Arc<Self>) -> Plugin {
        Plugin::new(Some(Arc::clone(self)))
    }
}

impl fmt::Debug for PluginDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut triggers: Vec<_> = self.triggers.keys().map(|k| k.name()).collect();
        triggers.sort_unstable();
        f.debug_struct("PluginDef")
            .field("defname", &self.defname)
            .field("provenance", &self.provenance)
            .field("defaults", &self.defaults)
            .field("triggers", &triggers)
            .finish()
    }
}

pub struct PluginDefBuilder {
    defname: String,
    provenance: Provenance,
    defaults: Map<String, Value>,
    triggers: HashMap<TriggerKey, Vec<Handler>, KeyHasher>,
}

impl PluginDefBuilder {
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.to_owned(), value.into());
        self
    }
    // Handlers of one trigger run in the order they were added.
    pub fn on<F>(self, trigger: &TriggerKey, f: F) -> Self
    where
        F: Fn(&mut TriggerContext<'_>, &ScriptArgs) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_handler(trigger, handler(f))
    }
    pub fn on_handler(mut self, trigger: &TriggerKey, handler: Handler) -> Self {
        self.triggers.entry(trigger.clone()).or_default().push(handler);
        self
    }
    pub fn build(self) -> Arc<PluginDef> {
        Arc::new(PluginDef {
            defname: self.defname,
            provenance: self.provenance,
            defaults: self.defaults,
            triggers: self.triggers,
        })
    }
}

// ------------- DefCatalog -------------
/// Loaded definitions by case-insensitive defname.
#[derive(Debug, Default)]
pub struct DefCatalog {
    kept: HashMap<String, Arc<PluginDef>, KeyHasher>,
}

impl DefCatalog {
    pub fn new() -> Self {
        Self { kept: HashMap::default() }
    }
    /// Registers `def`, replacing (and returning) an earlier definition of the
    /// same name. Instances made from the earlier one keep pointing at it.
    pub fn register(&mut self, def: Arc<PluginDef>) -> Option<Arc<PluginDef>> {
        let previous = self.kept.insert(def.defname().to_lowercase(), Arc::clone(&def));
        if let Some(previous) = &previous {
            debug!(
                defname = def.defname(),
                from = %previous.provenance(),
                to = %def.provenance(),
                "definition reloaded"
            );
        }
        previous
    }
    pub fn get(&self, defname: &str) -> Option<Arc<PluginDef>> {
        self.kept.get(&defname.to_lowercase()).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
