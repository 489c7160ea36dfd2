//! Trigger delivery.
//!
//! A trigger is delivered to an ordered sequence of handlers under one of two
//! policies:
//! * [`DispatchPolicy::Strict`] stops at the first failing handler and hands the
//!   failure back to the caller ([`DispatchOutcome::Aborted`]).
//! * [`DispatchPolicy::BestEffort`] runs every handler; failures go to a
//!   [`DiagnosticSink`] and are listed in [`DispatchOutcome::Completed`], but
//!   never surface as an error.
//!
//! Independently of the policy, a *cancellable* delivery stops as soon as a
//! handler returns [`TriggerResult::Cancel`].

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{PlugError, Result};
use crate::holder::HolderId;
use crate::key::{TriggerKey, lock};
use crate::settings::Diagnostics;

// ------------- Arguments -------------
/// Ordered argument bag handed to every handler of one delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptArgs {
    argv: Vec<Value>,
}
impl ScriptArgs {
    pub fn new() -> Self {
        Self { argv: Vec::new() }
    }
    pub fn with(argv: Vec<Value>) -> Self {
        Self { argv }
    }
    pub fn push(&mut self, value: impl Into<Value>) {
        self.argv.push(value.into());
    }
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.argv.get(index)
    }
    pub fn argv(&self) -> &[Value] {
        &self.argv
    }
    pub fn len(&self) -> usize {
        self.argv.len()
    }
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

// ------------- Handlers -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerResult {
    #[default]
    Continue,
    Cancel,
}

pub type HandlerResult = std::result::Result<TriggerResult, String>;

pub type Handler = Arc<dyn Fn(&mut TriggerContext<'_>, &ScriptArgs) -> HandlerResult + Send + Sync>;

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut TriggerContext<'_>, &ScriptArgs) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a handler gets to see of the plugin it runs for.
pub struct TriggerContext<'a> {
    trigger: &'a TriggerKey,
    defname: Option<&'a str>,
    container: Option<HolderId>,
    fields: &'a mut Map<String, Value>,
}
impl<'a> TriggerContext<'a> {
    pub(crate) fn new(
        trigger: &'a TriggerKey,
        defname: Option<&'a str>,
        container: Option<HolderId>,
        fields: &'a mut Map<String, Value>,
    ) -> Self {
        Self { trigger, defname, container, fields }
    }
    pub fn trigger(&self) -> &TriggerKey {
        self.trigger
    }
    pub fn defname(&self) -> Option<&str> {
        self.defname
    }
    /// The holder the plugin is attached to. Still set while `destroy` runs.
    pub fn container(&self) -> Option<HolderId> {
        self.container
    }
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.to_owned(), value.into())
    }
    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        self.fields
    }
}

// ------------- Outcome -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    Strict,
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub trigger: String,
    pub defname: Option<String>,
    pub at: usize,
    pub message: String,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Every handler in the sequence ran, or a handler cancelled a cancellable delivery.
    Completed {
        ran: usize,
        cancelled: bool,
        failures: Vec<HandlerFailure>,
    },
    /// Strict delivery stopped at handler `at`.
    Aborted { at: usize, error: PlugError },
}

impl DispatchOutcome {
    pub fn empty() -> Self {
        Self::Completed { ran: 0, cancelled: false, failures: Vec::new() }
    }
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
    pub fn ran(&self) -> usize {
        match self {
            Self::Completed { ran, .. } => *ran,
            Self::Aborted { at, .. } => at + 1,
        }
    }
    pub fn result(&self) -> TriggerResult {
        match self {
            Self::Completed { cancelled: true, .. } => TriggerResult::Cancel,
            _ => TriggerResult::Continue,
        }
    }
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Self::Completed { failures, .. } => failures,
            Self::Aborted { .. } => &[],
        }
    }
    pub fn into_result(self, trigger: &TriggerKey) -> Result<TriggerResult> {
        match self {
            Self::Completed { cancelled, .. } => Ok(if cancelled {
                TriggerResult::Cancel
            } else {
                TriggerResult::Continue
            }),
            Self::Aborted { at, error } => Err(PlugError::Aborted {
                trigger: trigger.name().to_owned(),
                at,
                source: Box::new(error),
            }),
        }
    }
}

// ------------- Diagnostics -------------
/// Receives the failures best-effort delivery swallows.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, failure: &HandlerFailure);
}

#[derive(Debug, Default)]
pub struct TracingSink;
impl DiagnosticSink for TracingSink {
    fn report(&self, failure: &HandlerFailure) {
        warn!(
            trigger = %failure.trigger,
            def = failure.defname.as_deref().unwrap_or("-"),
            at = failure.at,
            error = %failure.message,
            "trigger handler failed"
        );
    }
}

#[derive(Debug, Default)]
pub struct SilentSink;
impl DiagnosticSink for SilentSink {
    fn report(&self, _failure: &HandlerFailure) {}
}

/// Keeps every reported failure until taken.
#[derive(Debug, Default)]
pub struct CollectingSink {
    failures: Mutex<Vec<HandlerFailure>>,
}
impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn take(&self) -> Vec<HandlerFailure> {
        std::mem::take(&mut *lock(&self.failures))
    }
    pub fn len(&self) -> usize {
        lock(&self.failures).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl DiagnosticSink for CollectingSink {
    fn report(&self, failure: &HandlerFailure) {
        lock(&self.failures).push(failure.clone());
    }
}

pub fn sink_for(diagnostics: Diagnostics) -> Arc<dyn DiagnosticSink> {
    match diagnostics {
        Diagnostics::Log => Arc::new(TracingSink),
        Diagnostics::Silent => Arc::new(SilentSink),
    }
}

// ------------- Delivery -------------
pub fn dispatch(
    handlers: &[Handler],
    ctx: &mut TriggerContext<'_>,
    args: &ScriptArgs,
    policy: DispatchPolicy,
    cancellable: bool,
    sink: &dyn DiagnosticSink,
) -> DispatchOutcome {
    let mut ran = 0;
    let mut failures = Vec::new();
    for (at, handler) in handlers.iter().enumerate() {
        let result = handler(ctx, args);
        ran += 1;
        match result {
            Ok(TriggerResult::Cancel) if cancellable => {
                return DispatchOutcome::Completed { ran, cancelled: true, failures };
            }
            Ok(_) => (),
            Err(message) => match policy {
                DispatchPolicy::Strict => {
                    return DispatchOutcome::Aborted {
                        at,
                        error: PlugError::Handler {
                            trigger: ctx.trigger.name().to_owned(),
                            message,
                        },
                    };
                }
                DispatchPolicy::BestEffort => {
                    let failure = HandlerFailure {
                        trigger: ctx.trigger.name().to_owned(),
                        defname: ctx.defname.map(str::to_owned),
                        at,
                        message,
                    };
                    sink.report(&failure);
                    failures.push(failure);
                }
            },
        }
    }
    DispatchOutcome::Completed { ran, cancelled: false, failures }
}
