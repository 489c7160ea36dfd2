use std::sync::{Arc, Mutex};

use plugkeys::def::{DefCatalog, PluginDef, Provenance};
use plugkeys::dispatch::{CollectingSink, ScriptArgs, SilentSink, TriggerResult};
use plugkeys::error::PlugError;
use plugkeys::holder::PluginHolder;
use plugkeys::key::KeySpace;
use plugkeys::plugin::{Plugin, PluginState};
use serde_json::Value;

type Log = Arc<Mutex<Vec<String>>>;

fn setup() -> (Arc<KeySpace>, PluginHolder) {
    let keys = Arc::new(KeySpace::default());
    let holder = PluginHolder::new(Arc::clone(&keys), Arc::new(SilentSink));
    (keys, holder)
}

// Records every lifecycle trigger together with the container it saw.
fn lifecycle_def(keys: &KeySpace, log: &Log) -> Arc<PluginDef> {
    let mut builder = PluginDef::builder("p_watch", Provenance::new("watch.scp", 7));
    for trigger in [keys.assign(), keys.unassign(), keys.destroy()] {
        let log = Arc::clone(log);
        builder = builder.on(trigger, move |ctx, _args| {
            let seen = match ctx.container() {
                Some(holder) => format!("{}@{}", ctx.trigger().name(), holder.get()),
                None => format!("{}@none", ctx.trigger().name()),
            };
            log.lock().unwrap().push(seen);
            Ok(TriggerResult::Continue)
        });
    }
    builder.build()
}

#[test]
fn attach_sets_back_reference_and_announces() {
    let (keys, mut holder) = setup();
    let log = Log::default();
    let def = lifecycle_def(&keys, &log);
    let key = keys.plugin("Watch");
    let id = holder.add_new_plugin(&key, &def).expect("attach");

    let plugin = holder.get_plugin(&key).expect("attached");
    assert_eq!(plugin.state(), PluginState::Attached);
    assert_eq!(plugin.container(), Some(holder.id()));
    assert_eq!(holder.key_of(id), Some(&key));
    assert_eq!(*log.lock().unwrap(), vec![format!("assign@{}", holder.id().get())]);
}

#[test]
fn detach_twice_is_a_no_op() {
    let (keys, mut holder) = setup();
    let def = PluginDef::builder("p_plain", Provenance::new("plain.scp", 1)).build();
    let a = holder.add_new_plugin(&keys.plugin("a"), &def).expect("attach");
    let b = holder.add_new_plugin(&keys.plugin("b"), &def).expect("attach");

    let detached = holder.detach(a).expect("first detach");
    assert_eq!(detached.state(), PluginState::Detached);
    assert_eq!(detached.container(), None);
    let remaining: Vec<_> = holder.plugins().map(|(k, _)| k.name().to_owned()).collect();
    assert_eq!(remaining, vec!["b"]);

    assert!(holder.detach(a).is_none());
    let after: Vec<_> = holder.plugins().map(|(k, _)| k.name().to_owned()).collect();
    assert_eq!(after, remaining);
    assert!(holder.contains(b));
    assert!(!holder.has_plugin(&keys.plugin("a")));
}

#[test]
fn detached_plugin_can_not_be_attached_again() {
    let (keys, mut holder) = setup();
    let key = keys.plugin("once");
    holder.add_plugin(&key, Plugin::default()).expect("attach");
    let removed = holder.remove_plugin(&key).expect("removed");
    assert!(matches!(holder.add_plugin(&key, removed), Err(PlugError::Detached)));
    assert!(holder.is_empty());
}

#[test]
fn deleting_one_instance_leaves_its_sibling_alone() {
    let (keys, mut holder) = setup();
    let log = Log::default();
    let def = lifecycle_def(&keys, &log);
    let first = keys.plugin("first");
    let second = keys.plugin("second");
    holder.add_new_plugin(&first, &def).expect("attach");
    holder.add_new_plugin(&second, &def).expect("attach");
    log.lock().unwrap().clear();

    assert!(holder.delete_plugin(&first));
    assert!(!holder.has_plugin(&first));
    let sibling = holder.get_plugin(&second).expect("still attached");
    assert_eq!(sibling.state(), PluginState::Attached);
    assert_eq!(sibling.container(), Some(holder.id()));
    assert_eq!(holder.plugins().count(), 1);

    // destroy still sees the holder, unassign comes after the detach
    let holder_id = holder.id().get();
    assert_eq!(
        *log.lock().unwrap(),
        vec![format!("destroy@{holder_id}"), "unassign@none".to_string()]
    );
}

#[test]
fn failing_destroy_handler_does_not_prevent_deletion() {
    let keys = Arc::new(KeySpace::default());
    let sink = Arc::new(CollectingSink::new());
    let mut holder = PluginHolder::new(Arc::clone(&keys), sink.clone());
    let def = PluginDef::builder("p_stubborn", Provenance::new("stubborn.scp", 2))
        .on(keys.destroy(), |_ctx, _args| Err("will not die".to_string()))
        .build();
    let key = keys.plugin("stubborn");
    holder.add_new_plugin(&key, &def).expect("attach");

    assert!(holder.delete_plugin(&key));
    assert!(holder.is_empty());
    let reported = sink.take();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].trigger, "destroy");
}

#[test]
fn adding_under_an_occupied_key_replaces_the_old_plugin() {
    let (keys, mut holder) = setup();
    let log = Log::default();
    let def = lifecycle_def(&keys, &log);
    let key = keys.plugin("slot");
    let old = holder.add_new_plugin(&key, &def).expect("attach");
    let new = holder.add_new_plugin(&key, &def).expect("attach");

    assert_ne!(old, new);
    assert!(!holder.contains(old));
    assert_eq!(holder.plugin_id(&key), Some(new));
    assert_eq!(holder.len(), 1);
    let holder_id = holder.id().get();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            format!("assign@{holder_id}"),
            format!("destroy@{holder_id}"),
            "unassign@none".to_string(),
            format!("assign@{holder_id}"),
        ]
    );
}

#[test]
fn simple_plugins_do_not_get_container_triggers() {
    let (keys, mut holder) = setup();
    let tick = keys.trigger("tick");
    let def = PluginDef::builder("p_ticker", Provenance::new("ticker.scp", 1))
        .field("ticks", 0)
        .on(&tick, |ctx, _args| {
            let ticks = ctx.field("ticks").and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.set_field("ticks", ticks + 1);
            Ok(TriggerResult::Continue)
        })
        .build();
    let listed = keys.plugin("listed");
    let simple = keys.plugin("simple");
    holder.add_new_plugin(&listed, &def).expect("attach");
    holder.add_new_plugin_as_simple(&simple, &def).expect("attach");

    holder.trigger(&tick, &ScriptArgs::new()).expect("trigger");
    assert!(holder.is_simple(&simple));
    assert!(!holder.is_simple(&listed));
    assert_eq!(holder.get_plugin(&listed).unwrap().field("ticks"), Some(&Value::from(1)));
    assert_eq!(holder.get_plugin(&simple).unwrap().field("ticks"), Some(&Value::from(0)));
    assert_eq!(holder.all_plugins().count(), 2);

    // but they can still be run directly
    let sink = SilentSink;
    holder.get_plugin_mut(&simple).unwrap().try_run(&tick, &ScriptArgs::new(), &sink);
    assert_eq!(holder.get_plugin(&simple).unwrap().field("ticks"), Some(&Value::from(1)));
}

#[test]
fn plugins_come_newest_first_and_simple_marks_go_with_the_plugin() {
    let (keys, mut holder) = setup();
    for name in ["first", "second", "third"] {
        holder.add_plugin(&keys.plugin(name), Plugin::new(None)).expect("attach");
    }
    let order: Vec<_> = holder.plugins().map(|(key, _)| key.name().to_owned()).collect();
    assert_eq!(order, vec!["third", "second", "first"]);

    // a key that was simple and is attached again as listed loses the mark
    let shared = keys.plugin("shared");
    holder.add_plugin_as_simple(&shared, Plugin::new(None)).expect("attach");
    assert!(holder.is_simple(&shared));
    assert!(holder.remove_plugin(&shared).is_some());
    assert!(!holder.is_simple(&shared));
    holder.add_plugin(&shared, Plugin::new(None)).expect("attach");
    assert!(!holder.is_simple(&shared));
    assert_eq!(holder.plugins().next().map(|(key, _)| key.name()), Some("shared"));
    assert_eq!(holder.plugins().count(), 4);
}

#[test]
fn delete_plugins_empties_the_holder() {
    let (keys, mut holder) = setup();
    let def = PluginDef::builder("p_plain", Provenance::new("plain.scp", 1)).build();
    holder.add_new_plugin(&keys.plugin("a"), &def).expect("attach");
    holder.add_new_plugin_as_simple(&keys.plugin("b"), &def).expect("attach");
    holder.delete_plugins();
    assert!(holder.is_empty());
    assert_eq!(holder.plugins().count(), 0);
}

#[test]
fn deleting_an_unattached_plugin_runs_destroy_without_container() {
    let keys = KeySpace::default();
    let log = Log::default();
    let plugin = lifecycle_def(&keys, &log).create();
    let outcome = plugin.delete(&keys, &SilentSink);
    assert_eq!(outcome.ran(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["destroy@none"]);
}

#[test]
fn reloaded_definition_leaves_existing_instances_on_the_old_one() {
    let (keys, mut holder) = setup();
    let mut catalog = DefCatalog::new();
    let old = PluginDef::builder("p_buff", Provenance::new("buff.scp", 1)).field("power", 1).build();
    catalog.register(Arc::clone(&old));
    let key = keys.plugin("buff");
    holder.add_new_plugin(&key, &catalog.get("P_BUFF").expect("registered")).expect("attach");

    let new = PluginDef::builder("p_buff", Provenance::new("buff.scp", 40)).field("power", 2).build();
    let replaced = catalog.register(Arc::clone(&new)).expect("replaced");
    assert!(Arc::ptr_eq(&replaced, &old));
    assert_eq!(catalog.len(), 1);

    let attached = holder.get_plugin(&key).unwrap();
    assert!(Arc::ptr_eq(attached.def().unwrap(), &old));
    assert_eq!(new.create().field("power"), Some(&Value::from(2)));
}

#[test]
fn tags_are_keyed_by_interned_tag_keys() {
    let (keys, mut holder) = setup();
    let color = keys.tag("Color");
    assert_eq!(holder.set_tag(&color, "red"), None);
    assert_eq!(holder.tag(&keys.tag("COLOR")), Some(&Value::from("red")));
    assert!(holder.has_tag(&color));
    assert_eq!(holder.remove_tag(&color), Some(Value::from("red")));
    assert!(!holder.has_tag(&color));
    holder.set_tag(&color, 1);
    holder.clear_tags();
    assert_eq!(holder.tags().count(), 0);
}
